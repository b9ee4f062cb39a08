//! JSON file descriptor store.

use crate::mcp_bridge::{
    domain::ServerDescriptor,
    ports::{ServerDescriptorStore, ServerStoreError, ServerStoreResult},
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServersDocument {
    #[serde(default)]
    servers: Vec<ServerDescriptor>,
}

/// Persists the descriptor list as a single JSON document.
///
/// Writes go to a sibling temporary file that is renamed over the target, so
/// readers never observe a partial list. A missing file loads as empty.
#[derive(Debug, Clone)]
pub struct JsonFileServerStore {
    path: Utf8PathBuf,
}

impl JsonFileServerStore {
    /// Creates a store backed by `path`. Nothing is touched until used.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn split_path(path: &Utf8Path) -> ServerStoreResult<(Utf8PathBuf, String)> {
    let file_name = path.file_name().ok_or_else(|| {
        ServerStoreError::persistence(std::io::Error::other("store path must name a file"))
    })?;
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent.to_owned(), file_name.to_owned()))
}

fn read_document(path: &Utf8Path) -> ServerStoreResult<Vec<ServerDescriptor>> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(&parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ServerStoreError::persistence(err)),
    };
    let contents = match dir.read_to_string(&file_name) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ServerStoreError::persistence(err)),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let document: ServersDocument =
        serde_json::from_str(&contents).map_err(ServerStoreError::invalid_persisted_data)?;
    Ok(document.servers)
}

/// Opens `path`, creating missing components below its nearest existing
/// ancestor.
fn open_or_create_dir(path: &Utf8Path) -> std::io::Result<Dir> {
    match Dir::open_ambient_dir(path, ambient_authority()) {
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        opened => return opened,
    }
    for ancestor in path.ancestors().skip(1) {
        let base = if ancestor.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            ancestor
        };
        let Ok(existing) = Dir::open_ambient_dir(base, ambient_authority()) else {
            continue;
        };
        let missing = path.strip_prefix(ancestor).map_err(std::io::Error::other)?;
        existing.create_dir_all(missing)?;
        return existing.open_dir(missing);
    }
    Err(std::io::Error::new(
        ErrorKind::NotFound,
        format!("no existing ancestor for {path}"),
    ))
}

fn write_document(path: &Utf8Path, servers: Vec<ServerDescriptor>) -> ServerStoreResult<()> {
    let (parent, file_name) = split_path(path)?;
    let dir = open_or_create_dir(&parent).map_err(ServerStoreError::persistence)?;

    let encoded = serde_json::to_string_pretty(&ServersDocument { servers })
        .map_err(ServerStoreError::persistence)?;
    let temp_name = format!(".{file_name}.tmp");
    dir.write(&temp_name, encoded.as_bytes())
        .map_err(ServerStoreError::persistence)?;
    dir.rename(&temp_name, &dir, &file_name)
        .map_err(ServerStoreError::persistence)
}

fn join_error(err: tokio::task::JoinError) -> ServerStoreError {
    ServerStoreError::persistence(std::io::Error::other(err.to_string()))
}

#[async_trait]
impl ServerDescriptorStore for JsonFileServerStore {
    async fn load(&self) -> ServerStoreResult<Vec<ServerDescriptor>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_document(&path))
            .await
            .map_err(join_error)?
    }

    async fn save(&self, servers: &[ServerDescriptor]) -> ServerStoreResult<()> {
        let path = self.path.clone();
        let owned = servers.to_vec();
        tokio::task::spawn_blocking(move || write_document(&path, owned))
            .await
            .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_bridge::domain::{NewServer, ServerName, ServerTransport};
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("temporary directory")
    }

    fn store_in(dir: &TempDir, relative: &str) -> JsonFileServerStore {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
        JsonFileServerStore::new(root.join(relative))
    }

    fn descriptor(name: &str) -> ServerDescriptor {
        ServerDescriptor::new(
            NewServer::new(
                ServerName::new(name).expect("valid name"),
                ServerTransport::process("echo-server").expect("valid command"),
            ),
            &DefaultClock,
        )
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn missing_file_loads_empty(temp_dir: TempDir) {
        let store = store_in(&temp_dir, "absent/servers.json");
        let loaded = store.load().await.expect("missing file is not an error");
        assert!(loaded.is_empty());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn saved_list_is_loaded_back(temp_dir: TempDir) {
        let store = store_in(&temp_dir, "nested/dir/servers.json");
        let first = descriptor("alpha");
        let second = descriptor("beta");

        store
            .save(&[first.clone(), second.clone()])
            .await
            .expect("save should succeed");
        let loaded = store.load().await.expect("load should succeed");

        assert_eq!(loaded, vec![first, second]);
        assert!(!temp_dir.path().join("nested/dir/.servers.json.tmp").exists());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn corrupt_file_is_invalid_persisted_data(temp_dir: TempDir) {
        std::fs::write(temp_dir.path().join("servers.json"), "{ not json").expect("write fixture");
        let store = store_in(&temp_dir, "servers.json");

        let error = store.load().await.expect_err("corrupt file should fail");
        assert!(matches!(error, ServerStoreError::InvalidPersistedData(_)));
    }
}
