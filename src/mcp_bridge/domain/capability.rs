//! Tool and resource metadata reported by tool servers.

use super::{ServerDomainError, ServerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of every qualified tool name.
const QUALIFIED_TOOL_PREFIX: &str = "mcp";

/// Metadata for a tool exposed by a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "empty_object_schema")]
    input_schema: Value,
}

fn empty_object_schema() -> Value {
    let mut schema = Map::new();
    schema.insert("type".to_owned(), Value::String("object".to_owned()));
    Value::Object(schema)
}

impl ToolDefinition {
    /// Creates a tool definition with an empty object input schema.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDomainError::EmptyToolName`] when the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, ServerDomainError> {
        let normalized_name = name.into().trim().to_owned();
        if normalized_name.is_empty() {
            return Err(ServerDomainError::EmptyToolName);
        }

        Ok(Self {
            name: normalized_name,
            description: None,
            input_schema: empty_object_schema(),
        })
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the JSON input schema.
    #[must_use]
    pub fn with_input_schema(mut self, input_schema: Value) -> Self {
        self.input_schema = input_schema;
        self
    }

    /// Returns the tool name as reported by the server.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the input schema.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

/// Metadata for a resource exposed by a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    uri: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
}

impl ResourceDefinition {
    /// Creates a resource definition.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDomainError::EmptyResourceUri`] when the URI is empty.
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Result<Self, ServerDomainError> {
        let normalized_uri = uri.into().trim().to_owned();
        if normalized_uri.is_empty() {
            return Err(ServerDomainError::EmptyResourceUri);
        }

        Ok(Self {
            uri: normalized_uri,
            name: name.into(),
            description: None,
            mime_type: None,
        })
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Returns the resource URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the MIME type, if any.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }
}

/// Body of a resource as returned by `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// Resource URI.
    pub uri: String,
    /// MIME type, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 binary body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Creates a text body.
    #[must_use]
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some("text/plain".to_owned()),
            text: Some(text.into()),
            blob: None,
        }
    }
}

/// One content item of a tool call result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Plain text.
    Text {
        /// Text body.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type of the payload.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Base64 audio.
    Audio {
        /// Base64 payload.
        data: String,
        /// MIME type of the payload.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource.
    Resource {
        /// Embedded body.
        resource: ResourceContents,
    },
    /// A content type this client does not understand.
    #[serde(other)]
    Unsupported,
}

impl ContentItem {
    /// Creates a text item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content items in server order.
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Whether the server flagged the call as failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful result with the given content.
    #[must_use]
    pub const fn success(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }
}

/// Maps every character outside `[A-Za-z0-9_-]` to `_`.
#[must_use]
pub fn sanitize_capability_name(name: &str) -> String {
    name.chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '_' || character == '-' {
                character
            } else {
                '_'
            }
        })
        .collect()
}

/// Returns the host-facing name of a tool, scoped by its server id.
#[must_use]
pub fn qualify_tool_name(server_id: ServerId, tool_name: &str) -> String {
    format!(
        "{QUALIFIED_TOOL_PREFIX}__{}__{}",
        server_id.simple(),
        sanitize_capability_name(tool_name)
    )
}

/// Returns the host-facing key of a resource, scoped by its server id.
#[must_use]
pub fn qualify_resource_key(server_id: ServerId, uri: &str) -> String {
    format!("{server_id}::{uri}")
}
