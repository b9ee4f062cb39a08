//! In-memory adapters for tests and deterministic local runs.

mod host;
mod notifier;
mod registry;
mod store;

pub use host::{HostEvent, InMemoryToolServerHost, ScriptedReply, ScriptedServer};
pub use notifier::{Notification, RecordingNotifier};
pub use registry::InMemoryCapabilityRegistry;
pub use store::InMemoryServerStore;
