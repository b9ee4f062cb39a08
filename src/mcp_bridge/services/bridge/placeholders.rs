//! Placeholder substitution in tool arguments.

use crate::mcp_bridge::domain::{ServerId, ServerName};
use serde_json::{Map, Value};

/// Token replaced by the owning server's display name.
pub const SERVER_NAME_PLACEHOLDER: &str = "{{server_name}}";

/// Token replaced by the owning server's identifier.
pub const SERVER_ID_PLACEHOLDER: &str = "{{server_id}}";

/// Replaces placeholder tokens in every string value, at any depth.
///
/// Keys and non-string values are left untouched.
#[must_use]
pub fn substitute_placeholders(
    arguments: Map<String, Value>,
    server_name: &ServerName,
    server_id: ServerId,
) -> Map<String, Value> {
    let id = server_id.to_string();
    arguments
        .into_iter()
        .map(|(key, value)| (key, substitute_value(value, server_name.as_str(), &id)))
        .collect()
}

fn substitute_value(value: Value, server_name: &str, server_id: &str) -> Value {
    match value {
        Value::String(text) if text.contains("{{") => Value::String(
            text.replace(SERVER_NAME_PLACEHOLDER, server_name)
                .replace(SERVER_ID_PLACEHOLDER, server_id),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| substitute_value(item, server_name, server_id))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, item)| (key, substitute_value(item, server_name, server_id)))
                .collect(),
        ),
        other => other,
    }
}
