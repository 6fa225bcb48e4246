use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::warn;

use crate::mcp::protocol::text_result;
use crate::memory::{CharacterMemory, MemoryStore, MemoryUpdate};
use crate::session::{MudSession, SessionError};

pub const MUD_CONNECT: &str = "mud_connect";
pub const MUD_SEND: &str = "mud_send";
pub const MUD_READ: &str = "mud_read";
pub const MUD_DISCONNECT: &str = "mud_disconnect";
pub const MEMORY_LOAD: &str = "memory_load";
pub const MEMORY_UPDATE: &str = "memory_update";
pub const MEMORY_ADD_NOTE: &str = "memory_add_note";
pub const MEMORY_GET: &str = "memory_get";

#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn descriptor(name: &str, description: &str, input_schema: Value) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

pub fn list_tools() -> Vec<ToolDescriptor> {
    vec![
        descriptor(
            MUD_CONNECT,
            "Connect to a MUD server via TCP. Returns the welcome/greeting text.",
            json!({
                "type": "object",
                "properties": {
                    "host": {"type": "string", "description": "MUD server hostname or IP"},
                    "port": {"type": "integer", "description": "MUD server port"}
                },
                "required": ["host", "port"]
            }),
        ),
        descriptor(
            MUD_SEND,
            "Send a command to the MUD and return the response. The primary tool for interacting with the game.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command to send to the MUD"}
                },
                "required": ["command"]
            }),
        ),
        descriptor(
            MUD_READ,
            "Read output accumulated since the last read/send, waiting briefly if none has arrived. Use this to catch async events like combat or chat.",
            json!({
                "type": "object",
                "properties": {
                    "timeout_ms": {"type": "integer", "description": "How long to wait for new output, in milliseconds"}
                }
            }),
        ),
        descriptor(
            MUD_DISCONNECT,
            "Disconnect from the MUD server and clean up.",
            json!({"type": "object", "properties": {}}),
        ),
        descriptor(
            MEMORY_LOAD,
            "Load persistent memory for a character: personality, directives, goals, and session history.",
            json!({
                "type": "object",
                "properties": {
                    "character_name": {"type": "string", "description": "Name of the character to load memory for"}
                },
                "required": ["character_name"]
            }),
        ),
        descriptor(
            MEMORY_UPDATE,
            "Update persistent memory for the current character. Known fields are replaced; unknown keys are kept in an extension map.",
            json!({
                "type": "object",
                "properties": {
                    "updates": {
                        "type": "object",
                        "description": "Fields to update (personality, directives, goals, backstory, play_style, session_notes, or custom keys)"
                    }
                },
                "required": ["updates"]
            }),
        ),
        descriptor(
            MEMORY_ADD_NOTE,
            "Add a timestamped session note to persistent memory.",
            json!({
                "type": "object",
                "properties": {
                    "note": {"type": "string", "description": "The note to add to session history"}
                },
                "required": ["note"]
            }),
        ),
        descriptor(
            MEMORY_GET,
            "Get specific fields from the current character's persistent memory.",
            json!({
                "type": "object",
                "properties": {
                    "fields": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Field names to retrieve, e.g. [\"personality\", \"goals\"]"
                    }
                },
                "required": ["fields"]
            }),
        ),
    ]
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub command: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadRequest {
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MemoryLoadRequest {
    pub character_name: String,
}

#[derive(Debug, Deserialize)]
pub struct MemoryUpdateRequest {
    pub updates: MemoryUpdate,
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct MemoryGetRequest {
    pub fields: Vec<String>,
}

const NOT_CONNECTED: &str = "Not connected. Use mud_connect first.";
const NO_MEMORY: &str = "No character memory loaded. Use memory_load first.";

// Session and memory failures come back as tool text, not JSON-RPC errors:
// the conversation should keep flowing after a refused operation.

pub async fn handle_connect(session: &MudSession, request: &ConnectRequest) -> Value {
    match session.connect(&request.host, request.port).await {
        Ok(greeting) if greeting.is_empty() => text_result("(Connected, no initial output yet)"),
        Ok(greeting) => text_result(greeting),
        Err(SessionError::AlreadyConnected) => {
            text_result("Already connected. Disconnect first with mud_disconnect.")
        }
        Err(SessionError::ConnectTimeout(timeout)) => text_result(format!(
            "Connection timed out after {} seconds.",
            timeout.as_secs()
        )),
        Err(err) => text_result(format!("Connection error: {err}")),
    }
}

pub async fn handle_send(session: &MudSession, request: &SendRequest) -> Value {
    match session.send_command(&request.command).await {
        Ok(response) if response.is_empty() => text_result("(No response received)"),
        Ok(response) => text_result(response),
        Err(SessionError::NotConnected) => text_result(NOT_CONNECTED),
        Err(err) => text_result(format!("Send failed: {err}")),
    }
}

pub async fn handle_read(
    session: &MudSession,
    request: &ReadRequest,
    default_window: Duration,
) -> Value {
    let window = request
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(default_window);
    match session.read_output(window).await {
        Ok(text) if text.is_empty() => text_result("No new output."),
        Ok(text) => text_result(text),
        Err(SessionError::NotConnected) => text_result(NOT_CONNECTED),
        Err(err) => text_result(format!("Read failed: {err}")),
    }
}

pub async fn handle_disconnect(session: &MudSession) -> Value {
    match session.disconnect().await {
        Ok(()) => text_result("Disconnected from MUD."),
        Err(SessionError::NotConnected) => text_result("Not currently connected."),
        Err(err) => text_result(format!("Disconnect failed: {err}")),
    }
}

pub async fn handle_memory_load(
    store: &MemoryStore,
    current: &Mutex<Option<CharacterMemory>>,
    request: &MemoryLoadRequest,
) -> Value {
    let memory = store.load(&request.character_name);
    let rendered = serde_json::to_string_pretty(&memory)
        .unwrap_or_else(|_| "{}".to_string());
    *current.lock().await = Some(memory);
    text_result(rendered)
}

pub async fn handle_memory_update(
    store: &MemoryStore,
    current: &Mutex<Option<CharacterMemory>>,
    request: MemoryUpdateRequest,
) -> Value {
    let mut guard = current.lock().await;
    let Some(memory) = guard.as_mut() else {
        return text_result(NO_MEMORY);
    };
    memory.apply(request.updates);
    if let Err(err) = store.save(memory) {
        warn!(error = %err, "failed to save memory");
    }
    text_result(format!(
        "Updated memory for {}. Changes saved.",
        memory.character_name
    ))
}

pub async fn handle_memory_add_note(
    store: &MemoryStore,
    current: &Mutex<Option<CharacterMemory>>,
    request: &AddNoteRequest,
) -> Value {
    let mut guard = current.lock().await;
    let Some(memory) = guard.as_mut() else {
        return text_result(NO_MEMORY);
    };
    memory.add_note(&request.note);
    if let Err(err) = store.save(memory) {
        warn!(error = %err, "failed to save memory");
    }
    text_result("Note added to session history.")
}

pub async fn handle_memory_get(
    current: &Mutex<Option<CharacterMemory>>,
    request: &MemoryGetRequest,
) -> Value {
    let guard = current.lock().await;
    let Some(memory) = guard.as_ref() else {
        return text_result(NO_MEMORY);
    };
    let full = serde_json::to_value(memory).unwrap_or_else(|_| json!({}));
    let mut picked = serde_json::Map::new();
    for field in &request.fields {
        if let Some(value) = full.get(field) {
            picked.insert(field.clone(), value.clone());
        }
    }
    let rendered = serde_json::to_string_pretty(&Value::Object(picked))
        .unwrap_or_else(|_| "{}".to_string());
    text_result(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_an_object_schema() {
        let tools = list_tools();
        assert_eq!(tools.len(), 8);
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[tokio::test]
    async fn memory_get_without_load_is_refused_politely() {
        let current = Mutex::new(None);
        let request = MemoryGetRequest {
            fields: vec!["personality".to_string()],
        };
        let value = handle_memory_get(&current, &request).await;
        assert_eq!(value["content"][0]["text"], NO_MEMORY);
    }

    #[tokio::test]
    async fn memory_get_projects_requested_fields() {
        let current = Mutex::new(Some(CharacterMemory::default_for("Thorn")));
        let request = MemoryGetRequest {
            fields: vec!["character_name".to_string(), "no_such_field".to_string()],
        };
        let value = handle_memory_get(&current, &request).await;
        let text = value["content"][0]["text"].as_str().expect("text");
        let parsed: Value = serde_json::from_str(text).expect("json");
        assert_eq!(parsed["character_name"], "Thorn");
        assert!(parsed.get("no_such_field").is_none());
    }
}
