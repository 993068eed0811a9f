use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::mission::{GameEvent, MissionId, SyncMessage};

/// Protocol code prefixed to every frame (room data)
const ROOM_DATA: u64 = 13;

// ============================================================================
// Client -> Server Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "startMission")]
    StartMission { mission_id: MissionId },

    #[serde(rename = "abandonMission")]
    AbandonMission { mission_id: MissionId },

    /// A gameplay event observed by the client's simulation
    #[serde(rename = "gameEvent")]
    GameEvent { event: GameEvent },
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Welcome {
        player_id: String,
    },
    /// Authoritative mission state (see `mission::sync`)
    MissionSync {
        message: SyncMessage,
    },
    MissionStarted {
        mission_id: MissionId,
    },
    MissionAbandoned {
        mission_id: MissionId,
    },
    ShowDialogue {
        speaker: String,
        key: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::MissionSync { .. } => "missionSync",
            ServerMessage::MissionStarted { .. } => "missionStarted",
            ServerMessage::MissionAbandoned { .. } => "missionAbandoned",
            ServerMessage::ShowDialogue { .. } => "showDialogue",
            ServerMessage::Error { .. } => "error",
        }
    }
}

// ============================================================================
// Encoding/Decoding
// ============================================================================

/// Encode a server message to MessagePack format
/// Format: [13, "msg_type", {data}]
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, String> {
    let data = match msg {
        ServerMessage::Welcome { player_id } => map(vec![("player_id", string(player_id))]),
        ServerMessage::MissionSync { message } => named_value(message)?,
        ServerMessage::MissionStarted { mission_id } | ServerMessage::MissionAbandoned { mission_id } => {
            map(vec![("mission_id", Value::from(mission_id.0))])
        }
        ServerMessage::ShowDialogue { speaker, key } => {
            map(vec![("speaker", string(speaker)), ("key", string(key))])
        }
        ServerMessage::Error { code, message } => {
            map(vec![("code", string(code)), ("message", string(message))])
        }
    };

    write_envelope(msg.msg_type(), data)
}

/// Decode a server message (client side)
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, String> {
    let (msg_type, msg_data) = read_envelope(data)?;

    match msg_type.as_str() {
        "welcome" => Ok(ServerMessage::Welcome {
            player_id: extract_string(&msg_data, "player_id").unwrap_or_default(),
        }),
        "missionSync" => {
            let mut bytes = Vec::new();
            rmpv::encode::write_value(&mut bytes, &msg_data)
                .map_err(|e| format!("Failed to encode sync payload: {}", e))?;
            let message: SyncMessage = rmp_serde::from_slice(&bytes)
                .map_err(|e| format!("Invalid sync message: {}", e))?;
            Ok(ServerMessage::MissionSync { message })
        }
        "missionStarted" => Ok(ServerMessage::MissionStarted {
            mission_id: extract_mission_id(&msg_data)?,
        }),
        "missionAbandoned" => Ok(ServerMessage::MissionAbandoned {
            mission_id: extract_mission_id(&msg_data)?,
        }),
        "showDialogue" => Ok(ServerMessage::ShowDialogue {
            speaker: extract_string(&msg_data, "speaker").unwrap_or_default(),
            key: extract_string(&msg_data, "key").unwrap_or_default(),
        }),
        "error" => Ok(ServerMessage::Error {
            code: extract_string(&msg_data, "code").unwrap_or_default(),
            message: extract_string(&msg_data, "message").unwrap_or_default(),
        }),
        _ => Err(format!("Unknown message type: {}", msg_type)),
    }
}

/// Encode a client message (client side)
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, String> {
    let (msg_type, data) = match msg {
        ClientMessage::StartMission { mission_id } => {
            ("startMission", map(vec![("mission_id", Value::from(mission_id.0))]))
        }
        ClientMessage::AbandonMission { mission_id } => {
            ("abandonMission", map(vec![("mission_id", Value::from(mission_id.0))]))
        }
        ClientMessage::GameEvent { event } => {
            ("gameEvent", map(vec![("event", named_value(event)?)]))
        }
    };

    write_envelope(msg_type, data)
}

/// Decode a client message from MessagePack format
/// Expected format: [13, "msg_type", {data}]
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, String> {
    let (msg_type, msg_data) = read_envelope(data)?;

    match msg_type.as_str() {
        "startMission" => Ok(ClientMessage::StartMission {
            mission_id: extract_mission_id(&msg_data)?,
        }),
        "abandonMission" => Ok(ClientMessage::AbandonMission {
            mission_id: extract_mission_id(&msg_data)?,
        }),
        "gameEvent" => {
            let event = extract_value(&msg_data, "event").ok_or("Missing event")?;
            let event: GameEvent =
                rmpv::ext::from_value(event.clone()).map_err(|e| format!("Invalid game event: {}", e))?;
            Ok(ClientMessage::GameEvent { event })
        }
        _ => Err(format!("Unknown message type: {}", msg_type)),
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn write_envelope(msg_type: &str, data: Value) -> Result<Vec<u8>, String> {
    let array = Value::Array(vec![Value::from(ROOM_DATA), Value::String(msg_type.into()), data]);

    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &array).map_err(|e| format!("Failed to encode message: {}", e))?;

    Ok(buf)
}

fn read_envelope(data: &[u8]) -> Result<(String, Value), String> {
    let mut cursor = std::io::Cursor::new(data);
    let value = rmpv::decode::read_value(&mut cursor).map_err(|e| format!("Failed to decode MessagePack: {}", e))?;

    let Value::Array(mut array) = value else {
        return Err("Expected array".to_string());
    };

    if array.len() < 2 {
        return Err("Array too short".to_string());
    }

    let protocol = array[0].as_u64().ok_or("Protocol code must be integer")?;
    if protocol != ROOM_DATA {
        return Err(format!("Unexpected protocol code: {}", protocol));
    }

    let msg_type = array[1].as_str().ok_or("Message type must be string")?.to_string();
    let msg_data = if array.len() > 2 { array.swap_remove(2) } else { Value::Nil };

    Ok((msg_type, msg_data))
}

/// Serialize with field names kept, as an rmpv map
fn named_value<T: Serialize>(payload: &T) -> Result<Value, String> {
    let bytes = rmp_serde::to_vec_named(payload).map_err(|e| format!("Failed to encode payload: {}", e))?;
    rmpv::decode::read_value(&mut bytes.as_slice()).map_err(|e| format!("Failed to re-read payload: {}", e))
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (Value::String(k.into()), v)).collect())
}

fn string(s: &str) -> Value {
    Value::String(s.into())
}

fn extract_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()
        .and_then(|map| map.iter().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v))
}

fn extract_string(value: &Value, key: &str) -> Option<String> {
    extract_value(value, key).and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn extract_mission_id(value: &Value) -> Result<MissionId, String> {
    extract_value(value, "mission_id")
        .and_then(|v| v.as_u64())
        .and_then(|id| u32::try_from(id).ok())
        .map(MissionId)
        .ok_or_else(|| "Missing or invalid mission_id".to_string())
}
