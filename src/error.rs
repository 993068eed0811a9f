//! Error Types
//!
//! Structural errors are returned to callers (UI actions, HTTP handlers).
//! `StaleEventIgnored` is diagnostic only and never surfaces to a player.

use thiserror::Error;

use crate::mission::definition::MissionId;

/// Errors raised by mission lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionError {
    #[error("Mission {0} is already active")]
    AlreadyActive(MissionId),

    #[error("Mission {0} has not been unlocked")]
    NotUnlocked(MissionId),

    #[error("Mission {0} is not active")]
    NotActive(MissionId),

    #[error("Mission {0} is already completed")]
    AlreadyCompleted(MissionId),

    #[error("Unknown mission {0}")]
    UnknownMission(MissionId),

    #[error("Handler for mission {0} is already attached")]
    HandlerAlreadyAttached(MissionId),

    #[error("NPC '{npc_id}' already offers mission {current}")]
    ProviderAlreadyAssigned { npc_id: String, current: MissionId },

    /// Not a real failure: an event arrived for a stage or state that no
    /// longer accepts it.
    #[error("Ignored stale event for mission {mission}: {reason}")]
    StaleEventIgnored {
        mission: MissionId,
        reason: &'static str,
    },
}

impl MissionError {
    /// Whether the error is a diagnostic that callers may discard
    pub fn is_stale(&self) -> bool {
        matches!(self, MissionError::StaleEventIgnored { .. })
    }
}

/// Errors raised by the game room on behalf of a player
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Player '{0}' is not in the room")]
    UnknownPlayer(String),

    #[error(transparent)]
    Mission(#[from] MissionError),
}

/// Errors raised while loading mission definitions
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid mission definition '{mission}': {reason}")]
    Invalid { mission: String, reason: String },
}

/// Errors raised while reading the server config file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors raised by the persistence store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt objective counts for mission {mission}: {source}")]
    Counts {
        mission: i64,
        #[source]
        source: serde_json::Error,
    },
}
