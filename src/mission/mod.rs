//! Mission System Module
//!
//! Multi-stage missions tracked per player: definitions loaded from TOML,
//! per-mission handlers bound to an event bus while active, and the records
//! used for persistence and network sync.

pub mod api;
pub mod definition;
pub mod effects;
pub mod events;
pub mod handler;
pub mod handlers;
pub mod log;
pub mod objective;
pub mod registry;
pub mod state;
pub mod sync;

pub use api::{DialogueService, MissionContext, RewardSink, SyncSink};
pub use definition::{ItemStack, MissionDefinition, MissionId, ObjectiveDef, ObjectiveSetDef};
pub use events::{EventBus, EventKind, GameEvent, LocalEventBus, SubscriptionHandle};
pub use handler::{HandlerBinding, HandlerId, ObjectiveHandler, Progress};
pub use handlers::HandlerRegistry;
pub use log::{MissionLog, SharedMission, lock_mission};
pub use objective::{Objective, ObjectiveSet};
pub use registry::MissionRegistry;
pub use state::{Mission, MissionEffect, MissionRecord, MissionState, Transition};
pub use sync::{SyncApplier, SyncMessage, SyncMessageType, SyncPayload};
