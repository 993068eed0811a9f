//! Mission Synchronisation
//!
//! Messages broadcast by the authority when a mission crosses a stage or
//! mission boundary, and the client-side applier that makes re-delivery
//! harmless.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::api::RewardSink;
use super::definition::MissionId;
use super::events::EventBus;
use super::log::MissionLog;
use super::state::MissionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMessageType {
    AddExperience,
    MissionProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPayload {
    Experience(u32),
    Progress(MissionRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Unique per broadcast; clients drop repeats
    pub message_id: Uuid,
    pub message_type: SyncMessageType,
    pub player_id: String,
    pub mission_id: MissionId,
    pub payload: SyncPayload,
}

impl SyncMessage {
    pub fn add_experience(player_id: &str, mission_id: MissionId, amount: u32) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_type: SyncMessageType::AddExperience,
            player_id: player_id.to_string(),
            mission_id,
            payload: SyncPayload::Experience(amount),
        }
    }

    pub fn mission_progress(player_id: &str, record: MissionRecord) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_type: SyncMessageType::MissionProgress,
            player_id: player_id.to_string(),
            mission_id: record.mission_id,
            payload: SyncPayload::Progress(record),
        }
    }
}

/// Message ids remembered by a default applier
pub const DEFAULT_APPLIED_CAPACITY: usize = 1024;

/// Client-side application of sync messages
///
/// Each message id is applied at most once while it is among the last
/// `capacity` ids seen; older ids are forgotten. Progress records are merged
/// monotonically, so a replayed record under a fresh id is also harmless.
#[derive(Debug)]
pub struct SyncApplier {
    applied: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl Default for SyncApplier {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_APPLIED_CAPACITY)
    }
}

impl SyncApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            applied: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Remember `id`; false if it is already remembered
    fn remember(&mut self, id: Uuid) -> bool {
        if !self.applied.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.applied.remove(&oldest);
            }
        }
        true
    }

    /// Apply a message to the local player's log; returns true if anything
    /// changed
    pub fn apply(
        &mut self,
        message: &SyncMessage,
        log: &mut MissionLog,
        bus: &mut dyn EventBus,
        rewards: &mut dyn RewardSink,
    ) -> bool {
        if message.player_id != log.player_id() {
            return false;
        }
        if !self.remember(message.message_id) {
            debug!("Sync message {} already applied", message.message_id);
            return false;
        }

        match (&message.message_type, &message.payload) {
            (SyncMessageType::AddExperience, SyncPayload::Experience(amount)) => {
                rewards.grant_experience(&message.player_id, *amount);
                true
            }
            (SyncMessageType::MissionProgress, SyncPayload::Progress(record)) => {
                match log.apply_record(record, bus) {
                    Ok(changed) => changed,
                    Err(e) => {
                        warn!("Failed to apply synced record: {}", e);
                        false
                    }
                }
            }
            (kind, _) => {
                warn!("Sync message {} has a payload that does not match {:?}", message.message_id, kind);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineRules;
    use crate::mission::api::testing::{RecordingDialogue, RecordingRewards, RecordingSync};
    use crate::mission::api::MissionContext;
    use crate::mission::definition::{MissionDefinition, ObjectiveDef, ObjectiveSetDef};
    use crate::mission::events::{EventKind, LocalEventBus};
    use crate::mission::registry::MissionRegistry;
    use crate::mission::state::MissionState;

    const HUNT: MissionId = MissionId(50);
    const TRAIL: MissionId = MissionId(51);

    fn registry() -> Arc<MissionRegistry> {
        let mut def = MissionDefinition::new(
            HUNT,
            "Bat Hunt",
            "guide",
            vec![ObjectiveSetDef::new(vec![
                ObjectiveDef::new("Kill bats", 2).triggered_by(EventKind::NpcKill, "bat"),
            ])],
        );
        def.xp_reward = 75;
        let trail = MissionDefinition::new(
            TRAIL,
            "Bat Trail",
            "guide",
            vec![
                ObjectiveSetDef::new(vec![
                    ObjectiveDef::new("Ask the guide", 1).triggered_by(EventKind::NpcChat, "guide"),
                ]),
                ObjectiveSetDef::new(vec![
                    ObjectiveDef::new("Kill bats", 2).triggered_by(EventKind::NpcKill, "bat"),
                ]),
            ],
        );
        let mut registry = MissionRegistry::default();
        registry.insert(def);
        registry.insert(trail);
        Arc::new(registry)
    }

    /// Run the mission to completion on an authority and collect its traffic
    fn server_messages() -> Vec<SyncMessage> {
        let mut log = MissionLog::new(registry(), "p1", EngineRules::default());
        let mut bus = LocalEventBus::new();
        let mut dialogue = RecordingDialogue::default();
        let mut rewards = RecordingRewards::default();
        let mut sync = RecordingSync::default();

        {
            let mut ctx = MissionContext::new("p1", &mut bus, &mut dialogue, &mut rewards).with_sync(&mut sync);
            log.start_mission(HUNT, &mut ctx).unwrap();
            log.on_npc_kill("bat", &mut ctx);
            log.on_npc_kill("bat", &mut ctx);
        }
        sync.sent
    }

    #[test]
    fn test_completion_applied_twice_grants_once() {
        let messages = server_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_type, SyncMessageType::AddExperience);
        assert_eq!(messages[1].message_type, SyncMessageType::MissionProgress);

        let mut client = MissionLog::new(registry(), "p1", EngineRules::default());
        let mut bus = LocalEventBus::new();
        let mut rewards = RecordingRewards::default();
        let mut applier = SyncApplier::new();

        for message in &messages {
            assert!(applier.apply(message, &mut client, &mut bus, &mut rewards));
        }
        for message in &messages {
            assert!(!applier.apply(message, &mut client, &mut bus, &mut rewards));
        }

        assert_eq!(rewards.experience, 75);
        assert_eq!(client.state_of(HUNT), Some(MissionState::Completed));
        assert_eq!(applier.applied_count(), 2);
    }

    #[test]
    fn test_replayed_record_under_new_id() {
        let messages = server_messages();
        let record = match &messages[1].payload {
            SyncPayload::Progress(record) => record.clone(),
            other => panic!("unexpected payload {:?}", other),
        };

        let mut client = MissionLog::new(registry(), "p1", EngineRules::default());
        let mut bus = LocalEventBus::new();
        let mut rewards = RecordingRewards::default();
        let mut applier = SyncApplier::new();

        assert!(applier.apply(
            &SyncMessage::mission_progress("p1", record.clone()),
            &mut client,
            &mut bus,
            &mut rewards
        ));
        assert!(!applier.apply(
            &SyncMessage::mission_progress("p1", record),
            &mut client,
            &mut bus,
            &mut rewards
        ));
        assert_eq!(rewards.experience, 0);
    }

    #[test]
    fn test_other_players_are_ignored() {
        let mut client = MissionLog::new(registry(), "p2", EngineRules::default());
        let mut bus = LocalEventBus::new();
        let mut rewards = RecordingRewards::default();
        let mut applier = SyncApplier::new();

        let message = SyncMessage::add_experience("p1", HUNT, 10);
        assert!(!applier.apply(&message, &mut client, &mut bus, &mut rewards));
        assert_eq!(rewards.experience, 0);
    }

    #[test]
    fn test_abandon_and_restart_reach_the_client() {
        let mut server = MissionLog::new(registry(), "p1", EngineRules::default());
        let mut server_bus = LocalEventBus::new();
        let mut dialogue = RecordingDialogue::default();
        let mut server_rewards = RecordingRewards::default();
        let mut sync = RecordingSync::default();

        {
            let mut ctx =
                MissionContext::new("p1", &mut server_bus, &mut dialogue, &mut server_rewards).with_sync(&mut sync);
            server.start_mission(TRAIL, &mut ctx).unwrap();
            server.on_npc_chat("npc_1", "guide", &mut ctx);
            server.abandon_mission(TRAIL, &mut ctx).unwrap();
            server.start_mission(TRAIL, &mut ctx).unwrap();
            server.on_npc_chat("npc_1", "guide", &mut ctx);
        }
        let messages = sync.sent;
        assert_eq!(messages.len(), 3);

        let mut client = MissionLog::new(registry(), "p1", EngineRules::default());
        let mut bus = LocalEventBus::new();
        let mut rewards = RecordingRewards::default();
        let mut applier = SyncApplier::new();

        assert!(applier.apply(&messages[0], &mut client, &mut bus, &mut rewards));
        assert_eq!(client.state_of(TRAIL), Some(MissionState::Active));
        assert!(bus.subscription_count(TRAIL) > 0);

        assert!(applier.apply(&messages[1], &mut client, &mut bus, &mut rewards));
        assert_eq!(client.state_of(TRAIL), Some(MissionState::Unlocked));
        assert_eq!(bus.subscription_count(TRAIL), 0);

        // Same stage as the first record, but a later attempt
        assert!(applier.apply(&messages[2], &mut client, &mut bus, &mut rewards));
        assert_eq!(client.state_of(TRAIL), Some(MissionState::Active));
        assert!(bus.subscription_count(TRAIL) > 0);
        assert_eq!(client.save(), server.save());
    }

    #[test]
    fn test_applier_forgets_oldest_ids() {
        let mut client = MissionLog::new(registry(), "p1", EngineRules::default());
        let mut bus = LocalEventBus::new();
        let mut rewards = RecordingRewards::default();
        let mut applier = SyncApplier::with_capacity(2);

        let first = SyncMessage::add_experience("p1", HUNT, 1);
        let second = SyncMessage::add_experience("p1", HUNT, 2);
        let third = SyncMessage::add_experience("p1", HUNT, 4);
        for message in [&first, &second, &third] {
            assert!(applier.apply(message, &mut client, &mut bus, &mut rewards));
        }
        assert_eq!(applier.applied_count(), 2);

        // Recent ids are still rejected
        assert!(!applier.apply(&third, &mut client, &mut bus, &mut rewards));
        assert!(!applier.apply(&second, &mut client, &mut bus, &mut rewards));
        assert_eq!(rewards.experience, 7);

        // The evicted id is accepted again
        assert!(applier.apply(&first, &mut client, &mut bus, &mut rewards));
        assert_eq!(applier.applied_count(), 2);
    }

    #[test]
    fn test_message_json_shape() {
        let message = SyncMessage::add_experience("p1", HUNT, 10);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["message_type"], "add_experience");
        assert_eq!(json["mission_id"], 50);
        assert_eq!(json["payload"]["experience"], 10);
    }
}
