//! Mission Collaborator API
//!
//! Services the engine calls out to. Everything is handed in explicitly
//! through a `MissionContext`; there is no global player accessor.

use super::definition::ItemStack;
use super::events::EventBus;
use super::sync::SyncMessage;

/// Plays dialogue sequences (text playback lives with the host)
pub trait DialogueService {
    fn start_sequence(&mut self, speaker: &str, key: &str);
}

/// Receives mission rewards for the player
pub trait RewardSink {
    fn grant_items(&mut self, player_id: &str, items: &[ItemStack]);

    fn grant_experience(&mut self, player_id: &str, amount: u32);
}

/// Broadcasts authoritative state to remote peers
pub trait SyncSink {
    fn broadcast(&mut self, message: SyncMessage);
}

/// Context passed into every `MissionLog` call
///
/// Bundles the acting player and the collaborators a transition may touch.
pub struct MissionContext<'a> {
    pub player_id: &'a str,
    pub bus: &'a mut dyn EventBus,
    pub dialogue: &'a mut dyn DialogueService,
    pub rewards: &'a mut dyn RewardSink,
    /// Absent on clients, which never originate sync traffic
    pub sync: Option<&'a mut dyn SyncSink>,
}

impl<'a> MissionContext<'a> {
    pub fn new(
        player_id: &'a str,
        bus: &'a mut dyn EventBus,
        dialogue: &'a mut dyn DialogueService,
        rewards: &'a mut dyn RewardSink,
    ) -> Self {
        Self {
            player_id,
            bus,
            dialogue,
            rewards,
            sync: None,
        }
    }

    pub fn with_sync(mut self, sync: &'a mut dyn SyncSink) -> Self {
        self.sync = Some(sync);
        self
    }
}
