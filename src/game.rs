use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::EngineRules;
use crate::error::{MissionError, RoomError};
use crate::mission::{
    DialogueService, GameEvent, ItemStack, LocalEventBus, Mission, MissionContext, MissionId, MissionLog,
    MissionRecord, MissionRegistry, ObjectiveSet, RewardSink, SyncMessage, SyncSink, lock_mission,
};
use crate::protocol::{ClientMessage, ServerMessage};

// ============================================================================
// Collaborators
// ============================================================================

/// Rewards granted to one player
#[derive(Debug, Default)]
pub struct RewardLedger {
    pub experience: u64,
    pub items: HashMap<String, u32>,
    /// Experience not yet written to the database
    unsaved_experience: u32,
}

impl RewardLedger {
    pub fn take_unsaved_experience(&mut self) -> u32 {
        std::mem::take(&mut self.unsaved_experience)
    }

    /// Put back experience taken for a save that did not complete
    pub fn restore_unsaved_experience(&mut self, amount: u32) {
        self.unsaved_experience = self.unsaved_experience.saturating_add(amount);
    }
}

impl RewardSink for RewardLedger {
    fn grant_items(&mut self, player_id: &str, items: &[ItemStack]) {
        for stack in items {
            *self.items.entry(stack.item_id.clone()).or_insert(0) += stack.count;
            debug!("Granted {}x {} to {}", stack.count, stack.item_id, player_id);
        }
    }

    fn grant_experience(&mut self, player_id: &str, amount: u32) {
        self.experience += u64::from(amount);
        self.unsaved_experience = self.unsaved_experience.saturating_add(amount);
        debug!("Granted {} xp to {}", amount, player_id);
    }
}

/// Dialogue requests queued until the end of the current call
#[derive(Debug, Default)]
pub struct DialogueOutbox {
    pending: Vec<(String, String)>,
}

impl DialogueOutbox {
    fn drain(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.pending)
    }
}

impl DialogueService for DialogueOutbox {
    fn start_sequence(&mut self, speaker: &str, key: &str) {
        self.pending.push((speaker.to_string(), key.to_string()));
    }
}

/// A message addressed to one connected player
#[derive(Debug, Clone)]
pub struct Outbound {
    pub player_id: String,
    pub message: ServerMessage,
}

/// Forwards sync messages onto the room's broadcast channel
pub struct BroadcastSync {
    tx: broadcast::Sender<Outbound>,
}

impl SyncSink for BroadcastSync {
    fn broadcast(&mut self, message: SyncMessage) {
        let outbound = Outbound {
            player_id: message.player_id.clone(),
            message: ServerMessage::MissionSync { message },
        };
        // No receivers just means nobody is connected
        let _ = self.tx.send(outbound);
    }
}

// ============================================================================
// Player Session
// ============================================================================

pub struct PlayerSession {
    pub log: MissionLog,
    pub bus: LocalEventBus,
    pub ledger: RewardLedger,
    pub dialogue: DialogueOutbox,
}

/// Mission state as shown to HTTP clients
#[derive(Debug, Clone, Serialize)]
pub struct MissionView {
    pub mission_id: MissionId,
    pub name: String,
    pub state: &'static str,
    pub current_set_index: usize,
    pub objective_sets: Vec<ObjectiveSet>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionView {
    pub fn from_mission(mission: &Mission) -> Self {
        Self {
            mission_id: mission.id(),
            name: mission.definition().name.clone(),
            state: mission.state().as_str(),
            current_set_index: mission.current_set_index(),
            objective_sets: mission.objective_sets().to_vec(),
            started_at: mission.started_at(),
            completed_at: mission.completed_at(),
        }
    }
}

/// A gameplay event waiting for the next tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub player_id: String,
    pub event: GameEvent,
}

// ============================================================================
// Game Room
// ============================================================================

/// Hosts every connected player's missions
///
/// Events are queued and applied once per tick, so gameplay mutations stay
/// on the tick task. Lifecycle calls (start, abandon) apply immediately under
/// the player's session entry.
pub struct GameRoom {
    registry: Arc<MissionRegistry>,
    rules: EngineRules,
    sessions: DashMap<String, PlayerSession>,
    pending: Mutex<VecDeque<QueuedEvent>>,
    broadcast_tx: broadcast::Sender<Outbound>,
    tick: AtomicU64,
}

impl GameRoom {
    pub fn new(registry: Arc<MissionRegistry>, rules: EngineRules) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            registry,
            rules,
            sessions: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            broadcast_tx: tx,
            tick: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<MissionRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.broadcast_tx.subscribe()
    }

    fn send_to(&self, player_id: &str, message: ServerMessage) {
        let _ = self.broadcast_tx.send(Outbound {
            player_id: player_id.to_string(),
            message,
        });
    }

    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_joined(&self, player_id: &str) -> bool {
        self.sessions.contains_key(player_id)
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Add a player, restoring their saved missions
    pub fn join(&self, player_id: &str, records: &[MissionRecord]) {
        if self.sessions.contains_key(player_id) {
            debug!("Player {} already joined", player_id);
            return;
        }

        let mut bus = LocalEventBus::new();
        let log = MissionLog::restore(Arc::clone(&self.registry), player_id, self.rules, records, &mut bus);
        self.sessions.insert(
            player_id.to_string(),
            PlayerSession {
                log,
                bus,
                ledger: RewardLedger::default(),
                dialogue: DialogueOutbox::default(),
            },
        );

        info!("Player {} joined ({} players)", player_id, self.sessions.len());
    }

    /// Remove a player, returning their final records and unsaved experience
    pub fn leave(&self, player_id: &str) -> Option<(Vec<MissionRecord>, u32)> {
        let (_, mut session) = self.sessions.remove(player_id)?;
        let records = session.log.unload(&mut session.bus);
        info!("Player {} left ({} players)", player_id, self.sessions.len());
        Some((records, session.ledger.take_unsaved_experience()))
    }

    pub fn queue_event(&self, player_id: &str, event: GameEvent) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(QueuedEvent {
                player_id: player_id.to_string(),
                event,
            });
    }

    /// Apply every queued event; returns how many were processed
    pub fn tick(&self) -> usize {
        self.tick.fetch_add(1, Ordering::Relaxed);
        let queued: Vec<QueuedEvent> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut processed = 0;
        for QueuedEvent { player_id, event } in queued {
            let result = self.with_session(&player_id, |log, ctx| {
                let touched = log.dispatch(&event, ctx);
                if !touched.is_empty() {
                    debug!("{} advanced missions {:?} for {}", event.kind().as_str(), touched, player_id);
                }
                Ok(())
            });
            match result {
                Ok(()) => processed += 1,
                Err(e) => debug!("Dropping queued event: {}", e),
            }
        }
        processed
    }

    pub fn start_mission(&self, player_id: &str, id: MissionId) -> Result<(), RoomError> {
        self.with_session(player_id, |log, ctx| log.start_mission(id, ctx))?;
        self.send_to(player_id, ServerMessage::MissionStarted { mission_id: id });
        Ok(())
    }

    pub fn abandon_mission(&self, player_id: &str, id: MissionId) -> Result<(), RoomError> {
        self.with_session(player_id, |log, ctx| log.abandon_mission(id, ctx))?;
        self.send_to(player_id, ServerMessage::MissionAbandoned { mission_id: id });
        Ok(())
    }

    pub fn unlock_mission(&self, player_id: &str, id: MissionId) -> Result<bool, RoomError> {
        let mut session = self.session_mut(player_id)?;
        Ok(session.log.unlock(id)?)
    }

    pub fn assign_provider(&self, player_id: &str, npc_id: &str, id: MissionId) -> Result<(), RoomError> {
        let mut session = self.session_mut(player_id)?;
        Ok(session.log.assign_provider(npc_id, id)?)
    }

    /// Every mission the player has touched, plus those available to start
    pub fn mission_views(&self, player_id: &str) -> Result<Vec<MissionView>, RoomError> {
        let mut session = self.session_mut(player_id)?;
        let log = &mut session.log;

        for id in self.registry.ids() {
            if let Some(def) = self.registry.get(id) {
                if self.registry.starts_unlocked(&def) {
                    log.get_or_create(id)?;
                }
            }
        }

        Ok(log
            .ids()
            .into_iter()
            .filter_map(|id| log.mission(id))
            .map(|cell| MissionView::from_mission(&lock_mission(&cell)))
            .collect())
    }

    pub fn mission_view(&self, player_id: &str, id: MissionId) -> Result<MissionView, RoomError> {
        let session = self.session(player_id)?;
        let cell = session.log.mission(id).ok_or(MissionError::UnknownMission(id))?;
        let view = MissionView::from_mission(&lock_mission(&cell));
        Ok(view)
    }

    /// Current records without touching the unsaved experience
    pub fn records(&self, player_id: &str) -> Result<Vec<MissionRecord>, RoomError> {
        Ok(self.session(player_id)?.log.save())
    }

    pub fn experience(&self, player_id: &str) -> Result<u64, RoomError> {
        Ok(self.session(player_id)?.ledger.experience)
    }

    /// Snapshot one player's records and unsaved experience
    pub fn save_records(&self, player_id: &str) -> Result<(Vec<MissionRecord>, u32), RoomError> {
        let mut session = self.session_mut(player_id)?;
        let records = session.log.save();
        Ok((records, session.ledger.take_unsaved_experience()))
    }

    /// Hand back experience from a failed save so the next save retries it
    pub fn return_unsaved_experience(&self, player_id: &str, amount: u32) -> Result<(), RoomError> {
        self.session_mut(player_id)?.ledger.restore_unsaved_experience(amount);
        Ok(())
    }

    /// Take back a departed player's state after their final save failed
    ///
    /// If the player has joined again, the records are merged into the new
    /// session; otherwise the session is rebuilt from them.
    pub fn readmit(&self, player_id: &str, records: &[MissionRecord], unsaved_experience: u32) {
        if !self.is_joined(player_id) {
            self.join(player_id, records);
        } else if let Some(mut entry) = self.sessions.get_mut(player_id) {
            let PlayerSession { log, bus, .. } = &mut *entry;
            for record in records {
                if let Err(e) = log.apply_record(record, &mut *bus) {
                    warn!("Failed to merge record for {}: {}", player_id, e);
                }
            }
        }

        if let Err(e) = self.return_unsaved_experience(player_id, unsaved_experience) {
            warn!("Experience for {} could not be returned: {}", player_id, e);
        }
        info!("Player {} readmitted after a failed save", player_id);
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Apply a decoded client frame
    pub fn handle_client_message(&self, player_id: &str, message: ClientMessage) {
        let result = match message {
            ClientMessage::StartMission { mission_id } => self.start_mission(player_id, mission_id),
            ClientMessage::AbandonMission { mission_id } => self.abandon_mission(player_id, mission_id),
            ClientMessage::GameEvent { event } => {
                self.queue_event(player_id, event);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Client request from {} failed: {}", player_id, e);
            self.send_to(
                player_id,
                ServerMessage::Error {
                    code: error_code(&e).to_string(),
                    message: e.to_string(),
                },
            );
        }
    }

    fn session(&self, player_id: &str) -> Result<dashmap::mapref::one::Ref<'_, String, PlayerSession>, RoomError> {
        self.sessions
            .get(player_id)
            .ok_or_else(|| RoomError::UnknownPlayer(player_id.to_string()))
    }

    fn session_mut(&self, player_id: &str) -> Result<dashmap::mapref::one::RefMut<'_, String, PlayerSession>, RoomError> {
        self.sessions
            .get_mut(player_id)
            .ok_or_else(|| RoomError::UnknownPlayer(player_id.to_string()))
    }

    /// Run `f` with the player's log and a context over their collaborators,
    /// then flush any dialogue it queued
    fn with_session<T>(
        &self,
        player_id: &str,
        f: impl FnOnce(&mut MissionLog, &mut MissionContext<'_>) -> Result<T, MissionError>,
    ) -> Result<T, RoomError> {
        let mut session = self.session_mut(player_id)?;
        let PlayerSession {
            log,
            bus,
            ledger,
            dialogue,
        } = &mut *session;

        let mut sync = BroadcastSync {
            tx: self.broadcast_tx.clone(),
        };
        let result = {
            let mut ctx = MissionContext::new(player_id, bus, dialogue, ledger).with_sync(&mut sync);
            f(log, &mut ctx)
        };

        for (speaker, key) in dialogue.drain() {
            self.send_to(player_id, ServerMessage::ShowDialogue { speaker, key });
        }
        Ok(result?)
    }
}

/// Stable code sent to clients alongside the message
pub fn error_code(error: &RoomError) -> &'static str {
    match error {
        RoomError::UnknownPlayer(_) => "unknown_player",
        RoomError::Mission(e) => match e {
            MissionError::AlreadyActive(_) => "already_active",
            MissionError::NotUnlocked(_) => "not_unlocked",
            MissionError::NotActive(_) => "not_active",
            MissionError::AlreadyCompleted(_) => "already_completed",
            MissionError::UnknownMission(_) => "unknown_mission",
            MissionError::HandlerAlreadyAttached(_) => "handler_already_attached",
            MissionError::ProviderAlreadyAssigned { .. } => "provider_already_assigned",
            MissionError::StaleEventIgnored { .. } => "stale_event",
        },
    }
}
