//! Mission Log
//!
//! Per-player collection of mission instances. Instances are created lazily
//! from the shared registry and each one sits behind its own mutex, so a
//! network task can lock a single mission without holding the whole log.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::api::MissionContext;
use super::definition::{MissionDefinition, MissionId};
use super::effects;
use super::events::{EventBus, GameEvent};
use super::registry::MissionRegistry;
use super::state::{Mission, MissionRecord, MissionState};
use crate::config::EngineRules;
use crate::error::MissionError;

pub type SharedMission = Arc<Mutex<Mission>>;

/// Lock a mission, recovering from a poisoned mutex
pub fn lock_mission(cell: &Mutex<Mission>) -> MutexGuard<'_, Mission> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MissionLog {
    registry: Arc<MissionRegistry>,
    player_id: String,
    rules: EngineRules,
    missions: BTreeMap<MissionId, SharedMission>,
    /// NPC id -> mission it currently offers
    providers: HashMap<String, MissionId>,
}

impl MissionLog {
    pub fn new(registry: Arc<MissionRegistry>, player_id: &str, rules: EngineRules) -> Self {
        Self {
            registry,
            player_id: player_id.to_string(),
            rules,
            missions: BTreeMap::new(),
            providers: HashMap::new(),
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn registry(&self) -> &Arc<MissionRegistry> {
        &self.registry
    }

    /// Existing instance, or a new one built from the registry
    pub fn get_or_create(&mut self, id: MissionId) -> Result<SharedMission, MissionError> {
        if let Some(cell) = self.missions.get(&id) {
            return Ok(Arc::clone(cell));
        }

        let def = self.registry.get(id).ok_or(MissionError::UnknownMission(id))?;
        let state = if self.is_unlocked_by_history(&def) {
            MissionState::Unlocked
        } else {
            MissionState::Locked
        };
        debug!(
            "Created mission {} for player {} ({})",
            id,
            self.player_id,
            state.as_str()
        );

        let cell = Arc::new(Mutex::new(Mission::new(def, state)));
        self.missions.insert(id, Arc::clone(&cell));
        Ok(cell)
    }

    pub fn mission(&self, id: MissionId) -> Option<SharedMission> {
        self.missions.get(&id).cloned()
    }

    pub fn state_of(&self, id: MissionId) -> Option<MissionState> {
        self.missions.get(&id).map(|cell| lock_mission(cell).state())
    }

    /// Ids of every instantiated mission, ascending
    pub fn ids(&self) -> Vec<MissionId> {
        self.missions.keys().copied().collect()
    }

    pub fn active_ids(&self) -> Vec<MissionId> {
        self.missions
            .iter()
            .filter(|(_, cell)| lock_mission(cell).is_active())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn unlock(&mut self, id: MissionId) -> Result<bool, MissionError> {
        let cell = self.get_or_create(id)?;
        let unlocked = lock_mission(&cell).unlock();
        Ok(unlocked)
    }

    pub fn start_mission(&mut self, id: MissionId, ctx: &mut MissionContext<'_>) -> Result<(), MissionError> {
        let cell = self.get_or_create(id)?;
        let mut mission = lock_mission(&cell);

        let handler = self.registry.handler_for(mission.definition());
        let transition = mission.start(handler, ctx.bus)?;
        effects::dispatch(&mission, &transition, ctx);
        Ok(())
    }

    pub fn abandon_mission(&mut self, id: MissionId, ctx: &mut MissionContext<'_>) -> Result<(), MissionError> {
        if !self.registry.contains(id) {
            return Err(MissionError::UnknownMission(id));
        }
        let cell = self.mission(id).ok_or(MissionError::NotActive(id))?;
        let mut mission = lock_mission(&cell);

        let transition = mission.abandon(ctx.bus, self.rules.reset_progress_on_abandon)?;
        effects::dispatch(&mission, &transition, ctx);
        Ok(())
    }

    /// Apply progress directly, bypassing the handler's routing
    pub fn update_progress(
        &mut self,
        id: MissionId,
        objective_index: usize,
        amount: u32,
        ctx: &mut MissionContext<'_>,
    ) -> Result<(), MissionError> {
        let cell = self.mission(id).ok_or(MissionError::NotActive(id))?;

        let completed = {
            let mut mission = lock_mission(&cell);
            let transition = mission.update_progress(objective_index, amount, ctx.player_id, ctx.bus)?;
            effects::dispatch(&mission, &transition, ctx);
            transition.completed()
        };

        if completed {
            self.on_completed(id);
        }
        Ok(())
    }

    /// Record that `npc_id` offers `mission_id`
    ///
    /// Fails if the NPC already offers a different mission that is not yet
    /// completed.
    pub fn assign_provider(&mut self, npc_id: &str, mission_id: MissionId) -> Result<(), MissionError> {
        if !self.registry.contains(mission_id) {
            return Err(MissionError::UnknownMission(mission_id));
        }

        if let Some(&current) = self.providers.get(npc_id) {
            if current != mission_id && self.state_of(current) != Some(MissionState::Completed) {
                return Err(MissionError::ProviderAlreadyAssigned {
                    npc_id: npc_id.to_string(),
                    current,
                });
            }
        }

        self.providers.insert(npc_id.to_string(), mission_id);
        debug!("NPC {} now offers mission {}", npc_id, mission_id);
        Ok(())
    }

    pub fn provider_mission(&self, npc_id: &str) -> Option<MissionId> {
        self.providers.get(npc_id).copied()
    }

    pub fn release_provider(&mut self, npc_id: &str) -> Option<MissionId> {
        self.providers.remove(npc_id)
    }

    pub fn on_item_pickup(&mut self, item_id: &str, count: u32, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let event = GameEvent::ItemPickup {
            item_id: item_id.to_string(),
            count,
        };
        self.dispatch(&event, ctx)
    }

    pub fn on_item_created(&mut self, item_id: &str, count: u32, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let event = GameEvent::ItemCreated {
            item_id: item_id.to_string(),
            count,
        };
        self.dispatch(&event, ctx)
    }

    pub fn on_npc_kill(&mut self, npc_kind: &str, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let event = GameEvent::NpcKill {
            npc_kind: npc_kind.to_string(),
        };
        self.dispatch(&event, ctx)
    }

    pub fn on_npc_hit(&mut self, npc_kind: &str, damage: u32, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let event = GameEvent::NpcHit {
            npc_kind: npc_kind.to_string(),
            damage,
        };
        self.dispatch(&event, ctx)
    }

    pub fn on_npc_chat(&mut self, npc_id: &str, npc_kind: &str, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let event = GameEvent::NpcChat {
            npc_id: npc_id.to_string(),
            npc_kind: npc_kind.to_string(),
        };
        self.dispatch(&event, ctx)
    }

    pub fn on_dialogue_end(&mut self, key: &str, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let event = GameEvent::DialogueEnd { key: key.to_string() };
        self.dispatch(&event, ctx)
    }

    /// Route an event to every mission subscribed to its kind
    ///
    /// Only active missions hold subscriptions. Returns the missions whose
    /// state changed.
    pub fn dispatch(&mut self, event: &GameEvent, ctx: &mut MissionContext<'_>) -> Vec<MissionId> {
        let mut targets: Vec<MissionId> = ctx
            .bus
            .subscribers(event.kind())
            .into_iter()
            .map(|s| s.mission)
            .collect();
        targets.sort();
        targets.dedup();

        let mut touched = Vec::new();
        let mut completed = Vec::new();

        for id in targets {
            let Some(cell) = self.mission(id) else {
                debug!("Subscriber for unknown mission {} on player {}", id, self.player_id);
                continue;
            };
            let mut mission = lock_mission(&cell);

            // Abandoned or completed since the subscriber list was read
            if !mission.is_active() {
                debug!("Skipping {} for inactive mission {}", event.kind().as_str(), id);
                continue;
            }

            let transition = mission.route(event, ctx.player_id, ctx.bus);
            if transition.is_empty() {
                continue;
            }
            effects::dispatch(&mission, &transition, ctx);

            if transition.completed() {
                completed.push(id);
            }
            touched.push(id);
        }

        for id in completed {
            self.on_completed(id);
        }
        touched
    }

    /// Snapshot every instantiated mission
    pub fn save(&self) -> Vec<MissionRecord> {
        self.missions.values().map(|cell| lock_mission(cell).record()).collect()
    }

    /// Rebuild a log from saved records, re-attaching active missions
    pub fn restore(
        registry: Arc<MissionRegistry>,
        player_id: &str,
        rules: EngineRules,
        records: &[MissionRecord],
        bus: &mut dyn EventBus,
    ) -> Self {
        let mut log = MissionLog::new(registry, player_id, rules);

        for record in records {
            let Some(def) = log.registry.get(record.mission_id) else {
                warn!(
                    "Player {} has saved progress for unknown mission {}, skipping",
                    player_id, record.mission_id
                );
                continue;
            };

            let mut mission = Mission::from_record(Arc::clone(&def), record);
            if mission.is_active() {
                if let Err(e) = mission.resume(log.registry.handler_for(&def), bus) {
                    warn!("Failed to resume mission {}: {}", def.id, e);
                }
            }
            log.missions.insert(def.id, Arc::new(Mutex::new(mission)));
        }

        info!(
            "Restored {} missions for player {} ({} active)",
            log.missions.len(),
            player_id,
            log.active_ids().len()
        );
        log
    }

    /// Snapshot and detach every active mission before the log is dropped
    pub fn unload(self, bus: &mut dyn EventBus) -> Vec<MissionRecord> {
        let records = self.save();
        let suspended = self
            .missions
            .values()
            .filter(|cell| lock_mission(cell).suspend(bus))
            .count();
        debug!("Unloaded missions for player {} ({} suspended)", self.player_id, suspended);
        records
    }

    /// Merge an authoritative record received from the server
    pub fn apply_record(&mut self, record: &MissionRecord, bus: &mut dyn EventBus) -> Result<bool, MissionError> {
        let cell = self.get_or_create(record.mission_id)?;

        let (changed, completed) = {
            let mut mission = lock_mission(&cell);
            let def = Arc::clone(mission.definition());
            let registry = &self.registry;
            let changed = mission.apply_record(record, || registry.handler_for(&def), bus);
            (changed, changed && mission.state() == MissionState::Completed)
        };

        if completed {
            self.on_completed(record.mission_id);
        }
        Ok(changed)
    }

    fn on_completed(&mut self, id: MissionId) {
        self.providers.retain(|npc, offered| {
            let keep = *offered != id;
            if !keep {
                debug!("NPC {} no longer offers completed mission {}", npc, id);
            }
            keep
        });

        for dependent in self.registry.dependents_of(id) {
            match self.unlock(dependent) {
                Ok(true) => info!(
                    "Mission {} unlocked for player {} by completing {}",
                    dependent, self.player_id, id
                ),
                Ok(false) => {}
                Err(e) => warn!("Failed to unlock mission {}: {}", dependent, e),
            }
        }
    }

    /// Whether a fresh instance of `def` should start unlocked
    fn is_unlocked_by_history(&self, def: &MissionDefinition) -> bool {
        if self.registry.starts_unlocked(def) {
            return true;
        }
        self.missions.iter().any(|(id, cell)| {
            lock_mission(cell).state() == MissionState::Completed
                && self.registry.dependents_of(*id).contains(&def.id)
        })
    }
}
