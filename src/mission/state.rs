//! Mission State Tracking
//!
//! The runtime mission instance: lifecycle state, stage index, per-objective
//! counters and the handler bound while the mission is active.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::definition::{MissionDefinition, MissionId};
use super::events::{EventBus, GameEvent};
use super::handler::{HandlerBinding, HandlerId, ObjectiveHandler};
use super::objective::ObjectiveSet;
use crate::error::MissionError;

/// Lifecycle state of a mission for a player
///
/// Persisted as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MissionState {
    Locked,
    Unlocked,
    Active,
    Completed,
    /// Only produced by older saves; startable like `Unlocked`
    Abandoned,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Locked => "locked",
            MissionState::Unlocked => "unlocked",
            MissionState::Active => "active",
            MissionState::Completed => "completed",
            MissionState::Abandoned => "abandoned",
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            MissionState::Locked => 0,
            MissionState::Unlocked => 1,
            MissionState::Active => 2,
            MissionState::Completed => 3,
            MissionState::Abandoned => 4,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(MissionState::Locked),
            1 => Some(MissionState::Unlocked),
            2 => Some(MissionState::Active),
            3 => Some(MissionState::Completed),
            4 => Some(MissionState::Abandoned),
            _ => None,
        }
    }

    /// Position within one attempt, used to keep synchronised state from
    /// moving backwards
    ///
    /// A startable state after at least one start marks the end of an
    /// abandoned attempt, which supersedes that attempt's progress.
    fn phase(&self, attempt: u32) -> u8 {
        match self {
            MissionState::Locked => 0,
            MissionState::Unlocked | MissionState::Abandoned if attempt == 0 => 1,
            MissionState::Active => 2,
            MissionState::Completed => 3,
            MissionState::Unlocked | MissionState::Abandoned => 4,
        }
    }
}

impl From<MissionState> for u8 {
    fn from(state: MissionState) -> u8 {
        state.ordinal()
    }
}

impl TryFrom<u8> for MissionState {
    type Error = String;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        MissionState::from_ordinal(ordinal).ok_or_else(|| format!("Invalid mission state {}", ordinal))
    }
}

/// Side effects requested by a state transition, in firing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionEffect {
    Started,
    /// Index into the flattened objective list
    ObjectiveCompleted { global_index: usize },
    /// The mission moved into `set_index`
    SetAdvanced { set_index: usize },
    Completed,
    Abandoned,
}

/// Result of a mutating mission call
///
/// `retired` holds the handler released by a completion or abandon. It is
/// already detached from the bus and is kept only so its dialogue hooks can
/// run while effects are dispatched.
#[derive(Debug, Default)]
pub struct Transition {
    pub effects: Vec<MissionEffect>,
    pub retired: Option<HandlerBinding>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Whether a stage or mission boundary was crossed
    pub fn crossed_boundary(&self) -> bool {
        self.effects
            .iter()
            .any(|e| {
                matches!(
                    e,
                    MissionEffect::SetAdvanced { .. } | MissionEffect::Completed | MissionEffect::Abandoned
                )
            })
    }

    pub fn completed(&self) -> bool {
        self.effects.contains(&MissionEffect::Completed)
    }

    fn merge(&mut self, other: Transition) {
        self.effects.extend(other.effects);
        if other.retired.is_some() {
            self.retired = other.retired;
        }
    }
}

/// Persisted (and synchronised) shape of one mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub mission_id: MissionId,
    pub state: MissionState,
    pub current_set_index: u32,
    /// Flattened current counts, in definition order
    pub objective_counts: Vec<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times the mission has been started
    #[serde(default)]
    pub attempt: u32,
}

/// A mission instance for one player
#[derive(Debug)]
pub struct Mission {
    definition: Arc<MissionDefinition>,
    state: MissionState,
    current_set_index: usize,
    objective_sets: Vec<ObjectiveSet>,
    handler: Option<HandlerBinding>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    attempt: u32,
}

impl Mission {
    pub fn new(definition: Arc<MissionDefinition>, state: MissionState) -> Self {
        let objective_sets = definition.objective_sets.iter().map(ObjectiveSet::new).collect();
        let mut mission = Self {
            definition,
            state: MissionState::Locked,
            current_set_index: 0,
            objective_sets,
            handler: None,
            started_at: None,
            completed_at: None,
            attempt: 0,
        };
        match state {
            // A fresh instance can't be active without a handler
            MissionState::Active => mission.state = MissionState::Unlocked,
            MissionState::Completed => mission.mark_completed(),
            other => mission.state = other,
        }
        mission
    }

    pub fn id(&self) -> MissionId {
        self.definition.id
    }

    pub fn definition(&self) -> &Arc<MissionDefinition> {
        &self.definition
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == MissionState::Active
    }

    pub fn current_set_index(&self) -> usize {
        self.current_set_index
    }

    pub fn objective_sets(&self) -> &[ObjectiveSet] {
        &self.objective_sets
    }

    pub fn current_set(&self) -> Option<&ObjectiveSet> {
        self.objective_sets.get(self.current_set_index)
    }

    pub fn handler_id(&self) -> Option<HandlerId> {
        self.handler.as_ref().map(|h| h.id())
    }

    pub fn binding(&self) -> Option<&HandlerBinding> {
        self.handler.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Locked -> Unlocked; returns false for any other state
    pub fn unlock(&mut self) -> bool {
        if self.state != MissionState::Locked {
            return false;
        }
        self.state = MissionState::Unlocked;
        info!("Mission {} ({}) unlocked", self.definition.name, self.id());
        true
    }

    /// Begin the mission, binding and subscribing its handler
    pub fn start(
        &mut self,
        handler: Box<dyn ObjectiveHandler>,
        bus: &mut dyn EventBus,
    ) -> Result<Transition, MissionError> {
        match self.state {
            MissionState::Active => return Err(MissionError::AlreadyActive(self.id())),
            MissionState::Locked => return Err(MissionError::NotUnlocked(self.id())),
            MissionState::Completed => return Err(MissionError::AlreadyCompleted(self.id())),
            MissionState::Unlocked | MissionState::Abandoned => {}
        }
        if self.handler.is_some() {
            return Err(MissionError::HandlerAlreadyAttached(self.id()));
        }

        let mut binding = HandlerBinding::new(self.id(), handler);
        binding.attach(bus)?;
        self.handler = Some(binding);
        self.state = MissionState::Active;
        self.started_at = Some(Utc::now());
        self.attempt = self.attempt.saturating_add(1);

        info!(
            "Mission {} ({}) started at stage {}",
            self.definition.name,
            self.id(),
            self.current_set_index
        );

        Ok(Transition {
            effects: vec![MissionEffect::Started],
            retired: None,
        })
    }

    /// Apply progress to an objective of the current stage
    ///
    /// The only mutation entry point for handlers. Objective-level effects are
    /// recorded before set-level ones; on the final set the handler is
    /// detached before the transition is returned.
    pub fn update_progress(
        &mut self,
        objective_index: usize,
        amount: u32,
        actor: &str,
        bus: &mut dyn EventBus,
    ) -> Result<Transition, MissionError> {
        if self.state != MissionState::Active {
            warn!(
                "Ignoring progress for mission {} from {}: state is {}",
                self.id(),
                actor,
                self.state.as_str()
            );
            return Err(MissionError::StaleEventIgnored {
                mission: self.id(),
                reason: "mission not active",
            });
        }

        let set_index = self.current_set_index;
        let Some(set) = self.objective_sets.get_mut(set_index) else {
            return Err(MissionError::StaleEventIgnored {
                mission: self.definition.id,
                reason: "no current stage",
            });
        };
        let Some(objective) = set.objective_mut(objective_index) else {
            debug!(
                "Mission {} stage {} has no objective {}",
                self.definition.id, set_index, objective_index
            );
            return Err(MissionError::StaleEventIgnored {
                mission: self.definition.id,
                reason: "objective not in current stage",
            });
        };
        let global_index = self.definition.global_index(set_index, objective_index);

        let mut transition = Transition::default();

        if objective.add(amount) {
            debug!(
                "Player {} completed objective {} of mission {}",
                actor, global_index, self.definition.id
            );
            transition
                .effects
                .push(MissionEffect::ObjectiveCompleted { global_index });
        }

        if set.recompute_completion() {
            self.advance(bus, &mut transition);
        }

        Ok(transition)
    }

    /// Route an event through the handler and apply the resulting progress
    ///
    /// Progress computed for one stage is dropped once the stage changes
    /// part-way through, and nothing is applied after the mission leaves
    /// `Active`.
    pub fn route(&mut self, event: &GameEvent, actor: &str, bus: &mut dyn EventBus) -> Transition {
        let mut transition = Transition::default();
        if !self.is_active() {
            return transition;
        }
        let Some(binding) = self.handler.as_ref() else {
            return transition;
        };

        let stage = self.current_set_index;
        let progress = binding.handler().route(stage, event);
        if progress.is_empty() {
            debug!(
                "Mission {} stage {} has no mapping for {}",
                self.id(),
                stage,
                event.kind().as_str()
            );
            return transition;
        }

        for p in progress {
            if !self.is_active() || self.current_set_index != stage {
                debug!("Mission {} moved past stage {}, dropping progress", self.id(), stage);
                break;
            }
            match self.update_progress(p.objective, p.amount, actor, bus) {
                Ok(t) => transition.merge(t),
                Err(e) => debug!("{}", e),
            }
        }

        transition
    }

    /// Give up on the mission; returns it to `Unlocked`
    pub fn abandon(&mut self, bus: &mut dyn EventBus, reset_progress: bool) -> Result<Transition, MissionError> {
        if self.state != MissionState::Active {
            return Err(MissionError::NotActive(self.id()));
        }

        let retired = self.retire_handler(bus);
        self.state = MissionState::Unlocked;
        if reset_progress {
            for set in &mut self.objective_sets {
                set.reset();
            }
            self.current_set_index = 0;
            self.started_at = None;
        }

        info!(
            "Mission {} ({}) abandoned (progress {})",
            self.definition.name,
            self.id(),
            if reset_progress { "reset" } else { "kept" }
        );

        Ok(Transition {
            effects: vec![MissionEffect::Abandoned],
            retired,
        })
    }

    /// Re-bind a handler to a mission restored in the `Active` state
    pub fn resume(&mut self, handler: Box<dyn ObjectiveHandler>, bus: &mut dyn EventBus) -> Result<(), MissionError> {
        if self.state != MissionState::Active {
            return Err(MissionError::NotActive(self.id()));
        }
        if self.handler.is_some() {
            return Err(MissionError::HandlerAlreadyAttached(self.id()));
        }
        let mut binding = HandlerBinding::new(self.id(), handler);
        binding.attach(bus)?;
        self.handler = Some(binding);
        Ok(())
    }

    /// Release the handler's subscriptions without leaving `Active`
    ///
    /// For a log being unloaded; the mission must be resumed before it
    /// receives events again.
    pub fn suspend(&mut self, bus: &mut dyn EventBus) -> bool {
        self.retire_handler(bus).is_some()
    }

    /// Snapshot for persistence and synchronisation
    pub fn record(&self) -> MissionRecord {
        MissionRecord {
            mission_id: self.id(),
            state: self.state,
            current_set_index: self.current_set_index as u32,
            objective_counts: self.objective_sets.iter().flat_map(|s| s.counts()).collect(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            attempt: self.attempt,
        }
    }

    /// Rebuild from a record, clamping anything out of range
    ///
    /// A restored `Active` mission has no handler yet; the caller must
    /// `resume` it.
    pub fn from_record(definition: Arc<MissionDefinition>, record: &MissionRecord) -> Self {
        let mut mission = Mission::new(definition, MissionState::Locked);
        let set_count = mission.objective_sets.len();
        mission.started_at = record.started_at;
        mission.attempt = record.attempt;

        if record.state == MissionState::Completed {
            mission.mark_completed();
            mission.completed_at = record.completed_at;
            return mission;
        }

        let mut set_index = record.current_set_index as usize;
        if set_index >= set_count {
            warn!(
                "Mission {} saved at stage {} of {}, clamping",
                mission.id(),
                set_index,
                set_count
            );
            set_index = set_count.saturating_sub(1);
        }
        if record.objective_counts.len() != mission.definition.total_objectives() {
            warn!(
                "Mission {} saved with {} objective counts, expected {}",
                mission.id(),
                record.objective_counts.len(),
                mission.definition.total_objectives()
            );
        }

        let mut counts = record.objective_counts.iter().copied();
        for (i, set) in mission.objective_sets.iter_mut().enumerate() {
            for objective in &mut set.objectives {
                let count = counts.next().unwrap_or(0);
                if i < set_index {
                    objective.force_complete();
                } else if i == set_index {
                    objective.set_count(count);
                } else {
                    objective.set_count(0);
                }
            }
            set.recompute_completion();
        }

        mission.state = record.state;
        mission.current_set_index = set_index;

        // A saved stage that is already complete was never advanced past
        while mission.current_set_index < set_count
            && mission.objective_sets[mission.current_set_index].is_completed
        {
            mission.current_set_index += 1;
        }
        if mission.current_set_index == set_count {
            warn!("Mission {} restored with every stage complete", mission.id());
            mission.mark_completed();
            mission.completed_at = record.completed_at.or_else(|| Some(Utc::now()));
        }

        mission
    }

    /// Merge an authoritative record (client side)
    ///
    /// Records behind the local state are ignored, so re-applying the same
    /// record changes nothing. A later attempt always wins, which lets an
    /// abandon or a restart replace further progress. Returns true if local
    /// state changed.
    pub fn apply_record(
        &mut self,
        record: &MissionRecord,
        make_handler: impl FnOnce() -> Box<dyn ObjectiveHandler>,
        bus: &mut dyn EventBus,
    ) -> bool {
        if self.state == MissionState::Completed || record.mission_id != self.id() {
            return false;
        }

        let incoming = Mission::from_record(Arc::clone(&self.definition), record);
        if incoming.progress_key() <= self.progress_key() {
            return false;
        }

        let was_active = self.is_active();
        self.objective_sets = incoming.objective_sets.clone();
        self.current_set_index = incoming.current_set_index;
        self.state = incoming.state;
        self.started_at = incoming.started_at;
        self.completed_at = incoming.completed_at;
        self.attempt = incoming.attempt;

        match (was_active, self.is_active()) {
            (true, false) => {
                self.retire_handler(bus);
            }
            (false, true) => {
                let mut binding = HandlerBinding::new(self.id(), make_handler());
                match binding.attach(bus) {
                    Ok(_) => self.handler = Some(binding),
                    Err(e) => warn!("Failed to attach handler during sync: {}", e),
                }
            }
            _ => {}
        }

        debug!(
            "Applied synced record for mission {}: {} at stage {}",
            self.id(),
            self.state.as_str(),
            self.current_set_index
        );
        true
    }

    fn progress_key(&self) -> (u32, u8, usize, u64) {
        let counted: u64 = self
            .objective_sets
            .iter()
            .flat_map(|s| s.counts())
            .map(u64::from)
            .sum();
        (
            self.attempt,
            self.state.phase(self.attempt),
            self.current_set_index,
            counted,
        )
    }

    /// Move past a completed stage, completing the mission after the last
    fn advance(&mut self, bus: &mut dyn EventBus, transition: &mut Transition) {
        let set_count = self.objective_sets.len();
        self.current_set_index += 1;

        while self.current_set_index < set_count
            && self.objective_sets[self.current_set_index].is_completed
        {
            self.current_set_index += 1;
        }

        if self.current_set_index >= set_count {
            // Release subscriptions before anything is granted
            transition.retired = self.retire_handler(bus);
            self.mark_completed();
            self.completed_at = Some(Utc::now());
            transition.effects.push(MissionEffect::Completed);
            info!("Mission {} ({}) completed", self.definition.name, self.id());
        } else {
            transition.effects.push(MissionEffect::SetAdvanced {
                set_index: self.current_set_index,
            });
            info!(
                "Mission {} ({}) advanced to stage {}",
                self.definition.name,
                self.id(),
                self.current_set_index
            );
        }
    }

    fn retire_handler(&mut self, bus: &mut dyn EventBus) -> Option<HandlerBinding> {
        let mut binding = self.handler.take()?;
        binding.detach(bus);
        Some(binding)
    }

    fn mark_completed(&mut self) {
        for set in &mut self.objective_sets {
            for objective in &mut set.objectives {
                objective.force_complete();
            }
            set.recompute_completion();
        }
        self.current_set_index = self.objective_sets.len();
        self.state = MissionState::Completed;
    }
}
