//! Mission Objective Handlers
//!
//! A handler holds the per-mission business logic: which events matter and
//! which objective of the current stage they advance. The binding owns the
//! handler together with the bus subscriptions made on its behalf.

use std::fmt;

use tracing::{debug, warn};
use uuid::Uuid;

use super::definition::{MissionDefinition, MissionId};
use super::events::{EventBus, EventKind, GameEvent, Subscriber, SubscriptionHandle};
use crate::error::MissionError;

/// Identity of one handler instance (a new one per `start()`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress to apply to one objective of the current stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Index within the current objective set
    pub objective: usize,
    pub amount: u32,
}

impl Progress {
    pub fn new(objective: usize, amount: u32) -> Self {
        Self { objective, amount }
    }
}

/// A dialogue sequence to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueCue {
    pub speaker: String,
    pub key: String,
}

impl DialogueCue {
    pub fn new(speaker: &str, key: &str) -> Self {
        Self {
            speaker: speaker.to_string(),
            key: key.to_string(),
        }
    }
}

/// Per-mission event routing logic
///
/// `route` must never panic: it runs inside the simulation's hot path, so an
/// event without a mapping simply produces no progress.
pub trait ObjectiveHandler: Send {
    fn name(&self) -> &'static str;

    /// Event kinds this mission listens to while active
    fn event_kinds(&self) -> Vec<EventKind>;

    /// Map an event to progress on the given stage
    fn route(&self, stage: usize, event: &GameEvent) -> Vec<Progress>;

    fn start_dialogue(&self, def: &MissionDefinition) -> Option<DialogueCue> {
        def.dialogue
            .start
            .as_deref()
            .map(|key| DialogueCue::new(&def.provider, key))
    }

    fn objective_dialogue(&self, def: &MissionDefinition, global_index: usize) -> Option<DialogueCue> {
        def.objective(global_index)
            .and_then(|o| o.on_complete.as_deref())
            .map(|key| DialogueCue::new(&def.provider, key))
    }

    /// Dialogue for entering `set_index`
    fn stage_dialogue(&self, def: &MissionDefinition, set_index: usize) -> Option<DialogueCue> {
        def.objective_sets
            .get(set_index)
            .and_then(|s| s.intro.as_deref())
            .map(|key| DialogueCue::new(&def.provider, key))
    }

    fn complete_dialogue(&self, def: &MissionDefinition) -> Option<DialogueCue> {
        def.dialogue
            .complete
            .as_deref()
            .map(|key| DialogueCue::new(&def.provider, key))
    }
}

/// A handler bound to one mission, with its bus subscriptions
pub struct HandlerBinding {
    id: HandlerId,
    mission: MissionId,
    handler: Box<dyn ObjectiveHandler>,
    subscriptions: Vec<SubscriptionHandle>,
    attached: bool,
}

impl HandlerBinding {
    pub fn new(mission: MissionId, handler: Box<dyn ObjectiveHandler>) -> Self {
        Self {
            id: HandlerId::new(),
            mission,
            handler,
            subscriptions: Vec::new(),
            attached: false,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn handler(&self) -> &dyn ObjectiveHandler {
        self.handler.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Subscribe once per declared event kind
    ///
    /// A second call fails without touching the bus.
    pub fn attach(&mut self, bus: &mut dyn EventBus) -> Result<usize, MissionError> {
        if self.attached {
            return Err(MissionError::HandlerAlreadyAttached(self.mission));
        }

        let mut kinds = self.handler.event_kinds();
        kinds.sort();
        kinds.dedup();

        let subscriber = Subscriber {
            mission: self.mission,
        };
        self.subscriptions = kinds
            .into_iter()
            .map(|kind| bus.subscribe(kind, subscriber))
            .collect();
        self.attached = true;

        debug!(
            "Attached {} handler for mission {} ({} subscriptions)",
            self.handler.name(),
            self.mission,
            self.subscriptions.len()
        );
        Ok(self.subscriptions.len())
    }

    /// Release every subscription made by `attach`; no-op if never attached
    pub fn detach(&mut self, bus: &mut dyn EventBus) -> usize {
        if !self.attached {
            return 0;
        }

        let released = self
            .subscriptions
            .drain(..)
            .filter(|handle| bus.unsubscribe(*handle))
            .count();
        self.attached = false;

        debug!(
            "Detached {} handler for mission {} ({} subscriptions released)",
            self.handler.name(),
            self.mission,
            released
        );
        released
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("id", &self.id)
            .field("mission", &self.mission)
            .field("handler", &self.handler.name())
            .field("subscriptions", &self.subscriptions)
            .field("attached", &self.attached)
            .finish()
    }
}

impl Drop for HandlerBinding {
    fn drop(&mut self) {
        if self.attached {
            warn!(
                "Handler for mission {} dropped with {} live subscriptions",
                self.mission,
                self.subscriptions.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::events::LocalEventBus;

    struct KillHandler;

    impl ObjectiveHandler for KillHandler {
        fn name(&self) -> &'static str {
            "kill"
        }

        fn event_kinds(&self) -> Vec<EventKind> {
            vec![EventKind::NpcKill, EventKind::NpcHit, EventKind::NpcKill]
        }

        fn route(&self, _stage: usize, event: &GameEvent) -> Vec<Progress> {
            match event {
                GameEvent::NpcKill { .. } => vec![Progress::new(0, 1)],
                _ => Vec::new(),
            }
        }
    }

    #[test]
    fn test_attach_is_guarded() {
        let mut bus = LocalEventBus::new();
        let mut binding = HandlerBinding::new(MissionId(4), Box::new(KillHandler));

        // Duplicate kinds collapse to one subscription each
        assert_eq!(binding.attach(&mut bus).unwrap(), 2);
        assert_eq!(
            binding.attach(&mut bus),
            Err(MissionError::HandlerAlreadyAttached(MissionId(4)))
        );
        assert_eq!(bus.subscription_count(MissionId(4)), 2);

        assert_eq!(binding.detach(&mut bus), 2);
        assert_eq!(bus.subscription_count(MissionId(4)), 0);
        assert!(!binding.is_attached());
    }

    #[test]
    fn test_detach_without_attach() {
        let mut bus = LocalEventBus::new();
        let mut binding = HandlerBinding::new(MissionId(4), Box::new(KillHandler));
        assert_eq!(binding.detach(&mut bus), 0);
        assert_eq!(binding.detach(&mut bus), 0);
        assert!(bus.is_empty());
    }
}
