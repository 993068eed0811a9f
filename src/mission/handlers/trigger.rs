//! Trigger handler: the default for missions without custom code.
//!
//! Each objective names an event kind and a target in the mission file; an
//! event matching an objective in the current stage advances it.

use crate::mission::definition::{MissionDefinition, Trigger};
use crate::mission::events::{EventKind, GameEvent};
use crate::mission::handler::{ObjectiveHandler, Progress};

/// Routes events using the triggers declared in the mission file
pub struct TriggerHandler {
    /// Per stage: (objective index, trigger)
    stages: Vec<Vec<(usize, Trigger)>>,
}

impl TriggerHandler {
    pub fn new(def: &MissionDefinition) -> Self {
        let stages = def
            .objective_sets
            .iter()
            .map(|set| {
                set.objectives
                    .iter()
                    .enumerate()
                    .filter_map(|(i, o)| o.trigger.clone().map(|t| (i, t)))
                    .collect()
            })
            .collect();
        Self { stages }
    }
}

impl ObjectiveHandler for TriggerHandler {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn event_kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self
            .stages
            .iter()
            .flatten()
            .map(|(_, trigger)| trigger.event)
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    fn route(&self, stage: usize, event: &GameEvent) -> Vec<Progress> {
        let Some(triggers) = self.stages.get(stage) else {
            return Vec::new();
        };

        triggers
            .iter()
            .filter(|(_, t)| t.event == event.kind() && t.target == event.target())
            .map(|(i, _)| Progress::new(*i, event.amount()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::definition::{MissionId, ObjectiveDef, ObjectiveSetDef};

    fn definition() -> MissionDefinition {
        MissionDefinition::new(
            MissionId(10),
            "Gathering",
            "guide",
            vec![
                ObjectiveSetDef::new(vec![
                    ObjectiveDef::new("Collect wood", 10).triggered_by(EventKind::ItemPickup, "wood"),
                    ObjectiveDef::new("Collect gel", 5).triggered_by(EventKind::ItemPickup, "gel"),
                ]),
                ObjectiveSetDef::new(vec![
                    ObjectiveDef::new("Kill slimes", 3).triggered_by(EventKind::NpcKill, "slime"),
                ]),
            ],
        )
    }

    #[test]
    fn test_event_kinds_are_deduplicated() {
        let handler = TriggerHandler::new(&definition());
        assert_eq!(handler.event_kinds(), vec![EventKind::ItemPickup, EventKind::NpcKill]);
    }

    #[test]
    fn test_route_by_stage() {
        let handler = TriggerHandler::new(&definition());
        let pickup = GameEvent::ItemPickup {
            item_id: "gel".to_string(),
            count: 2,
        };
        let kill = GameEvent::NpcKill {
            npc_kind: "slime".to_string(),
        };

        assert_eq!(handler.route(0, &pickup), vec![Progress::new(1, 2)]);
        assert!(handler.route(0, &kill).is_empty());
        assert_eq!(handler.route(1, &kill), vec![Progress::new(0, 1)]);
        assert!(handler.route(1, &pickup).is_empty());
        assert!(handler.route(7, &kill).is_empty());
    }
}
