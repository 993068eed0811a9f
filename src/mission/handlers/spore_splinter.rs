//! Spore Splinter: craft the splinter, then bring down the mushroom guardian.

use crate::mission::definition::MissionDefinition;
use crate::mission::events::{EventKind, GameEvent};
use crate::mission::handler::{DialogueCue, ObjectiveHandler, Progress};

const SPLINTER: &str = "spore_splinter";
const GUARDIAN: &str = "mushroom_guardian";

pub struct SporeSplinterHandler;

impl SporeSplinterHandler {
    pub fn boxed(_def: &MissionDefinition) -> Box<dyn ObjectiveHandler> {
        Box::new(SporeSplinterHandler)
    }
}

impl ObjectiveHandler for SporeSplinterHandler {
    fn name(&self) -> &'static str {
        "spore_splinter"
    }

    fn event_kinds(&self) -> Vec<EventKind> {
        vec![EventKind::ItemCreated, EventKind::NpcHit, EventKind::NpcKill]
    }

    fn route(&self, stage: usize, event: &GameEvent) -> Vec<Progress> {
        match (stage, event) {
            (0, GameEvent::ItemCreated { item_id, count }) if item_id == SPLINTER => {
                vec![Progress::new(0, *count)]
            }
            (1, GameEvent::NpcHit { npc_kind, damage }) if npc_kind == GUARDIAN => {
                vec![Progress::new(0, *damage)]
            }
            (1, GameEvent::NpcKill { npc_kind }) if npc_kind == GUARDIAN => {
                // A kill completes the wound objective outright
                vec![Progress::new(0, u32::MAX), Progress::new(1, 1)]
            }
            _ => Vec::new(),
        }
    }

    /// The guardian speaks up when its wounds objective completes
    fn objective_dialogue(&self, def: &MissionDefinition, global_index: usize) -> Option<DialogueCue> {
        if global_index == def.global_index(1, 0) {
            return Some(DialogueCue::new(GUARDIAN, "guardian_enraged"));
        }
        def.objective(global_index)
            .and_then(|o| o.on_complete.as_deref())
            .map(|key| DialogueCue::new(&def.provider, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::definition::{MissionId, ObjectiveDef, ObjectiveSetDef};

    fn definition() -> MissionDefinition {
        MissionDefinition::new(
            MissionId::SPORE_SPLINTER,
            "Spore Splinter",
            "elder_mushroom",
            vec![
                ObjectiveSetDef::new(vec![ObjectiveDef::new("Craft the splinter", 1)]),
                ObjectiveSetDef::new(vec![
                    ObjectiveDef::new("Wound the guardian", 200),
                    ObjectiveDef::new("Defeat the guardian", 1),
                ]),
            ],
        )
    }

    #[test]
    fn test_hit_adds_damage() {
        let hit = GameEvent::NpcHit {
            npc_kind: GUARDIAN.to_string(),
            damage: 35,
        };
        assert_eq!(SporeSplinterHandler.route(1, &hit), vec![Progress::new(0, 35)]);
        assert!(SporeSplinterHandler.route(0, &hit).is_empty());
    }

    #[test]
    fn test_guardian_dialogue_override() {
        let def = definition();
        let cue = SporeSplinterHandler.objective_dialogue(&def, 1).unwrap();
        assert_eq!(cue, DialogueCue::new(GUARDIAN, "guardian_enraged"));
        assert!(SporeSplinterHandler.objective_dialogue(&def, 0).is_none());
    }
}
