//! Reawakening: the first mainline mission.
//!
//! Stage 0: speak with the elder mushroom.
//! Stage 1: gather glowing mushrooms and thin out the spore slimes.
//! Stage 2: listen to the elder's account (dialogue must play to the end).

use crate::mission::definition::MissionDefinition;
use crate::mission::events::{EventKind, GameEvent};
use crate::mission::handler::{ObjectiveHandler, Progress};

const ELDER: &str = "elder_mushroom";
const GLOWING_MUSHROOM: &str = "glowing_mushroom";
const SPORE_SLIME: &str = "spore_slime";
const RETURN_DIALOGUE: &str = "reawakening_return";

pub struct ReawakeningHandler;

impl ReawakeningHandler {
    pub fn boxed(_def: &MissionDefinition) -> Box<dyn ObjectiveHandler> {
        Box::new(ReawakeningHandler)
    }
}

impl ObjectiveHandler for ReawakeningHandler {
    fn name(&self) -> &'static str {
        "reawakening"
    }

    fn event_kinds(&self) -> Vec<EventKind> {
        vec![
            EventKind::NpcChat,
            EventKind::ItemPickup,
            EventKind::NpcKill,
            EventKind::DialogueEnd,
        ]
    }

    fn route(&self, stage: usize, event: &GameEvent) -> Vec<Progress> {
        let progress = match (stage, event) {
            (0, GameEvent::NpcChat { npc_kind, .. }) if npc_kind == ELDER => Progress::new(0, 1),
            (1, GameEvent::ItemPickup { item_id, count }) if item_id == GLOWING_MUSHROOM => {
                Progress::new(0, *count)
            }
            (1, GameEvent::NpcKill { npc_kind }) if npc_kind == SPORE_SLIME => Progress::new(1, 1),
            (2, GameEvent::DialogueEnd { key }) if key == RETURN_DIALOGUE => Progress::new(0, 1),
            _ => return Vec::new(),
        };
        vec![progress]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_routing() {
        let handler = ReawakeningHandler;
        let chat = GameEvent::NpcChat {
            npc_id: "npc_3".to_string(),
            npc_kind: ELDER.to_string(),
        };
        let pickup = GameEvent::ItemPickup {
            item_id: GLOWING_MUSHROOM.to_string(),
            count: 4,
        };

        assert_eq!(handler.route(0, &chat), vec![Progress::new(0, 1)]);
        // Talking to the elder again in a later stage does nothing
        assert!(handler.route(1, &chat).is_empty());
        assert_eq!(handler.route(1, &pickup), vec![Progress::new(0, 4)]);
        assert!(handler.route(0, &pickup).is_empty());

        let end = GameEvent::DialogueEnd {
            key: RETURN_DIALOGUE.to_string(),
        };
        assert_eq!(handler.route(2, &end), vec![Progress::new(0, 1)]);
    }
}
