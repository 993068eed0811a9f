//! Transition Side Effects
//!
//! Turns the effects recorded by a mission transition into dialogue, reward
//! grants and sync traffic, in the order they were recorded.

use tracing::{debug, info};

use super::api::MissionContext;
use super::definition::MissionDefinition;
use super::events::{EventKind, GameEvent};
use super::handler::{DialogueCue, ObjectiveHandler, Progress};
use super::state::{Mission, MissionEffect, Transition};
use super::sync::SyncMessage;

/// Dialogue hooks for a mission with no live handler (only the defaults)
struct DefinitionDialogue;

impl ObjectiveHandler for DefinitionDialogue {
    fn name(&self) -> &'static str {
        "definition"
    }

    fn event_kinds(&self) -> Vec<EventKind> {
        Vec::new()
    }

    fn route(&self, _stage: usize, _event: &GameEvent) -> Vec<Progress> {
        Vec::new()
    }
}

/// Dispatch every effect of `transition`
///
/// Called with the mission still locked so no other caller can observe the
/// mission between the state change and its effects.
pub fn dispatch(mission: &Mission, transition: &Transition, ctx: &mut MissionContext<'_>) {
    let def = mission.definition();
    let handler: &dyn ObjectiveHandler = match transition.retired.as_ref().or(mission.binding()) {
        Some(binding) => binding.handler(),
        None => &DefinitionDialogue,
    };

    for effect in &transition.effects {
        match *effect {
            MissionEffect::Started => {
                play(ctx, handler.start_dialogue(def));
                play(ctx, handler.stage_dialogue(def, mission.current_set_index()));
            }
            MissionEffect::ObjectiveCompleted { global_index } => {
                play(ctx, handler.objective_dialogue(def, global_index));
            }
            MissionEffect::SetAdvanced { set_index } => {
                play(ctx, handler.stage_dialogue(def, set_index));
            }
            MissionEffect::Completed => {
                grant_rewards(def, ctx);
                play(ctx, handler.complete_dialogue(def));
            }
            MissionEffect::Abandoned => {
                debug!("Mission {} abandoned by {}", def.id, ctx.player_id);
            }
        }
    }

    if transition.crossed_boundary() {
        if let Some(sync) = ctx.sync.as_deref_mut() {
            sync.broadcast(SyncMessage::mission_progress(ctx.player_id, mission.record()));
        }
    }
}

fn grant_rewards(def: &MissionDefinition, ctx: &mut MissionContext<'_>) {
    if !def.rewards.is_empty() {
        ctx.rewards.grant_items(ctx.player_id, &def.rewards);
    }
    if def.xp_reward > 0 {
        ctx.rewards.grant_experience(ctx.player_id, def.xp_reward);
        if let Some(sync) = ctx.sync.as_deref_mut() {
            sync.broadcast(SyncMessage::add_experience(ctx.player_id, def.id, def.xp_reward));
        }
    }

    info!(
        "Player {} rewarded for mission {}: {} item stacks, {} xp",
        ctx.player_id,
        def.name,
        def.rewards.len(),
        def.xp_reward
    );
}

fn play(ctx: &mut MissionContext<'_>, cue: Option<DialogueCue>) {
    if let Some(cue) = cue {
        ctx.dialogue.start_sequence(&cue.speaker, &cue.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mission::api::testing::{RecordingDialogue, RecordingRewards, RecordingSync};
    use crate::mission::definition::{ItemStack, MissionId, ObjectiveDef, ObjectiveSetDef};
    use crate::mission::events::LocalEventBus;
    use crate::mission::handlers::TriggerHandler;
    use crate::mission::state::MissionState;
    use crate::mission::sync::SyncPayload;

    fn definition() -> Arc<MissionDefinition> {
        let mut def = MissionDefinition::new(
            MissionId(30),
            "Wood for the Fire",
            "guide",
            vec![ObjectiveSetDef::new(vec![
                ObjectiveDef::new("Collect wood", 10).triggered_by(EventKind::ItemPickup, "wood"),
            ])],
        );
        def.rewards = vec![ItemStack::new("gold_coin", 5)];
        def.xp_reward = 40;
        def.dialogue.start = Some("wood_start".to_string());
        def.dialogue.complete = Some("wood_done".to_string());
        Arc::new(def)
    }

    #[test]
    fn test_completion_effects_in_order() {
        let def = definition();
        let mut bus = LocalEventBus::new();
        let mut dialogue = RecordingDialogue::default();
        let mut rewards = RecordingRewards::default();
        let mut sync = RecordingSync::default();

        let mut mission = Mission::new(Arc::clone(&def), MissionState::Unlocked);
        let started = mission.start(Box::new(TriggerHandler::new(&def)), &mut bus).unwrap();
        let done = mission.update_progress(0, 10, "p1", &mut bus).unwrap();

        {
            let mut ctx = MissionContext::new("p1", &mut bus, &mut dialogue, &mut rewards).with_sync(&mut sync);
            dispatch(&mission, &started, &mut ctx);
            dispatch(&mission, &done, &mut ctx);
        }

        assert_eq!(
            dialogue.played,
            vec![
                ("guide".to_string(), "wood_start".to_string()),
                ("guide".to_string(), "wood_done".to_string()),
            ]
        );
        assert_eq!(rewards.items, vec![ItemStack::new("gold_coin", 5)]);
        assert_eq!(rewards.experience, 40);

        assert_eq!(sync.sent.len(), 2);
        assert_eq!(sync.sent[0].payload, SyncPayload::Experience(40));
        assert!(matches!(sync.sent[1].payload, SyncPayload::Progress(ref r) if r.state == MissionState::Completed));
    }

    #[test]
    fn test_no_sync_without_boundary() {
        let def = definition();
        let mut bus = LocalEventBus::new();
        let mut dialogue = RecordingDialogue::default();
        let mut rewards = RecordingRewards::default();
        let mut sync = RecordingSync::default();

        let mut mission = Mission::new(Arc::clone(&def), MissionState::Unlocked);
        mission.start(Box::new(TriggerHandler::new(&def)), &mut bus).unwrap();
        let partial = mission.update_progress(0, 4, "p1", &mut bus).unwrap();

        {
            let mut ctx = MissionContext::new("p1", &mut bus, &mut dialogue, &mut rewards).with_sync(&mut sync);
            dispatch(&mission, &partial, &mut ctx);
        }
        assert!(sync.sent.is_empty());
        assert_eq!(rewards.grants, 0);
        mission.abandon(&mut bus, true).unwrap();
    }
}
