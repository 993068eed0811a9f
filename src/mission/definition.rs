//! Mission Definition Structures
//!
//! Raw structures are deserialized from TOML mission files and resolved into
//! immutable definitions shared by every player's mission log.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::events::EventKind;
use crate::error::DefinitionError;

/// Stable mission identifier, used as the persistence key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub u32);

impl MissionId {
    pub const REAWAKENING: MissionId = MissionId(1);
    pub const SPORE_SPLINTER: MissionId = MissionId(2);
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mission definition file as it appears on disk
#[derive(Debug, Clone, Deserialize)]
pub struct RawMissionFile {
    pub mission: RawMission,
}

/// Raw mission data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawMission {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entity kind of the NPC offering this mission
    pub provider: String,
    #[serde(default)]
    pub mainline: bool,
    /// Mission that must be completed before this one unlocks
    pub prerequisite: Option<u32>,
    /// Missions unlocked when this one completes
    #[serde(default)]
    pub unlocks: Vec<u32>,
    #[serde(default)]
    pub stages: Vec<RawStage>,
    #[serde(default)]
    pub rewards: Option<RawReward>,
    #[serde(default)]
    pub dialogue: Option<RawDialogue>,
}

/// One objective set
#[derive(Debug, Clone, Deserialize)]
pub struct RawStage {
    /// Dialogue key started when the mission advances into this stage
    pub intro: Option<String>,
    #[serde(default)]
    pub objectives: Vec<RawObjective>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawObjective {
    pub description: String,
    #[serde(default = "default_count")]
    pub count: u32,
    /// Event kind that advances this objective (data-driven handler only)
    pub trigger: Option<String>,
    /// Item id, NPC kind or dialogue key the trigger must match
    pub target: Option<String>,
    /// Dialogue key started when this objective completes
    pub dialogue: Option<String>,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReward {
    #[serde(default)]
    pub exp: u32,
    #[serde(default)]
    pub items: Vec<RawItemReward>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawItemReward {
    pub id: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDialogue {
    pub start: Option<String>,
    pub complete: Option<String>,
}

// ============================================================================
// Resolved Mission Structures
// ============================================================================

/// A stack of items granted as a reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_id: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(item_id: &str, count: u32) -> Self {
        Self {
            item_id: item_id.to_string(),
            count,
        }
    }
}

/// Event filter used by the data-driven handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trigger {
    pub event: EventKind,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveDef {
    pub description: String,
    pub target_count: u32,
    pub trigger: Option<Trigger>,
    pub on_complete: Option<String>,
}

impl ObjectiveDef {
    pub fn new(description: &str, target_count: u32) -> Self {
        Self {
            description: description.to_string(),
            target_count,
            trigger: None,
            on_complete: None,
        }
    }

    pub fn triggered_by(mut self, event: EventKind, target: &str) -> Self {
        self.trigger = Some(Trigger {
            event,
            target: target.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveSetDef {
    pub objectives: Vec<ObjectiveDef>,
    pub intro: Option<String>,
}

impl ObjectiveSetDef {
    pub fn new(objectives: Vec<ObjectiveDef>) -> Self {
        Self {
            objectives,
            intro: None,
        }
    }
}

/// Dialogue keys fired at the mission's outer boundaries
#[derive(Debug, Clone, Default, Serialize)]
pub struct MissionDialogue {
    pub start: Option<String>,
    pub complete: Option<String>,
}

/// A fully resolved, immutable mission template
#[derive(Debug, Clone, Serialize)]
pub struct MissionDefinition {
    pub id: MissionId,
    pub name: String,
    pub description: String,
    /// NPC entity kind offering this mission
    pub provider: String,
    pub is_mainline: bool,
    pub objective_sets: Vec<ObjectiveSetDef>,
    pub rewards: Vec<ItemStack>,
    pub xp_reward: u32,
    pub prerequisite: Option<MissionId>,
    pub unlocks: Vec<MissionId>,
    pub dialogue: MissionDialogue,
}

impl MissionDefinition {
    /// Minimal definition, mostly for tests and programmatic registration
    pub fn new(id: MissionId, name: &str, provider: &str, objective_sets: Vec<ObjectiveSetDef>) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: String::new(),
            provider: provider.to_string(),
            is_mainline: false,
            objective_sets,
            rewards: Vec::new(),
            xp_reward: 0,
            prerequisite: None,
            unlocks: Vec::new(),
            dialogue: MissionDialogue::default(),
        }
    }

    /// Create a definition from raw TOML data
    pub fn from_raw(raw: &RawMission) -> Result<Self, DefinitionError> {
        let invalid = |reason: String| DefinitionError::Invalid {
            mission: raw.name.clone(),
            reason,
        };

        if raw.stages.is_empty() {
            return Err(invalid("mission has no stages".to_string()));
        }

        let mut objective_sets = Vec::with_capacity(raw.stages.len());
        for (stage_index, stage) in raw.stages.iter().enumerate() {
            if stage.objectives.is_empty() {
                return Err(invalid(format!("stage {} has no objectives", stage_index)));
            }

            let mut objectives = Vec::with_capacity(stage.objectives.len());
            for (i, o) in stage.objectives.iter().enumerate() {
                let trigger = match (&o.trigger, &o.target) {
                    (Some(kind), Some(target)) => {
                        let event = EventKind::from_str(kind).ok_or_else(|| {
                            invalid(format!(
                                "invalid trigger '{}' at stage {} objective {}",
                                kind, stage_index, i
                            ))
                        })?;
                        Some(Trigger {
                            event,
                            target: target.clone(),
                        })
                    }
                    (Some(kind), None) => {
                        return Err(invalid(format!(
                            "trigger '{}' at stage {} objective {} has no target",
                            kind, stage_index, i
                        )));
                    }
                    _ => None,
                };

                let target_count = if o.count == 0 {
                    warn!(
                        "Mission '{}' stage {} objective {} has count 0, using 1",
                        raw.name, stage_index, i
                    );
                    1
                } else {
                    o.count
                };

                objectives.push(ObjectiveDef {
                    description: o.description.clone(),
                    target_count,
                    trigger,
                    on_complete: o.dialogue.clone(),
                });
            }

            objective_sets.push(ObjectiveSetDef {
                objectives,
                intro: stage.intro.clone(),
            });
        }

        let rewards = raw.rewards.clone().unwrap_or_default();
        let dialogue = raw.dialogue.clone().unwrap_or_default();

        Ok(Self {
            id: MissionId(raw.id),
            name: raw.name.clone(),
            description: raw.description.clone(),
            provider: raw.provider.clone(),
            is_mainline: raw.mainline,
            objective_sets,
            rewards: rewards
                .items
                .iter()
                .map(|i| ItemStack::new(&i.id, i.count))
                .collect(),
            xp_reward: rewards.exp,
            prerequisite: raw.prerequisite.map(MissionId),
            unlocks: raw.unlocks.iter().copied().map(MissionId).collect(),
            dialogue: MissionDialogue {
                start: dialogue.start,
                complete: dialogue.complete,
            },
        })
    }

    pub fn set_count(&self) -> usize {
        self.objective_sets.len()
    }

    pub fn total_objectives(&self) -> usize {
        self.objective_sets.iter().map(|s| s.objectives.len()).sum()
    }

    pub fn has_triggers(&self) -> bool {
        self.objective_sets
            .iter()
            .flat_map(|s| &s.objectives)
            .any(|o| o.trigger.is_some())
    }

    /// Position of an objective in the flattened, definition-ordered list
    pub fn global_index(&self, set_index: usize, local_index: usize) -> usize {
        self.objective_sets
            .iter()
            .take(set_index)
            .map(|s| s.objectives.len())
            .sum::<usize>()
            .saturating_add(local_index)
    }

    /// Objective definition by flattened index
    pub fn objective(&self, global_index: usize) -> Option<&ObjectiveDef> {
        self.objective_sets
            .iter()
            .flat_map(|s| s.objectives.iter())
            .nth(global_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSION_TOML: &str = r#"
[mission]
id = 7
name = "Lumberjack"
provider = "guide"
unlocks = [8]

[mission.rewards]
exp = 40

[[mission.rewards.items]]
id = "copper_axe"

[[mission.stages]]
[[mission.stages.objectives]]
description = "Collect wood"
count = 10
trigger = "item_pickup"
target = "wood"

[[mission.stages]]
intro = "lumberjack_return"
[[mission.stages.objectives]]
description = "Talk to the guide"
trigger = "npc_chat"
target = "guide"
"#;

    #[test]
    fn test_from_raw() {
        let raw: RawMissionFile = toml::from_str(MISSION_TOML).unwrap();
        let def = MissionDefinition::from_raw(&raw.mission).unwrap();

        assert_eq!(def.id, MissionId(7));
        assert_eq!(def.set_count(), 2);
        assert_eq!(def.total_objectives(), 2);
        assert_eq!(def.xp_reward, 40);
        assert_eq!(def.rewards, vec![ItemStack::new("copper_axe", 1)]);
        assert_eq!(def.unlocks, vec![MissionId(8)]);
        assert_eq!(def.objective_sets[1].intro.as_deref(), Some("lumberjack_return"));

        let trigger = def.objective_sets[0].objectives[0].trigger.as_ref().unwrap();
        assert_eq!(trigger.event, EventKind::ItemPickup);
        assert_eq!(trigger.target, "wood");
        assert_eq!(def.global_index(1, 0), 1);
        assert_eq!(def.objective(1).unwrap().description, "Talk to the guide");
    }

    #[test]
    fn test_rejects_empty_and_bad_triggers() {
        let mut raw: RawMissionFile = toml::from_str(MISSION_TOML).unwrap();
        raw.mission.stages[0].objectives[0].trigger = Some("teleport".to_string());
        assert!(MissionDefinition::from_raw(&raw.mission).is_err());

        raw.mission.stages.clear();
        assert!(MissionDefinition::from_raw(&raw.mission).is_err());
    }

    #[test]
    fn test_zero_count_is_raised() {
        let mut raw: RawMissionFile = toml::from_str(MISSION_TOML).unwrap();
        raw.mission.stages[0].objectives[0].count = 0;
        let def = MissionDefinition::from_raw(&raw.mission).unwrap();
        assert_eq!(def.objective_sets[0].objectives[0].target_count, 1);
    }
}
