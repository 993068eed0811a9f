//! Mission Registry
//!
//! Loads and caches mission definitions from TOML files. The registry is
//! read-only once loaded and shared by every player's mission log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::definition::{MissionDefinition, MissionId, RawMissionFile};
use super::handler::ObjectiveHandler;
use super::handlers::HandlerRegistry;
use crate::error::DefinitionError;

/// Registry for all mission definitions
pub struct MissionRegistry {
    missions: BTreeMap<MissionId, Arc<MissionDefinition>>,
    handlers: HandlerRegistry,
}

impl MissionRegistry {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self {
            missions: BTreeMap::new(),
            handlers,
        }
    }

    /// Load every definition under `data_dir/missions`
    ///
    /// Files that fail to parse are logged and skipped. Returns the number of
    /// definitions loaded.
    pub fn load_from_directory(&mut self, data_dir: &Path) -> Result<usize, DefinitionError> {
        let mission_dir = data_dir.join("missions");
        info!("Loading missions from {:?}", mission_dir);

        if !mission_dir.exists() {
            warn!("Mission directory does not exist: {:?}", mission_dir);
            return Ok(0);
        }

        let mut paths = Vec::new();
        collect_toml_files(&mission_dir, &mut paths)?;
        paths.sort();

        let mut count = 0;
        for path in paths {
            match load_mission_file(&path) {
                Ok(def) => {
                    info!("Loaded mission: {} ({})", def.name, def.id);
                    self.insert(def);
                    count += 1;
                }
                Err(e) => warn!("Failed to load mission {:?}: {}", path, e),
            }
        }

        info!("Loaded {} mission definitions", count);
        self.validate_chains();
        Ok(count)
    }

    /// Register a definition, replacing any previous one with the same id
    pub fn insert(&mut self, def: MissionDefinition) {
        if let Some(previous) = self.missions.get(&def.id) {
            warn!(
                "Mission {} '{}' replaced by '{}'",
                def.id, previous.name, def.name
            );
        }
        if self.handlers.has_custom(def.id) && def.has_triggers() {
            warn!(
                "Mission {} '{}' has a custom handler; its objective triggers are ignored",
                def.id, def.name
            );
        }
        self.missions.insert(def.id, Arc::new(def));
    }

    /// Warn about prerequisite and unlock references to unknown missions
    ///
    /// Returns the number of dangling references.
    pub fn validate_chains(&self) -> usize {
        let mut dangling = 0;

        for def in self.missions.values() {
            if let Some(prereq) = def.prerequisite {
                if !self.missions.contains_key(&prereq) {
                    warn!(
                        "Mission {} references non-existent prerequisite {}",
                        def.id, prereq
                    );
                    dangling += 1;
                }
            }

            for next in &def.unlocks {
                if !self.missions.contains_key(next) {
                    warn!("Mission {} unlocks non-existent mission {}", def.id, next);
                    dangling += 1;
                }
            }
        }

        dangling
    }

    pub fn get(&self, id: MissionId) -> Option<Arc<MissionDefinition>> {
        self.missions.get(&id).cloned()
    }

    pub fn contains(&self, id: MissionId) -> bool {
        self.missions.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<MissionId> {
        self.missions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    /// Missions offered by an NPC kind
    pub fn for_provider(&self, provider: &str) -> Vec<Arc<MissionDefinition>> {
        self.missions
            .values()
            .filter(|def| def.provider == provider)
            .cloned()
            .collect()
    }

    /// Missions that completing `id` unlocks
    pub fn dependents_of(&self, id: MissionId) -> Vec<MissionId> {
        let mut dependents: Vec<MissionId> = self
            .missions
            .get(&id)
            .map(|def| def.unlocks.clone())
            .unwrap_or_default();

        dependents.extend(
            self.missions
                .values()
                .filter(|def| def.prerequisite == Some(id))
                .map(|def| def.id),
        );
        dependents.retain(|d| self.missions.contains_key(d));
        dependents.sort();
        dependents.dedup();
        dependents
    }

    /// Whether a new instance starts unlocked rather than locked
    pub fn starts_unlocked(&self, def: &MissionDefinition) -> bool {
        def.prerequisite.is_none() && !self.missions.values().any(|other| other.unlocks.contains(&def.id))
    }

    /// Build a fresh handler for `def`
    pub fn handler_for(&self, def: &MissionDefinition) -> Box<dyn ObjectiveHandler> {
        self.handlers.create(def)
    }
}

/// A registry with no custom handlers; every mission is driven by the
/// triggers in its definition
impl Default for MissionRegistry {
    fn default() -> Self {
        Self::new(HandlerRegistry::empty())
    }
}

/// Recursively gather `*.toml` paths
fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), DefinitionError> {
    let io_err = |source| DefinitionError::Io {
        path: dir.display().to_string(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

fn load_mission_file(path: &Path) -> Result<MissionDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let raw: RawMissionFile = toml::from_str(&content).map_err(|source| DefinitionError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    MissionDefinition::from_raw(&raw.mission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::definition::{ObjectiveDef, ObjectiveSetDef};
    use crate::mission::events::EventKind;
    use tempfile::TempDir;

    fn mission_toml(id: u32, extra: &str) -> String {
        format!(
            r#"
[mission]
id = {id}
name = "Mission {id}"
provider = "guide"
{extra}

[[mission.stages]]
[[mission.stages.objectives]]
description = "Kill slimes"
count = 3
trigger = "npc_kill"
target = "slime"
"#
        )
    }

    fn simple(id: u32) -> MissionDefinition {
        MissionDefinition::new(
            MissionId(id),
            &format!("Mission {}", id),
            "guide",
            vec![ObjectiveSetDef::new(vec![ObjectiveDef::new("Talk", 1)])],
        )
    }

    #[test]
    fn test_load_missions() {
        let temp_dir = TempDir::new().unwrap();
        let mission_dir = temp_dir.path().join("missions");
        std::fs::create_dir_all(mission_dir.join("chapter1")).unwrap();

        std::fs::write(mission_dir.join("first.toml"), mission_toml(1, "unlocks = [2]")).unwrap();
        std::fs::write(
            mission_dir.join("chapter1").join("second.toml"),
            mission_toml(2, "prerequisite = 1"),
        )
        .unwrap();
        std::fs::write(mission_dir.join("broken.toml"), "[mission\nid = ").unwrap();
        std::fs::write(mission_dir.join("notes.txt"), "ignored").unwrap();

        let mut registry = MissionRegistry::default();
        assert_eq!(registry.load_from_directory(temp_dir.path()).unwrap(), 2);
        assert_eq!(registry.ids(), vec![MissionId(1), MissionId(2)]);

        let second = registry.get(MissionId(2)).unwrap();
        assert_eq!(second.prerequisite, Some(MissionId(1)));
        assert_eq!(second.objective_sets[0].objectives[0].target_count, 3);
        assert_eq!(registry.validate_chains(), 0);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = MissionRegistry::default();
        assert_eq!(registry.load_from_directory(temp_dir.path()).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_chain_queries() {
        let mut registry = MissionRegistry::default();
        let mut first = simple(1);
        first.unlocks = vec![MissionId(3), MissionId(42)];
        let mut second = simple(2);
        second.prerequisite = Some(MissionId(1));
        let mut other = simple(4);
        other.provider = "blacksmith".to_string();

        registry.insert(first);
        registry.insert(second);
        registry.insert(simple(3));
        registry.insert(other);

        assert_eq!(registry.dependents_of(MissionId(1)), vec![MissionId(2), MissionId(3)]);
        assert!(registry.dependents_of(MissionId(3)).is_empty());
        // One dangling unlock
        assert_eq!(registry.validate_chains(), 1);

        let first = registry.get(MissionId(1)).unwrap();
        let third = registry.get(MissionId(3)).unwrap();
        assert!(registry.starts_unlocked(&first));
        assert!(!registry.starts_unlocked(&third));
        assert_eq!(registry.for_provider("blacksmith").len(), 1);
        assert_eq!(registry.for_provider("guide").len(), 3);
    }

    #[test]
    fn test_default_registry_uses_triggers() {
        let triggered = || {
            MissionDefinition::new(
                MissionId::REAWAKENING,
                "Slime Chat",
                "guide",
                vec![ObjectiveSetDef::new(vec![
                    ObjectiveDef::new("Talk", 1).triggered_by(EventKind::NpcChat, "guide"),
                ])],
            )
        };

        let mut plain = MissionRegistry::default();
        plain.insert(triggered());
        let def = plain.get(MissionId::REAWAKENING).unwrap();
        assert_eq!(plain.handler_for(&def).name(), "trigger");

        let mut shipped = MissionRegistry::new(HandlerRegistry::builtin());
        shipped.insert(triggered());
        let def = shipped.get(MissionId::REAWAKENING).unwrap();
        assert_eq!(shipped.handler_for(&def).name(), "reawakening");
    }
}
