//! Objective Progress
//!
//! Counters for a single objective and completion tracking for a stage.

use serde::Serialize;

use super::definition::{ObjectiveDef, ObjectiveSetDef};

/// Progress on a single objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Objective {
    pub description: String,
    pub current_count: u32,
    pub target_count: u32,
    pub is_completed: bool,
}

impl Objective {
    pub fn new(def: &ObjectiveDef) -> Self {
        Self {
            description: def.description.clone(),
            current_count: 0,
            target_count: def.target_count,
            is_completed: def.target_count == 0,
        }
    }

    /// Add progress and return true if newly completed
    pub fn add(&mut self, amount: u32) -> bool {
        if self.is_completed {
            return false;
        }
        self.current_count = self.current_count.saturating_add(amount).min(self.target_count);
        if self.current_count >= self.target_count {
            self.is_completed = true;
            true
        } else {
            false
        }
    }

    /// Set progress directly (restore path), clamped to the target
    pub fn set_count(&mut self, count: u32) {
        self.current_count = count.min(self.target_count);
        self.is_completed = self.current_count >= self.target_count;
    }

    pub fn force_complete(&mut self) {
        self.current_count = self.target_count;
        self.is_completed = true;
    }

    pub fn progress_percent(&self) -> f32 {
        if self.target_count == 0 {
            return 1.0;
        }
        self.current_count as f32 / self.target_count as f32
    }
}

/// A stage: every objective must complete before the mission advances
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectiveSet {
    pub objectives: Vec<Objective>,
    pub is_completed: bool,
}

impl ObjectiveSet {
    pub fn new(def: &ObjectiveSetDef) -> Self {
        let mut set = Self {
            objectives: def.objectives.iter().map(Objective::new).collect(),
            is_completed: false,
        };
        set.is_completed = set.objectives.iter().all(|o| o.is_completed);
        set
    }

    /// Recompute the completion flag, returning true if it flipped on this call
    pub fn recompute_completion(&mut self) -> bool {
        let was_completed = self.is_completed;
        self.is_completed = self.objectives.iter().all(|o| o.is_completed);
        self.is_completed && !was_completed
    }

    pub fn objective_mut(&mut self, index: usize) -> Option<&mut Objective> {
        self.objectives.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }

    pub fn counts(&self) -> impl Iterator<Item = u32> + '_ {
        self.objectives.iter().map(|o| o.current_count)
    }

    /// Zero every counter (abandon with reset)
    pub fn reset(&mut self) {
        for objective in &mut self.objectives {
            objective.set_count(0);
        }
        self.recompute_completion();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objective(target: u32) -> Objective {
        Objective::new(&ObjectiveDef::new("Collect mushrooms", target))
    }

    #[test]
    fn test_objective_add() {
        let mut obj = objective(30);
        assert!(!obj.add(10));
        assert_eq!(obj.current_count, 10);

        assert!(obj.add(25));
        assert!(obj.is_completed);
        assert_eq!(obj.current_count, 30);

        // Completed objectives ignore further progress
        assert!(!obj.add(5));
        assert_eq!(obj.current_count, 30);
    }

    #[test]
    fn test_objective_add_zero() {
        let mut obj = objective(1);
        for _ in 0..5 {
            assert!(!obj.add(0));
        }
        assert_eq!(obj.current_count, 0);
        assert!(!obj.is_completed);
        assert!(obj.add(1));
    }

    #[test]
    fn test_objective_add_saturates() {
        let mut obj = objective(3);
        assert!(obj.add(u32::MAX));
        assert_eq!(obj.current_count, 3);
    }

    #[test]
    fn test_set_count_clamps() {
        let mut obj = objective(5);
        obj.set_count(99);
        assert_eq!(obj.current_count, 5);
        assert!(obj.is_completed);
        obj.set_count(2);
        assert!(!obj.is_completed);
        assert_eq!(obj.progress_percent(), 0.4);
    }

    #[test]
    fn test_set_completion_flips_once() {
        let def = ObjectiveSetDef::new(vec![
            ObjectiveDef::new("Kill slimes", 2),
            ObjectiveDef::new("Collect gel", 1),
        ]);
        let mut set = ObjectiveSet::new(&def);

        set.objective_mut(0).unwrap().add(2);
        assert!(!set.recompute_completion());

        set.objective_mut(1).unwrap().add(1);
        assert!(set.recompute_completion());
        assert!(set.is_completed);

        // Already completed: not "newly" completed again
        assert!(!set.recompute_completion());

        set.reset();
        assert!(!set.is_completed);
        assert_eq!(set.counts().collect::<Vec<_>>(), vec![0, 0]);
    }
}
