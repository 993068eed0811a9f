//! Handler Registry
//!
//! Associates mission ids with the constructor of their handler. Missions
//! without a hand-written handler fall back to the trigger-driven one.

mod reawakening;
mod spore_splinter;
mod trigger;

use std::collections::HashMap;

pub use reawakening::ReawakeningHandler;
pub use spore_splinter::SporeSplinterHandler;
pub use trigger::TriggerHandler;

use super::definition::{MissionDefinition, MissionId};
use super::handler::ObjectiveHandler;

pub type HandlerConstructor = fn(&MissionDefinition) -> Box<dyn ObjectiveHandler>;

/// Compile-time table of mission handlers
pub struct HandlerRegistry {
    constructors: HashMap<MissionId, HandlerConstructor>,
}

impl HandlerRegistry {
    /// Table with no custom handlers; every mission uses triggers
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Table with the story missions' handlers
    pub fn builtin() -> Self {
        let constructors = HashMap::from([
            (MissionId::REAWAKENING, ReawakeningHandler::boxed as HandlerConstructor),
            (MissionId::SPORE_SPLINTER, SporeSplinterHandler::boxed as HandlerConstructor),
        ]);
        Self { constructors }
    }

    pub fn register(&mut self, id: MissionId, constructor: HandlerConstructor) {
        self.constructors.insert(id, constructor);
    }

    pub fn has_custom(&self, id: MissionId) -> bool {
        self.constructors.contains_key(&id)
    }

    /// Build a fresh handler for a mission
    pub fn create(&self, def: &MissionDefinition) -> Box<dyn ObjectiveHandler> {
        match self.constructors.get(&def.id) {
            Some(constructor) => constructor(def),
            None => Box::new(TriggerHandler::new(def)),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
