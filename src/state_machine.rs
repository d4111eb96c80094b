//! Generic transition engine: states, allowed transitions, guards,
//! conditions, and before/after actions, loaded from a data-driven spec
//! rather than hardcoded per entity type.

use crate::core::error::{EdisonError, Result};
use crate::core::value::Value;
use std::collections::HashMap;

/// One allowed outbound edge from a state.
#[derive(Debug, Clone)]
pub struct Transition {
    pub to: String,
    pub guard: Option<String>,
    pub conditions: Vec<String>,
    pub before_actions: Vec<String>,
    pub after_actions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StateSpec {
    pub initial: bool,
    pub is_final: bool,
    pub allowed_transitions: Vec<Transition>,
}

/// A full state machine spec for one entity type (task, qa, session),
/// parsed from the `{states: {...}}` config shape described in spec.md
/// §3 "State-machine spec".
#[derive(Debug, Clone, Default)]
pub struct MachineSpec {
    pub states: HashMap<String, StateSpec>,
}

impl MachineSpec {
    /// Parse from the config `Value` shape under e.g. `task.states`.
    pub fn from_value(states_value: &Value) -> Self {
        let mut states = HashMap::new();
        if let Some(map) = states_value.as_map() {
            for (state_name, spec_value) in map {
                let initial = spec_value
                    .get_path("initial")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let is_final = spec_value
                    .get_path("final")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let mut allowed_transitions = Vec::new();
                if let Some(list) = spec_value
                    .get_path("allowed_transitions")
                    .and_then(Value::as_list)
                {
                    for t in list {
                        let to = t
                            .get_path("to")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let guard = t.get_path("guard").and_then(Value::as_str).map(str::to_string);
                        let mut conditions = Vec::new();
                        if let Some(cs) = t.get_path("conditions").and_then(Value::as_list) {
                            for c in cs {
                                if let Some(name) = c.get_path("name").and_then(Value::as_str) {
                                    conditions.push(name.to_string());
                                }
                            }
                        }
                        let mut before_actions = Vec::new();
                        let mut after_actions = Vec::new();
                        if let Some(acts) = t.get_path("actions").and_then(Value::as_list) {
                            for a in acts {
                                let Some(name) = a.get_path("name").and_then(Value::as_str) else {
                                    continue;
                                };
                                let when = a
                                    .get_path("when")
                                    .and_then(Value::as_str)
                                    .unwrap_or("after");
                                if when == "before" {
                                    before_actions.push(name.to_string());
                                } else {
                                    after_actions.push(name.to_string());
                                }
                            }
                        }
                        allowed_transitions.push(Transition {
                            to,
                            guard,
                            conditions,
                            before_actions,
                            after_actions,
                        });
                    }
                }
                states.insert(
                    state_name.clone(),
                    StateSpec {
                        initial,
                        is_final,
                        allowed_transitions,
                    },
                );
            }
        }
        Self { states }
    }

    pub fn initial_state(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, s)| s.initial)
            .map(|(name, _)| name.as_str())
    }

    fn find_transition(&self, from: &str, to: &str) -> Result<&Transition> {
        let state = self
            .states
            .get(from)
            .ok_or_else(|| EdisonError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        state
            .allowed_transitions
            .iter()
            .find(|t| t.to == to)
            .ok_or_else(|| EdisonError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

/// Context passed to guards, conditions, and actions. Intentionally a
/// dynamic map so the engine stays generic over entity kind; callers
/// populate whatever keys their guards/conditions/actions need.
pub type TransitionContext = Value;

pub type GuardFn = Box<dyn Fn(&TransitionContext) -> bool + Send + Sync>;
pub type ConditionFn = Box<dyn Fn(&TransitionContext) -> (bool, String) + Send + Sync>;
pub type ActionFn = Box<dyn Fn(&TransitionContext) + Send + Sync>;

/// Registries of named guard/condition/action callbacks, populated by the
/// workflow layer (`crate::workflow`) at construction time — never
/// hardcoded in the engine itself.
#[derive(Default)]
pub struct Registries {
    pub guards: HashMap<String, GuardFn>,
    pub conditions: HashMap<String, ConditionFn>,
    pub actions: HashMap<String, ActionFn>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_guard(&mut self, name: impl Into<String>, f: GuardFn) {
        self.guards.insert(name.into(), f);
    }

    pub fn register_condition(&mut self, name: impl Into<String>, f: ConditionFn) {
        self.conditions.insert(name.into(), f);
    }

    pub fn register_action(&mut self, name: impl Into<String>, f: ActionFn) {
        self.actions.insert(name.into(), f);
    }
}

pub struct Engine<'a> {
    pub spec: &'a MachineSpec,
    pub registries: &'a Registries,
}

impl<'a> Engine<'a> {
    pub fn new(spec: &'a MachineSpec, registries: &'a Registries) -> Self {
        Self { spec, registries }
    }

    /// Runs guard + condition checks only — no side effects. Used for
    /// pre-flight inspection before a caller decides to commit.
    pub fn validate_transition(&self, from: &str, to: &str, ctx: &TransitionContext) -> Result<()> {
        let transition = self.spec.find_transition(from, to)?;

        if let Some(guard_name) = &transition.guard {
            let guard = self.registries.guards.get(guard_name).ok_or_else(|| {
                EdisonError::Internal(format!("unregistered guard '{guard_name}'"))
            })?;
            if !guard(ctx) {
                return Err(EdisonError::GuardDenied(format!(
                    "guard '{guard_name}' denied {from} -> {to}"
                )));
            }
        }

        for cond_name in &transition.conditions {
            let cond = self.registries.conditions.get(cond_name).ok_or_else(|| {
                EdisonError::Internal(format!("unregistered condition '{cond_name}'"))
            })?;
            let (ok, message) = cond(ctx);
            if !ok {
                return Err(EdisonError::ConditionFailed {
                    name: cond_name.clone(),
                    message,
                });
            }
        }

        Ok(())
    }

    /// Full transition: guard, conditions, before-actions, (caller
    /// performs the state change between steps 4 and 6), after-actions.
    ///
    /// The caller supplies `commit: FnOnce() -> Result<()>` to perform the
    /// actual state change between before- and after-actions, so that a
    /// failing action before the change never lets the change happen,
    /// while a failing action after the change leaves the change in
    /// place (actions are documented as idempotent & best-effort).
    pub fn validate<F>(&self, from: &str, to: &str, ctx: &TransitionContext, commit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.validate_transition(from, to, ctx)?;
        let transition = self.spec.find_transition(from, to)?;

        for action_name in &transition.before_actions {
            self.run_action(action_name, ctx)?;
        }

        commit()?;

        for action_name in &transition.after_actions {
            self.run_action(action_name, ctx)?;
        }

        Ok(())
    }

    fn run_action(&self, name: &str, ctx: &TransitionContext) -> Result<()> {
        let action = self
            .registries
            .actions
            .get(name)
            .ok_or_else(|| EdisonError::Internal(format!("unregistered action '{name}'")))?;
        action(ctx);
        Ok(())
    }
}
