use crate::core::error::BackroomError;
use crate::core::store::Payload;
use crate::hooks::condition::{Condition, ConditionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mutation that triggers hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Create, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = BackroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(BackroomError::ValidationError(format!(
                "unknown action '{}' (expected create, update or delete)",
                other
            ))),
        }
    }
}

/// A hook rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRuleConfig {
    /// Cage the hook applies to (exact match).
    pub cage: String,
    /// Actions that trigger the hook.
    pub action: Vec<Action>,
    /// Optional condition; payload is available as `cage.*`.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Name of the delivery adapter.
    pub adapter: String,
    /// Adapter-specific target: log prefix, recipient address.
    pub target: String,
}

impl HookRuleConfig {
    pub fn validate(&self, index: usize) -> Result<(), BackroomError> {
        let fail = |msg: &str| Err(BackroomError::ConfigError(format!("hooks[{}]: {}", index, msg)));

        if self.cage.trim().is_empty() {
            return fail("cage is required");
        }
        if self.action.is_empty() {
            return fail("at least one action is required");
        }
        if self.adapter.trim().is_empty() {
            return fail("adapter is required");
        }
        if self.target.trim().is_empty() {
            return fail("target is required");
        }
        Ok(())
    }
}

/// A validated hook rule with its condition compiled.
#[derive(Debug, Clone)]
pub struct HookRule {
    /// Position in configuration order.
    pub index: usize,
    pub cage: String,
    pub actions: Vec<Action>,
    pub condition: Option<Condition>,
    pub adapter: String,
    pub target: String,
}

impl HookRule {
    pub fn compile(index: usize, config: &HookRuleConfig) -> Result<Self, BackroomError> {
        config.validate(index)?;

        let condition = match config.condition.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => Some(Condition::compile(source).map_err(|e| {
                BackroomError::ConfigError(format!(
                    "hooks[{}] (cage '{}'): invalid condition `{}`: {}",
                    index, config.cage, source, e
                ))
            })?),
            _ => None,
        };

        let mut actions = Vec::with_capacity(config.action.len());
        for action in &config.action {
            if !actions.contains(action) {
                actions.push(*action);
            }
        }

        Ok(HookRule {
            index,
            cage: config.cage.trim().to_string(),
            actions,
            condition,
            adapter: config.adapter.trim().to_string(),
            target: config.target.trim().to_string(),
        })
    }

    pub fn triggers_on(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// Unconditional rules always pass.
    pub fn evaluate(&self, data: &Payload) -> Result<bool, ConditionError> {
        match &self.condition {
            Some(condition) => condition.evaluate(data),
            None => Ok(true),
        }
    }
}
