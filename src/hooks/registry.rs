use crate::core::error::BackroomError;
use crate::hooks::adapter::AdapterSet;
use crate::hooks::rule::{HookRule, HookRuleConfig};
use rustc_hash::FxHashMap;

/// Compiled hook rules, indexed by cage.
///
/// Rules keep their configuration order; per-cage lookups return that order.
#[derive(Debug, Default)]
pub struct HookRegistry {
    rules: Vec<HookRule>,
    by_cage: FxHashMap<String, Vec<usize>>,
}

impl HookRegistry {
    /// Compiles every rule. The first invalid rule aborts the load.
    pub fn from_configs(configs: &[HookRuleConfig]) -> Result<Self, BackroomError> {
        let mut registry = HookRegistry::default();
        for (index, config) in configs.iter().enumerate() {
            let rule = HookRule::compile(index, config)?;
            registry
                .by_cage
                .entry(rule.cage.clone())
                .or_default()
                .push(registry.rules.len());
            registry.rules.push(rule);
        }
        tracing::debug!(
            rules = registry.rules.len(),
            cages = registry.by_cage.len(),
            "hook registry loaded"
        );
        Ok(registry)
    }

    pub fn rules(&self) -> &[HookRule] {
        &self.rules
    }

    /// Rules bound to `cage`, in configuration order.
    pub fn rules_for_cage(&self, cage: &str) -> Vec<&HookRule> {
        self.by_cage
            .get(cage)
            .map(|idx| idx.iter().map(|i| &self.rules[*i]).collect())
            .unwrap_or_default()
    }

    /// Lets each resolvable adapter vet the targets of its rules. Rules with
    /// unknown adapters are left to `unresolved_adapters`.
    pub fn check_targets(&self, adapters: &AdapterSet) -> Result<(), BackroomError> {
        for rule in &self.rules {
            if let Some(adapter) = adapters.resolve(&rule.adapter) {
                adapter.check_target(&rule.target).map_err(|msg| {
                    BackroomError::ConfigError(format!("hooks[{}]: {}", rule.index, msg))
                })?;
            }
        }
        Ok(())
    }

    /// Rules whose adapter is not registered in `adapters`.
    pub fn unresolved_adapters<'a>(&'a self, adapters: &AdapterSet) -> Vec<&'a HookRule> {
        self.rules
            .iter()
            .filter(|r| !adapters.contains(&r.adapter))
            .collect()
    }
}
