//! Hook dispatch: runs the rules of a cage against one mutation.
//!
//! For every rule bound to the record's cage, in configuration order:
//! rules not triggered by the action are skipped, the condition (if any) is
//! evaluated against the record payload, and matching rules are delivered
//! through their adapter. The first failure stops the dispatch; rules after
//! it are not attempted.

use crate::core::error::BackroomError;
use crate::core::store::Record;
use crate::hooks::adapter::AdapterSet;
use crate::hooks::registry::HookRegistry;
use crate::hooks::rule::Action;
use serde::Serialize;
use std::sync::Arc;

/// What a successful dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Rules bound to the cage that trigger on the action.
    pub matched: usize,
    /// Rules whose condition held and whose adapter delivered.
    pub delivered: usize,
    /// Triggered rules whose condition was false.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HookRegistry>,
    adapters: Arc<AdapterSet>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HookRegistry>, adapters: Arc<AdapterSet>) -> Self {
        Self { registry, adapters }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn dispatch(&self, action: Action, record: &Record) -> Result<DispatchSummary, BackroomError> {
        let mut summary = DispatchSummary::default();

        for rule in self.registry.rules_for_cage(&record.cage) {
            if !rule.triggers_on(action) {
                continue;
            }
            summary.matched += 1;

            let passed = rule
                .evaluate(&record.data)
                .map_err(|source| BackroomError::EvaluationError {
                    rule: rule.index,
                    source,
                })?;
            if !passed {
                tracing::trace!(rule = rule.index, record_id = %record.id, "hook condition false");
                summary.skipped += 1;
                continue;
            }

            let adapter = self
                .adapters
                .resolve(&rule.adapter)
                .ok_or_else(|| BackroomError::UnknownAdapter {
                    rule: rule.index,
                    adapter: rule.adapter.clone(),
                })?;
            adapter
                .deliver(rule, action, record)
                .map_err(|source| BackroomError::DeliveryError {
                    rule: rule.index,
                    adapter: rule.adapter.clone(),
                    source,
                })?;
            summary.delivered += 1;
        }

        if summary.matched > 0 {
            tracing::debug!(
                cage = %record.cage,
                record_id = %record.id,
                action = %action,
                matched = summary.matched,
                delivered = summary.delivered,
                skipped = summary.skipped,
                "hooks dispatched"
            );
        }
        Ok(summary)
    }
}
