use crate::core::store::Record;
use crate::hooks::adapter::{Adapter, DeliveryError};
use crate::hooks::rule::{Action, HookRule};

/// Writes one structured log event per delivery. The rule's target is used
/// as a free-form prefix so operators can grep for a hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAdapter;

impl Adapter for LogAdapter {
    fn deliver(&self, rule: &HookRule, action: Action, record: &Record) -> Result<(), DeliveryError> {
        let data = serde_json::to_string(&record.data)
            .map_err(|e| DeliveryError::Message(e.to_string()))?;
        tracing::info!(
            target: "backroom::hooks",
            prefix = %rule.target,
            cage = %record.cage,
            record_id = %record.id,
            action = %action,
            data = %data,
            "{}: record {}d",
            rule.target,
            action
        );
        Ok(())
    }
}
