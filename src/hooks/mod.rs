//! Hooks: rules that notify external systems when records change.

pub mod adapter;
pub mod condition;
pub mod dispatch;
pub mod log;
pub mod mail;
pub mod registry;
pub mod rule;

pub use adapter::{Adapter, AdapterSet, DeliveryError};
pub use condition::{Condition, ConditionError};
pub use dispatch::{DispatchSummary, Dispatcher};
pub use registry::HookRegistry;
pub use rule::{Action, HookRule, HookRuleConfig};
