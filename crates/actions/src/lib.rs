//! `actions` crate: the `ActionExecutor` trait and built-in executors.
//!
//! Every action, built-in or plugin, must implement
//! [`ActionExecutor`].  The rule engine dispatches execution through this
//! trait object, keyed by [`ActionDefinition::action_type`].

pub mod builtin;
pub mod error;
pub mod ids;
pub mod mock;
pub mod params;
pub mod traits;

pub use error::ActionError;
pub use traits::{ActionContext, ActionDefinition, ActionExecutor, ActionOutput};
