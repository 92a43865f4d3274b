//! Action Registry
//!
//! Named, searchable commands over the engine: built-in board actions, one
//! generated "add" action per registered module, and asynchronous runs that
//! can be aborted before their effect lands.

pub mod builtin;
pub mod deferred;
pub mod query;
pub mod registry;

pub use deferred::{AbortHandle, ActionEffect, ActionFuture, FinishedAction, PendingAction};
pub use query::MatchRank;
pub use registry::{
    Action, ActionContext, ActionHandler, ActionOutcome, ActionRegistry, ActionSource, ActionSurface,
};
