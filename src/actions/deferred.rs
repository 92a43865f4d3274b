//! Asynchronous action runs.
//!
//! A deferred handler returns a future instead of mutating the engine. The
//! future does its slow work without holding the engine and resolves to an
//! [`ActionEffect`], which [`crate::BoardEngine::complete_action`] applies
//! unless the run was aborted in the meantime.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::BoardEngine;

/// The engine mutation a deferred run produces.
pub type ActionEffect = Box<dyn FnOnce(&mut BoardEngine) -> anyhow::Result<()> + Send>;

/// Future returned by a deferred handler.
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<ActionEffect>> + Send>>;

/// Cancels an in-flight run. Once aborted, the run's effect is never applied.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// A started run that has not produced its effect yet.
pub struct PendingAction {
    action_id: String,
    abort: AbortHandle,
    future: ActionFuture,
}

impl PendingAction {
    pub(crate) fn new(action_id: &str, future: ActionFuture) -> Self {
        Self {
            action_id: action_id.to_string(),
            abort: AbortHandle::new(),
            future,
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Drive the run to completion. The engine is not borrowed meanwhile.
    pub async fn run(self) -> FinishedAction {
        let result = self.future.await;
        FinishedAction {
            action_id: self.action_id,
            abort: self.abort,
            result,
        }
    }
}

impl fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAction")
            .field("action_id", &self.action_id)
            .field("aborted", &self.abort.is_aborted())
            .finish_non_exhaustive()
    }
}

/// A run whose future has resolved, waiting to be applied.
pub struct FinishedAction {
    pub(crate) action_id: String,
    pub(crate) abort: AbortHandle,
    pub(crate) result: anyhow::Result<ActionEffect>,
}

impl FinishedAction {
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

impl fmt::Debug for FinishedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedAction")
            .field("action_id", &self.action_id)
            .field("aborted", &self.abort.is_aborted())
            .field("ok", &self.result.is_ok())
            .finish()
    }
}
