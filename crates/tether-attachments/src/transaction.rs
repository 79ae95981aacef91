//! Transaction hook adapters
//!
//! Storage has no transactions of its own. Compensating actions are handed
//! to a `TransactionHooks` implementation and run once the owning record's
//! transaction outcome is known.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{AttachmentError, AttachmentResult};

/// Deferred action
pub type HookAction = Box<dyn FnOnce() -> BoxFuture<'static, AttachmentResult<()>> + Send>;

/// Box an async closure as a hook action
pub fn hook<F, Fut>(f: F) -> HookAction
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = AttachmentResult<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Commit,
    Rollback,
}

#[async_trait]
pub trait TransactionHooks: Send + Sync {
    async fn run_after_commit(&self, action: HookAction) -> AttachmentResult<()>;

    async fn run_after_rollback(&self, action: HookAction) -> AttachmentResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

struct Inner {
    state: TransactionState,
    hooks: Vec<(Trigger, HookAction)>,
}

/// In-process transaction collecting hooks until `commit` or `rollback`
pub struct Transaction {
    inner: Mutex<Inner>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: TransactionState::Open,
                hooks: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Number of hooks waiting for the outcome
    pub fn pending(&self) -> usize {
        self.inner.lock().hooks.len()
    }

    fn register(&self, trigger: Trigger, action: HookAction) -> AttachmentResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(AttachmentError::NotInTransaction);
        }
        inner.hooks.push((trigger, action));
        Ok(())
    }

    pub async fn commit(&self) -> AttachmentResult<()> {
        self.finish(TransactionState::Committed, Trigger::Commit).await
    }

    pub async fn rollback(&self) -> AttachmentResult<()> {
        self.finish(TransactionState::RolledBack, Trigger::Rollback).await
    }

    /// Close the transaction and run the hooks for `trigger` in order
    ///
    /// Every hook runs even if an earlier one fails; the first failure is
    /// returned.
    async fn finish(&self, state: TransactionState, trigger: Trigger) -> AttachmentResult<()> {
        let hooks = {
            let mut inner = self.inner.lock();
            if inner.state != TransactionState::Open {
                return Err(AttachmentError::NotInTransaction);
            }
            inner.state = state;
            std::mem::take(&mut inner.hooks)
        };

        let mut first_error = None;
        let mut ran = 0;
        for (hook_trigger, action) in hooks {
            if hook_trigger != trigger {
                continue;
            }
            ran += 1;
            if let Err(e) = action().await {
                warn!(trigger = ?trigger, error = %e, "Transaction hook failed");
                first_error.get_or_insert(e);
            }
        }

        debug!(trigger = ?trigger, hooks = ran, "Transaction finished");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionHooks for Transaction {
    async fn run_after_commit(&self, action: HookAction) -> AttachmentResult<()> {
        self.register(Trigger::Commit, action)
    }

    async fn run_after_rollback(&self, action: HookAction) -> AttachmentResult<()> {
        self.register(Trigger::Rollback, action)
    }
}

/// Adapter for contexts without a transaction
///
/// Every operation counts as committed as soon as it happens: commit hooks
/// run at registration and rollback hooks are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

#[async_trait]
impl TransactionHooks for Immediate {
    async fn run_after_commit(&self, action: HookAction) -> AttachmentResult<()> {
        action().await
    }

    async fn run_after_rollback(&self, _action: HookAction) -> AttachmentResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> HookAction {
        let log = log.clone();
        hook(move || async move {
            log.lock().push(name);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_commit_runs_commit_hooks_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = Transaction::new();

        tx.run_after_commit(recorder(&log, "c1")).await.unwrap();
        tx.run_after_rollback(recorder(&log, "r1")).await.unwrap();
        tx.run_after_commit(recorder(&log, "c2")).await.unwrap();
        assert!(log.lock().is_empty());

        tx.commit().await.unwrap();

        assert_eq!(*log.lock(), vec!["c1", "c2"]);
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_rollback_runs_all_hooks_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = Transaction::new();

        tx.run_after_rollback(hook(|| async {
            Err(AttachmentError::Internal("boom".into()))
        }))
        .await
        .unwrap();
        tx.run_after_rollback(recorder(&log, "r2")).await.unwrap();

        let result = tx.rollback().await;

        assert!(matches!(result, Err(AttachmentError::Internal(_))));
        assert_eq!(*log.lock(), vec!["r2"]);
    }

    #[tokio::test]
    async fn test_closed_transaction_rejects_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = Transaction::new();
        tx.commit().await.unwrap();

        let result = tx.run_after_commit(recorder(&log, "late")).await;
        assert!(matches!(result, Err(AttachmentError::NotInTransaction)));
        assert!(matches!(tx.rollback().await, Err(AttachmentError::NotInTransaction)));
    }

    #[tokio::test]
    async fn test_immediate_adapter() {
        let log = Arc::new(Mutex::new(Vec::new()));

        Immediate
            .run_after_commit(recorder(&log, "now"))
            .await
            .unwrap();
        Immediate
            .run_after_rollback(recorder(&log, "never"))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["now"]);
    }
}
