//! Parallel transfer coordinator.
//!
//! Runs a set of independent upload or read items concurrently and blocks
//! the caller at one join barrier until every item reported or the deadline
//! elapsed. Each item owns its result slot; results are merged only at the
//! join, so no shared map or latch is needed.
//!
//! On any failure or timeout the whole transfer fails with a
//! [`TransferFailure`] naming every item that did not succeed. Items still in
//! flight at the deadline are detached, not cancelled: their results are
//! discarded and any blob they write stays unreferenced until cleanup.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinSet;

use crate::component::Component;
use crate::error::{RemoteStateError, Result, TransferFailure};

/// Type-erased transfer item.
pub type TransferTask<T> = BoxFuture<'static, Result<T>>;

/// A batch of independent transfer items bound to one join barrier.
pub struct ParallelTransfer<T> {
    operation: &'static str,
    items: Vec<(Component, TransferTask<T>)>,
}

impl<T: Send + 'static> ParallelTransfer<T> {
    /// Creates an empty batch labelled `operation` (used in errors and logs).
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            items: Vec::new(),
        }
    }

    /// Adds an item to the batch.
    pub fn push<F>(&mut self, component: Component, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.items.push((component, Box::pin(task)));
    }

    /// Returns the number of dispatched items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no items were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Runs every item concurrently and waits for all of them.
    ///
    /// Returns one `(component, value)` pair per item, in completion order.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::InvariantViolation`] if two items share a name or
    ///   an item reports twice
    /// - [`RemoteStateError::Transfer`] if any item failed or panicked, or the
    ///   deadline elapsed first
    pub async fn run(self, timeout: Duration) -> Result<Vec<(Component, T)>> {
        let operation = self.operation;
        let dispatched = self.items.len();

        let mut pending: BTreeMap<String, Component> = BTreeMap::new();
        for (component, _) in &self.items {
            if pending
                .insert(component.to_string(), component.clone())
                .is_some()
            {
                return Err(RemoteStateError::invariant(format!(
                    "duplicate {operation} item: {component}"
                )));
            }
        }
        if dispatched == 0 {
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for (component, task) in self.items {
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(task).catch_unwind().await;
                (component, outcome)
            });
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut completed = Vec::with_capacity(dispatched);
        let mut causes: Vec<(String, RemoteStateError)> = Vec::new();
        let mut timed_out = false;

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((component, Ok(Ok(value)))) => {
                            let name = component.to_string();
                            if pending.remove(&name).is_none() {
                                tasks.detach_all();
                                return Err(RemoteStateError::invariant(format!(
                                    "{operation} item reported twice: {name}"
                                )));
                            }
                            tracing::debug!(operation, item = %name, "transfer item completed");
                            completed.push((component, value));
                        }
                        Ok((component, Ok(Err(err)))) => {
                            tracing::error!(operation, item = %component, error = %err, "transfer item failed");
                            causes.push((component.to_string(), err));
                        }
                        Ok((component, Err(panic))) => {
                            let message = panic_message(panic.as_ref());
                            tracing::error!(operation, item = %component, panic = %message, "transfer item panicked");
                            causes.push((
                                component.to_string(),
                                RemoteStateError::invariant(format!("item panicked: {message}")),
                            ));
                        }
                        Err(join_err) => {
                            tracing::error!(operation, error = %join_err, "transfer task aborted");
                            causes.push((
                                "task".to_string(),
                                RemoteStateError::invariant(format!("task aborted: {join_err}")),
                            ));
                        }
                    }
                }
                () = &mut deadline => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            tasks.detach_all();
        }

        if pending.is_empty() {
            return Ok(completed);
        }

        let incomplete: Vec<String> = pending.into_keys().collect();
        tracing::error!(
            operation,
            timed_out,
            incomplete = ?incomplete,
            dispatched,
            "transfer did not complete"
        );
        Err(TransferFailure {
            operation: operation.to_string(),
            incomplete,
            timed_out,
            causes,
        }
        .into())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
