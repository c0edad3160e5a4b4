//! Concurrent task dispatch
//!
//! The task engine fans one logical operation out to every member of a
//! service set, one spawned task per service. `wait_all` is a blocking
//! barrier: nothing is observable until every task is terminal, and a
//! failing task never cancels its siblings. That no-cancellation property
//! is intentional; dispatched work always runs to completion.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::services::Service;
use futures::future::join_all;
use indexmap::IndexMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error as ThisError;
use tokio::task::JoinHandle;
use tracing::debug;

// =============================================================================
// Batch Error
// =============================================================================

/// Aggregate failure of a multi-service batch: the results merged before
/// the failing service was reached, plus the triggering cause.
#[derive(Debug, ThisError)]
#[error("Batch operation failed on service {service}: {cause}")]
pub struct BatchError<T: std::fmt::Debug> {
    /// Per-service results collected before the failure was encountered
    pub partial: IndexMap<String, T>,
    /// Name of the service whose task failed
    pub service: String,
    /// The failing task's error
    #[source]
    pub cause: Error,
}

impl<T: std::fmt::Debug> BatchError<T> {
    /// Collapse to the non-generic [`Error::Batch`], dropping the partial
    /// results. Transports that cannot carry typed partial data use this.
    pub fn into_error(self) -> Error {
        Error::Batch {
            service: self.service,
            cause: Box::new(self.cause),
        }
    }
}

// =============================================================================
// Task Handles
// =============================================================================

/// Handle to one dispatched unit of work, bound to one service.
#[derive(Debug)]
pub struct TaskHandle<T> {
    pub id: u64,
    pub service: String,
    handle: JoinHandle<Result<T>>,
}

/// A task that has reached its terminal state.
#[derive(Debug)]
pub struct CompletedTask<T> {
    pub id: u64,
    pub service: String,
    pub outcome: Result<T>,
}

// =============================================================================
// Task Engine
// =============================================================================

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Fan-out / wait-all / aggregate engine.
#[derive(Debug, Default)]
pub struct TaskEngine;

impl TaskEngine {
    pub fn new() -> Self {
        Self
    }

    /// Schedule one task per service and return immediately.
    ///
    /// Each task runs `op(task_ctx, service)` where `task_ctx` is derived
    /// from `ctx` with the service's name bound; the shared context is
    /// immutable and safe across all siblings.
    pub fn dispatch<T, F, Fut>(
        &self,
        ctx: &Context,
        services: &[Service],
        op: F,
    ) -> Vec<TaskHandle<T>>
    where
        T: Send + 'static,
        F: Fn(Context, Service) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        services
            .iter()
            .map(|service| {
                let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
                let task_ctx = ctx
                    .with_service_name(&service.name)
                    .with_correlation_id("task", id.to_string());
                let service = service.clone();
                let service_name = service.name.clone();
                let op = op.clone();
                debug!(task = id, service = %service_name, "dispatching task");
                TaskHandle {
                    id,
                    service: service_name,
                    handle: tokio::spawn(async move { op(task_ctx, service).await }),
                }
            })
            .collect()
    }

    /// Block until every handle is terminal. Sibling tasks are never
    /// cancelled when one fails; a panicked task surfaces as an internal
    /// error on its own handle.
    pub async fn wait_all<T>(handles: Vec<TaskHandle<T>>) -> Vec<CompletedTask<T>> {
        let joined = join_all(handles.into_iter().map(|h| async move {
            let outcome = match h.handle.await {
                Ok(res) => res,
                Err(join_err) => Err(Error::Internal(format!(
                    "task {} for service {} aborted: {}",
                    h.id, h.service, join_err
                ))),
            };
            CompletedTask {
                id: h.id,
                service: h.service,
                outcome,
            }
        }))
        .await;
        joined
    }

    /// Merge terminal results into `results`, keyed by service name, in
    /// the tasks' collection order. On the first error, merging stops and
    /// a [`BatchError`] carrying the partial map is returned. A duplicate
    /// service name (which the registry's uniqueness invariant should
    /// preclude) is overwritten by the later entry.
    pub fn aggregate<T: std::fmt::Debug>(
        tasks: Vec<CompletedTask<T>>,
        mut results: IndexMap<String, T>,
    ) -> std::result::Result<IndexMap<String, T>, BatchError<T>> {
        for task in tasks {
            match task.outcome {
                Ok(value) => {
                    results.insert(task.service, value);
                }
                Err(cause) => {
                    return Err(BatchError {
                        partial: results,
                        service: task.service,
                        cause,
                    });
                }
            }
        }
        Ok(results)
    }

    /// Dispatch, wait for every task, and aggregate in one call.
    pub async fn fan_out<T, F, Fut>(
        &self,
        ctx: &Context,
        services: &[Service],
        op: F,
    ) -> std::result::Result<IndexMap<String, T>, BatchError<T>>
    where
        T: Send + std::fmt::Debug + 'static,
        F: Fn(Context, Service) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let handles = self.dispatch(ctx, services, op);
        let completed = Self::wait_all(handles).await;
        Self::aggregate(completed, IndexMap::new())
    }
}
