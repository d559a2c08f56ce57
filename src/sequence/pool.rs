//! Bounded worker pool for independent steps

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ReconcileError;

/// Run `tasks` with at most `limit` in flight.
///
/// Each task receives a token that is cancelled as soon as any task fails;
/// tasks still waiting for a slot or running when that happens finish with
/// `Cancelled`. Cancelling `parent` cancels the pool without the pool ever
/// cancelling `parent`. Results come back in input order.
pub async fn run_bounded<T, F, Fut>(
    limit: usize,
    tasks: Vec<F>,
    parent: CancellationToken,
) -> Result<Vec<T>, ReconcileError>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ReconcileError>> + Send + 'static,
{
    let cancel = parent.child_token();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let total = tasks.len();
    let mut set = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let token = cancel.clone();
        set.spawn(async move {
            let run = async {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ReconcileError::Cancelled)?;
                debug!(task = index, "Slot acquired");
                task(token.clone()).await
            };
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ReconcileError::Cancelled),
                result = run => result,
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut failure: Option<ReconcileError> = None;

    while let Some(joined) = set.join_next().await {
        let (index, result) = match joined {
            Ok(pair) => pair,
            Err(e) => (usize::MAX, Err(ReconcileError::TaskFailed(e.to_string()))),
        };
        match result {
            Ok(value) => {
                if let Some(slot) = results.get_mut(index) {
                    *slot = Some(value);
                }
            }
            Err(err) => {
                let replace = match &failure {
                    None => true,
                    Some(ReconcileError::Cancelled) => err != ReconcileError::Cancelled,
                    Some(_) => false,
                };
                if replace {
                    if err != ReconcileError::Cancelled {
                        warn!(task = index, error = %err, "Task failed, cancelling the rest");
                    }
                    failure = Some(err);
                }
                cancel.cancel();
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    results
        .into_iter()
        .collect::<Option<Vec<T>>>()
        .ok_or_else(|| ReconcileError::TaskFailed("task produced no result".to_string()))
}
