//! Fan-out/join helpers shared across the workspace.
//!
//! Every branch is polled to completion inside the caller's task, so nothing
//! outlives the returned future and every failure is collected.

use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, join_all};
use tokio_util::sync::CancellationToken;

/// Outcome of a fan-out that did not fully succeed.
#[derive(Debug)]
pub enum FanoutError<E> {
    /// The token was already cancelled; no branch was started.
    Cancelled,
    /// At least one branch failed. Holds every failure in item order.
    Failed(Vec<E>),
}

impl<E> FanoutError<E> {
    /// Failures collected from the branches (empty when cancelled).
    pub fn into_failures(self) -> Vec<E> {
        match self {
            Self::Cancelled => Vec::new(),
            Self::Failed(errors) => errors,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E: fmt::Display> fmt::Display for FanoutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled before fan-out started"),
            Self::Failed(errors) => {
                write!(f, "{} branch(es) failed", errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    write!(f, "\n  {}: {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for FanoutError<E> {}

/// Run `op` once per item concurrently and wait for all of them.
///
/// The token is checked once before anything starts. After that every item is
/// attempted, even when some fail.
pub async fn run_concurrently<T, E, F, Fut>(
    cancel: &CancellationToken,
    items: Vec<T>,
    op: F,
) -> Result<(), FanoutError<E>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    if cancel.is_cancelled() {
        return Err(FanoutError::Cancelled);
    }

    match items.len() {
        0 => Ok(()),
        1 => {
            let mut items = items;
            match items.pop() {
                Some(item) => op(item).await.map_err(|e| FanoutError::Failed(vec![e])),
                None => Ok(()),
            }
        }
        _ => collect(join_all(items.into_iter().map(op)).await),
    }
}

/// Run heterogeneous steps concurrently and wait for all of them.
///
/// Like [`run_concurrently`], the token is only checked before the first step
/// is polled. A cancelled token drops every step unpolled.
pub async fn execute_concurrently<E>(
    cancel: &CancellationToken,
    steps: Vec<BoxFuture<'_, Result<(), E>>>,
) -> Result<(), FanoutError<E>> {
    if cancel.is_cancelled() {
        return Err(FanoutError::Cancelled);
    }

    match steps.len() {
        0 => Ok(()),
        _ => collect(join_all(steps).await),
    }
}

fn collect<E>(results: Vec<Result<(), E>>) -> Result<(), FanoutError<E>> {
    let errors: Vec<E> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(FanoutError::Failed(errors))
    }
}
