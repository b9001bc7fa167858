//! Background tasks that must all finish before a run is done

use crate::error::RunError;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Set of named tasks running concurrently with the caller
///
/// Tasks start as soon as they are spawned. [`BackgroundTasks::join_all`]
/// waits for every one of them, then returns the first failure, if any.
#[derive(Default)]
pub struct BackgroundTasks {
    set: JoinSet<(&'static str, Result<(), RunError>)>,
    spawned: usize,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), RunError>> + Send + 'static,
    {
        debug!(task = name, "background task started");
        self.spawned += 1;
        self.set.spawn(async move { (name, task.await) });
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Await every task; returns how many ran, or the first error
    pub async fn join_all(mut self) -> Result<usize, RunError> {
        let mut first_error = None;

        while let Some(joined) = self.set.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    debug!(task = name, "background task finished");
                    continue;
                }
                Ok((name, Err(err))) => {
                    warn!(task = name, error = %err, "background task failed");
                    err
                }
                Err(err) => {
                    warn!(error = %err, "background task panicked or was cancelled");
                    RunError::Task {
                        task: "background",
                        message: err.to_string(),
                    }
                }
            };
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(self.spawned),
        }
    }
}
