//! In-flight build registry
//!
//! Deduplicates concurrent builds keyed by identity: the first caller for a
//! key starts the build, every other caller awaits the same shared future.
//! Completed builds stay registered and are reused; failed builds are removed
//! so the next caller tries again.

use crate::error::RunError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

type SharedBuild<T> = Shared<BoxFuture<'static, Result<Arc<T>, Arc<RunError>>>>;

/// Registry of shared builds; one instance is shared by every run unit
pub struct BuildRegistry<T> {
    builds: DashMap<String, SharedBuild<T>>,
}

impl<T: Send + Sync + 'static> BuildRegistry<T> {
    pub fn new() -> Self {
        Self {
            builds: DashMap::new(),
        }
    }

    /// Await the build registered for `key`, starting it with `build` if none is
    pub async fn get_or_create<F, Fut>(&self, key: &str, build: F) -> Result<Arc<T>, RunError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RunError>> + Send + 'static,
    {
        let shared = match self.builds.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!(key, "joining registered build");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                debug!(key, "starting build");
                let future = build()
                    .map(|result| result.map(Arc::new).map_err(Arc::new))
                    .boxed()
                    .shared();
                entry.insert(future.clone());
                future
            }
        };

        match shared.clone().await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.builds.remove_if(key, |_, registered| registered.ptr_eq(&shared));
                Err(RunError::Shared(err))
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.builds.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}

impl<T: Send + Sync + 'static> Default for BuildRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of built execution environments
pub type EnvironmentRegistry = BuildRegistry<crate::environment::Environment>;
