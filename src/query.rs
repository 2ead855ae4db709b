//! Query submission against a bootstrapped runtime.

use crate::orchestrator::{RuntimeSession, RUN_QUERY};
use crate::runtime::{EntrypointArgs, RuntimeError};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Runtime not initialized")]
    RuntimeNotReady,
    #[error("a query is already running")]
    Busy,
    #[error(transparent)]
    Execution(#[from] RuntimeError),
}

/// Runs one query at a time. The raw envelope is returned untouched.
#[derive(Default)]
pub struct QueryExecutionService {
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueryExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute(
        &self,
        session: Option<&RuntimeSession>,
        query: &str,
    ) -> Result<String, QueryError> {
        let session = session.ok_or(QueryError::RuntimeNotReady)?;
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(QueryError::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        tracing::debug!(query_len = query.len(), "running query");
        let raw = session
            .handle()
            .run_query(&EntrypointArgs::call(RUN_QUERY, query))
            .await?;
        Ok(raw)
    }
}
