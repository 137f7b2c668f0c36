// ABOUTME: Waits for every secondary index of a set of tables to become active.
// ABOUTME: One polling future per table, one shared rate limiter, first failure rejects the wait.

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::TableOps;
use crate::throttle::RateLimiter;
use crate::types::TableName;

use super::error::StepError;

/// Polls table index status until every table is ready.
pub struct ReadinessWaiter<T: TableOps + ?Sized> {
    tables: Arc<T>,
    limiter: Arc<RateLimiter>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<T: TableOps + ?Sized> ReadinessWaiter<T> {
    /// Create a waiter. `limiter` bounds the total poll rate of every table task.
    pub fn new(tables: Arc<T>, limiter: Arc<RateLimiter>, poll_interval: Duration) -> Self {
        Self {
            tables,
            limiter,
            poll_interval,
            timeout: None,
        }
    }

    /// Fail the wait once `timeout` has elapsed. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve once every table in `tables` reports only active indexes.
    ///
    /// An empty set resolves immediately. A status check error other than
    /// throttling fails the whole wait and cancels the remaining pollers.
    pub async fn wait(&self, tables: &BTreeSet<TableName>, region: &str) -> Result<(), StepError> {
        if tables.is_empty() {
            return Ok(());
        }

        tracing::debug!(tables = tables.len(), region, "waiting for table indexes");
        let pollers = try_join_all(tables.iter().map(|table| self.poll_table(table, region)));

        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pollers).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(StepError::ReadinessTimeout {
                    tables: tables.len(),
                    timeout,
                }),
            },
            None => pollers.await.map(|_| ()),
        }
    }

    async fn poll_table(&self, table: &TableName, region: &str) -> Result<(), StepError> {
        loop {
            self.limiter.acquire().await;

            match self.tables.is_table_ready(table, region).await {
                Ok(true) => {
                    tracing::debug!(%table, "table indexes active");
                    return Ok(());
                }
                Ok(false) => tracing::trace!(%table, "table indexes not ready"),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(%table, error = %e, "table status check throttled");
                }
                Err(e) => {
                    return Err(StepError::Readiness {
                        table: table.clone(),
                        source: e,
                    });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl<T: TableOps + ?Sized> std::fmt::Debug for ReadinessWaiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessWaiter")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}
