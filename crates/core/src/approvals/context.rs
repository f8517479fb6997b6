use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::approvals::store::StoreError;

/// Per-call context threaded through every engine operation.
///
/// The deadline bounds each store call individually. A unit of work spanning
/// two stores bounds each write on its own, so a lapse between them is seen
/// as a split commit rather than a plain timeout.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub correlation_id: String,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), deadline: None }
    }

    pub fn generated() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Runs `call` under the deadline; a lapse becomes `StoreError::Timeout`.
    pub async fn bounded<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout.into()),
            },
            None => call.await,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::generated()
    }
}
