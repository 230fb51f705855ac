//! Admission guard placed in front of arbitrary actions.

use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::debug;

use super::key::ClientId;
use super::limiter::{Decision, SlidingWindowLimiter};

/// Anything an identity can be extracted from.
pub trait Identify {
    /// The client the request originates from.
    fn client_id(&self) -> ClientId;
}

/// Outcome of admitting a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Forward the action.
    Proceed,
    /// Refuse the action; the client may retry after the given delay.
    Reject {
        /// Seconds until the client may retry
        retry_after_secs: u64,
    },
}

impl From<Decision> for Admission {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allowed => Admission::Proceed,
            Decision::Denied { retry_after_secs } => Admission::Reject { retry_after_secs },
        }
    }
}

/// An action refused by the guard.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Rate limit exceeded. Try again in {retry_after_secs} seconds")]
pub struct Rejected {
    /// Seconds until the client may retry
    pub retry_after_secs: u64,
}

/// Wraps actions with a rate limit check.
///
/// The guard holds no state of its own; cloning it shares the limiter.
#[derive(Clone)]
pub struct AdmissionGuard {
    limiter: Arc<SlidingWindowLimiter>,
}

impl AdmissionGuard {
    /// Create a guard delegating to `limiter`.
    pub fn new(limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self { limiter }
    }

    /// The limiter behind this guard.
    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    /// Decide whether `client` may proceed at `now`.
    pub async fn admit(&self, client: &ClientId, now: SystemTime) -> Admission {
        self.limiter.check_and_record(client, now).await.into()
    }

    /// Run `action` on `request` if its client is within the limit.
    ///
    /// The request is forwarded unchanged. A rejection short-circuits without
    /// calling `action`.
    pub async fn wrap<R, F, Fut>(&self, request: R, action: F) -> Result<Fut::Output, Rejected>
    where
        R: Identify,
        F: FnOnce(R) -> Fut,
        Fut: Future,
    {
        let client = request.client_id();
        match self.admit(&client, SystemTime::now()).await {
            Admission::Proceed => Ok(action(request).await),
            Admission::Reject { retry_after_secs } => {
                debug!(client = %client, retry_after_secs, "Request rejected by rate limit");
                Err(Rejected { retry_after_secs })
            }
        }
    }
}
