use std::time::Duration;

use thiserror::Error;

/// Failure of a single upstream call.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("{endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} request failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} returned an unreadable body: {message}")]
    Decode { endpoint: String, message: String },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Outcomes of a refresh cycle that callers have to react to.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Every endpoint tried for this cycle timed out.
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(UpstreamError),

    /// Every endpoint tried failed, at least one for a reason other than a timeout.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(UpstreamError),

    /// Upstream failed and the current-state store has nothing to serve.
    #[error("Both price APIs failed and no stored data is available. Please try again later. ({0})")]
    NoFallbackDataAvailable(UpstreamError),

    /// A persistence step failed. Cycles log this and keep serving fetched data.
    #[error("store write failed: {0}")]
    StoreWriteFailure(String),

    /// Reading from a store failed.
    #[error("store read failed: {0:#}")]
    Store(anyhow::Error),

    /// A scheduled tick found another cycle running and was skipped.
    #[error("a refresh cycle is already running")]
    CycleInProgress,
}
