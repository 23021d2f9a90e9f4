//! Request bounds shared by all providers.

use std::time::Duration;

/// How aggressively a provider may be called.
///
/// Every sub-request carries `request_timeout` on its own, so a batch of N
/// codes completes within roughly `ceil(N / max_concurrency) * request_timeout`.
#[derive(Clone, Debug)]
pub struct FetchPolicy {
    /// Maximum in-flight requests for one batch.
    pub max_concurrency: usize,

    /// Timeout applied to each individual request.
    pub request_timeout: Duration,
}

impl FetchPolicy {
    pub fn new(max_concurrency: usize, request_timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            request_timeout,
        }
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            request_timeout: Duration::from_secs(5),
        }
    }
}
