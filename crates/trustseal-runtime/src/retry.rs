//! Backoff policy for the retrying completion caller.
//!
//! Up to three total attempts. Delays grow from 300 ms by powers of two with
//! random jitter on top, so simultaneous panels do not hammer a recovering
//! router in lockstep.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: usize = 3;

/// Base delay before the first retry.
pub const BASE_DELAY: Duration = Duration::from_millis(300);

/// Backoff multiplier between retries.
pub const BACKOFF_FACTOR: f32 = 2.0;

/// Backoff used by [`CompletionClient::complete_with_retry`].
///
/// [`CompletionClient::complete_with_retry`]: crate::client::CompletionClient::complete_with_retry
pub fn completion_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(BASE_DELAY)
        .with_factor(BACKOFF_FACTOR)
        .with_max_times(MAX_ATTEMPTS - 1)
        .with_jitter()
}
