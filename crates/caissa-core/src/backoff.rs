//! Exponential backoff for engine restarts.
//!
//! Sync-only math; the supervisor owns the sleeping.

use std::time::Duration;

/// Default first restart delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default restart delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Delay before restart attempt `attempt` (zero-based).
///
/// Formula: `min(max_delay, base_delay * 2^attempt)`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

/// [`calculate_backoff_delay`] as a [`Duration`].
#[must_use]
pub fn restart_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    Duration::from_millis(calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms))
}
