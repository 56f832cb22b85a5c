//! Exponential backoff.

use std::time::Duration;

/// Delay to wait after the given failed attempt (1-based).
///
/// `base`, `2 * base`, `4 * base`, ... capped at `max`. No jitter: the
/// upstream quota resets on its own clock, not ours.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor).min(max)
}
