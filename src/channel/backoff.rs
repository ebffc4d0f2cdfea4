//! Exponential backoff for channel reconnects

use std::time::Duration;

/// Default ceiling for scheduled reconnects per channel.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base delay before the first reconnect.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(1000);

/// Delay before reconnect attempt `attempt` (0-based): `base * 2^attempt`.
///
/// The sequence is strictly increasing; the shift saturates so absurd
/// attempt counts cannot overflow.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}
