//! Reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Pick a reconnect delay uniformly from `[min, max]`.
///
/// Every data plane draws its own delay, so a fleet that lost its control
/// plane at the same moment does not reconnect in lockstep.
pub fn reconnect_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}
