use std::time::Instant;

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since first use in this process.
///
/// Both streams must be stamped from the same clock for the staleness check
/// to mean anything.
pub fn monotonic_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}
