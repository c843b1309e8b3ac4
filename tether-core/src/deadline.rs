//! Absolute call deadlines.
use std::time::Duration;
use tokio::time::Instant;

/// Returns the absolute point in time `timeout` from now.
pub fn deadline(timeout: Duration) -> Instant {
    Instant::now() + timeout
}

/// Time left until `deadline`, saturating at zero.
pub(crate) fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
