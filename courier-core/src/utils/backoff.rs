//! Retry schedule for failed dispatch units.

use time::Duration;

/// Delay before the next attempt of a unit that has failed `retry_count` times.
///
/// | retry | delay      |
/// |-------|------------|
/// | 1     | 2 minutes  |
/// | 2     | 10 minutes |
/// | 3+    | 60 minutes |
pub const fn retry_delay(retry_count: i32) -> Duration {
    match retry_count {
        ..=1 => Duration::minutes(2),
        2 => Duration::minutes(10),
        _ => Duration::minutes(60),
    }
}
