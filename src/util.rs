//! Small shared helpers.

use std::time::Duration;

/// Sleeps unless the duration is zero.
#[inline]
pub fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
