//! Wall-clock reads used to timestamp events.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch, with sub-second precision.
pub type Timestamp = f64;

/// Read the current wall-clock time.
///
/// # Panics
///
/// Panics if the system clock reports a time before the UNIX epoch. An
/// admission decision cannot be made without a timestamp.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is set before the UNIX epoch")
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_epoch_and_advances() {
        let first = now();
        let second = now();
        assert!(first > 0.0);
        assert!(second >= first);
    }
}
