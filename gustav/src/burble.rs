use std::sync::atomic::{AtomicBool, Ordering};

static BURBLE: AtomicBool = AtomicBool::new(false);

/// Reads the process-wide diagnostic toggle.
pub fn burble() -> bool {
    BURBLE.load(Ordering::Relaxed)
}

/// Sets the process-wide diagnostic toggle; returns the previous value.
pub fn set_burble(on: bool) -> bool {
    BURBLE.swap(on, Ordering::Relaxed)
}

/// Reports an engine decision through the `log` facade when burble is on.
macro_rules! burble_log {
    ($($arg:tt)*) => {
        if $crate::burble::burble() {
            log::debug!($($arg)*);
        }
    };
}

pub(crate) use burble_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_round_trip() {
        let prev = set_burble(true);
        assert!(burble());
        assert!(set_burble(false));
        assert!(!burble());
        set_burble(prev);
    }
}
