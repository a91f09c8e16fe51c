//! Application callback boundary
//!
//! Listener code runs on engine threads. A panic inside it is caught
//! and logged here so it cannot take the dispatch thread down.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a listener callback, containing any panic
///
/// Returns `false` if the callback panicked.
pub(crate) fn guarded<F: FnOnce()>(what: &'static str, callback: F) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(_) => {
            error!("listener: {} callback panicked", what);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_is_contained() {
        assert!(guarded("test", || {}));
        assert!(!guarded("test", || panic!("listener bug")));
    }
}
