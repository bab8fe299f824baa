//! No-Grad Context - Disable Graph Recording
//!
//! Inside a no-grad scope operations still compute values but record no
//! backward nodes. The switch is per thread.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on this thread currently record gradients.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

fn set_grad_enabled(enabled: bool) {
    GRAD_ENABLED.with(|g| g.set(enabled));
}

// =============================================================================
// NoGradGuard
// =============================================================================

/// RAII guard that disables recording until dropped.
///
/// Guards nest; dropping one restores whatever state it found.
pub struct NoGradGuard {
    prev_state: bool,
}

impl NoGradGuard {
    /// Disables recording for the lifetime of the guard.
    #[must_use]
    pub fn new() -> Self {
        let prev_state = is_grad_enabled();
        set_grad_enabled(false);
        Self { prev_state }
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev_state);
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with recording disabled.
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = NoGradGuard::new();
    f()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_nesting() {
        assert!(is_grad_enabled());
        {
            let _outer = NoGradGuard::new();
            assert!(!is_grad_enabled());
            {
                let _inner = NoGradGuard::new();
                assert!(!is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_no_grad_closure() {
        let inside = no_grad(is_grad_enabled);
        assert!(!inside);
        assert!(is_grad_enabled());
    }
}
