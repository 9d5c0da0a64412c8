/// Runs a cleanup closure when dropped, including on panic or when the owning
/// future is cancelled.
///
/// ```
/// use rusty_tools::utils::guard::DropGuard;
///
/// let mut cleaned = false;
/// {
///     let _guard = DropGuard::with(|| cleaned = true);
/// }
/// assert!(cleaned);
/// ```
pub struct DropGuard<AtExit: FnOnce()> {
    exit_cb: Option<AtExit>,
}

impl<F: FnOnce()> DropGuard<F> {
    pub fn with(f: F) -> Self {
        Self { exit_cb: Some(f) }
    }

    /// Drop without running the cleanup.
    pub fn disarm(mut self) {
        self.exit_cb = None;
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.exit_cb.take() {
            f()
        }
    }
}
