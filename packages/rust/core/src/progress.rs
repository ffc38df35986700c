/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each meeting or document is handled.
    fn item_done(&self, detail: &str, current: usize, total: usize);
    /// Called once when the run completes.
    fn finish(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_done(&self, _detail: &str, _current: usize, _total: usize) {}
    fn finish(&self, _summary: &str) {}
}
