// Progress reporting for long-running discovery
use tokio::sync::watch;

/// Receives overall progress in `[0, 1]`. Called from the worker; must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64);
}

impl ProgressSink for watch::Sender<f64> {
    fn report(&self, fraction: f64) {
        self.send_replace(fraction);
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f64) {}
}

/// Maps a phase's own `[0, 1]` progress onto `[base, target]` of the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub base: f64,
    pub target: f64,
}

impl ProgressWindow {
    pub const FULL: ProgressWindow = ProgressWindow { base: 0.0, target: 1.0 };

    pub fn new(base: f64, target: f64) -> Self {
        let base = base.clamp(0.0, 1.0);
        Self { base, target: target.clamp(base, 1.0) }
    }

    /// Narrows to the part of this window between `from` and `to`.
    pub fn narrow(&self, from: f64, to: f64) -> Self {
        let span = self.target - self.base;
        Self::new(self.base + span * from, self.base + span * to)
    }

    pub fn at(&self, fraction: f64) -> f64 {
        self.base + (self.target - self.base) * fraction.clamp(0.0, 1.0)
    }

    pub fn report(&self, sink: &dyn ProgressSink, done: u64, total: Option<u64>) {
        let fraction = match total {
            Some(total) if total > 0 => done as f64 / total as f64,
            _ => 0.0,
        };
        sink.report(self.at(fraction));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_maps_linearly() {
        let window = ProgressWindow::new(0.3, 0.9);
        assert!((window.at(0.0) - 0.3).abs() < 1e-9);
        assert!((window.at(0.5) - 0.6).abs() < 1e-9);
        assert!((window.at(2.0) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_narrow() {
        let window = ProgressWindow::FULL.narrow(0.5, 1.0).narrow(0.0, 0.5);
        assert!((window.base - 0.5).abs() < 1e-9);
        assert!((window.target - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_watch_sink() {
        let (tx, rx) = watch::channel(0.0);
        ProgressWindow::new(0.1, 0.3).report(&tx, 5, Some(10));
        assert!((*rx.borrow() - 0.2).abs() < 1e-9);
    }
}
