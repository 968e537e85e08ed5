use parking_lot::Mutex;

use crate::config::StatsConfig;
use crate::observability::{StatsReport, StatsReporter};

/// Keeps every report it receives, rendered and as snapshots.
#[derive(Debug, Default)]
pub struct CaptureReporter {
    rendered: Mutex<Vec<String>>,
    reports: Mutex<Vec<StatsReport>>,
}

impl CaptureReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered reports, oldest first.
    #[must_use]
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().clone()
    }

    /// Report snapshots, oldest first.
    #[must_use]
    pub fn reports(&self) -> Vec<StatsReport> {
        self.reports.lock().clone()
    }

    /// Forgets everything captured so far.
    pub fn clear(&self) {
        self.rendered.lock().clear();
        self.reports.lock().clear();
    }
}

impl StatsReporter for CaptureReporter {
    fn report(&self, report: &StatsReport, config: &StatsConfig) {
        self.rendered.lock().push(report.render(config));
        self.reports.lock().push(report.clone());
    }
}
