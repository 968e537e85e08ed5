//! Destinations for stats reports.

use std::io::Write;

use parking_lot::Mutex;

use super::StatsReport;
use crate::config::StatsConfig;
use crate::tracing_compat::{info, warn};

/// Receives every rendered stats report.
///
/// Called on the thread that delivered the terminal signal or the cancel;
/// implementations must not block for long.
pub trait StatsReporter: Send + Sync {
    /// Handles one report.
    fn report(&self, report: &StatsReport, config: &StatsConfig);
}

/// Emits each report as a single `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatsReporter for LogReporter {
    fn report(&self, report: &StatsReport, config: &StatsConfig) {
        let rendered = report.render(config);
        info!("{}", rendered);
    }
}

/// Writes each report to a [`Write`] sink with a single `write_all`.
pub struct WriterReporter<W> {
    sink: Mutex<W>,
}

impl<W: Write + Send> WriterReporter<W> {
    /// Creates a reporter writing to `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Returns the sink.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

impl<W: Write + Send> StatsReporter for WriterReporter<W> {
    fn report(&self, report: &StatsReport, config: &StatsConfig) {
        let mut rendered = report.render(config);
        rendered.push('\n');
        let mut sink = self.sink.lock();
        if let Err(err) = sink.write_all(rendered.as_bytes()).and_then(|()| sink.flush()) {
            warn!("failed to write stats report: {}", err);
        }
    }
}

impl<W> std::fmt::Debug for WriterReporter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterReporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::report::{ChainSnapshot, StageSnapshot};
    use crate::types::{SignalType, StageState};

    #[test]
    fn writer_gets_one_block_per_report() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("writer_gets_one_block_per_report");
        let reporter = WriterReporter::new(Vec::new());
        let report = StatsReport::new(ChainSnapshot {
            stages: vec![StageSnapshot {
                name: "Flux.just".to_owned(),
                location: "lib.rs:1".to_owned(),
                requested: 1,
                produced: 1,
                mean_elapsed_nanos: 0,
                last_signal: SignalType::OnNext,
                state: StageState::Completed,
                inners: Vec::new(),
            }],
        });
        reporter.report(&report, &StatsConfig::default());
        reporter.report(&report, &StatsConfig::default());
        let written = String::from_utf8(reporter.into_inner()).unwrap_or_default();
        let preambles = written.matches("The following stats are collected:").count();
        crate::assert_with_log!(preambles == 2, "two reports", 2, preambles);
        crate::assert_with_log!(
            written.contains("Requested: 1; Produced: 1"),
            "counters",
            "Requested: 1; Produced: 1",
            written
        );
        crate::test_complete!("writer_gets_one_block_per_report");
    }
}
