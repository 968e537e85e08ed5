//! Stats report snapshots and rendering.
//!
//! A report is rendered from a point-in-time snapshot of the root chain.
//! The layout is line oriented:
//!
//! ```text
//! The following stats are collected:
//!   	|  Flux.just ⇢ at my_app::pipeline(pipeline.rs:12)
//!   	|_           ↳ Stats(Requested: ∞; Produced: 1; OnNext ~Time:  40μs; Last Signal: onNext; State: completed)
//!   	|  Flux.map  ⇢ at my_app::pipeline(pipeline.rs:13)
//!   	|_           ↳ Stats(Requested: ∞; Produced: 1; OnNext ~Time:   2μs; Last Signal: onNext; State: completed)
//! ```
//!
//! Names are padded to the longest name of their chain so that `↳` sits
//! under `⇢`. Signal and state columns are right-aligned across the whole
//! report. A stage owning nested chains that did not all complete renders
//! them below its stats line, each introduced by a blank `|` line and its
//! index, and closes the section with `|_`.

use serde::Serialize;

use crate::config::StatsConfig;
use crate::types::{SignalType, StageState, demand};

/// Snapshot of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    /// Operator name.
    pub name: String,
    /// Rendered call site.
    pub location: String,
    /// Total demand received.
    pub requested: u64,
    /// Elements delivered.
    pub produced: u64,
    /// Mean gap between deliveries.
    pub mean_elapsed_nanos: u64,
    /// Last flow signal.
    pub last_signal: SignalType,
    /// Lifecycle state.
    pub state: StageState,
    /// Nested chains opened by inner subscribers of this stage.
    pub inners: Vec<InnerSnapshot>,
}

/// Snapshot of a nested chain with its inner index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InnerSnapshot {
    /// Index of the inner subscriber.
    pub index: usize,
    /// The nested chain.
    pub chain: ChainSnapshot,
}

/// Snapshot of a chain, source first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainSnapshot {
    /// Stages in assembly order.
    pub stages: Vec<StageSnapshot>,
}

impl ChainSnapshot {
    /// Returns true if every stage completed.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.state == StageState::Completed)
    }
}

impl StageSnapshot {
    fn rendered_inners(&self) -> impl Iterator<Item = &InnerSnapshot> {
        self.inners
            .iter()
            .filter(|inner| !inner.chain.all_completed())
    }
}

/// A complete stats report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    /// The root chain.
    pub chain: ChainSnapshot,
}

struct Columns {
    signal: usize,
    state: usize,
}

impl Columns {
    fn measure(chain: &ChainSnapshot, columns: &mut Self) {
        for stage in &chain.stages {
            columns.signal = columns.signal.max(stage.last_signal.as_str().len());
            columns.state = columns.state.max(stage.state.as_str().len());
            for inner in stage.rendered_inners() {
                Self::measure(&inner.chain, columns);
            }
        }
    }
}

/// Formats a duration in nanoseconds as a 3-wide number and a unit.
#[must_use]
pub fn format_elapsed(nanos: u64) -> String {
    if nanos < 1_000 {
        format!("{nanos:>3}ns")
    } else if nanos < 1_000_000 {
        format!("{:>3}μs", nanos / 1_000)
    } else if nanos < 1_000_000_000 {
        format!("{:>3}ms", nanos / 1_000_000)
    } else {
        format!("{:>3} s", nanos / 1_000_000_000)
    }
}

fn render_chain(chain: &ChainSnapshot, columns: &Columns, out: &mut Vec<String>) {
    let width = chain
        .stages
        .iter()
        .map(|stage| stage.name.chars().count())
        .max()
        .unwrap_or(0);

    for stage in &chain.stages {
        out.push(format!(
            "|  {:<width$} ⇢ at {}",
            stage.name, stage.location
        ));
        let stats = format!(
            "↳ Stats(Requested: {}; Produced: {}; OnNext ~Time: {}; Last Signal: {:>sw$}; State: {:>tw$})",
            demand::render(stage.requested),
            stage.produced,
            format_elapsed(stage.mean_elapsed_nanos),
            stage.last_signal.as_str(),
            stage.state.as_str(),
            sw = columns.signal,
            tw = columns.state,
        );

        let inners: Vec<&InnerSnapshot> = stage.rendered_inners().collect();
        if inners.is_empty() {
            out.push(format!("|_{}{stats}", " ".repeat(width + 2)));
            continue;
        }

        out.push(format!("|{}{stats}", " ".repeat(width + 3)));
        let column = width + 4;
        for inner in inners {
            out.push("|".to_owned());
            let mut nested = Vec::new();
            render_chain(&inner.chain, columns, &mut nested);
            let index = inner.index.to_string();
            for (i, line) in nested.iter().enumerate() {
                if i == 0 {
                    let pad = column.saturating_sub(2 + index.len());
                    out.push(format!("|{}{index} {line}", " ".repeat(pad)));
                } else {
                    out.push(format!("|{}{line}", " ".repeat(column - 1)));
                }
            }
        }
        out.push("|_".to_owned());
    }
}

impl StatsReport {
    /// Wraps a root chain snapshot.
    #[must_use]
    pub const fn new(chain: ChainSnapshot) -> Self {
        Self { chain }
    }

    /// Returns the report lines after the preamble, each prefixed with the
    /// configured indent.
    #[must_use]
    pub fn lines(&self, config: &StatsConfig) -> Vec<String> {
        let mut columns = Columns {
            signal: 0,
            state: 0,
        };
        Columns::measure(&self.chain, &mut columns);
        let mut lines = Vec::new();
        render_chain(&self.chain, &columns, &mut lines);
        lines
            .into_iter()
            .map(|line| format!("{}{line}", config.indent))
            .collect()
    }

    /// Renders the preamble and every line, newline separated.
    #[must_use]
    pub fn render(&self, config: &StatsConfig) -> String {
        let mut out = config.preamble.clone();
        for line in self.lines(config) {
            out.push('\n');
            out.push_str(&line);
        }
        out
    }

    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
