//! Process-wide hooks and their configuration.
//!
//! All toggles live in one [`HooksConfig`] record. Writers go through a
//! single writer lock and publish a fresh `Arc` snapshot; operators read the
//! snapshot once, at assembly time, so flipping a toggle only affects
//! operators assembled afterwards.
//!
//! ```ignore
//! use tributary::Hooks;
//!
//! Hooks::enable_stats_recording();
//! Hooks::on_operator_debug();
//! // ... assemble and run flows ...
//! Hooks::reset_on_operator_debug();
//! Hooks::disable_stats_recording();
//! ```
//!
//! Configuration can also come from the environment
//! ([`HooksConfig::from_env`]) or, with the `config-file` feature, from TOML
//! ([`HooksConfig::from_toml_str`]), and be installed with [`Hooks::apply`].

use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FluxError;
use crate::observability::reporter::{LogReporter, StatsReporter};
use crate::tracing_compat::{debug, warn};

/// Environment variable enabling stats recording.
pub const ENV_STATS: &str = "TRIBUTARY_STATS";
/// Environment variable enabling operator debug (call-site capture).
pub const ENV_OPERATOR_DEBUG: &str = "TRIBUTARY_OPERATOR_DEBUG";
/// Environment variable holding a comma-separated frame filter.
pub const ENV_FRAME_FILTER: &str = "TRIBUTARY_FRAME_FILTER";

/// Error loading a [`HooksConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// The raw value.
        value: String,
    },
    /// The TOML document could not be parsed.
    #[cfg(feature = "config-file")]
    #[error("invalid hooks configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Layout settings for stats reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Prefix of every report line.
    pub indent: String,
    /// Line written before the report.
    pub preamble: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            indent: "  \t".to_owned(),
            preamble: "The following stats are collected:".to_owned(),
        }
    }
}

/// The global toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Wrap newly assembled operators with the stats layer.
    pub stats_recording: bool,
    /// Capture the declaring method of newly assembled operators and attach
    /// assembly sites to errors.
    pub operator_debug: bool,
    /// Stack frames whose demangled path starts with one of these prefixes
    /// are skipped when looking for the declaring method.
    pub frame_filter: Vec<String>,
    /// Report layout.
    pub stats: StatsConfig,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            stats_recording: false,
            operator_debug: false,
            frame_filter: default_frame_filter(),
            stats: StatsConfig::default(),
        }
    }
}

/// The frame prefixes skipped by default: this crate and the runtime.
#[must_use]
pub fn default_frame_filter() -> Vec<String> {
    [
        concat!(env!("CARGO_CRATE_NAME"), "::"),
        "std::",
        "core::",
        "alloc::",
        "backtrace::",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_owned(),
        }),
    }
}

impl HooksConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`, starting from the defaults.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_STATS) {
            config.stats_recording = parse_flag(ENV_STATS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_OPERATOR_DEBUG) {
            config.operator_debug = parse_flag(ENV_OPERATOR_DEBUG, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FRAME_FILTER) {
            config.frame_filter = raw
                .split(',')
                .map(str::trim)
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_owned)
                .collect();
        }
        Ok(config)
    }

    /// Parses a TOML document; missing keys keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}

type ErrorDroppedHook = Arc<dyn Fn(&FluxError) + Send + Sync>;

struct GlobalHooks {
    writer: Mutex<()>,
    config: RwLock<Arc<HooksConfig>>,
    reporter: RwLock<Arc<dyn StatsReporter>>,
    error_dropped: RwLock<Option<ErrorDroppedHook>>,
}

static HOOKS: LazyLock<GlobalHooks> = LazyLock::new(|| GlobalHooks {
    writer: Mutex::new(()),
    config: RwLock::new(Arc::new(HooksConfig::default())),
    reporter: RwLock::new(Arc::new(LogReporter)),
    error_dropped: RwLock::new(None),
});

fn update(change: impl FnOnce(&mut HooksConfig)) {
    let _writer = HOOKS.writer.lock();
    let mut next = HooksConfig::clone(&HOOKS.config.read());
    change(&mut next);
    *HOOKS.config.write() = Arc::new(next);
}

/// Entry points for the process-wide hooks.
#[derive(Debug, Clone, Copy)]
pub struct Hooks;

impl Hooks {
    /// Wraps operators assembled from now on with the stats layer.
    pub fn enable_stats_recording() {
        update(|config| config.stats_recording = true);
        debug!("stats recording enabled");
    }

    /// Stops wrapping newly assembled operators with the stats layer.
    pub fn disable_stats_recording() {
        update(|config| config.stats_recording = false);
        debug!("stats recording disabled");
    }

    /// Enables call-site capture for operators assembled from now on.
    pub fn on_operator_debug() {
        update(|config| config.operator_debug = true);
        debug!("operator debug enabled");
    }

    /// Disables call-site capture for operators assembled from now on.
    pub fn reset_on_operator_debug() {
        update(|config| config.operator_debug = false);
        debug!("operator debug disabled");
    }

    /// Replaces the frame filter used when resolving declaring methods.
    pub fn set_frame_filter<I, S>(prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        update(|config| config.frame_filter = prefixes);
    }

    /// Installs a whole configuration record.
    pub fn apply(config: HooksConfig) {
        update(|current| *current = config);
    }

    /// Returns the current configuration snapshot.
    #[must_use]
    pub fn snapshot() -> Arc<HooksConfig> {
        Arc::clone(&HOOKS.config.read())
    }

    /// Sends stats reports to `reporter`.
    pub fn set_stats_reporter(reporter: Arc<dyn StatsReporter>) {
        let _writer = HOOKS.writer.lock();
        *HOOKS.reporter.write() = reporter;
    }

    /// Sends stats reports to the log again.
    pub fn reset_stats_reporter() {
        Self::set_stats_reporter(Arc::new(LogReporter));
    }

    /// Observes errors that arrive after a terminal signal.
    pub fn on_error_dropped(hook: impl Fn(&FluxError) + Send + Sync + 'static) {
        let _writer = HOOKS.writer.lock();
        *HOOKS.error_dropped.write() = Some(Arc::new(hook));
    }

    /// Logs dropped errors again.
    pub fn reset_on_error_dropped() {
        let _writer = HOOKS.writer.lock();
        *HOOKS.error_dropped.write() = None;
    }

    /// Restores every hook to its default.
    pub fn reset_all() {
        Self::apply(HooksConfig::default());
        Self::reset_stats_reporter();
        Self::reset_on_error_dropped();
    }
}

pub(crate) fn stats_reporter() -> Arc<dyn StatsReporter> {
    Arc::clone(&HOOKS.reporter.read())
}

/// Routes an error that can no longer be signalled.
pub(crate) fn error_dropped(error: &FluxError) {
    let hook = HOOKS.error_dropped.read().clone();
    match hook {
        Some(hook) if !error.is_fatal() => hook(error),
        _ => warn!("error dropped after terminal signal: {}", error),
    }
}
