//! Logging Module
//!
//! The library only emits `tracing` events. [`LogConfig`] is the `logging`
//! section of the pipeline configuration and [`init_logging`] turns it into a
//! global `FmtSubscriber` for whoever drives the pipeline.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use super::error::{DatasetError, Result};

/// Minimum level of events that reach the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub timestamps: bool,
    /// Print the module path of each event
    pub include_target: bool,
    /// Useful while the organizer validates in parallel
    pub include_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug level with targets and thread ids
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    /// Errors only, no timestamps
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            timestamps: false,
            ..Self::default()
        }
    }

    fn subscriber_builder(&self) -> tracing_subscriber::fmt::SubscriberBuilder {
        FmtSubscriber::builder()
            .with_max_level(Level::from(self.level))
            .with_ansi(self.ansi_colors)
            .with_target(self.include_target)
            .with_thread_ids(self.include_thread_ids)
    }
}

/// Install the global tracing subscriber described by `config`
///
/// Fails with `Config` when a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let builder = config.subscriber_builder();
    let result = if config.timestamps {
        tracing::subscriber::set_global_default(builder.compact().finish())
    } else {
        tracing::subscriber::set_global_default(builder.without_time().compact().finish())
    };

    result.map_err(|e| DatasetError::Config(format!("Failed to initialize logging: {}", e)))
}
