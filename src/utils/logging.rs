//! Logging Module
//!
//! Structured logging on top of `tracing`. The binary installs a subscriber
//! once through [`init_logging`]; library code only emits events.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use super::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
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
    /// Debug-level config with module targets and thread ids
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            timestamps: true,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            timestamps: false,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Preset picked by the command-line flags; an explicit level wins over
    /// the `verbose`/`quiet` presets' own level
    pub fn from_flags(verbose: bool, quiet: bool, level: Option<&str>) -> Self {
        let mut config = if verbose {
            Self::verbose()
        } else if quiet {
            Self::quiet()
        } else {
            Self::default()
        };
        if let Some(level) = level {
            config.level = LogLevel::parse(level);
        }
        config
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info` for anything unknown
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let default_level = LevelFilter::from_level(config.level.to_tracing_level());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    let layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact();

    let installed = if config.timestamps {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.without_time())
            .try_init()
    };

    installed.map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Per-epoch progress logger for the trainer
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (0-based index)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with the four tracked metrics
    pub fn end_epoch(&self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) {
        let epoch_time = self.epoch_start.elapsed().as_secs_f64();
        let total_time = self.training_start.elapsed().as_secs_f64();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "Epoch {}/{} completed in {} | loss: {:.4} | accuracy: {:.4} | val_loss: {:.4} | val_accuracy: {:.4} | ETA: {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(epoch_time),
            loss,
            accuracy,
            val_loss,
            val_accuracy,
            format_duration(eta_secs)
        );
    }

    /// Log training completion
    pub fn log_complete(&self, final_val_accuracy: f64) {
        tracing::info!(
            "Training complete! {} epochs in {} | final val_accuracy: {:.2}%",
            self.total_epochs,
            format_duration(self.training_start.elapsed().as_secs_f64()),
            final_val_accuracy * 100.0
        );
    }
}
