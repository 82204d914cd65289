//! tracing subscriber setup for the CLI binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_dir: Option<PathBuf>,
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            level: Level::INFO,
        }
    }
}

impl LogConfig {
    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

/// Initialize the global subscriber: terse stderr output plus an optional
/// daily-rotated log file. Returns the appender guard; dropping it flushes
/// buffered log lines, so hold it for the life of the process.
pub fn init_logging(program: &str, config: LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("slimg={},{program}={}", config.level, config.level)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let guard = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender =
                RollingFileAppender::new(Rotation::DAILY, dir, format!("{program}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            registry.with(file_layer).init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    };

    tracing::debug!(program, level = ?config.level, "logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_config_builder() {
        let config = LogConfig::default()
            .with_log_dir("/tmp/slimg-logs")
            .with_level(Level::DEBUG);
        assert_eq!(config.log_dir.as_deref(), Some(Path::new("/tmp/slimg-logs")));
        assert_eq!(config.level, Level::DEBUG);
    }
}
