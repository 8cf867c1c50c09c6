use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::HookError;

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "githook";

pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard), HookError> {
        // Ensure log directory exists
        std::fs::create_dir_all(&self.log_directory).map_err(|e| {
            HookError::ConfigError(format!(
                "Failed to create log directory '{}': {}",
                self.log_directory.display(),
                e
            ))
        })?;

        let file_appender =
            RollingFileAppender::new(self.rotation.clone(), &self.log_directory, LOG_FILE_PREFIX);
        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Install the global subscriber: console output always, rolling files when
/// `logging.directory` is set. Keep the returned guard alive for the life of
/// the process or buffered file output is lost.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, HookError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let (writer, guard) = FileLogger::new(directory.clone()).setup_file_logging()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false); // Disable ANSI colors for file logs
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer()) // Console output
        .with(file_layer)
        .try_init()
        .map_err(|e| HookError::ConfigError(format!("Failed to initialise logging: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        let logger = FileLogger::new(log_dir.clone()).with_rotation(Rotation::NEVER);
        let (_writer, _guard) = logger.setup_file_logging().unwrap();
        assert!(log_dir.is_dir());
    }
}
