/*!
 * Logging and tracing initialization
 *
 * stdout carries command results only (the report line, `list` output), so
 * every log record goes to stderr, or to a JSON file when `--log` is given.
 * The S3 client is chatty at debug level; its crates stay at `warn` unless
 * `RUST_LOG` says otherwise.
 */

use std::fs::File;
use std::io::IsTerminal;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::BackupConfig;
use crate::error::{BackupError, Result};

/// Dependencies whose records are capped at `warn` by default
const QUIET_TARGETS: &[&str] = &["aws_config", "aws_smithy_runtime", "aws_sdk_s3", "hyper"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Resolve the effective level; `verbose` forces debug
pub fn effective_level(config: &BackupConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Directive used when `RUST_LOG` is not set
pub fn default_directive(level: Level) -> String {
    let mut directive = format!("dvb={}", level);
    for target in QUIET_TARGETS {
        directive.push_str(&format!(",{}=warn", target));
    }
    directive
}

/// Install the global subscriber for this process
pub fn init_logging(config: &BackupConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(effective_level(config))))
        .map_err(|e| BackupError::Config(format!("Failed to create log filter: {}", e)))?;

    let output = match config.log_file {
        Some(ref log_path) => json_file_layer(log_path)?,
        None => stderr_layer(),
    };

    tracing_subscriber::registry()
        .with(output.with_filter(env_filter))
        .try_init()
        .map_err(|e| BackupError::Config(format!("Failed to install logger: {}", e)))
}

/// Compact records on stderr, colored only on a terminal
fn stderr_layer() -> BoxedLayer {
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .boxed()
}

/// One JSON object per record, with source location and worker thread names
/// (the export/import threads are named after their volume)
fn json_file_layer(log_path: &Path) -> Result<BoxedLayer> {
    let file = File::create(log_path).map_err(|e| {
        BackupError::Config(format!(
            "Failed to create log file {}: {}",
            log_path.display(),
            e
        ))
    })?;

    Ok(fmt::layer()
        .with_writer(file)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json()
        .boxed())
}

/// Route records to the test harness's captured output
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dvb=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_effective_level_follows_config() {
        let config = BackupConfig {
            log_level: LogLevel::Warn,
            verbose: false,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = BackupConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_default_directive_is_valid_filter() {
        let directive = default_directive(Level::INFO);
        assert!(directive.starts_with("dvb=INFO,"));
        assert!(directive.contains("aws_smithy_runtime=warn"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }

    #[test]
    fn test_log_file_in_missing_dir_is_config_error() {
        let err = json_file_layer(Path::new("/nonexistent/dir/dvb.log")).err();
        assert!(matches!(err, Some(BackupError::Config(_))));
    }

    #[test]
    fn test_init_test_logging_is_repeatable() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("test logging initialized");
    }
}
