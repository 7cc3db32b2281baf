//! Observability and diagnostics for the local engine.
//!
//! The engine's scheduling and storage decisions are reported through the `log`
//! facade. `enable_verbose_logging` installs an `env_logger` backend for callers
//! that do not bring their own, and the `log_metric!` macro emits structured
//! key-value metrics for jobs and stages.
//!
//! `log_metric!` is compiled out of release builds by `#[cfg(debug_assertions)]`,
//! so metric calls in hot paths cost nothing in production.

use std::fs::OpenOptions;
use std::sync::Once;

use log::LevelFilter;

use crate::error::tambakError;

/// Logs a structured key-value metric line at debug level, only in debug builds.
///
/// # Example
/// ```
/// use tambak_dataset::log_metric;
/// let partitions = 4;
/// log_metric!("event"="job_finished", "job"="count", "partitions"=&partitions);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        #[cfg(debug_assertions)]
        {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+

            $crate::log::debug!("TAMBAK_METRIC: {{ {} }}", parts.join(", "));
        }
    };
}

static INIT_LOGGER: Once = Once::new();

/// Installs an `env_logger` backend at `Info` level, once per process.
///
/// Records are printed as `[LEVEL] message`. With `log_file`, output is appended
/// to that file instead of stderr. Later calls are no-ops that do not touch
/// `log_file`, and a logger installed by the host application is left untouched.
pub fn enable_verbose_logging(log_file: Option<String>) -> Result<(), tambakError> {
    let mut open_error = None;

    INIT_LOGGER.call_once(|| {
        let target = match log_file {
            Some(filename) => match OpenOptions::new().append(true).create(true).open(filename) {
                Ok(file) => Some(file),
                Err(e) => {
                    open_error = Some(e);
                    return;
                }
            },
            None => None,
        };

        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(LevelFilter::Info);

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = target {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });

    match open_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_verbose_logging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.log");
        let later = dir.path().join("ignored.log");

        enable_verbose_logging(Some(path.to_string_lossy().into_owned())).unwrap();
        enable_verbose_logging(None).unwrap();
        enable_verbose_logging(Some(later.to_string_lossy().into_owned())).unwrap();

        assert!(path.exists());
        assert!(!later.exists());
        log_metric!("event" = "logger_test", "value" = 1);
    }
}
