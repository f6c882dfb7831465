//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the `[application] log_level` from the
//! configuration becomes the filter for this crate and `warn` for everything
//! else. Log output goes to stderr; stdout carries the sealed replies of the
//! companion-app command bridge.

use std::io;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{ApplicationConfig, ConfigError};

/// Where [`init_from_config`] sends log lines.
pub const LOG_WRITER: fn() -> io::Stderr = io::stderr;

/// Build the filter used by [`init_from_config`].
pub fn filter_for(app: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,nirscan={}", app.log_level)))
}

/// Subscriber for the configured level and format, writing to `writer`.
pub fn subscriber<W>(app: &ApplicationConfig, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(app))
        .with_target(true)
        .with_writer(writer);

    match app.log_format.as_str() {
        "json" => Box::new(builder.json().finish()),
        _ => Box::new(builder.finish()),
    }
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init_from_config(app: &ApplicationConfig) -> Result<(), ConfigError> {
    tracing::subscriber::set_global_default(subscriber(app, LOG_WRITER))
        .map_err(|e| ConfigError::ValidationError(format!("tracing init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    #[serial]
    fn test_filter_uses_configured_level() {
        std::env::remove_var("RUST_LOG");
        let app = ApplicationConfig {
            log_level: "debug".into(),
            ..ApplicationConfig::default()
        };
        let filter = filter_for(&app).to_string();
        assert!(filter.contains("nirscan=debug"));
    }

    #[test]
    fn test_logs_are_written_to_stderr() {
        let writer = std::any::type_name_of_val(&LOG_WRITER());
        assert_eq!(writer, std::any::type_name::<io::Stderr>());
        assert_ne!(writer, std::any::type_name::<io::Stdout>());
    }

    #[test]
    #[serial]
    fn test_json_lines_reach_the_given_writer() {
        std::env::remove_var("RUST_LOG");
        let app = ApplicationConfig {
            log_format: "json".into(),
            ..ApplicationConfig::default()
        };
        let captured = Captured::default();

        tracing::subscriber::with_default(subscriber(&app, captured.clone()), || {
            tracing::info!(device_id = 7, "controller ready");
            tracing::debug!("below the configured level");
        });

        let text = captured.text();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "controller ready");
        assert_eq!(line["fields"]["device_id"], 7);
        assert!(!text.contains("below the configured level"));
    }
}
