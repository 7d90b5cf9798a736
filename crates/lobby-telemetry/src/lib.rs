mod audit;

pub use audit::{AuditQuery, AuditRecord, AuditWriter, SqliteAuditLayer, SqliteAuditSink};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Where to persist WARN+ events. `None` disables the audit trail.
    pub audit_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json: false,
            audit_db_path: None,
        }
    }
}

impl TelemetryConfig {
    /// Debug level when verbose, info otherwise.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.log_level = if verbose { Level::DEBUG } else { Level::INFO };
        self
    }
}

/// Keeps the audit sink reachable for queries.
pub struct TelemetryGuard {
    audit_sink: Option<Arc<SqliteAuditSink>>,
    _audit_writer: Option<AuditWriter>,
}

impl TelemetryGuard {
    /// Access the audit sink for querying persisted moderation events.
    pub fn audit(&self) -> Option<&SqliteAuditSink> {
        self.audit_sink.as_deref()
    }
}

/// Build the env filter string for a level.
fn filter_directive(level: Level) -> String {
    level.to_string().to_lowercase()
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config.log_level)));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let (audit_layer, audit_sink, audit_writer) = match &config.audit_db_path {
        Some(path) => match open_audit(path) {
            Ok((layer, sink, writer)) => (Some(layer), Some(sink), Some(writer)),
            Err(e) => {
                eprintln!("lobby-telemetry: failed to open audit trail: {e}");
                (None, None, None)
            }
        },
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(audit_layer)
        .init();

    TelemetryGuard {
        audit_sink,
        _audit_writer: audit_writer,
    }
}

fn open_audit(
    path: &Path,
) -> Result<(SqliteAuditLayer, Arc<SqliteAuditSink>, AuditWriter), Box<dyn std::error::Error>> {
    let sink = Arc::new(SqliteAuditSink::new(path)?);
    let (layer, writer) = SqliteAuditLayer::spawn(Arc::clone(&sink))?;
    Ok((layer, sink, writer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_switches_level() {
        assert_eq!(TelemetryConfig::default().verbose(true).log_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::default().verbose(false).log_level, Level::INFO);
    }

    #[test]
    fn filter_directive_is_lowercase() {
        assert_eq!(filter_directive(Level::DEBUG), "debug");
        assert_eq!(filter_directive(Level::WARN), "warn");
    }
}
