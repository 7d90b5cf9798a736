use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lobby_engine::RoomConfig;
use lobby_server::ServerConfig;
use lobby_settings::{load_bad_words, load_or_repair, settings_path, Loaded};
use lobby_telemetry::{init_telemetry, AuditQuery, SqliteAuditSink, TelemetryConfig};

/// Anonymous WebSocket chat lobby.
#[derive(Debug, Parser)]
#[command(name = "lobby", version, about)]
struct Cli {
    /// Settings file. Created with defaults if missing.
    #[arg(long, default_value_os_t = settings_path())]
    config: PathBuf,

    /// Listen port, overrides the settings file.
    #[arg(long)]
    port: Option<u16>,

    /// Debug logging.
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Print the newest N audit records as JSON lines and exit.
    #[arg(long, value_name = "N")]
    audit_tail: Option<u32>,

    /// Only print audit records for this address.
    #[arg(long, requires = "audit_tail")]
    audit_address: Option<String>,
}

/// Write matching audit records, oldest first, one JSON object per line.
fn print_audit(
    sink: &SqliteAuditSink,
    query: &AuditQuery,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let records = sink.query(query).context("failed to query audit trail")?;
    for record in records.iter().rev() {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Loaded {
        mut settings,
        report,
    } = load_or_repair(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    settings.be_verbose |= cli.verbose;

    let audit_db_path =
        (!settings.audit_log_file.is_empty()).then(|| PathBuf::from(&settings.audit_log_file));

    if let Some(limit) = cli.audit_tail {
        let path = audit_db_path.context("auditLogFile is not set in the settings file")?;
        let sink = SqliteAuditSink::new(&path)
            .with_context(|| format!("failed to open audit trail {}", path.display()))?;
        let query = AuditQuery {
            address: cli.audit_address,
            limit: Some(limit),
            ..AuditQuery::default()
        };
        return print_audit(&sink, &query, &mut std::io::stdout().lock());
    }

    let telemetry = init_telemetry(
        TelemetryConfig {
            json: cli.json_logs,
            audit_db_path,
            ..TelemetryConfig::default()
        }
        .verbose(settings.be_verbose),
    );

    if report.changed() {
        tracing::info!(
            path = %cli.config.display(),
            recreated = report.recreated,
            added = report.added.len(),
            removed = report.removed.len(),
            reset = report.reset.len(),
            "settings file repaired"
        );
    }

    if !settings.config_ready {
        println!(
            "Review {} and set \"configReady\": true to start the server.",
            cli.config.display()
        );
        return Ok(());
    }

    let words = load_bad_words(Path::new(&settings.bad_text_file))
        .with_context(|| format!("failed to load bad word list {}", settings.bad_text_file))?;
    tracing::info!(words = words.len(), "bad word list loaded");

    let handle = lobby_server::start(
        ServerConfig::from_settings(&settings),
        RoomConfig::from_settings(&settings),
        Arc::new(words),
    )
    .await
    .context("failed to start server")?;

    tracing::info!(port = handle.port, "lobby ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    match telemetry.audit().map(SqliteAuditSink::count) {
        Some(Ok(records)) => tracing::info!(records, "shutting down"),
        Some(Err(e)) => tracing::info!(error = %e, "shutting down, audit trail unreadable"),
        None => tracing::info!("shutting down"),
    }
    handle.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["lobby"]);
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.port, None);
        assert!(!cli.verbose);
        assert!(!cli.json_logs);
        assert_eq!(cli.audit_tail, None);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from(["lobby", "--config", "/etc/lobby.json", "--port", "9000", "--verbose"]);
        assert_eq!(cli.config, PathBuf::from("/etc/lobby.json"));
        assert_eq!(cli.port, Some(9000));
        assert!(cli.verbose);
    }

    #[test]
    fn audit_address_needs_audit_tail() {
        assert!(Cli::try_parse_from(["lobby", "--audit-address", "10.0.0.1"]).is_err());
        let cli = Cli::parse_from(["lobby", "--audit-tail", "5", "--audit-address", "10.0.0.1"]);
        assert_eq!(cli.audit_tail, Some(5));
        assert_eq!(cli.audit_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn print_audit_writes_oldest_first() {
        use lobby_telemetry::SqliteAuditLayer;
        use tracing_subscriber::layer::SubscriberExt;

        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SqliteAuditSink::new(&dir.path().join("audit.db")).unwrap());
        let (layer, writer) = SqliteAuditLayer::spawn(Arc::clone(&sink)).unwrap();
        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
            tracing::warn!(address = "10.0.0.1", "first kick");
            tracing::warn!(address = "10.0.0.2", "other kick");
            tracing::warn!(address = "10.0.0.1", "second kick");
        });
        writer.join();

        let mut out = Vec::new();
        let query = AuditQuery {
            address: Some("10.0.0.1".into()),
            limit: Some(10),
            ..AuditQuery::default()
        };
        print_audit(&sink, &query, &mut out).unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "first kick");
        assert_eq!(lines[1]["message"], "second kick");
    }
}
