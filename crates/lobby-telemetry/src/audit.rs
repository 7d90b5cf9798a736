use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A moderation event persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub address: Option<String>,
    pub session_id: Option<String>,
}

/// Query parameters for searching the audit trail.
#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub level: Option<String>,
    pub address: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ events: kicks, bans, moderation trips.
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS audit (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 address TEXT,
                 session_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_audit_address ON audit(address);
             CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &AuditInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO audit (timestamp, level, target, message, fields, address, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.address,
                record.session_id,
            ],
        );
    }

    pub fn query(&self, q: &AuditQuery) -> Result<Vec<AuditRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, address, session_id FROM audit WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.clone()));
        }
        if let Some(address) = &q.address {
            sql.push_str(&format!(" AND address = ?{}", params.len() + 1));
            params.push(Box::new(address.clone()));
        }
        if let Some(session_id) = &q.session_id {
            sql.push_str(&format!(" AND session_id = ?{}", params.len() + 1));
            params.push(Box::new(session_id.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");

        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(AuditRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                address: row.get(6)?,
                session_id: row.get(7)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM audit", [], |row| row.get(0))
    }
}

struct AuditInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    address: Option<String>,
    session_id: Option<String>,
}

/// tracing Layer that hands warn+ events to a writer thread.
///
/// The emitting thread only queues; the SQLite insert happens on the writer.
pub struct SqliteAuditLayer {
    tx: mpsc::UnboundedSender<AuditInsert>,
}

/// Writer thread behind a [`SqliteAuditLayer`]. It exits once the layer is dropped
/// and everything queued has been written.
pub struct AuditWriter {
    handle: JoinHandle<()>,
}

impl AuditWriter {
    /// Wait for the writer to drain and exit.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

impl SqliteAuditLayer {
    pub fn spawn(sink: Arc<SqliteAuditSink>) -> std::io::Result<(Self, AuditWriter)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditInsert>();
        let handle = std::thread::Builder::new()
            .name("lobby-audit".into())
            .spawn(move || {
                while let Some(record) = rx.blocking_recv() {
                    sink.insert(&record);
                }
            })?;
        Ok((Self { tx }, AuditWriter { handle }))
    }
}

/// Pulls `message`, `address`, and `session_id` out of an event; the rest goes to `fields`.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    address: Option<String>,
    session_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            address: None,
            session_id: None,
        }
    }

    fn record_text(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "address" => self.address = Some(value),
            "session_id" => self.session_id = Some(value),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        let val = if field.name() == "message" {
            val
        } else {
            val.trim_matches('"').to_string()
        };
        self.record_text(field, val);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "session_id" {
            self.session_id = Some(value.to_string());
            return;
        }
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "session_id" {
            self.session_id = Some(value.to_string());
            return;
        }
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Stored on spans so child events inherit `address` / `session_id`.
struct SpanFields {
    address: Option<String>,
    session_id: Option<String>,
}

impl<S> Layer<S> for SqliteAuditLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.address.is_none() || visitor.session_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.address.is_none() {
                            visitor.address.clone_from(&fields.address);
                        }
                        if visitor.session_id.is_none() {
                            visitor.session_id.clone_from(&fields.session_id);
                        }
                    }
                }
            }
        }

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&visitor.fields).unwrap_or_default())
        };

        let _ = self.tx.send(AuditInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
            address: visitor.address,
            session_id: visitor.session_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.address.is_some() || visitor.session_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    address: visitor.address,
                    session_id: visitor.session_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn kick_insert(timestamp: &str, address: &str, session: &str) -> AuditInsert {
        AuditInsert {
            timestamp: timestamp.into(),
            level: "WARN".into(),
            target: "lobby_engine::room".into(),
            message: "session kicked".into(),
            fields: Some(r#"{"cause":"kick"}"#.into()),
            address: Some(address.into()),
            session_id: Some(session.into()),
        }
    }

    #[test]
    fn sink_create_and_insert() {
        let sink = SqliteAuditSink::in_memory().unwrap();
        sink.insert(&kick_insert("2026-10-16T12:00:00Z", "10.0.0.1", "42"));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn sink_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteAuditSink::new(&dir.path().join("nested/audit.db")).unwrap();
        sink.insert(&kick_insert("2026-10-16T12:00:00Z", "10.0.0.1", "42"));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn query_by_address() {
        let sink = SqliteAuditSink::in_memory().unwrap();
        sink.insert(&kick_insert("2026-10-16T12:00:00Z", "10.0.0.1", "1"));
        sink.insert(&kick_insert("2026-10-16T12:00:01Z", "10.0.0.2", "2"));
        sink.insert(&kick_insert("2026-10-16T12:00:02Z", "10.0.0.1", "3"));

        let results = sink
            .query(&AuditQuery {
                address: Some("10.0.0.1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        // Most recent first
        assert_eq!(results[0].session_id.as_deref(), Some("3"));
    }

    #[test]
    fn query_since_and_limit() {
        let sink = SqliteAuditSink::in_memory().unwrap();
        for i in 0..10 {
            sink.insert(&kick_insert(&format!("2026-10-16T12:00:{i:02}Z"), "10.0.0.1", &i.to_string()));
        }

        let results = sink
            .query(&AuditQuery {
                since: Some("2026-10-16T12:00:05Z".into()),
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].session_id.as_deref(), Some("9"));
    }

    #[test]
    fn layer_persists_warn_but_not_info() {
        let sink = Arc::new(SqliteAuditSink::in_memory().unwrap());
        let (layer, writer) = SqliteAuditLayer::spawn(Arc::clone(&sink)).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(address = "10.0.0.9", "connect");
            tracing::warn!(address = "10.0.0.9", session_id = 77u32, cause = "kick", "session kicked");
        });
        writer.join();

        let records = sink.query(&AuditQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, "WARN");
        assert_eq!(record.message, "session kicked");
        assert_eq!(record.address.as_deref(), Some("10.0.0.9"));
        assert_eq!(record.session_id.as_deref(), Some("77"));
        assert!(record.fields.as_deref().unwrap_or_default().contains("kick"));
    }

    #[test]
    fn layer_inherits_fields_from_span() {
        let sink = Arc::new(SqliteAuditSink::in_memory().unwrap());
        let (layer, writer) = SqliteAuditLayer::spawn(Arc::clone(&sink)).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("conn", address = "192.168.1.5");
            let _guard = span.enter();
            tracing::error!("send queue closed");
        });
        writer.join();

        let records = sink.query(&AuditQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address.as_deref(), Some("192.168.1.5"));
    }

    #[test]
    fn emitting_thread_only_queues() {
        let sink = Arc::new(SqliteAuditSink::in_memory().unwrap());
        let (layer, writer) = SqliteAuditLayer::spawn(Arc::clone(&sink)).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        // Hold the connection lock: an inline insert would deadlock here.
        let held = sink.conn.lock();
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..5 {
                tracing::warn!(address = "10.0.0.3", session_id = i, "session kicked");
            }
        });
        drop(held);

        writer.join();
        assert_eq!(sink.count().unwrap(), 5);
    }
}
