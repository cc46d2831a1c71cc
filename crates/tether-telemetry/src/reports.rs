//! Structured report sink: every warn+ event is persisted with the device,
//! session and error kind it concerns, so failures in one session can be
//! traced without grepping stdout.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS reports (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         timestamp TEXT NOT NULL,
         level TEXT NOT NULL,
         target TEXT NOT NULL,
         message TEXT NOT NULL,
         error_kind TEXT,
         device_id TEXT,
         session_id TEXT,
         context TEXT
     );
     CREATE INDEX IF NOT EXISTS idx_reports_session ON reports(session_id);
     CREATE INDEX IF NOT EXISTS idx_reports_kind ON reports(error_kind);";

/// A persisted report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub error_kind: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    /// Remaining event fields as a JSON object.
    pub context: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ReportQuery {
    pub level: Option<String>,
    pub error_kind: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<u32>,
}

pub struct ReportSink {
    conn: Mutex<Connection>,
}

impl ReportSink {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, report: &PendingReport) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO reports (timestamp, level, target, message, error_kind, device_id, session_id, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                report.timestamp,
                report.level,
                report.target,
                report.message,
                report.error_kind,
                report.device_id,
                report.session_id,
                report.context,
            ],
        );
    }

    pub fn query(&self, q: &ReportQuery) -> Result<Vec<ReportRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, error_kind, device_id, session_id, context
             FROM reports WHERE 1=1",
        );
        let mut params: Vec<String> = Vec::new();
        for (column, value) in [
            ("level", &q.level),
            ("error_kind", &q.error_kind),
            ("device_id", &q.device_id),
            ("session_id", &q.session_id),
        ] {
            if let Some(value) = value {
                params.push(value.clone());
                sql.push_str(&format!(" AND {column} = ?{}", params.len()));
            }
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(ReportRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                error_kind: row.get(5)?,
                device_id: row.get(6)?,
                session_id: row.get(7)?,
                context: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
    }
}

struct PendingReport {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    error_kind: Option<String>,
    device_id: Option<String>,
    session_id: Option<String>,
    context: Option<String>,
}

/// tracing Layer that forwards warn+ events to a [`ReportSink`].
pub struct ReportLayer {
    sink: Arc<ReportSink>,
}

impl ReportLayer {
    pub fn new(sink: Arc<ReportSink>) -> Self {
        Self { sink }
    }
}

/// Identity fields, recorded on spans and inherited by their events.
#[derive(Clone, Default)]
struct Scope {
    device_id: Option<String>,
    session_id: Option<String>,
}

#[derive(Default)]
struct ReportVisitor {
    message: Option<String>,
    error_kind: Option<String>,
    scope: Scope,
    context: serde_json::Map<String, serde_json::Value>,
}

impl ReportVisitor {
    fn put(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "error_kind" => self.error_kind = Some(value),
            "device_id" => self.scope.device_id = Some(value),
            "session_id" => self.scope.session_id = Some(value),
            other => {
                self.context
                    .insert(other.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for ReportVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{value:?}");
        self.put(field.name(), formatted.trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.context
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.context
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.context
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for ReportLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = ReportVisitor::default();
        event.record(&mut visitor);

        if visitor.scope.device_id.is_none() || visitor.scope.session_id.is_none() {
            if let Some(spans) = ctx.event_scope(event) {
                for span in spans {
                    if let Some(scope) = span.extensions().get::<Scope>() {
                        if visitor.scope.device_id.is_none() {
                            visitor.scope.device_id.clone_from(&scope.device_id);
                        }
                        if visitor.scope.session_id.is_none() {
                            visitor.scope.session_id.clone_from(&scope.session_id);
                        }
                    }
                }
            }
        }

        let context = if visitor.context.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.context).ok()
        };

        self.sink.insert(&PendingReport {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            error_kind: visitor.error_kind,
            device_id: visitor.scope.device_id,
            session_id: visitor.scope.session_id,
            context,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = ReportVisitor::default();
        attrs.record(&mut visitor);
        if visitor.scope.device_id.is_none() && visitor.scope.session_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_sink(f: impl FnOnce()) -> Arc<ReportSink> {
        let sink = Arc::new(ReportSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(ReportLayer::new(Arc::clone(&sink)));
        tracing::subscriber::with_default(subscriber, f);
        sink
    }

    #[test]
    fn persists_warn_with_identity_fields() {
        let sink = with_sink(|| {
            tracing::warn!(
                device_id = "dev_1",
                session_id = "sess_1",
                error_kind = "protocol_violation",
                opcode = 99u64,
                "dropped frame"
            );
        });
        let reports = sink.query(&ReportQuery::default()).unwrap();
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.message, "dropped frame");
        assert_eq!(r.level, "WARN");
        assert_eq!(r.error_kind.as_deref(), Some("protocol_violation"));
        assert_eq!(r.device_id.as_deref(), Some("dev_1"));
        assert_eq!(r.session_id.as_deref(), Some("sess_1"));
        assert!(r.context.as_deref().unwrap().contains("\"opcode\":99"));
    }

    #[test]
    fn ignores_info_and_below() {
        let sink = with_sink(|| {
            tracing::info!(session_id = "sess_1", "attached");
            tracing::debug!("noise");
        });
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn events_inherit_span_identity() {
        let sink = with_sink(|| {
            let span = tracing::info_span!("session", device_id = "dev_9", session_id = "sess_9");
            let _guard = span.enter();
            tracing::error!(error_kind = "session_expired", "expired");
        });
        let reports = sink.query(&ReportQuery::default()).unwrap();
        assert_eq!(reports[0].device_id.as_deref(), Some("dev_9"));
        assert_eq!(reports[0].session_id.as_deref(), Some("sess_9"));
    }

    #[test]
    fn query_filters_by_session_and_kind() {
        let sink = with_sink(|| {
            tracing::warn!(session_id = "sess_a", error_kind = "transition_failure", "a");
            tracing::warn!(session_id = "sess_b", error_kind = "transition_failure", "b");
            tracing::warn!(session_id = "sess_b", error_kind = "handler_failed", "c");
        });
        let by_session = sink
            .query(&ReportQuery {
                session_id: Some("sess_b".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_session.len(), 2);

        let by_kind = sink
            .query(&ReportQuery {
                session_id: Some("sess_b".into()),
                error_kind: Some("handler_failed".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_kind.len(), 1);
        assert_eq!(by_kind[0].message, "c");
    }

    #[test]
    fn query_limit_returns_most_recent_first() {
        let sink = with_sink(|| {
            for i in 0..5 {
                tracing::warn!("msg {i}");
            }
        });
        let reports = sink
            .query(&ReportQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].message, "msg 4");
    }
}
