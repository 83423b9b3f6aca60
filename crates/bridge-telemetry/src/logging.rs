//! Warn-and-above events persisted to SQLite, keyed by the chat and the
//! message they concern so a failed delivery can be traced end to end.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1_000;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        chat_id TEXT,
        message_id TEXT,
        fields TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_chat ON logs(chat_id);
    CREATE INDEX IF NOT EXISTS idx_logs_message ON logs(message_id);
";

/// One persisted event, as served by `GET /api/logs`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// WhatsApp chat the event concerns, when known.
    pub chat_id: Option<String>,
    /// Queue entry or network message id.
    pub message_id: Option<String>,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
}

/// Filters for `GET /api/logs`. Every filter is an exact match.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, level: Level, target: &str, captured: Captured) {
        let fields = (!captured.extra.is_empty())
            .then(|| serde_json::Value::Object(captured.extra).to_string());
        let conn = self.conn.lock();
        // Write errors are dropped
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, chat_id, message_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                level.as_str(),
                target,
                captured.message.unwrap_or_default(),
                captured.ids.chat_id,
                captured.ids.message_id,
                fields,
            ],
        );
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, chat_id, message_id, fields
             FROM logs
             WHERE (?1 IS NULL OR level = ?1)
               AND (?2 IS NULL OR chat_id = ?2)
               AND (?3 IS NULL OR message_id = ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                q.level.as_deref().map(str::to_uppercase),
                q.chat_id,
                q.message_id,
                limit,
            ],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    chat_id: row.get(5)?,
                    message_id: row.get(6)?,
                    fields: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// Chat and message a span or event is about.
#[derive(Clone, Debug, Default)]
struct Correlation {
    chat_id: Option<String>,
    message_id: Option<String>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.chat_id.is_none() && self.message_id.is_none()
    }

    /// Fill gaps from an outer scope; what is already set wins.
    fn inherit(&mut self, outer: &Correlation) {
        if self.chat_id.is_none() {
            self.chat_id.clone_from(&outer.chat_id);
        }
        if self.message_id.is_none() {
            self.message_id.clone_from(&outer.message_id);
        }
    }
}

/// Field values split into the message, the correlation ids and the rest.
#[derive(Default)]
struct Captured {
    message: Option<String>,
    ids: Correlation,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Visit for Captured {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "chat_id" => self.ids.chat_id = Some(value.to_string()),
            "message_id" => self.ids.message_id = Some(value.to_string()),
            name => {
                self.extra.insert(name.to_string(), value.into());
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Display-formatted (`%x`) values arrive here too
        let text = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.record_str(field, text.trim_matches('"'));
        }
    }
}

/// `tracing` layer feeding [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut captured = Captured::default();
        attrs.record(&mut captured);
        if captured.ids.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(captured.ids);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut captured = Captured::default();
        values.record(&mut captured);
        if captured.ids.is_empty() {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<Correlation>() {
            Some(existing) => {
                // Later values replace earlier ones
                let mut updated = captured.ids;
                updated.inherit(existing);
                *existing = updated;
            }
            None => extensions.insert(captured.ids),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }
        let mut captured = Captured::default();
        event.record(&mut captured);

        // Innermost span first
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Correlation>() {
                    captured.ids.inherit(outer);
                }
            }
        }
        self.sink.append(level, event.metadata().target(), captured);
    }
}
