//! Telemetry and logging infrastructure
//!
//! - SQLite storage for every handled turn (queryable history)
//! - OpenTelemetry export (Jaeger, Honeycomb, etc.)
//! - Console logging (human-readable)
//! - JSON file logging (for analysis)

use crate::events::{BotEvent, Route};
use chrono::{DateTime, Utc};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

const DB_FILE: &str = "telemetry.db";

/// One handled inbound event
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub chat_id: String,
    pub route: Route,
    pub event: BotEvent,
    pub input: Option<String>,
    pub reply: Option<String>,
    pub duration_ms: u64,
}

/// Process-level session: one per bot run
#[derive(Debug)]
pub struct TelemetrySession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub turn_count: AtomicU64,
}

impl TelemetrySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            turn_count: AtomicU64::new(0),
        }
    }
}

impl Default for TelemetrySession {
    fn default() -> Self {
        Self::new()
    }
}

/// SQLite-backed telemetry storage
struct TelemetryDb {
    conn: Connection,
}

impl TelemetryDb {
    fn open(path: &Path) -> anyhow::Result<Self> {
        Self::with_schema(Connection::open(path)?)
    }

    fn in_memory() -> anyhow::Result<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                transport TEXT,
                model TEXT,
                provider TEXT
            );

            CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                route TEXT NOT NULL,
                outcome TEXT NOT NULL,
                event TEXT NOT NULL,
                input TEXT,
                reply TEXT,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id);
            CREATE INDEX IF NOT EXISTS idx_turns_chat ON turns(chat_id);
            CREATE INDEX IF NOT EXISTS idx_turns_timestamp ON turns(timestamp);
        "#)?;

        Ok(Self { conn })
    }

    fn insert_session(
        &self,
        session: &TelemetrySession,
        transport: Option<&str>,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, started_at, transport, model, provider) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                session.started_at.to_rfc3339(),
                transport,
                model,
                provider
            ],
        )?;
        Ok(())
    }

    fn insert_turn(&self, session_id: Uuid, record: &TurnRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"INSERT INTO turns
               (id, session_id, chat_id, timestamp, route, outcome, event,
                input, reply, error, duration_ms)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                Uuid::new_v4().to_string(),
                session_id.to_string(),
                record.chat_id,
                Utc::now().to_rfc3339(),
                record.route.as_str(),
                record.event.as_str(),
                serde_json::to_string(&record.event)?,
                record.input,
                record.reply,
                record.event.error(),
                record.duration_ms as i64
            ],
        )?;
        Ok(())
    }
}

/// Main telemetry handler
pub struct Telemetry {
    session: Arc<TelemetrySession>,
    db: Arc<Mutex<TelemetryDb>>,
    log_dir: PathBuf,
    _file_guard: Option<WorkerGuard>,
    _otel_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Initialize telemetry for the long-running bot: console, file, SQLite and
    /// optional OTLP export
    pub fn init(
        log_dir: PathBuf,
        verbose: bool,
        otel_endpoint: Option<&str>,
        transport: &str,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> anyhow::Result<Self> {
        Self::init_with_options(log_dir, verbose, true, otel_endpoint, transport, model, provider)
    }

    /// Initialize telemetry for the REPL. Console logs only in verbose mode, so
    /// they do not interleave with replies.
    pub fn init_for_repl(
        log_dir: PathBuf,
        verbose: bool,
        otel_endpoint: Option<&str>,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> anyhow::Result<Self> {
        Self::init_with_options(log_dir, verbose, verbose, otel_endpoint, "console", model, provider)
    }

    fn init_with_options(
        log_dir: PathBuf,
        verbose: bool,
        console: bool,
        otel_endpoint: Option<&str>,
        transport: &str,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&log_dir)?;

        let session = Arc::new(TelemetrySession::new());

        let db_path = log_dir.join(DB_FILE);
        let db = TelemetryDb::open(&db_path)?;
        db.insert_session(&session, Some(transport), model, provider)?;
        let db = Arc::new(Mutex::new(db));

        let file_appender = tracing_appender::rolling::daily(&log_dir, "pocket_agent.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("debug,hyper=info,reqwest=info,h2=info,rustls=info")
            } else {
                EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,rustls=warn")
            }
        });

        let otel_provider = match otel_endpoint {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(endpoint)
                    .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                    .build()?;

                Some(
                    SdkTracerProvider::builder()
                        .with_batch_exporter(exporter)
                        .with_resource(Resource::builder().with_service_name("pocket-agent").build())
                        .build(),
                )
            }
            None => None,
        };
        let otel_layer = otel_provider
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("pocket-agent")));

        let console_layer = console.then(|| fmt::layer().with_target(false).compact());

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(fmt::layer().json().with_writer(non_blocking))
            .with(otel_layer)
            .try_init()
            .ok();

        tracing::info!(
            session_id = %session.id,
            log_dir = %log_dir.display(),
            db_path = %db_path.display(),
            otel_enabled = otel_endpoint.is_some(),
            transport = transport,
            "Telemetry initialized"
        );

        Ok(Self {
            session,
            db,
            log_dir,
            _file_guard: Some(file_guard),
            _otel_provider: otel_provider,
        })
    }

    /// Open an existing telemetry database for querying, without logging setup
    pub fn open(log_dir: PathBuf) -> anyhow::Result<Self> {
        let db = TelemetryDb::open(&log_dir.join(DB_FILE))?;
        Ok(Self::from_db(db, log_dir))
    }

    /// In-memory telemetry (for testing)
    pub fn in_memory() -> anyhow::Result<Self> {
        let db = TelemetryDb::in_memory()?;
        let telemetry = Self::from_db(db, PathBuf::new());
        if let Ok(db) = telemetry.db.lock() {
            db.insert_session(&telemetry.session, Some("test"), None, None)?;
        }
        Ok(telemetry)
    }

    fn from_db(db: TelemetryDb, log_dir: PathBuf) -> Self {
        Self {
            session: Arc::new(TelemetrySession::new()),
            db: Arc::new(Mutex::new(db)),
            log_dir,
            _file_guard: None,
            _otel_provider: None,
        }
    }

    /// Get the current session ID
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Record a handled turn
    pub fn record_turn(&self, record: &TurnRecord) {
        self.session.turn_count.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            chat_id = %record.chat_id,
            route = record.route.as_str(),
            outcome = record.event.as_str(),
            duration_ms = record.duration_ms,
            "Turn handled"
        );

        match self.db.lock() {
            Ok(db) => {
                if let Err(e) = db.insert_turn(self.session.id, record) {
                    tracing::error!(error = %e, chat_id = %record.chat_id, "Failed to insert turn");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to lock telemetry db");
            }
        }
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session.id,
            started_at: self.session.started_at,
            turn_count: self.session.turn_count.load(Ordering::SeqCst),
        }
    }

    /// Get the database path for direct querying
    pub fn db_path(&self) -> PathBuf {
        self.log_dir.join(DB_FILE)
    }

    /// Most recent turns, newest first
    pub fn recent_turns(&self, limit: usize) -> anyhow::Result<Vec<TurnSummary>> {
        let db = self.db.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = db.conn.prepare(r#"
            SELECT timestamp, chat_id, route, outcome, input, reply, error, duration_ms
            FROM turns
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?1
        "#)?;

        let rows = stmt.query_map([limit], |row| {
            Ok(TurnSummary {
                timestamp: row.get(0)?,
                chat_id: row.get(1)?,
                route: row.get(2)?,
                outcome: row.get(3)?,
                input: row.get(4)?,
                reply: row.get(5)?,
                error: row.get(6)?,
                duration_ms: row.get::<_, i64>(7)? as u64,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Turn counts per route
    pub fn route_stats(&self) -> anyhow::Result<Vec<RouteStat>> {
        let db = self.db.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = db.conn.prepare(r#"
            SELECT route,
                   COUNT(*) as turn_count,
                   AVG(duration_ms) as avg_duration_ms,
                   SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END) as failure_count
            FROM turns
            GROUP BY route
            ORDER BY turn_count DESC
        "#)?;

        let rows = stmt.query_map([], |row| {
            Ok(RouteStat {
                route: row.get(0)?,
                turn_count: row.get::<_, i64>(1)? as u64,
                avg_duration_ms: row.get(2)?,
                failure_count: row.get::<_, i64>(3)? as u64,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub turn_count: u64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session {} | Started: {} | Turns: {}",
            self.session_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.turn_count
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnSummary {
    pub timestamp: String,
    pub chat_id: String,
    pub route: String,
    pub outcome: String,
    pub input: Option<String>,
    pub reply: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStat {
    pub route: String,
    pub turn_count: u64,
    pub avg_duration_ms: f64,
    pub failure_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FailureStage;

    fn turn(route: Route, event: BotEvent, input: &str) -> TurnRecord {
        TurnRecord {
            chat_id: "42".to_string(),
            route,
            event,
            input: Some(input.to_string()),
            reply: Some("ok".to_string()),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_record_and_query_turns() {
        let telemetry = Telemetry::in_memory().unwrap();
        telemetry.record_turn(&turn(Route::Classifier, BotEvent::DirectAnswer, "hi"));
        telemetry.record_turn(&turn(
            Route::Agent,
            BotEvent::Failed {
                stage: FailureStage::Planner,
                error: "planner down".to_string(),
            },
            "plan",
        ));
        telemetry.record_turn(&turn(Route::Classifier, BotEvent::DirectAnswer, "again"));

        assert_eq!(telemetry.stats().turn_count, 3);

        let recent = telemetry.recent_turns(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].input.as_deref(), Some("again"));
        assert_eq!(recent[1].outcome, "failed");
        assert_eq!(recent[1].error.as_deref(), Some("planner down"));

        let routes = telemetry.route_stats().unwrap();
        assert_eq!(routes[0].route, "classifier");
        assert_eq!(routes[0].turn_count, 2);
        assert_eq!(routes[1].failure_count, 1);
    }

    #[test]
    fn test_open_reads_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = TelemetryDb::open(&dir.path().join(DB_FILE)).unwrap();
            let session = TelemetrySession::new();
            db.insert_session(&session, Some("telegram"), None, None).unwrap();
            db.insert_turn(session.id, &turn(Route::Answer, BotEvent::Cancelled { had_pending: true }, "/cancel"))
                .unwrap();
        }

        let telemetry = Telemetry::open(dir.path().to_path_buf()).unwrap();
        let recent = telemetry.recent_turns(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].route, "answer");
        assert_eq!(telemetry.db_path(), dir.path().join(DB_FILE));
    }
}
