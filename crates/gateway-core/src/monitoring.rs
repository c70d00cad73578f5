//! Rolling rate/error windows plus message-log persistence (C10).
//!
//! Grounded in `forwarder::storage::journal::Journal::open`'s
//! pragma/integrity-check/schema sequence for the SQLite sink, and in the
//! Design Note's requirement that DB writes never block the routing
//! critical path: writes are handed to a single dedicated background
//! thread (via `tokio::task::spawn_blocking` hosting a blocking-recv loop
//! over an `mpsc` channel) rather than a bare `tokio::spawn` fire-and-forget
//! task — `MonitoringService::shutdown` drains it with a bounded timeout,
//! directly addressing spec.md §9's first Open Question.
//!
//! Error-rate windowing resolves the second Open Question as spec.md §9
//! recommends: a `partial_success` outcome counts as neither a success nor
//! a failure in the 60-second recent window; only the per-minute ring
//! differentiates all three outcomes (plus `no_target`). See DESIGN.md.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gateway_protocol::{Envelope, MessageLog, ProcessingStatus};
use rusqlite::{params, Connection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::forwarder_manager::TargetForwardResult;

const RECENT_WINDOW: Duration = Duration::from_secs(60);
const MINUTE_SLOTS: usize = 1440;
const INDEX_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeMetrics {
    pub messages_per_second: f64,
    pub error_rate: f64,
    pub received_in_window: u64,
    pub failed_in_window: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinuteMetrics {
    pub epoch_minute: i64,
    pub received: u64,
    pub success: u64,
    pub failed: u64,
    pub partial: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct MinuteBucket {
    epoch_minute: Option<i64>,
    received: u64,
    success: u64,
    failed: u64,
    partial: u64,
}

struct IndexEntry {
    log: MessageLog,
    recorded_at: Instant,
}

struct State {
    arrivals: VecDeque<Instant>,
    failures: VecDeque<Instant>,
    minute_ring: Vec<MinuteBucket>,
    message_index: HashMap<Uuid, IndexEntry>,
}

impl State {
    fn new() -> Self {
        State { arrivals: VecDeque::new(), failures: VecDeque::new(), minute_ring: vec![MinuteBucket::default(); MINUTE_SLOTS], message_index: HashMap::new() }
    }

    fn prune_recent(&mut self, now: Instant) {
        while self.arrivals.front().is_some_and(|t| now.duration_since(*t) > RECENT_WINDOW) {
            self.arrivals.pop_front();
        }
        while self.failures.front().is_some_and(|t| now.duration_since(*t) > RECENT_WINDOW) {
            self.failures.pop_front();
        }
    }

    fn minute_bucket_mut(&mut self, epoch_minute: i64) -> &mut MinuteBucket {
        let idx = (epoch_minute.rem_euclid(MINUTE_SLOTS as i64)) as usize;
        let bucket = &mut self.minute_ring[idx];
        if bucket.epoch_minute != Some(epoch_minute) {
            *bucket = MinuteBucket { epoch_minute: Some(epoch_minute), ..Default::default() };
        }
        bucket
    }

    fn gc_index(&mut self, now: Instant) {
        self.message_index.retain(|_, entry| now.duration_since(entry.recorded_at) <= INDEX_TTL);
    }
}

enum DbJob {
    Upsert(MessageLog),
    Shutdown,
}

/// Owns the rolling-window counters and dispatches message-log writes to a
/// single background SQLite writer thread.
pub struct MonitoringService {
    state: Mutex<State>,
    db_tx: Option<mpsc::Sender<DbJob>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MonitoringService {
    /// `db_path: None` runs metrics-only, with persistence disabled (used
    /// in unit tests that don't need a SQLite sink).
    pub fn new(db_path: Option<PathBuf>) -> Self {
        let (db_tx, writer_handle) = match db_path {
            Some(path) => {
                let (tx, rx) = mpsc::channel(256);
                let handle = tokio::task::spawn_blocking(move || run_writer(path, rx));
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };
        MonitoringService { state: Mutex::new(State::new()), db_tx, writer_handle: Mutex::new(writer_handle) }
    }

    /// Record a routing decision: one row per envelope, status
    /// `awaiting_forward` (has targets) or `no_target` (none).
    pub fn record_routing_decision(&self, envelope: &Envelope, matched_rules: &[String], target_system_ids: &[String]) {
        let now = Instant::now();
        let status = if target_system_ids.is_empty() { ProcessingStatus::NoTarget } else { ProcessingStatus::AwaitingForward };
        let log = MessageLog {
            id: Uuid::new_v4(),
            timestamp: envelope.timestamp,
            message_id: envelope.message_id,
            source_protocol: envelope.source_protocol,
            source_id: envelope.data_source_id.clone(),
            source_address: envelope.source_address.clone(),
            raw_size: envelope.raw_data.len(),
            parsed_data: envelope.parsed_data.clone(),
            processing_status: status,
            matched_rules: matched_rules.to_vec(),
            target_systems: target_system_ids.to_vec(),
            error_message: None,
        };

        {
            let mut state = self.state.lock().expect("monitoring state lock poisoned");
            state.prune_recent(now);
            state.arrivals.push_back(now);
            let epoch_minute = envelope.timestamp.timestamp() / 60;
            let bucket = state.minute_bucket_mut(epoch_minute);
            bucket.received += 1;
            if status == ProcessingStatus::NoTarget {
                // not a failure, not a success; no per-minute outcome bucket to bump
            }
            state.gc_index(now);
            state.message_index.insert(envelope.message_id, IndexEntry { log: log.clone(), recorded_at: now });
        }

        self.dispatch_write(log);
    }

    /// Update the indexed row with the final outcome once forwarding
    /// completes for every target.
    pub fn record_forward_results(&self, envelope: &Envelope, results: &[TargetForwardResult]) {
        let now = Instant::now();
        let (status, error_message) = aggregate_status(results);

        let mut log = {
            let mut state = self.state.lock().expect("monitoring state lock poisoned");
            state.prune_recent(now);

            let is_failed = status == ProcessingStatus::Failed;
            if is_failed {
                state.failures.push_back(now);
            }

            let epoch_minute = envelope.timestamp.timestamp() / 60;
            let bucket = state.minute_bucket_mut(epoch_minute);
            match status {
                ProcessingStatus::Success => bucket.success += 1,
                ProcessingStatus::Failed => bucket.failed += 1,
                ProcessingStatus::PartialSuccess => bucket.partial += 1,
                ProcessingStatus::NoTarget | ProcessingStatus::AwaitingForward => {}
            }

            match state.message_index.get(&envelope.message_id) {
                Some(entry) => entry.log.clone(),
                None => MessageLog {
                    id: Uuid::new_v4(),
                    timestamp: envelope.timestamp,
                    message_id: envelope.message_id,
                    source_protocol: envelope.source_protocol,
                    source_id: envelope.data_source_id.clone(),
                    source_address: envelope.source_address.clone(),
                    raw_size: envelope.raw_data.len(),
                    parsed_data: envelope.parsed_data.clone(),
                    processing_status: status,
                    matched_rules: vec![],
                    target_systems: results.iter().map(|r| r.target_id.clone()).collect(),
                    error_message: error_message.clone(),
                },
            }
        };

        log.processing_status = status;
        log.target_systems = results.iter().map(|r| r.target_id.clone()).collect();
        log.error_message = error_message;

        {
            let mut state = self.state.lock().expect("monitoring state lock poisoned");
            if let Some(entry) = state.message_index.get_mut(&envelope.message_id) {
                entry.log = log.clone();
            }
        }

        self.dispatch_write(log);
    }

    fn dispatch_write(&self, log: MessageLog) {
        if let Some(tx) = &self.db_tx {
            if tx.try_send(DbJob::Upsert(log)).is_err() {
                warn!("monitoring db writer channel full or closed; dropping message-log write");
            }
        }
    }

    /// Point-in-time rolling metrics over the last 60 seconds.
    pub fn get_runtime_metrics(&self) -> RuntimeMetrics {
        let now = Instant::now();
        let mut state = self.state.lock().expect("monitoring state lock poisoned");
        state.prune_recent(now);
        let received = state.arrivals.len() as u64;
        let failed = state.failures.len() as u64;
        RuntimeMetrics {
            messages_per_second: received as f64 / RECENT_WINDOW.as_secs_f64(),
            error_rate: if received == 0 { 0.0 } else { failed as f64 / received as f64 },
            received_in_window: received,
            failed_in_window: failed,
        }
    }

    /// The last `minutes` per-minute slots, oldest first, for slots that
    /// have been written at least once.
    pub fn get_metrics_history(&self, minutes: usize) -> Vec<MinuteMetrics> {
        let state = self.state.lock().expect("monitoring state lock poisoned");
        let mut entries: Vec<MinuteMetrics> = state
            .minute_ring
            .iter()
            .filter_map(|b| b.epoch_minute.map(|m| MinuteMetrics { epoch_minute: m, received: b.received, success: b.success, failed: b.failed, partial: b.partial }))
            .collect();
        entries.sort_by_key(|m| m.epoch_minute);
        let len = entries.len();
        entries.split_off(len.saturating_sub(minutes))
    }

    /// Signal the background writer to drain its queue and exit, waiting
    /// up to `drain_timeout` before giving up — a tracked shutdown, not a
    /// detached fire-and-forget task.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        if let Some(tx) = &self.db_tx {
            let _ = tx.send(DbJob::Shutdown).await;
        }
        let handle = self.writer_handle.lock().expect("writer handle lock poisoned").take();
        if let Some(handle) = handle {
            if tokio::time::timeout(drain_timeout, handle).await.is_err() {
                warn!("monitoring db writer did not drain within the timeout");
            }
        }
    }
}

fn aggregate_status(results: &[TargetForwardResult]) -> (ProcessingStatus, Option<String>) {
    if results.is_empty() {
        return (ProcessingStatus::NoTarget, None);
    }
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.result.status == gateway_forwarders::ForwardStatus::Success).count();
    let errors: Vec<String> = results.iter().filter_map(|r| r.result.error.as_ref().map(|e| format!("{}: {e}", r.target_id))).collect();

    let status = if succeeded == total {
        ProcessingStatus::Success
    } else if succeeded == 0 {
        ProcessingStatus::Failed
    } else {
        ProcessingStatus::PartialSuccess
    };
    let error_message = if errors.is_empty() { None } else { Some(errors.join("; ")) };
    (status, error_message)
}

fn run_writer(path: PathBuf, mut rx: mpsc::Receiver<DbJob>) {
    let conn = match open_db(&path) {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "monitoring db writer failed to open database; all writes will be dropped");
            while rx.blocking_recv().is_some_and(|job| !matches!(job, DbJob::Shutdown)) {}
            return;
        }
    };

    while let Some(job) = rx.blocking_recv() {
        match job {
            DbJob::Upsert(log) => {
                if let Err(e) = upsert_log(&conn, &log) {
                    error!(error = %e, message_id = %log.message_id, "failed to persist message log row");
                }
            }
            DbJob::Shutdown => break,
        }
    }
}

fn open_db(path: &PathBuf) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    let integrity: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if integrity != "ok" {
        warn!(result = %integrity, "message log database failed integrity_check");
    }
    Ok(conn)
}

fn partition_table_name(timestamp: DateTime<Utc>) -> String {
    format!("message_logs_{}", timestamp.format("%Y_%m"))
}

fn ensure_partition(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            message_id TEXT NOT NULL,
            source_protocol TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_address TEXT,
            raw_size INTEGER NOT NULL,
            parsed_data TEXT,
            processing_status TEXT NOT NULL,
            matched_rules TEXT NOT NULL,
            target_systems TEXT NOT NULL,
            error_message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_message_id ON {table}(message_id);"
    ))
}

fn upsert_log(conn: &Connection, log: &MessageLog) -> rusqlite::Result<()> {
    let table = partition_table_name(log.timestamp);
    ensure_partition(conn, &table)?;
    let parsed_data_json = log.parsed_data.as_ref().map(|v| serde_json::to_string(&v.to_json()).unwrap_or_default());
    let matched_rules_json = serde_json::to_string(&log.matched_rules).unwrap_or_default();
    let target_systems_json = serde_json::to_string(&log.target_systems).unwrap_or_default();
    conn.execute(
        &format!(
            "INSERT INTO {table}
                (id, timestamp, message_id, source_protocol, source_id, source_address, raw_size, parsed_data, processing_status, matched_rules, target_systems, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                processing_status = excluded.processing_status,
                matched_rules = excluded.matched_rules,
                target_systems = excluded.target_systems,
                error_message = excluded.error_message"
        ),
        params![
            log.id.to_string(),
            log.timestamp.to_rfc3339(),
            log.message_id.to_string(),
            log.source_protocol.to_string(),
            log.source_id,
            log.source_address,
            log.raw_size as i64,
            parsed_data_json,
            log.processing_status.as_str(),
            matched_rules_json,
            target_systems_json,
            log.error_message,
        ],
    )?;
    Ok(())
}
