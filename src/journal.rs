//! Durable append-only event journal.
//!
//! Every connection lifecycle marker, received line, and sent line is
//! committed to a SQLite database before it becomes visible to the attached
//! processor. All writes and the attach-replay go through a single journal
//! task, which gives two guarantees by construction: sequences within a
//! connection never invert, and a subscriber sees an event only after its
//! insert succeeded. Durability comes from WAL mode with
//! `synchronous=NORMAL` (batched fsync at checkpoints).

use crate::event::{Event, EventKind};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Journal errors.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Marker line sent on the control stream when the attach-time replay is
/// complete and live events follow.
pub const CAUGHT_UP_LINE: &[u8] = b"caughtup";

const REPLAY_PAGE_SIZE: i64 = 4096;

/// Handle to the SQLite event store.
pub struct Journal {
    pool: SqlitePool,
}

impl Journal {
    /// Open (or create) the journal database.
    pub async fn open(path: &Path) -> Result<Self, JournalError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (\n\
                 connection_id INTEGER NOT NULL,\n\
                 sequence      INTEGER NOT NULL,\n\
                 timestamp     INTEGER NOT NULL,\n\
                 kind          INTEGER NOT NULL,\n\
                 line          BLOB    NOT NULL,\n\
                 PRIMARY KEY (connection_id, sequence))",
        )
        .execute(&pool)
        .await?;
        info!(path = %path.display(), "Journal open");
        Ok(Journal { pool })
    }

    /// Highest connection id ever journaled, if any. The connection manager
    /// starts numbering above this so ids stay unique across runs.
    pub async fn max_connection_id(&self) -> Result<Option<u64>, JournalError> {
        let row = sqlx::query("SELECT MAX(connection_id) AS max_id FROM events")
            .fetch_one(&self.pool)
            .await?;
        let max: Option<i64> = row.get("max_id");
        Ok(max.map(|v| v as u64))
    }

    async fn append(&self, event: &Event) -> Result<(), JournalError> {
        sqlx::query(
            "INSERT INTO events (connection_id, sequence, timestamp, kind, line)\n\
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.connection_id as i64)
        .bind(event.sequence as i64)
        .bind(event.timestamp)
        .bind(event.kind.code())
        .bind(event.line.as_slice())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One page of events in insertion order, starting after `after_rowid`.
    /// Returns `(rowid, event)` pairs; an empty page means replay is done.
    async fn replay_page(&self, after_rowid: i64) -> Result<Vec<(i64, Event)>, JournalError> {
        let rows = sqlx::query(
            "SELECT rowid, connection_id, sequence, timestamp, kind, line\n\
             FROM events WHERE rowid > ? ORDER BY rowid LIMIT ?",
        )
        .bind(after_rowid)
        .bind(REPLAY_PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            let rowid: i64 = row.get("rowid");
            let kind_code: i64 = row.get("kind");
            let kind = match EventKind::from_code(kind_code) {
                Some(kind) => kind,
                None => {
                    warn!(rowid, kind_code, "Skipping journal row with unknown kind");
                    continue;
                }
            };
            page.push((
                rowid,
                Event {
                    connection_id: row.get::<i64, _>("connection_id") as u64,
                    sequence: row.get::<i64, _>("sequence") as u64,
                    timestamp: row.get("timestamp"),
                    kind,
                    line: row.get("line"),
                },
            ));
        }
        Ok(page)
    }
}

/// Requests handled by the journal task.
pub enum JournalRequest {
    /// Commit one event, then forward it to the subscriber.
    Append {
        /// Connection the event belongs to.
        connection_id: u64,
        /// Event category.
        kind: EventKind,
        /// Unix milliseconds when the event occurred.
        timestamp: i64,
        /// Raw line content.
        line: Vec<u8>,
    },
    /// Replay every committed event into `stream`, emit the caught-up
    /// marker, then keep `stream` as the live subscriber.
    Attach {
        /// Sink for framed event lines.
        stream: mpsc::UnboundedSender<Vec<u8>>,
    },
    /// Drop the current subscriber.
    Detach,
}

/// Cloneable sender side of the journal task.
#[derive(Clone)]
pub struct JournalWriter {
    tx: mpsc::UnboundedSender<JournalRequest>,
}

impl JournalWriter {
    /// Journal one event for `connection_id`, timestamped now.
    pub fn append(&self, connection_id: u64, kind: EventKind, line: Vec<u8>) {
        let _ = self.tx.send(JournalRequest::Append {
            connection_id,
            kind,
            timestamp: crate::event::now_ms(),
            line,
        });
    }

    /// Attach a subscriber (replay-then-stream).
    pub fn attach(&self, stream: mpsc::UnboundedSender<Vec<u8>>) {
        let _ = self.tx.send(JournalRequest::Attach { stream });
    }

    /// Detach the current subscriber.
    pub fn detach(&self) {
        let _ = self.tx.send(JournalRequest::Detach);
    }
}

/// Spawn the journal task. `failure_tx` receives the connection id whenever
/// an append fails, so the manager can force that connection closed.
pub fn spawn_journal_task(
    journal: Journal,
    failure_tx: mpsc::UnboundedSender<u64>,
) -> JournalWriter {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_journal_task(journal, rx, failure_tx));
    JournalWriter { tx }
}

async fn run_journal_task(
    journal: Journal,
    mut rx: mpsc::UnboundedReceiver<JournalRequest>,
    failure_tx: mpsc::UnboundedSender<u64>,
) {
    let mut next_sequence: HashMap<u64, u64> = HashMap::new();
    let mut subscriber: Option<mpsc::UnboundedSender<Vec<u8>>> = None;

    while let Some(request) = rx.recv().await {
        match request {
            JournalRequest::Append {
                connection_id,
                kind,
                timestamp,
                line,
            } => {
                let sequence = next_sequence.entry(connection_id).or_insert(0);
                let event = Event {
                    connection_id,
                    sequence: *sequence,
                    timestamp,
                    kind,
                    line,
                };
                match journal.append(&event).await {
                    Ok(()) => {
                        *sequence += 1;
                        if let Some(stream) = &subscriber {
                            if stream.send(event.to_stream_line()).is_err() {
                                debug!("Subscriber gone, dropping live stream");
                                subscriber = None;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(connection_id, error = %e, "Journal append failed");
                        let _ = failure_tx.send(connection_id);
                    }
                }
            }

            JournalRequest::Attach { stream } => {
                match replay_into(&journal, &stream).await {
                    Ok(count) => {
                        info!(events = count, "Journal replay complete");
                        if stream.send(CAUGHT_UP_LINE.to_vec()).is_ok() {
                            subscriber = Some(stream);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Journal replay failed");
                        // The subscriber socket closes; the processor retries
                        // or exits. No subscriber is installed.
                    }
                }
            }

            JournalRequest::Detach => {
                subscriber = None;
            }
        }
    }
}

async fn replay_into(
    journal: &Journal,
    stream: &mpsc::UnboundedSender<Vec<u8>>,
) -> Result<u64, JournalError> {
    let mut after_rowid = 0;
    let mut count = 0u64;
    loop {
        let page = journal.replay_page(after_rowid).await?;
        if page.is_empty() {
            return Ok(count);
        }
        for (rowid, event) in page {
            after_rowid = rowid;
            count += 1;
            if stream.send(event.to_stream_line()).is_err() {
                // Receiver hung up mid-replay; nothing left to do.
                return Ok(count);
            }
        }
    }
}
