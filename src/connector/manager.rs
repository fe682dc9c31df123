//! Connection manager: the single owner of the outbound connection map.
//!
//! All control-port commands, journal failures, and connection lifecycle
//! notifications funnel into one task, so connection ids are assigned and
//! retired in a total order and the `connect`/`disconnect` lifecycle lines
//! are journaled before the socket work they describe.

use crate::event::EventKind;
use crate::journal::JournalWriter;
use crate::connector::outbound::{self, ConnectParams};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

/// Capacity of each connection's outbound write queue. A full queue drops
/// the line; IRC traffic that outruns this is already past the server's
/// flood limit.
const WRITER_QUEUE_LEN: usize = 1024;

/// How long termination waits for connections to journal their `closed`
/// lines before giving up.
const TERMINATE_DRAIN: Duration = Duration::from_secs(2);

/// A parsed control-port command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open a new IRC server connection.
    Connect {
        /// Server host name.
        hostname: String,
        /// Server port.
        port: u16,
        /// Wrap in TLS.
        ssl: bool,
        /// Profile name, echoed in the journaled lifecycle line.
        profile: String,
    },
    /// Close an existing connection gracefully.
    Disconnect {
        /// Target connection.
        connection_id: u64,
    },
    /// Queue one raw line for an existing connection.
    Send {
        /// Target connection.
        connection_id: u64,
        /// Opaque payload bytes, written verbatim plus CR+LF.
        payload: Vec<u8>,
    },
    /// Shut the whole connector down.
    Terminate,
}

pub(crate) enum ManagerRequest {
    Command(Command),
    ListConnections {
        reply: oneshot::Sender<Vec<(u64, String)>>,
    },
    TryAttach {
        stream: mpsc::UnboundedSender<Vec<u8>>,
        reply: oneshot::Sender<bool>,
    },
    Detach,
    ConnectionClosed {
        connection_id: u64,
    },
}

/// Cloneable handle to the manager task.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerRequest>,
}

impl ManagerHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ManagerRequest>) -> Self {
        ManagerHandle { tx }
    }

    /// Submit a control command.
    pub fn command(&self, command: Command) {
        let _ = self.tx.send(ManagerRequest::Command(command));
    }

    /// Snapshot of live connections as `(id, profile)` pairs.
    pub async fn list_connections(&self) -> Vec<(u64, String)> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerRequest::ListConnections { reply });
        rx.await.unwrap_or_default()
    }

    /// Try to become the attached processor. Returns false when another
    /// processor already holds the attachment.
    pub async fn try_attach(&self, stream: mpsc::UnboundedSender<Vec<u8>>) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerRequest::TryAttach { stream, reply });
        rx.await.unwrap_or(false)
    }

    /// Release the attachment.
    pub fn detach(&self) {
        let _ = self.tx.send(ManagerRequest::Detach);
    }

    pub(crate) fn connection_closed(&self, connection_id: u64) {
        let _ = self
            .tx
            .send(ManagerRequest::ConnectionClosed { connection_id });
    }
}

struct ConnectionEntry {
    profile: String,
    writer_tx: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

pub(crate) async fn run_manager(
    mut rx: mpsc::UnboundedReceiver<ManagerRequest>,
    journal: JournalWriter,
    mut journal_failures: mpsc::UnboundedReceiver<u64>,
    first_connection_id: u64,
    handle: ManagerHandle,
    terminate_tx: oneshot::Sender<()>,
) {
    let mut next_connection_id = first_connection_id;
    let mut connections: HashMap<u64, ConnectionEntry> = HashMap::new();
    let mut attached = false;

    loop {
        let request = tokio::select! {
            request = rx.recv() => match request {
                Some(request) => request,
                None => return,
            },
            Some(connection_id) = journal_failures.recv() => {
                // Journal I/O failure is fatal for the affected connection.
                warn!(connection_id, "Forcing connection closed after journal failure");
                if let Some(entry) = connections.get(&connection_id) {
                    let _ = entry.shutdown.send(true);
                }
                continue;
            }
        };

        match request {
            ManagerRequest::Command(Command::Connect {
                hostname,
                port,
                ssl,
                profile,
            }) => {
                let connection_id = next_connection_id;
                next_connection_id += 1;
                info!(connection_id, %hostname, port, ssl, %profile, "Opening connection");

                journal.append(
                    connection_id,
                    EventKind::Connection,
                    format!("connect {hostname} {port} {ssl} {profile}").into_bytes(),
                );

                let (writer_tx, writer_rx) = mpsc::channel(WRITER_QUEUE_LEN);
                let (shutdown, shutdown_rx) = watch::channel(false);
                tokio::spawn(outbound::run_connection(
                    ConnectParams {
                        connection_id,
                        hostname,
                        port,
                        ssl,
                    },
                    journal.clone(),
                    handle.clone(),
                    writer_rx,
                    shutdown_rx,
                ));
                connections.insert(
                    connection_id,
                    ConnectionEntry {
                        profile,
                        writer_tx,
                        shutdown,
                    },
                );
            }

            ManagerRequest::Command(Command::Disconnect { connection_id }) => {
                match connections.get(&connection_id) {
                    Some(entry) => {
                        journal.append(
                            connection_id,
                            EventKind::Connection,
                            b"disconnect".to_vec(),
                        );
                        let _ = entry.shutdown.send(true);
                    }
                    None => warn!(connection_id, "Disconnect for unknown connection"),
                }
            }

            ManagerRequest::Command(Command::Send {
                connection_id,
                payload,
            }) => match connections.get(&connection_id) {
                Some(entry) => {
                    if entry.writer_tx.try_send(payload).is_err() {
                        warn!(connection_id, "Write queue full or closed, dropping line");
                    }
                }
                None => warn!(connection_id, "Send for unknown connection"),
            },

            ManagerRequest::Command(Command::Terminate) => {
                info!("Terminating connector");
                for entry in connections.values() {
                    let _ = entry.shutdown.send(true);
                }
                drain_closed(&mut rx, &mut connections).await;
                let _ = terminate_tx.send(());
                return;
            }

            ManagerRequest::ListConnections { reply } => {
                let list = connections
                    .iter()
                    .map(|(&id, entry)| (id, entry.profile.clone()))
                    .collect();
                let _ = reply.send(list);
            }

            ManagerRequest::TryAttach { stream, reply } => {
                if attached {
                    warn!("Rejecting attach: a processor is already attached");
                    let _ = reply.send(false);
                } else {
                    attached = true;
                    journal.attach(stream);
                    let _ = reply.send(true);
                }
            }

            ManagerRequest::Detach => {
                attached = false;
                journal.detach();
            }

            ManagerRequest::ConnectionClosed { connection_id } => {
                connections.remove(&connection_id);
            }
        }
    }
}

/// Wait for outstanding connections to report closed, bounded by
/// [`TERMINATE_DRAIN`].
async fn drain_closed(
    rx: &mut mpsc::UnboundedReceiver<ManagerRequest>,
    connections: &mut HashMap<u64, ConnectionEntry>,
) {
    let deadline = tokio::time::Instant::now() + TERMINATE_DRAIN;
    while !connections.is_empty() {
        let request = tokio::select! {
            request = rx.recv() => request,
            _ = tokio::time::sleep_until(deadline) => None,
        };
        match request {
            Some(ManagerRequest::ConnectionClosed { connection_id }) => {
                connections.remove(&connection_id);
            }
            Some(_) => {}
            None => break,
        }
    }
}
