//! The connector: socket ownership, event journaling, and the control port.
//!
//! One manager task owns the connection map and assigns connection ids; one
//! journal task owns the SQLite store and the attached subscriber; each IRC
//! connection gets a reader task and a writer task. The control port accepts
//! at most one attached processor, which drives everything.

mod control;
mod manager;
mod outbound;

pub use control::parse_command;
pub use manager::{Command, ManagerHandle};

use crate::config::ConnectorConfig;
use crate::journal::{spawn_journal_task, Journal};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Run the connector until a `terminate` command arrives or the control
/// port fails fatally.
pub async fn run(config: ConnectorConfig) -> anyhow::Result<()> {
    let journal = Journal::open(&config.journal_file).await?;
    let first_connection_id = journal.max_connection_id().await?.map_or(0, |max| max + 1);

    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    let journal_writer = spawn_journal_task(journal, failure_tx);

    let (manager_tx, manager_rx) = mpsc::unbounded_channel();
    let manager = ManagerHandle::new(manager_tx);
    let (terminate_tx, terminate_rx) = oneshot::channel();
    tokio::spawn(manager::run_manager(
        manager_rx,
        journal_writer,
        failure_rx,
        first_connection_id,
        manager.clone(),
        terminate_tx,
    ));

    tokio::select! {
        result = control::run_control_port(
            config.control_port,
            config.control_password,
            manager,
        ) => {
            result?;
        }
        _ = terminate_rx => {
            info!("Terminate command processed, shutting down");
        }
    }
    Ok(())
}
