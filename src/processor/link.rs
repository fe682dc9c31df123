//! The processor's side of the connector control channel.
//!
//! Connects to the loopback control port, authenticates, attaches, then
//! feeds every streamed event into the processor: replay mode until the
//! caught-up marker, realtime after. Outbound commands from the processor
//! are serialized through a writer task that owns the socket's write half.

use crate::event::Event;
use crate::journal::CAUGHT_UP_LINE;
use crate::processor::Processor;
use futures_util::StreamExt;
use mamirc_proto::framing::LineReader;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{info, warn};

const CONTROL_MAX_LINE: usize = 4096;

/// Link failures. Any of these ends the processor: the connector is the
/// source of truth and running without it would silently diverge.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("control channel closed by connector (bad password, second attach, or shutdown)")]
    ConnectionLost,
}

/// Attach to the connector and pump events until the link drops.
pub async fn run_link(
    port: u16,
    password: &str,
    processor: Arc<Processor>,
) -> Result<(), LinkError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let stream = TcpStream::connect(addr).await?;
    info!(%addr, "Connected to connector control port");
    let (read_half, write_half) = stream.into_split();

    let (link_tx, link_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(write_loop(write_half, link_rx));

    let _ = link_tx.send(password.as_bytes().to_vec());
    let _ = link_tx.send(b"attach".to_vec());
    processor.set_link(link_tx);

    let mut lines = FramedRead::new(read_half, LineReader::with_max_len(CONTROL_MAX_LINE));
    let mut realtime = false;
    let mut replayed = 0u64;
    while let Some(result) = lines.next().await {
        let line = result?;
        if line.is_empty() {
            continue;
        }
        if !realtime && line == CAUGHT_UP_LINE {
            info!(events = replayed, "Replay complete, switching to realtime");
            processor.finish_catchup();
            realtime = true;
            continue;
        }
        match Event::from_stream_line(&line) {
            Ok(event) => {
                if !realtime {
                    replayed += 1;
                }
                processor.process_event(&event, realtime);
            }
            Err(e) => {
                warn!(error = %e, line = %String::from_utf8_lossy(&line),
                    "Ignoring malformed event line");
            }
        }
    }

    writer.abort();
    Err(LinkError::ConnectionLost)
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(mut line) = rx.recv().await {
        line.extend_from_slice(b"\r\n");
        if write_half.write_all(&line).await.is_err() {
            break;
        }
        if write_half.flush().await.is_err() {
            break;
        }
    }
}
