//! Outbound IRC connections: dialing, reading, and writing.
//!
//! Each connection runs as a small task tree: the parent dials (TCP, then
//! optionally TLS), journals `opened`, and supervises a reader task and a
//! writer task over the split halves. Whichever way the connection ends —
//! server EOF, socket error, or a shutdown signal from the manager — the
//! parent journals exactly one `closed` line and reports back.

use crate::connector::manager::ManagerHandle;
use crate::event::EventKind;
use crate::journal::JournalWriter;
use futures_util::StreamExt;
use mamirc_proto::framing::{LineReader, DEFAULT_MAX_LINE_LEN};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Maximum bytes per outbound IRC line, excluding CR+LF.
const MAX_SEND_LINE: usize = 1000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for one outbound dial.
pub(crate) struct ConnectParams {
    pub connection_id: u64,
    pub hostname: String,
    pub port: u16,
    pub ssl: bool,
}

enum IrcStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl IrcStream {
    fn split(
        self,
    ) -> (
        ReadHalf<Box<dyn AsyncRw + Send>>,
        WriteHalf<Box<dyn AsyncRw + Send>>,
    ) {
        let boxed: Box<dyn AsyncRw + Send> = match self {
            IrcStream::Plain(stream) => Box::new(stream),
            IrcStream::Tls(stream) => stream,
        };
        tokio::io::split(boxed)
    }
}

trait AsyncRw: AsyncRead + AsyncWrite + Unpin {}
impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRw for T {}

fn tls_connector() -> TlsConnector {
    let roots =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn dial(params: &ConnectParams) -> io::Result<(String, IrcStream)> {
    let tcp = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((params.hostname.as_str(), params.port)),
    )
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    let remote_ip = tcp.peer_addr()?.ip().to_string();

    if !params.ssl {
        return Ok((remote_ip, IrcStream::Plain(tcp)));
    }

    let server_name = rustls::pki_types::ServerName::try_from(params.hostname.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let tls = tls_connector().connect(server_name, tcp).await?;
    Ok((remote_ip, IrcStream::Tls(Box::new(tls))))
}

/// Run one outbound connection to completion.
pub(crate) async fn run_connection(
    params: ConnectParams,
    journal: JournalWriter,
    manager: ManagerHandle,
    writer_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let connection_id = params.connection_id;

    let stream = tokio::select! {
        result = dial(&params) => result,
        _ = shutdown_rx.changed() => Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown")),
    };
    let (remote_ip, stream) = match stream {
        Ok(open) => open,
        Err(e) => {
            warn!(connection_id, hostname = %params.hostname, error = %e, "Connect failed");
            journal.append(connection_id, EventKind::Connection, b"closed".to_vec());
            manager.connection_closed(connection_id);
            return;
        }
    };

    info!(connection_id, %remote_ip, "Connection opened");
    journal.append(
        connection_id,
        EventKind::Connection,
        format!("opened {remote_ip}").into_bytes(),
    );

    let (read_half, write_half) = stream.split();
    let mut reader = tokio::spawn(read_loop(connection_id, read_half, journal.clone()));
    let writer = tokio::spawn(write_loop(
        connection_id,
        write_half,
        writer_rx,
        journal.clone(),
    ));

    tokio::select! {
        _ = &mut reader => {}
        _ = shutdown_rx.changed() => {}
    }
    reader.abort();
    writer.abort();

    info!(connection_id, "Connection closed");
    journal.append(connection_id, EventKind::Connection, b"closed".to_vec());
    manager.connection_closed(connection_id);
}

/// Read server lines and journal each verbatim. Overlong lines were already
/// dropped by the codec; framing tolerates CR, LF, and CR+LF.
async fn read_loop(
    connection_id: u64,
    read_half: ReadHalf<Box<dyn AsyncRw + Send>>,
    journal: JournalWriter,
) {
    let mut lines = FramedRead::new(read_half, LineReader::with_max_len(DEFAULT_MAX_LINE_LEN));
    while let Some(result) = lines.next().await {
        match result {
            Ok(line) => journal.append(connection_id, EventKind::Receive, line),
            Err(e) => {
                debug!(connection_id, error = %e, "Read error");
                break;
            }
        }
    }
}

/// Drain the write queue: append CR+LF, write, then journal the SEND event
/// for each line actually written.
async fn write_loop(
    connection_id: u64,
    mut write_half: WriteHalf<Box<dyn AsyncRw + Send>>,
    mut writer_rx: mpsc::Receiver<Vec<u8>>,
    journal: JournalWriter,
) {
    while let Some(line) = writer_rx.recv().await {
        if line.len() > MAX_SEND_LINE {
            warn!(connection_id, len = line.len(), "Dropping overlong outbound line");
            continue;
        }
        let mut framed = line.clone();
        framed.extend_from_slice(b"\r\n");
        if let Err(e) = write_half.write_all(&framed).await {
            debug!(connection_id, error = %e, "Write error");
            break;
        }
        if let Err(e) = write_half.flush().await {
            debug!(connection_id, error = %e, "Flush error");
            break;
        }
        journal.append(connection_id, EventKind::Send, line);
    }
}
