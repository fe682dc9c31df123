//! Control port: the processor-facing side of the connector.
//!
//! Loopback-only listener. A client must send the password line first
//! (checked in constant time), then either `list-connections` for a
//! one-shot snapshot or `attach` to become the single driving processor.
//! Command parsing is deliberately strict: single space separators, no
//! trailing whitespace, no NUL bytes; anything else is logged and ignored.

use crate::connector::manager::{Command, ManagerHandle};
use futures_util::StreamExt;
use mamirc_proto::framing::LineReader;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Window for the password and action lines to arrive.
const AUTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Control lines are a `send` payload (≤1000 bytes) plus a short prefix.
const CONTROL_MAX_LINE: usize = 4096;

/// Errors from strict control-line parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    /// NUL bytes are forbidden on the control channel.
    #[error("control line contains NUL byte")]
    NulByte,
    /// The line did not match any known command shape exactly.
    #[error("unknown or malformed control line")]
    Malformed,
}

/// Parse one processor command line. Formats, parsed as strictly as
/// possible (case-sensitive, no double or trailing spaces):
///
/// - `connect <hostname> <port> <true|false> <profile>` — profile is the
///   final field and may contain spaces
/// - `disconnect <connection-id>`
/// - `send <connection-id> <payload>` — everything after the second space
///   is opaque payload bytes
/// - `terminate`
pub fn parse_command(line: &[u8]) -> Result<Command, CommandParseError> {
    if line.contains(&0) {
        return Err(CommandParseError::NulByte);
    }

    if line == b"terminate" {
        return Ok(Command::Terminate);
    }

    if let Some(rest) = line.strip_prefix(b"send ") {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or(CommandParseError::Malformed)?;
        let connection_id = parse_field(&rest[..space])?;
        return Ok(Command::Send {
            connection_id,
            payload: rest[space + 1..].to_vec(),
        });
    }

    // The remaining forms are pure UTF-8.
    let text = std::str::from_utf8(line).map_err(|_| CommandParseError::Malformed)?;

    if let Some(rest) = text.strip_prefix("disconnect ") {
        let connection_id = parse_field(rest.as_bytes())?;
        return Ok(Command::Disconnect { connection_id });
    }

    if let Some(rest) = text.strip_prefix("connect ") {
        let mut parts = rest.splitn(4, ' ');
        let hostname = parts.next().ok_or(CommandParseError::Malformed)?;
        let port = parts.next().ok_or(CommandParseError::Malformed)?;
        let ssl = parts.next().ok_or(CommandParseError::Malformed)?;
        let profile = parts.next().ok_or(CommandParseError::Malformed)?;
        if hostname.is_empty() || profile.is_empty() {
            return Err(CommandParseError::Malformed);
        }
        let port: u16 = parse_number(port)?;
        let ssl = match ssl {
            "true" => true,
            "false" => false,
            _ => return Err(CommandParseError::Malformed),
        };
        return Ok(Command::Connect {
            hostname: hostname.to_string(),
            port,
            ssl,
            profile: profile.to_string(),
        });
    }

    Err(CommandParseError::Malformed)
}

fn parse_field<T: std::str::FromStr>(field: &[u8]) -> Result<T, CommandParseError> {
    let text = std::str::from_utf8(field).map_err(|_| CommandParseError::Malformed)?;
    parse_number(text)
}

// Digits only: rejects signs, leading '+', and embedded whitespace that
// str::parse for unsigned types would otherwise let slip on some shapes.
fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, CommandParseError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommandParseError::Malformed);
    }
    text.parse().map_err(|_| CommandParseError::Malformed)
}

/// Accept control clients forever.
pub(crate) async fn run_control_port(
    port: u16,
    password: String,
    manager: ManagerHandle,
) -> io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Control port listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "Control connection accepted");
        let password = password.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            handle_client(stream, password, manager).await;
            debug!(%peer, "Control connection done");
        });
    }
}

async fn handle_client(stream: TcpStream, password: String, manager: ManagerHandle) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LineReader::with_max_len(CONTROL_MAX_LINE));

    // Password, then action, both within the authentication window. The
    // socket just drops on failure; nothing is leaked to the client.
    let handshake = timeout(AUTH_TIMEOUT, async {
        let presented = lines.next().await?.ok()?;
        if !bool::from(presented.ct_eq(password.as_bytes())) {
            warn!("Control connection presented wrong password");
            return None;
        }
        let action = lines.next().await?.ok()?;
        String::from_utf8(action).ok()
    })
    .await;

    let action = match handshake {
        Ok(Some(action)) => action,
        Ok(None) => return,
        Err(_) => {
            warn!("Control connection authentication timeout");
            return;
        }
    };

    match action.as_str() {
        "list-connections" => {
            let list = manager.list_connections().await;
            for (id, profile) in list {
                if write_line(&mut write_half, format!("connection {id} {profile}").into_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = write_line(&mut write_half, b"end".to_vec()).await;
        }

        "attach" => {
            let (stream_tx, stream_rx) = mpsc::unbounded_channel();
            if !manager.try_attach(stream_tx).await {
                return;
            }
            info!("Processor attached");

            let writer = tokio::spawn(stream_writer(write_half, stream_rx));
            while let Some(result) = lines.next().await {
                let line = match result {
                    Ok(line) => line,
                    Err(e) => {
                        debug!(error = %e, "Control read error");
                        break;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => manager.command(command),
                    Err(e) => {
                        warn!(error = %e, line = %String::from_utf8_lossy(&line),
                            "Ignoring bad line from processor");
                    }
                }
            }

            info!("Processor detached");
            manager.detach();
            writer.abort();
        }

        other => {
            warn!(action = %other, "Unrecognized control action");
        }
    }
}

/// Forward framed event lines from the journal task onto the socket.
async fn stream_writer(
    mut write_half: OwnedWriteHalf,
    mut stream_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(line) = stream_rx.recv().await {
        if write_line(&mut write_half, line).await.is_err() {
            break;
        }
    }
}

async fn write_line(write_half: &mut OwnedWriteHalf, mut line: Vec<u8>) -> io::Result<()> {
    line.extend_from_slice(b"\r\n");
    write_half.write_all(&line).await?;
    write_half.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect() {
        assert_eq!(
            parse_command(b"connect irc.example.org 6697 true my profile"),
            Ok(Command::Connect {
                hostname: "irc.example.org".into(),
                port: 6697,
                ssl: true,
                profile: "my profile".into(),
            })
        );
    }

    #[test]
    fn connect_is_strict() {
        assert!(parse_command(b"connect host 6667 yes p").is_err());
        assert!(parse_command(b"connect host 66666 true p").is_err());
        assert!(parse_command(b"connect host 6667 true").is_err());
        assert!(parse_command(b"connect  host 6667 true p").is_err());
        assert!(parse_command(b"CONNECT host 6667 true p").is_err());
    }

    #[test]
    fn parses_disconnect() {
        assert_eq!(
            parse_command(b"disconnect 12"),
            Ok(Command::Disconnect { connection_id: 12 })
        );
        assert!(parse_command(b"disconnect 12 ").is_err());
        assert!(parse_command(b"disconnect -3").is_err());
        assert!(parse_command(b"disconnect").is_err());
    }

    #[test]
    fn send_payload_is_opaque() {
        assert_eq!(
            parse_command(b"send 4 PRIVMSG #c :two words \xff"),
            Ok(Command::Send {
                connection_id: 4,
                payload: b"PRIVMSG #c :two words \xff".to_vec(),
            })
        );
        // Empty payload is allowed; the second space terminates the id.
        assert_eq!(
            parse_command(b"send 4 "),
            Ok(Command::Send {
                connection_id: 4,
                payload: Vec::new(),
            })
        );
        assert!(parse_command(b"send 4").is_err());
    }

    #[test]
    fn parses_terminate_exactly() {
        assert_eq!(parse_command(b"terminate"), Ok(Command::Terminate));
        assert!(parse_command(b"terminate ").is_err());
        assert!(parse_command(b"terminate now").is_err());
    }

    #[test]
    fn rejects_nul_bytes() {
        assert_eq!(
            parse_command(b"send 4 abc\0def"),
            Err(CommandParseError::NulByte)
        );
    }
}
