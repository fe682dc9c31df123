//! Integration test common infrastructure.
//!
//! Builds processors over fixture profiles and fabricates journal events so
//! tests can drive the whole replay/realtime pipeline without sockets.

#![allow(dead_code)]

use mamirc::config::{Profile, ProfileMap, ServerEndpoint};
use mamirc::event::{Event, EventKind};
use mamirc::processor::Processor;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A connect-enabled profile with one plaintext server.
pub fn profile(nicknames: &[&str], channels: &[&str]) -> Profile {
    Profile {
        connect: true,
        servers: vec![ServerEndpoint {
            hostname: "irc.example.org".into(),
            port: 6667,
            ssl: false,
        }],
        nicknames: nicknames.iter().map(|n| n.to_string()).collect(),
        username: "user".into(),
        realname: "Real Name".into(),
        nickserv_password: None,
        channels: channels.iter().map(|c| c.to_string()).collect(),
    }
}

/// Processor over a single profile, with the control-port writer captured
/// so tests can assert on outbound commands.
pub fn processor_with(
    name: &str,
    profile: Profile,
) -> (Arc<Processor>, mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut profiles = ProfileMap::new();
    profiles.insert(name.to_string(), profile);
    let processor = Arc::new(Processor::new(
        profiles,
        std::env::temp_dir().join("mamirc-test-profiles.json"),
    ));
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    processor.set_link(link_tx);
    (processor, link_rx)
}

pub fn connection_event(connection_id: u64, timestamp: i64, line: &str) -> Event {
    Event {
        connection_id,
        sequence: 0,
        timestamp,
        kind: EventKind::Connection,
        line: line.as_bytes().to_vec(),
    }
}

pub fn receive_event(connection_id: u64, timestamp: i64, line: &str) -> Event {
    Event {
        connection_id,
        sequence: 0,
        timestamp,
        kind: EventKind::Receive,
        line: line.as_bytes().to_vec(),
    }
}

pub fn send_event(connection_id: u64, timestamp: i64, line: &str) -> Event {
    Event {
        connection_id,
        sequence: 0,
        timestamp,
        kind: EventKind::Send,
        line: line.as_bytes().to_vec(),
    }
}

/// The standard opening: connect + opened, which leaves the session in the
/// Opened state on connection 0.
pub fn open_connection(processor: &Processor, profile: &str, realtime: bool) {
    processor.process_event(
        &connection_event(0, 1_000, &format!("connect irc.example.org 6667 false {profile}")),
        realtime,
    );
    processor.process_event(&connection_event(0, 2_000, "opened 203.0.113.5"), realtime);
}

/// Drain every command line captured from the processor so far.
pub fn drain_commands(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<String> {
    let mut commands = Vec::new();
    while let Ok(line) = rx.try_recv() {
        commands.push(String::from_utf8_lossy(&line).into_owned());
    }
    commands
}

/// All updates currently retained by the feed, as JSON values.
pub async fn all_updates(processor: &Processor) -> Vec<serde_json::Value> {
    let result = processor.get_updates(0, 0).await.expect("feed in range");
    result["updates"]
        .as_array()
        .expect("updates array")
        .clone()
}
