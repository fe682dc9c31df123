//! The full data path minus sockets: events journaled by the connector
//! side, replayed through an attach stream, and consumed by a processor.

mod common;

use common::*;
use mamirc::event::{Event, EventKind};
use mamirc::journal::{spawn_journal_task, Journal, CAUGHT_UP_LINE};
use tokio::sync::mpsc;

async fn journal_writer(dir: &tempfile::TempDir) -> mamirc::journal::JournalWriter {
    let journal = Journal::open(&dir.path().join("journal.db"))
        .await
        .expect("open journal");
    let (failure_tx, _failure_rx) = mpsc::unbounded_channel();
    spawn_journal_task(journal, failure_tx)
}

#[tokio::test]
async fn journaled_events_replay_into_identical_processor_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = journal_writer(&dir).await;

    let script: Vec<(EventKind, &str)> = vec![
        (EventKind::Connection, "connect irc.example.org 6667 false net"),
        (EventKind::Connection, "opened 203.0.113.5"),
        (EventKind::Send, "NICK Me"),
        (EventKind::Send, "USER user 0 * Real Name"),
        (EventKind::Receive, ":srv 001 Me :welcome"),
        (EventKind::Receive, ":Me!~m@h JOIN #c"),
        (EventKind::Receive, ":Bob!~b@h JOIN #c"),
        (EventKind::Receive, ":Bob!~b@h PRIVMSG #c :hi there"),
    ];
    for (kind, line) in &script {
        writer.append(0, *kind, line.as_bytes().to_vec());
    }

    // Attach: replay everything, then the caught-up marker.
    let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
    writer.attach(stream_tx);

    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    let mut realtime = false;
    loop {
        let line = stream_rx.recv().await.expect("stream open");
        if line == CAUGHT_UP_LINE {
            processor.finish_catchup();
            realtime = true;
            break;
        }
        let event = Event::from_stream_line(&line).expect("event line");
        processor.process_event(&event, realtime);
    }

    let state = processor.get_state(100);
    assert_eq!(state["connections"]["net"]["currentNickname"], "Me");
    assert_eq!(
        state["connections"]["net"]["channels"]["#c"]["members"],
        serde_json::json!(["Bob", "Me"]),
    );

    // Live events keep flowing after the marker.
    writer.append(0, EventKind::Receive, b":Bob!~b@h PART #c".to_vec());
    let line = stream_rx.recv().await.expect("live event");
    let event = Event::from_stream_line(&line).expect("event line");
    processor.process_event(&event, realtime);
    assert_eq!(
        processor.get_state(100)["connections"]["net"]["channels"]["#c"]["members"],
        serde_json::json!(["Me"]),
    );
}

#[tokio::test]
async fn catchup_resumes_registration_without_duplicate_appends() {
    // The previous run died right after USER was sent; the new processor
    // must not re-emit window lines for replayed traffic, and must not
    // advance registration by itself (USER was already sent).
    let (processor, mut link) = processor_with("net", profile(&["Me"], &[]));
    processor.process_event(
        &connection_event(0, 1_000, "connect irc.example.org 6667 false net"),
        false,
    );
    processor.process_event(&connection_event(0, 2_000, "opened 203.0.113.5"), false);
    processor.process_event(&send_event(0, 3_000, "NICK Me"), false);
    processor.process_event(&send_event(0, 3_500, "USER user 0 * Real Name"), false);

    let appends_before = all_updates(&processor)
        .await
        .iter()
        .filter(|u| u[0] == "APPEND")
        .count();

    processor.finish_catchup();

    // Nickname known and USER already sent: nothing to drive.
    assert!(drain_commands(&mut link).is_empty());
    let appends_after = all_updates(&processor)
        .await
        .iter()
        .filter(|u| u[0] == "APPEND")
        .count();
    assert_eq!(appends_before, appends_after);
}

#[tokio::test]
async fn catchup_after_opened_resends_nick() {
    let (processor, mut link) = processor_with("net", profile(&["Me"], &[]));
    processor.process_event(
        &connection_event(0, 1_000, "connect irc.example.org 6667 false net"),
        false,
    );
    processor.process_event(&connection_event(0, 2_000, "opened 203.0.113.5"), false);

    processor.finish_catchup();
    assert_eq!(drain_commands(&mut link), vec!["send 0 NICK :Me"]);
}

#[tokio::test]
async fn catchup_with_rejected_nickname_tries_next() {
    let (processor, mut link) = processor_with("net", profile(&["Me", "Me_"], &[]));
    processor.process_event(
        &connection_event(0, 1_000, "connect irc.example.org 6667 false net"),
        false,
    );
    processor.process_event(&connection_event(0, 2_000, "opened 203.0.113.5"), false);
    processor.process_event(&send_event(0, 3_000, "NICK Me"), false);
    // Replay saw the rejection; no realtime driver was alive to retry.
    processor.process_event(&receive_event(0, 4_000, ":srv 433 * Me :in use"), false);

    processor.finish_catchup();
    assert_eq!(drain_commands(&mut link), vec!["send 0 NICK :Me_"]);
}
