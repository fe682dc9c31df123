//! Update feed long-poll behavior through the processor API.

mod common;

use common::*;
use mamirc::processor::actions::Action;
use std::time::{Duration, Instant};

#[tokio::test]
async fn empty_poll_with_zero_wait_returns_immediately() {
    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    let next = processor.next_update_id() as i64;

    let started = Instant::now();
    let result = processor.get_updates(next, 0).await.expect("in range");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(result["updates"], serde_json::json!([]));
    assert_eq!(result["nextUpdateId"], next);
}

#[tokio::test]
async fn waiter_wakes_on_new_update() {
    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    let next = processor.next_update_id() as i64;

    let waiter = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.get_updates(next, 5_000).await })
    };
    // Give the waiter time to park on the condition.
    tokio::time::sleep(Duration::from_millis(50)).await;

    processor
        .apply_actions(vec![Action::OpenWindow {
            profile: "net".into(),
            party: "#c".into(),
        }])
        .expect("open window");

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter woke")
        .expect("join")
        .expect("in range");
    let updates = result["updates"].as_array().expect("array");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0][0], "OPENWIN");
    assert_eq!(result["nextUpdateId"], next + 1);
}

#[tokio::test]
async fn bad_start_ids_request_resync() {
    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    assert!(processor.get_updates(-1, 0).await.is_none());
    let beyond = processor.next_update_id() as i64 + 1;
    assert!(processor.get_updates(beyond, 0).await.is_none());
}

#[tokio::test]
async fn mark_read_twice_emits_two_updates_same_state() {
    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    processor
        .apply_actions(vec![Action::OpenWindow {
            profile: "net".into(),
            party: "#c".into(),
        }])
        .expect("open");

    for _ in 0..2 {
        processor
            .apply_actions(vec![Action::MarkRead {
                profile: "net".into(),
                party: "#c".into(),
                sequence: 7,
            }])
            .expect("mark read");
    }

    let updates = all_updates(&processor).await;
    let markreads: Vec<_> = updates.iter().filter(|u| u[0] == "MARKREAD").collect();
    assert_eq!(markreads.len(), 2);
    assert_eq!(markreads[0], markreads[1]);

    let state = processor.get_state(10);
    let window = state["windows"]
        .as_array()
        .expect("windows")
        .iter()
        .find(|w| w[1] == "#c")
        .expect("window present")
        .clone();
    assert_eq!(window[2]["markedReadUntil"], 7);
}

#[tokio::test]
async fn clear_lines_drops_strictly_older_lines() {
    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    open_connection(&processor, "net", false);
    processor.process_event(&send_event(0, 3_000, "NICK Me"), false);
    processor.process_event(&receive_event(0, 4_000, ":srv 001 Me :hi"), false);
    processor.process_event(&receive_event(0, 5_000, ":Me!~m@h JOIN #c"), false);
    for i in 0..5 {
        processor.process_event(
            &receive_event(0, 6_000 + i, &format!(":Bob!~b@h PRIVMSG #c :msg {i}")),
            false,
        );
    }

    processor
        .apply_actions(vec![Action::ClearLines {
            profile: "net".into(),
            party: "#c".into(),
            sequence: 3,
        }])
        .expect("clear");

    let state = processor.get_state(100);
    let window = state["windows"]
        .as_array()
        .expect("windows")
        .iter()
        .find(|w| w[1] == "#c")
        .expect("window")
        .clone();
    let lines = window[2]["lines"].as_array().expect("lines");
    assert!(lines.iter().all(|line| line[0].as_u64().unwrap() >= 3));
    assert!(all_updates(&processor)
        .await
        .iter()
        .any(|u| u[0] == "CLEARLINES" && u[3] == 3));
}

#[tokio::test]
async fn state_dump_delta_encodes_timestamps_in_seconds() {
    let (processor, _link) = processor_with("net", profile(&["Me"], &[]));
    open_connection(&processor, "net", false);
    processor.process_event(&send_event(0, 3_000, "NICK Me"), false);
    processor.process_event(&receive_event(0, 10_000, ":srv 001 Me :hi"), false);
    processor.process_event(&receive_event(0, 25_000, ":Me!~m@h JOIN #c"), false);
    processor.process_event(
        &receive_event(0, 32_500, ":Bob!~b@h PRIVMSG #c :hello"),
        false,
    );

    let state = processor.get_state(100);
    let window = state["windows"]
        .as_array()
        .expect("windows")
        .iter()
        .find(|w| w[1] == "#c")
        .expect("window")
        .clone();
    let lines = window[2]["lines"].as_array().expect("lines");
    // JOIN at 25 s, PRIVMSG at 32 s: first delta from zero, then +7.
    assert_eq!(lines[0][2], 25);
    assert_eq!(lines[1][2], 7);
}
