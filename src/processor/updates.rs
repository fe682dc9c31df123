//! The global update feed consumed by long-poll clients.
//!
//! Every state mutation appends one [`Update`], numbered by a strictly
//! monotonic id. A bounded buffer retains a contiguous suffix of issued
//! updates; clients poll with their next expected id and resynchronize with
//! a full state fetch when they fall off the retained window.
//!
//! Updates serialize as tagged JSON arrays with a leading discriminator
//! string (`["APPEND", profile, party, seq, flags, timestamp, ...]`), the
//! wire shape the web UI expects.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::VecDeque;

/// Buffered updates beyond this drop their oldest half.
pub const MAX_BUFFERED_UPDATES: usize = 10_000;

/// One state-change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    /// A line was appended to a window.
    Append {
        profile: String,
        party: String,
        sequence: u64,
        flags: u32,
        /// Unix seconds, matching window line timestamps.
        timestamp: i64,
        payload: Vec<String>,
    },
    /// Our nickname changed (or was first acknowledged).
    MyNick { profile: String, nickname: String },
    /// We joined a channel.
    Joined { profile: String, channel: String },
    /// We left a channel.
    Parted { profile: String, channel: String },
    /// We were kicked from a channel.
    Kicked {
        profile: String,
        channel: String,
        kicker: String,
        reason: String,
    },
    /// A connection reached the server.
    Connected { profile: String },
    /// A connection closed.
    Disconnected { profile: String },
    /// A window was explicitly opened.
    OpenWindow { profile: String, party: String },
    /// A window was closed and its lines discarded.
    CloseWindow { profile: String, party: String },
    /// The marked-read pointer moved.
    MarkRead {
        profile: String,
        party: String,
        sequence: u64,
    },
    /// Lines below `sequence` were cleared.
    ClearLines {
        profile: String,
        party: String,
        sequence: u64,
    },
}

impl Serialize for Update {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Update::Append {
                profile,
                party,
                sequence,
                flags,
                timestamp,
                payload,
            } => {
                let mut seq = serializer.serialize_seq(Some(6 + payload.len()))?;
                seq.serialize_element("APPEND")?;
                seq.serialize_element(profile)?;
                seq.serialize_element(party)?;
                seq.serialize_element(sequence)?;
                seq.serialize_element(flags)?;
                seq.serialize_element(timestamp)?;
                for part in payload {
                    seq.serialize_element(part)?;
                }
                seq.end()
            }
            Update::MyNick { profile, nickname } => {
                tagged(serializer, "MYNICK", &[profile, nickname])
            }
            Update::Joined { profile, channel } => {
                tagged(serializer, "JOINED", &[profile, channel])
            }
            Update::Parted { profile, channel } => {
                tagged(serializer, "PARTED", &[profile, channel])
            }
            Update::Kicked {
                profile,
                channel,
                kicker,
                reason,
            } => tagged(serializer, "KICKED", &[profile, channel, kicker, reason]),
            Update::Connected { profile } => tagged(serializer, "CONNECTED", &[profile]),
            Update::Disconnected { profile } => tagged(serializer, "DISCONNECTED", &[profile]),
            Update::OpenWindow { profile, party } => {
                tagged(serializer, "OPENWIN", &[profile, party])
            }
            Update::CloseWindow { profile, party } => {
                tagged(serializer, "CLOSEWIN", &[profile, party])
            }
            Update::MarkRead {
                profile,
                party,
                sequence,
            } => tagged_with_seq(serializer, "MARKREAD", profile, party, *sequence),
            Update::ClearLines {
                profile,
                party,
                sequence,
            } => tagged_with_seq(serializer, "CLEARLINES", profile, party, *sequence),
        }
    }
}

fn tagged<S: Serializer>(serializer: S, tag: &str, fields: &[&String]) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(1 + fields.len()))?;
    seq.serialize_element(tag)?;
    for field in fields {
        seq.serialize_element(field)?;
    }
    seq.end()
}

fn tagged_with_seq<S: Serializer>(
    serializer: S,
    tag: &str,
    profile: &String,
    party: &String,
    sequence: u64,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(4))?;
    seq.serialize_element(tag)?;
    seq.serialize_element(profile)?;
    seq.serialize_element(party)?;
    seq.serialize_element(&sequence)?;
    seq.end()
}

/// Outcome of a feed query.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdatesQuery {
    /// `start_id` is beyond `next_id`: the caller is confused and must
    /// resynchronize.
    Invalid,
    /// `start_id` fell off the retained window: full state fetch needed.
    OutOfRange,
    /// All retained updates with id ≥ `start_id` (possibly none yet).
    Ready(Vec<Update>),
}

/// Monotonic id counter plus bounded retention buffer.
#[derive(Debug, Default)]
pub struct UpdateFeed {
    next_id: u64,
    buffer: VecDeque<(u64, Update)>,
}

impl UpdateFeed {
    /// Empty feed starting at id 0.
    pub fn new() -> Self {
        UpdateFeed::default()
    }

    /// The id the next update will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Append one update, trimming the buffer when it outgrows retention.
    pub fn push(&mut self, update: Update) {
        self.buffer.push_back((self.next_id, update));
        self.next_id += 1;
        if self.buffer.len() > MAX_BUFFERED_UPDATES {
            let drop = self.buffer.len() / 2;
            self.buffer.drain(..drop);
        }
    }

    /// Retained updates with id ≥ `start_id`; see [`UpdatesQuery`].
    pub fn collect_since(&self, start_id: u64) -> UpdatesQuery {
        if start_id > self.next_id {
            return UpdatesQuery::Invalid;
        }
        let oldest_retained = self.next_id - self.buffer.len() as u64;
        if start_id < oldest_retained {
            return UpdatesQuery::OutOfRange;
        }
        let skip = (start_id - oldest_retained) as usize;
        UpdatesQuery::Ready(
            self.buffer
                .iter()
                .skip(skip)
                .map(|(_, update)| update.clone())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mynick(n: u64) -> Update {
        Update::MyNick {
            profile: "net".into(),
            nickname: format!("nick{n}"),
        }
    }

    #[test]
    fn ids_are_contiguous_and_monotonic() {
        let mut feed = UpdateFeed::new();
        for i in 0..5 {
            feed.push(mynick(i));
        }
        assert_eq!(feed.next_id(), 5);
        match feed.collect_since(2) {
            UpdatesQuery::Ready(updates) => assert_eq!(updates.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn start_at_next_id_is_empty_not_invalid() {
        let mut feed = UpdateFeed::new();
        feed.push(mynick(0));
        assert_eq!(feed.collect_since(1), UpdatesQuery::Ready(vec![]));
        assert_eq!(feed.collect_since(2), UpdatesQuery::Invalid);
    }

    #[test]
    fn empty_feed_accepts_zero() {
        let feed = UpdateFeed::new();
        assert_eq!(feed.collect_since(0), UpdatesQuery::Ready(vec![]));
        assert_eq!(feed.collect_since(1), UpdatesQuery::Invalid);
    }

    #[test]
    fn eviction_keeps_contiguous_suffix() {
        let mut feed = UpdateFeed::new();
        for i in 0..(MAX_BUFFERED_UPDATES as u64 + 1) {
            feed.push(mynick(i));
        }
        // One past the cap dropped the oldest half (5000 of 10001), so ids
        // 5000.. remain.
        let oldest = feed.next_id() - 5001;
        assert_eq!(oldest, 5000);
        assert_eq!(feed.collect_since(oldest - 1), UpdatesQuery::OutOfRange);
        match feed.collect_since(oldest) {
            UpdatesQuery::Ready(updates) => {
                assert_eq!(updates.len(), (feed.next_id() - oldest) as usize);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn append_serializes_as_tagged_array() {
        let update = Update::Append {
            profile: "net".into(),
            party: "#chan".into(),
            sequence: 9,
            flags: 0x21,
            timestamp: 1_700_000_000,
            payload: vec!["alice".into(), "hello".into()],
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!(["APPEND", "net", "#chan", 9, 33, 1_700_000_000, "alice", "hello"])
        );
    }

    #[test]
    fn markread_serializes_with_sequence() {
        let update = Update::MarkRead {
            profile: "net".into(),
            party: "#chan".into(),
            sequence: 41,
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!(["MARKREAD", "net", "#chan", 41])
        );
    }
}
