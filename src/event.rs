//! Journal events and their control-stream framing.
//!
//! Every byte of IRC traffic and every connection lifecycle marker becomes
//! an [`Event`]: `(connection-id, sequence, timestamp, kind, line)`. Events
//! are immutable once journaled. When streamed to an attached processor,
//! each event is framed as `<conn-id> <timestamp-ms> <kind> <payload>`
//! (sequence numbers are a journal-internal detail and stay off the wire).

use thiserror::Error;

/// Event category. `Connection` lines are connector-generated lifecycle
/// markers; `Receive` and `Send` carry raw IRC traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Lifecycle marker: `connect`, `opened`, `disconnect`, or `closed`.
    Connection,
    /// A line received from the IRC server, verbatim bytes.
    Receive,
    /// A line written to the IRC server, verbatim bytes.
    Send,
}

impl EventKind {
    /// Integer code used in the journal's `kind` column.
    pub fn code(self) -> i64 {
        match self {
            EventKind::Connection => 0,
            EventKind::Receive => 1,
            EventKind::Send => 2,
        }
    }

    /// Inverse of [`EventKind::code`].
    pub fn from_code(code: i64) -> Option<EventKind> {
        match code {
            0 => Some(EventKind::Connection),
            1 => Some(EventKind::Receive),
            2 => Some(EventKind::Send),
            _ => None,
        }
    }

    /// Wire label used in the control stream framing.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Connection => "CONNECTION",
            EventKind::Receive => "RECEIVE",
            EventKind::Send => "SEND",
        }
    }

    /// Inverse of [`EventKind::label`].
    pub fn from_label(label: &str) -> Option<EventKind> {
        match label {
            "CONNECTION" => Some(EventKind::Connection),
            "RECEIVE" => Some(EventKind::Receive),
            "SEND" => Some(EventKind::Send),
            _ => None,
        }
    }
}

/// One journaled event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Connector-assigned connection id, never reused within a run.
    pub connection_id: u64,
    /// Strictly increasing by 1 within a connection. Zero for events parsed
    /// off the control stream, where the field is not transmitted.
    pub sequence: u64,
    /// Unix milliseconds at the time the event was recorded.
    pub timestamp: i64,
    /// Event category.
    pub kind: EventKind,
    /// Raw line content, not necessarily UTF-8 for IRC traffic.
    pub line: Vec<u8>,
}

/// Errors from parsing a control-stream event line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    /// The line did not have the `<id> <ts> <kind> ` shape.
    #[error("malformed event line")]
    Malformed,
    /// The kind label was not CONNECTION/RECEIVE/SEND.
    #[error("unknown event kind {0:?}")]
    UnknownKind(String),
}

impl Event {
    /// Frame this event for the control stream (no CR+LF terminator).
    pub fn to_stream_line(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} {} ",
            self.connection_id,
            self.timestamp,
            self.kind.label()
        )
        .into_bytes();
        out.extend_from_slice(&self.line);
        out
    }

    /// Parse a control-stream event line produced by [`Event::to_stream_line`].
    pub fn from_stream_line(line: &[u8]) -> Result<Event, EventParseError> {
        let mut fields = [0usize; 3];
        let mut start = 0;
        for field in fields.iter_mut() {
            let pos = line[start..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or(EventParseError::Malformed)?;
            *field = start + pos;
            start = start + pos + 1;
        }

        let id_str =
            std::str::from_utf8(&line[..fields[0]]).map_err(|_| EventParseError::Malformed)?;
        let ts_str = std::str::from_utf8(&line[fields[0] + 1..fields[1]])
            .map_err(|_| EventParseError::Malformed)?;
        let kind_str = std::str::from_utf8(&line[fields[1] + 1..fields[2]])
            .map_err(|_| EventParseError::Malformed)?;

        let connection_id = id_str.parse().map_err(|_| EventParseError::Malformed)?;
        let timestamp = ts_str.parse().map_err(|_| EventParseError::Malformed)?;
        let kind = EventKind::from_label(kind_str)
            .ok_or_else(|| EventParseError::UnknownKind(kind_str.to_string()))?;

        Ok(Event {
            connection_id,
            sequence: 0,
            timestamp,
            kind,
            line: line[fields[2] + 1..].to_vec(),
        })
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_line_round_trip() {
        let ev = Event {
            connection_id: 7,
            sequence: 42,
            timestamp: 1_700_000_000_123,
            kind: EventKind::Receive,
            line: b":srv PRIVMSG #c :hi there".to_vec(),
        };
        let framed = ev.to_stream_line();
        assert_eq!(
            framed,
            b"7 1700000000123 RECEIVE :srv PRIVMSG #c :hi there".to_vec()
        );
        let parsed = Event::from_stream_line(&framed).unwrap();
        assert_eq!(parsed.connection_id, 7);
        assert_eq!(parsed.sequence, 0);
        assert_eq!(parsed.timestamp, 1_700_000_000_123);
        assert_eq!(parsed.kind, EventKind::Receive);
        assert_eq!(parsed.line, ev.line);
    }

    #[test]
    fn payload_may_contain_spaces_and_non_utf8() {
        let framed = b"3 5 SEND PRIVMSG #c :two words \xff".to_vec();
        let parsed = Event::from_stream_line(&framed).unwrap();
        assert_eq!(parsed.line, b"PRIVMSG #c :two words \xff".to_vec());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Event::from_stream_line(b"only two").is_err());
        assert!(Event::from_stream_line(b"x 5 RECEIVE data").is_err());
        assert_eq!(
            Event::from_stream_line(b"1 5 BOGUS data"),
            Err(EventParseError::UnknownKind("BOGUS".into()))
        );
    }

    #[test]
    fn kind_codes_round_trip() {
        for kind in [EventKind::Connection, EventKind::Receive, EventKind::Send] {
            assert_eq!(EventKind::from_code(kind.code()), Some(kind));
            assert_eq!(EventKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(EventKind::from_code(9), None);
    }
}
