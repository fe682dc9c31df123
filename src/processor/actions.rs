//! Parsing of `do-actions.json` operation payloads.
//!
//! The web UI submits a list of tagged JSON arrays, each led by an
//! operation name: `["send-line", profile, line]`,
//! `["mark-read", profile, party, sequence]`, and so on. Parsing is strict
//! about arity and types; the first malformed operation fails the whole
//! request with a user-visible message.

use crate::config::ProfileMap;
use serde_json::Value;

/// One user-requested operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Send a raw IRC line over a profile's connection (throttled).
    SendLine { profile: String, line: String },
    /// Move a window's marked-read pointer.
    MarkRead {
        profile: String,
        party: String,
        sequence: u64,
    },
    /// Drop all lines below `sequence` in a window.
    ClearLines {
        profile: String,
        party: String,
        sequence: u64,
    },
    /// Create a window without waiting for traffic.
    OpenWindow { profile: String, party: String },
    /// Destroy a window.
    CloseWindow { profile: String, party: String },
    /// Remember which window the UI should show first.
    SetInitialWindow { profile: String, party: String },
    /// Replace the whole profile configuration.
    SetProfiles { profiles: ProfileMap },
}

impl Action {
    /// Parse one tagged array.
    pub fn parse(value: &Value) -> Result<Action, String> {
        let items = value
            .as_array()
            .ok_or_else(|| "Action must be an array".to_string())?;
        let tag = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| "Action missing tag".to_string())?;

        match tag {
            "send-line" => Ok(Action::SendLine {
                profile: string_at(items, 1, tag)?,
                line: string_at(items, 2, tag)?,
            }),
            "mark-read" => Ok(Action::MarkRead {
                profile: string_at(items, 1, tag)?,
                party: string_at(items, 2, tag)?,
                sequence: sequence_at(items, 3, tag)?,
            }),
            "clear-lines" => Ok(Action::ClearLines {
                profile: string_at(items, 1, tag)?,
                party: string_at(items, 2, tag)?,
                sequence: sequence_at(items, 3, tag)?,
            }),
            "open-window" => Ok(Action::OpenWindow {
                profile: string_at(items, 1, tag)?,
                party: string_at(items, 2, tag)?,
            }),
            "close-window" => Ok(Action::CloseWindow {
                profile: string_at(items, 1, tag)?,
                party: string_at(items, 2, tag)?,
            }),
            "set-initial-window" => Ok(Action::SetInitialWindow {
                profile: string_at(items, 1, tag)?,
                party: string_at(items, 2, tag)?,
            }),
            "set-profiles" => {
                let raw = items
                    .get(1)
                    .ok_or_else(|| "set-profiles missing profile map".to_string())?;
                let profiles: ProfileMap = serde_json::from_value(raw.clone())
                    .map_err(|e| format!("Bad profile map: {e}"))?;
                Ok(Action::SetProfiles { profiles })
            }
            other => Err(format!("Unknown action: {other}")),
        }
    }

    /// Parse the whole `payload` list.
    pub fn parse_all(payload: &[Value]) -> Result<Vec<Action>, String> {
        payload.iter().map(Action::parse).collect()
    }
}

fn string_at(items: &[Value], index: usize, tag: &str) -> Result<String, String> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("{tag}: argument {index} must be a string"))
}

fn sequence_at(items: &[Value], index: usize, tag: &str) -> Result<u64, String> {
    items
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("{tag}: argument {index} must be a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_send_line() {
        let action = Action::parse(&json!(["send-line", "net", "PRIVMSG #c :hi"])).unwrap();
        assert_eq!(
            action,
            Action::SendLine {
                profile: "net".into(),
                line: "PRIVMSG #c :hi".into(),
            }
        );
    }

    #[test]
    fn parses_mark_read_and_clear_lines() {
        assert_eq!(
            Action::parse(&json!(["mark-read", "net", "#c", 17])).unwrap(),
            Action::MarkRead {
                profile: "net".into(),
                party: "#c".into(),
                sequence: 17,
            }
        );
        assert_eq!(
            Action::parse(&json!(["clear-lines", "net", "", 5])).unwrap(),
            Action::ClearLines {
                profile: "net".into(),
                party: "".into(),
                sequence: 5,
            }
        );
    }

    #[test]
    fn parses_set_profiles() {
        let action = Action::parse(&json!([
            "set-profiles",
            {
                "net": {
                    "connect": true,
                    "servers": [{"hostname": "irc.example.org", "port": 6667, "ssl": false}],
                    "nicknames": ["n"],
                    "username": "u",
                    "realname": "r"
                }
            }
        ]))
        .unwrap();
        match action {
            Action::SetProfiles { profiles } => {
                assert!(profiles["net"].connect);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(Action::parse(&json!("send-line")).is_err());
        assert!(Action::parse(&json!([42])).is_err());
        assert!(Action::parse(&json!(["mark-read", "net", "#c", -1])).is_err());
        assert!(Action::parse(&json!(["mark-read", "net", "#c", "5"])).is_err());
        assert!(Action::parse(&json!(["frobnicate", "x"])).is_err());
    }

    #[test]
    fn parse_all_fails_on_first_bad_entry() {
        let payload = vec![
            json!(["open-window", "net", "#c"]),
            json!(["bogus"]),
        ];
        assert!(Action::parse_all(&payload).is_err());
    }
}
