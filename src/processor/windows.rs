//! Per-window message logs.
//!
//! A window is keyed by `(profile, party)` where the party is a channel
//! name, a nickname (private chat), or the empty string (the server
//! window). Parties compare case-insensitively under the IRC case mapping
//! but display as first observed. Each window numbers its lines with a
//! strictly increasing sequence and keeps at most [`MAX_WINDOW_LINES`],
//! trimming the oldest on overflow.

use mamirc_proto::{irc_to_lower, CaselessString};
use std::collections::{BTreeMap, VecDeque};

/// Retention cap per window.
pub const MAX_WINDOW_LINES: usize = 10_000;

/// Line flag constants: a type tag in the low bits plus modifier bits.
pub mod flags {
    /// Mask selecting the line type from the flag word.
    pub const TYPE_MASK: u32 = 0x1F;

    pub const PRIVMSG: u32 = 0;
    pub const NOTICE: u32 = 1;
    pub const JOIN: u32 = 2;
    pub const PART: u32 = 3;
    pub const QUIT: u32 = 4;
    pub const KICK: u32 = 5;
    pub const NICK: u32 = 6;
    pub const MODE: u32 = 7;
    pub const TOPIC: u32 = 8;
    pub const INITTOPIC: u32 = 9;
    pub const INITNOTOPIC: u32 = 10;
    pub const NAMES: u32 = 11;
    pub const SERVERREPLY: u32 = 12;
    pub const CONNECTING: u32 = 13;
    pub const CONNECTED: u32 = 14;
    pub const DISCONNECTED: u32 = 15;

    /// The line originated from our own SEND.
    pub const OUTGOING: u32 = 1 << 5;
    /// The message text mentions our current nickname.
    pub const NICKFLAG: u32 = 1 << 6;

    /// Name → value map served to the UI so it never hardcodes these.
    pub fn constants() -> Vec<(&'static str, u32)> {
        vec![
            ("PRIVMSG", PRIVMSG),
            ("NOTICE", NOTICE),
            ("JOIN", JOIN),
            ("PART", PART),
            ("QUIT", QUIT),
            ("KICK", KICK),
            ("NICK", NICK),
            ("MODE", MODE),
            ("TOPIC", TOPIC),
            ("INITTOPIC", INITTOPIC),
            ("INITNOTOPIC", INITNOTOPIC),
            ("NAMES", NAMES),
            ("SERVERREPLY", SERVERREPLY),
            ("CONNECTING", CONNECTING),
            ("CONNECTED", CONNECTED),
            ("DISCONNECTED", DISCONNECTED),
            ("TYPE_MASK", TYPE_MASK),
            ("OUTGOING", OUTGOING),
            ("NICKFLAG", NICKFLAG),
        ]
    }
}

/// One projected line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// Strictly increasing within the window, stable across restarts.
    pub sequence: u64,
    /// Type tag plus modifier bits; see [`flags`].
    pub flags: u32,
    /// Unix seconds from the source event.
    pub timestamp: i64,
    /// Type-specific payload strings.
    pub payload: Vec<String>,
}

/// One message log plus its marked-read pointer.
#[derive(Debug, Default)]
pub struct Window {
    /// Retained lines, oldest first.
    pub lines: VecDeque<Line>,
    next_sequence: u64,
    /// Lines with sequence below this have been read.
    pub marked_read_until: u64,
}

impl Window {
    /// Append a line, trimming the oldest past the retention cap. Returns
    /// the assigned sequence.
    pub fn append(&mut self, flags: u32, timestamp: i64, payload: Vec<String>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.lines.push_back(Line {
            sequence,
            flags,
            timestamp,
            payload,
        });
        if self.lines.len() > MAX_WINDOW_LINES {
            self.lines.pop_front();
        }
        sequence
    }

    /// Drop every line with sequence below `sequence`.
    pub fn clear_until(&mut self, sequence: u64) {
        while self
            .lines
            .front()
            .is_some_and(|line| line.sequence < sequence)
        {
            self.lines.pop_front();
        }
    }
}

/// All windows, grouped by profile then party.
#[derive(Debug, Default)]
pub struct AllWindows {
    map: BTreeMap<String, BTreeMap<CaselessString, Window>>,
}

impl AllWindows {
    /// Empty collection.
    pub fn new() -> Self {
        AllWindows::default()
    }

    /// Iterate `(profile, party, window)` in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CaselessString, &Window)> {
        self.map.iter().flat_map(|(profile, parties)| {
            parties
                .iter()
                .map(move |(party, window)| (profile.as_str(), party, window))
        })
    }

    /// The window for `(profile, party)`, creating it if absent. The second
    /// return value is true when the window was just created.
    pub fn get_or_create(&mut self, profile: &str, party: &str) -> (&mut Window, bool) {
        let parties = self.map.entry(profile.to_string()).or_default();
        let key = CaselessString::new(party);
        let created = !parties.contains_key(key.folded());
        (parties.entry(key).or_default(), created)
    }

    /// Case-insensitive window lookup.
    pub fn get_mut(&mut self, profile: &str, party: &str) -> Option<&mut Window> {
        self.map
            .get_mut(profile)?
            .get_mut(irc_to_lower(party).as_str())
    }

    /// Explicitly open a window; true when it did not exist before.
    pub fn open_window(&mut self, profile: &str, party: &str) -> bool {
        self.get_or_create(profile, party).1
    }

    /// Close a window, discarding its lines; true when it existed.
    pub fn close_window(&mut self, profile: &str, party: &str) -> bool {
        let Some(parties) = self.map.get_mut(profile) else {
            return false;
        };
        let removed = parties.remove(irc_to_lower(party).as_str()).is_some();
        if parties.is_empty() {
            self.map.remove(profile);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_increase_and_survive_trim() {
        let mut window = Window::default();
        for i in 0..(MAX_WINDOW_LINES + 10) {
            let seq = window.append(flags::PRIVMSG, 1000, vec![format!("m{i}")]);
            assert_eq!(seq, i as u64);
        }
        assert_eq!(window.lines.len(), MAX_WINDOW_LINES);
        assert_eq!(window.lines.front().unwrap().sequence, 10);
        // Sequences keep counting from where they were despite eviction.
        assert_eq!(
            window.append(flags::PRIVMSG, 1000, vec![]),
            (MAX_WINDOW_LINES + 10) as u64
        );
    }

    #[test]
    fn clear_until_drops_strictly_below() {
        let mut window = Window::default();
        for _ in 0..10 {
            window.append(flags::NOTICE, 0, vec![]);
        }
        window.clear_until(7);
        assert_eq!(window.lines.front().unwrap().sequence, 7);
        assert_eq!(window.lines.len(), 3);
        // Idempotent.
        window.clear_until(7);
        assert_eq!(window.lines.len(), 3);
    }

    #[test]
    fn party_lookup_is_case_insensitive_but_displays_first_seen() {
        let mut windows = AllWindows::new();
        let (_, created) = windows.get_or_create("net", "#Rust");
        assert!(created);
        let (_, created) = windows.get_or_create("net", "#rust");
        assert!(!created);
        let parties: Vec<&str> = windows.iter().map(|(_, party, _)| party.proper()).collect();
        assert_eq!(parties, vec!["#Rust"]);
    }

    #[test]
    fn open_and_close_window() {
        let mut windows = AllWindows::new();
        assert!(windows.open_window("net", "#a"));
        assert!(!windows.open_window("net", "#A"));
        assert!(windows.close_window("net", "#a"));
        assert!(!windows.close_window("net", "#a"));
        assert_eq!(windows.iter().count(), 0);
    }
}
