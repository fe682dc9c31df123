//! Per-connection IRC session state.
//!
//! Tracks registration progress, the current and rejected nicknames, and
//! channel membership as observed from the journaled SEND/RECEIVE traffic.
//! The session carries no I/O; the orchestrator consults it and decides
//! what (if anything) to write back through the control port.

use crate::config::Profile;
use crate::processor::throttle::SendThrottle;
use mamirc_proto::{irc_to_lower, CaselessString};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Registration phases of an IRC session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegState {
    /// TCP connect in flight.
    Connecting,
    /// Socket established, nothing sent yet.
    Opened,
    /// NICK sent, waiting to send USER.
    NickSent,
    /// USER sent, waiting for the welcome.
    UserSent,
    /// Welcome received; the server accepted us.
    Registered,
}

/// Per-channel view: members, topic, and the names-burst buffer flag.
#[derive(Debug, Default)]
pub struct ChannelState {
    /// Current members, compared case-insensitively, stored as last spelled.
    pub members: HashSet<CaselessString>,
    /// Channel topic; `None` when unset or cleared by RPL_NOTOPIC.
    pub topic: Option<String>,
    /// A 353 burst is being accumulated; cleared by 366.
    pub processing_names_reply: bool,
}

impl ChannelState {
    /// Add or re-spell a member; true when the nick was not present before.
    pub fn add_member(&mut self, nick: &str) -> bool {
        self.members.replace(CaselessString::new(nick)).is_none()
    }

    /// Remove a member; true when the nick was present.
    pub fn remove_member(&mut self, nick: &str) -> bool {
        self.members.remove(irc_to_lower(nick).as_str())
    }

    /// Case-insensitive membership test.
    pub fn has_member(&self, nick: &str) -> bool {
        self.members.contains(irc_to_lower(nick).as_str())
    }

    /// Members sorted by folded name, for deterministic NAMES output.
    pub fn members_sorted(&self) -> Vec<String> {
        let mut members: Vec<&CaselessString> = self.members.iter().collect();
        members.sort();
        members.into_iter().map(|m| m.proper().to_string()).collect()
    }
}

/// One IRC session, keyed by connection id in the processor.
#[derive(Debug)]
pub struct IrcSession {
    /// Name of the profile this connection belongs to.
    pub profile_name: String,
    /// Snapshot of the profile at connect time.
    pub profile: Profile,
    /// Joined channels.
    pub channels: HashMap<CaselessString, ChannelState>,
    /// Set once the NickServ IDENTIFY line has been sent this session.
    pub sent_nickserv_password: bool,
    /// Outbound rate limiting for user-submitted lines.
    pub throttle: SendThrottle,
    reg_state: RegState,
    nickname: Option<String>,
    rejected: HashSet<CaselessString>,
    nickflag: Option<Regex>,
}

impl IrcSession {
    /// New session in the `Connecting` state.
    pub fn new(profile_name: String, profile: Profile) -> Self {
        IrcSession {
            profile_name,
            profile,
            channels: HashMap::new(),
            sent_nickserv_password: false,
            throttle: SendThrottle::new(),
            reg_state: RegState::Connecting,
            nickname: None,
            rejected: HashSet::new(),
            nickflag: None,
        }
    }

    /// Current registration phase.
    pub fn reg_state(&self) -> RegState {
        self.reg_state
    }

    /// Advance (or rewind, during replay reconstruction) the phase.
    pub fn set_reg_state(&mut self, state: RegState) {
        self.reg_state = state;
    }

    /// Current nickname, if any has been proposed or acknowledged.
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Set the current nickname and rebuild the mention matcher.
    pub fn set_nickname(&mut self, nickname: Option<String>) {
        self.nickflag = nickname.as_deref().and_then(|nick| {
            Regex::new(&format!(
                "(?i)(^|[^A-Za-z0-9_]){}($|[^A-Za-z0-9_])",
                regex::escape(nick)
            ))
            .ok()
        });
        self.nickname = nickname;
    }

    /// Whether `name` is our current nickname (IRC case-insensitive).
    pub fn is_current_nickname(&self, name: &str) -> bool {
        self.nickname
            .as_deref()
            .is_some_and(|nick| mamirc_proto::irc_eq(nick, name))
    }

    /// The server rejected the current nickname: remember it and clear it.
    pub fn move_nickname_to_rejected(&mut self) {
        if let Some(nick) = self.nickname.take() {
            self.rejected.insert(CaselessString::new(nick));
        }
        self.nickflag = None;
    }

    /// Whether the server has rejected `nick` this session.
    pub fn is_nickname_rejected(&self, nick: &str) -> bool {
        self.rejected.contains(irc_to_lower(nick).as_str())
    }

    /// First profile nickname the server has not rejected yet.
    pub fn next_usable_nickname(&self) -> Option<&str> {
        self.profile
            .nicknames
            .iter()
            .map(|n| n.as_str())
            .find(|n| !self.is_nickname_rejected(n))
    }

    /// Channel state by name, case-insensitive.
    pub fn channel_mut(&mut self, name: &str) -> Option<&mut ChannelState> {
        self.channels.get_mut(irc_to_lower(name).as_str())
    }

    /// Whether we are currently in `name`.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(irc_to_lower(name).as_str())
    }

    /// Record that we joined `name` (empty member set until JOIN/NAMES fill
    /// it in).
    pub fn add_channel(&mut self, name: &str) {
        self.channels
            .insert(CaselessString::new(name), ChannelState::default());
    }

    /// Record that we left `name`.
    pub fn remove_channel(&mut self, name: &str) {
        self.channels.remove(irc_to_lower(name).as_str());
    }

    /// Whether `text` mentions the current nickname as a word.
    pub fn nickflag_matches(&self, text: &str) -> bool {
        self.nickflag
            .as_ref()
            .is_some_and(|regex| regex.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(nicknames: &[&str]) -> Profile {
        Profile {
            connect: true,
            servers: vec![],
            nicknames: nicknames.iter().map(|n| n.to_string()).collect(),
            username: "user".into(),
            realname: "Real Name".into(),
            nickserv_password: None,
            channels: vec![],
        }
    }

    #[test]
    fn rejected_nicknames_are_skipped() {
        let mut session = IrcSession::new("net".into(), profile(&["Alice", "Alice_", "Alice__"]));
        session.set_nickname(Some("Alice".into()));
        session.move_nickname_to_rejected();
        assert_eq!(session.nickname(), None);
        assert!(session.is_nickname_rejected("alice"));
        assert_eq!(session.next_usable_nickname(), Some("Alice_"));

        session.set_nickname(Some("Alice_".into()));
        session.move_nickname_to_rejected();
        assert_eq!(session.next_usable_nickname(), Some("Alice__"));
    }

    #[test]
    fn nickname_comparison_is_caseless() {
        let mut session = IrcSession::new("net".into(), profile(&["Nick[1]"]));
        session.set_nickname(Some("Nick[1]".into()));
        assert!(session.is_current_nickname("nick{1}"));
        assert!(!session.is_current_nickname("other"));
    }

    #[test]
    fn member_case_variant_replaces_spelling() {
        let mut chan = ChannelState::default();
        assert!(chan.add_member("Bob"));
        assert!(!chan.add_member("BOB"));
        assert_eq!(chan.members_sorted(), vec!["BOB"]);
        assert!(chan.remove_member("bob"));
        assert!(!chan.remove_member("bob"));
    }

    #[test]
    fn nickflag_matches_whole_words_only() {
        let mut session = IrcSession::new("net".into(), profile(&["Alice"]));
        session.set_nickname(Some("Alice".into()));
        assert!(session.nickflag_matches("hey alice, look"));
        assert!(session.nickflag_matches("ALICE: ping"));
        assert!(session.nickflag_matches("alice"));
        assert!(!session.nickflag_matches("malice is not a mention"));
        assert!(!session.nickflag_matches("alice2 neither"));
    }

    #[test]
    fn nickflag_with_regex_metacharacters() {
        let mut session = IrcSession::new("net".into(), profile(&["Nick[away]"]));
        session.set_nickname(Some("Nick[away]".into()));
        assert!(session.nickflag_matches("ping Nick[away] ping"));
        assert!(!session.nickflag_matches("Nickaway"));
    }

    #[test]
    fn channel_lookup_is_caseless() {
        let mut session = IrcSession::new("net".into(), profile(&["n"]));
        session.add_channel("#Rust");
        assert!(session.has_channel("#rust"));
        session.channel_mut("#RUST").unwrap().add_member("carol");
        session.remove_channel("#rust");
        assert!(!session.has_channel("#Rust"));
    }
}
