//! IRC message prefix (source) parsing.
//!
//! A prefix names the origin of a message: either a server name or a user's
//! `nick!user@host` mask. The session state machine only ever compares the
//! leading name component, so the parse is lenient and keeps the pieces as
//! optional fields rather than distinguishing server and user variants.

/// Parsed message prefix: `name[!user][@host]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefix {
    /// Nickname, or the server name for server-sourced messages.
    pub name: String,
    /// Username (ident), when present.
    pub user: Option<String>,
    /// Hostname, when present.
    pub host: Option<String>,
}

impl Prefix {
    /// Parse a prefix string (without the leading `:`).
    pub fn parse(s: &str) -> Self {
        let (before_host, host) = match s.find('@') {
            Some(at) => (&s[..at], Some(s[at + 1..].to_string())),
            None => (s, None),
        };
        let (name, user) = match before_host.find('!') {
            Some(bang) => (
                before_host[..bang].to_string(),
                Some(before_host[bang + 1..].to_string()),
            ),
            None => (before_host.to_string(), None),
        };
        Prefix { name, user, host }
    }
}
