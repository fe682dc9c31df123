//! IRC line parsing and construction.
//!
//! [`IrcLine`] is the parsed form of one RFC 1459 / 2812 message: optional
//! prefix, a command (word or three-digit numeric), and positional
//! parameters where the last one may be a `:`-introduced trailing parameter
//! containing spaces. The session state machine consumes parameters by
//! index, so they are kept as a plain vector rather than per-command typed
//! fields.

use crate::error::LineParseError;
use crate::prefix::Prefix;

/// One parsed IRC protocol line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrcLine {
    /// Message source, when the line carried a `:prefix`.
    pub prefix: Option<Prefix>,
    /// Command word, uppercased (`PRIVMSG`, `001`, ...).
    pub command: String,
    /// Positional parameters; a trailing parameter keeps its spaces.
    pub params: Vec<String>,
}

impl IrcLine {
    /// Parse a raw line (no CR/LF terminator).
    pub fn parse(raw: &str) -> Result<IrcLine, LineParseError> {
        if raw.contains('\0') {
            return Err(LineParseError::NulByte);
        }
        let mut rest = raw;

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            match stripped.split_once(' ') {
                Some((p, tail)) => {
                    rest = tail;
                    Some(Prefix::parse(p))
                }
                None => return Err(LineParseError::MissingCommand),
            }
        } else {
            None
        };

        let mut params = Vec::new();
        let command;
        match rest.split_once(' ') {
            Some((cmd, tail)) => {
                command = cmd;
                let mut tail = tail;
                loop {
                    if let Some(trailing) = tail.strip_prefix(':') {
                        params.push(trailing.to_string());
                        break;
                    }
                    match tail.split_once(' ') {
                        Some((param, next)) => {
                            params.push(param.to_string());
                            tail = next;
                        }
                        None => {
                            params.push(tail.to_string());
                            break;
                        }
                    }
                }
            }
            None => command = rest,
        }
        if command.is_empty() {
            return Err(LineParseError::Empty);
        }

        Ok(IrcLine {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Parameter by index, or `""` when absent. IRC servers routinely omit
    /// optional trailing parameters (e.g. a PART without a message), so
    /// missing positions read as empty rather than erroring.
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map_or("", |s| s.as_str())
    }

    /// Nickname (or server name) of the message source, `""` if unprefixed.
    pub fn source(&self) -> &str {
        self.prefix.as_ref().map_or("", |p| p.name.as_str())
    }

    /// Whether the command is a three-digit numeric reply.
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Build an outbound command line: every parameter space-separated, the
/// final one introduced by `:` so it may contain spaces.
pub fn build_line(command: &str, params: &[&str]) -> String {
    let mut out = String::from(command);
    for (i, param) in params.iter().enumerate() {
        out.push(' ');
        if i == params.len() - 1 {
            out.push(':');
        }
        out.push_str(param);
    }
    out
}

/// Whether a message target names a channel (`#` or `&` sigil).
pub fn is_channel_name(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privmsg_with_trailing() {
        let line = IrcLine::parse(":nick!u@h PRIVMSG #chan :hello there").unwrap();
        assert_eq!(line.source(), "nick");
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#chan", "hello there"]);
    }

    #[test]
    fn numeric_reply() {
        let line = IrcLine::parse(":srv 433 * Alice :Nickname is already in use").unwrap();
        assert!(line.is_numeric());
        assert_eq!(line.command, "433");
        assert_eq!(line.param(1), "Alice");
        assert_eq!(line.param(2), "Nickname is already in use");
    }

    #[test]
    fn command_lowercased_input() {
        let line = IrcLine::parse("privmsg #chan :hi").unwrap();
        assert_eq!(line.command, "PRIVMSG");
    }

    #[test]
    fn bare_command() {
        let line = IrcLine::parse("QUIT").unwrap();
        assert_eq!(line.command, "QUIT");
        assert!(line.params.is_empty());
        assert_eq!(line.param(0), "");
    }

    #[test]
    fn colon_only_in_trailing() {
        let line = IrcLine::parse("TOPIC #c ::-)").unwrap();
        assert_eq!(line.params, vec!["#c", ":-)"]);
    }

    #[test]
    fn rejects_nul() {
        assert_eq!(IrcLine::parse("PRIVMSG #c :a\0b"), Err(LineParseError::NulByte));
    }

    #[test]
    fn rejects_prefix_without_command() {
        assert_eq!(
            IrcLine::parse(":onlyprefix"),
            Err(LineParseError::MissingCommand)
        );
    }

    #[test]
    fn builds_trailing_colon() {
        assert_eq!(
            build_line("USER", &["alice", "0", "*", "Alice Example"]),
            "USER alice 0 * :Alice Example"
        );
        assert_eq!(build_line("NICK", &["Alice"]), "NICK :Alice");
    }

    #[test]
    fn channel_names() {
        assert!(is_channel_name("#rust"));
        assert!(is_channel_name("&local"));
        assert!(!is_channel_name("alice"));
        assert!(!is_channel_name(""));
    }
}
