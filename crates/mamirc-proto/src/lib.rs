//! # mamirc-proto
//!
//! IRC wire primitives shared by the MamIRC connector and processor:
//!
//! - RFC 1459 case mapping and the [`CaselessString`] key type used for
//!   channel and nickname maps
//! - [`Prefix`] and [`IrcLine`] parsing for the RFC 1459 / 2812 subset the
//!   client cares about
//! - [`LineReader`], a delimiter-tolerant line codec (bare CR, bare LF, or
//!   CR+LF) with bounded line length and drop-and-resync overflow handling

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod caseless;
pub mod error;
pub mod framing;
pub mod line;
pub mod prefix;

pub use casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use caseless::CaselessString;
pub use error::LineParseError;
pub use framing::LineReader;
pub use line::{build_line, is_channel_name, IrcLine};
pub use prefix::Prefix;
