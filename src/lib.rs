//! MamIRC core: a headless, always-on IRC client split into two processes.
//!
//! - The **connector** ([`connector`]) owns the sockets: it maintains
//!   long-lived TCP/TLS connections to IRC servers, journals every byte sent
//!   or received ([`journal`]), and exposes a loopback control port that at
//!   most one processor may attach to.
//! - The **processor** ([`processor`]) replays the journal and the live
//!   stream, runs the per-connection IRC session state machines, projects
//!   them into bounded per-window message logs, and serves the long-poll
//!   HTTP API that drives the web UI.

pub mod config;
pub mod connector;
pub mod event;
pub mod journal;
pub mod processor;
