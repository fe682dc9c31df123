//! The processor: session state machines, window projection, update feed.
//!
//! One [`Processor`] value owns all mutable state behind a single coarse
//! mutex. Events arrive from the connector link in journal order and are
//! handled identically in replay and realtime; the `realtime` flag only
//! gates outbound control-port writes (registration driving, nickname
//! retries, auto-joins, reconnect scheduling). Long-poll HTTP waiters are
//! woken through a [`Notify`] that the update feed pulses on every state
//! change.

pub mod actions;
pub mod http;
pub mod link;
pub mod reconnect;
pub mod scheduler;
pub mod session;
pub mod throttle;
pub mod updates;
pub mod windows;

pub use scheduler::{ScheduledAction, Scheduler};
pub use session::{IrcSession, RegState};
pub use updates::{Update, UpdateFeed, UpdatesQuery};
pub use windows::{flags, AllWindows};

use crate::config::{self, ProfileMap};
use crate::event::{Event, EventKind};
use mamirc_proto::{build_line, is_channel_name, IrcLine};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Delay between QUIT and the forced socket close when a profile is
/// removed or disabled.
const QUIT_GRACE: Duration = Duration::from_millis(1000);

/// Interval of the channel-names refresh.
const NAMES_REFRESH_INTERVAL: Duration = Duration::from_secs(86_400);

/// Quit message sent when the processor closes a connection deliberately.
const QUIT_MESSAGE: &str = "MamIRC, the headless IRC client";

/// Mutable processor state, guarded by the coarse mutex. Never held across
/// an await point.
pub struct ProcessorState {
    sessions: HashMap<u64, IrcSession>,
    windows: AllWindows,
    updates: UpdateFeed,
    profiles: ProfileMap,
    initial_window: Option<(String, String)>,
    reconnect: reconnect::ReconnectController,
    link: Option<mpsc::UnboundedSender<Vec<u8>>>,
    scheduler: Option<Scheduler>,
    terminating: bool,
}

/// The processor singleton, shared by the link reader, the scheduler, and
/// every HTTP request task.
pub struct Processor {
    state: Mutex<ProcessorState>,
    new_updates: Notify,
    user_config_path: PathBuf,
}

impl Processor {
    /// Build a processor over the given profile configuration.
    pub fn new(profiles: ProfileMap, user_config_path: PathBuf) -> Self {
        Processor {
            state: Mutex::new(ProcessorState {
                sessions: HashMap::new(),
                windows: AllWindows::new(),
                updates: UpdateFeed::new(),
                profiles,
                initial_window: None,
                reconnect: reconnect::ReconnectController::new(),
                link: None,
                scheduler: None,
                terminating: false,
            }),
            new_updates: Notify::new(),
            user_config_path,
        }
    }

    fn state(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install the control-port writer once the link is up.
    pub fn set_link(&self, link: mpsc::UnboundedSender<Vec<u8>>) {
        self.state().link = Some(link);
    }

    /// Install the scheduler handle and start the daily NAMES refresh.
    pub fn set_scheduler(&self, scheduler: Scheduler) {
        scheduler.schedule_after(NAMES_REFRESH_INTERVAL, ScheduledAction::NamesRefresh);
        self.state().scheduler = Some(scheduler);
    }

    /// Handle one journal event. `realtime` gates outbound commands.
    pub fn process_event(&self, event: &Event, realtime: bool) {
        let mut state = self.state();
        match event.kind {
            EventKind::Connection => {
                let line = String::from_utf8_lossy(&event.line).into_owned();
                handle_connection(&mut state, event.connection_id, event.timestamp, &line, realtime);
            }
            EventKind::Receive => {
                let line = String::from_utf8_lossy(&event.line).into_owned();
                handle_receive(&mut state, event.connection_id, event.timestamp, &line, realtime);
            }
            EventKind::Send => {
                let line = String::from_utf8_lossy(&event.line).into_owned();
                handle_send(&mut state, event.connection_id, event.timestamp, &line);
            }
        }
        drop(state);
        self.new_updates.notify_waiters();
    }

    /// Replay is done: deterministically advance every live session the way
    /// the previous live driver would have, then schedule connects for every
    /// enabled profile without an active connection.
    pub fn finish_catchup(&self) {
        let mut state = self.state();
        let mut active_profiles: HashSet<String> = HashSet::new();
        let connection_ids: Vec<u64> = state.sessions.keys().copied().collect();

        for connection_id in connection_ids {
            let Some(session) = state.sessions.get(&connection_id) else {
                continue;
            };
            let profile_name = session.profile_name.clone();
            if !active_profiles.insert(profile_name.clone()) {
                error!(%profile_name, "Multiple live connections for one profile, leaving extras idle");
                continue;
            }
            match session.reg_state() {
                RegState::Connecting => {}
                RegState::Opened => {
                    if let Some(nick) = session.profile.nicknames.first().cloned() {
                        state.send_irc_line(connection_id, "NICK", &[&nick]);
                    }
                }
                RegState::NickSent | RegState::UserSent => {
                    if session.nickname().is_none() {
                        match session.next_usable_nickname().map(str::to_string) {
                            Some(nick) => state.send_irc_line(connection_id, "NICK", &[&nick]),
                            None => state.send_disconnect(connection_id, false),
                        }
                    } else if session.reg_state() == RegState::NickSent {
                        let username = session.profile.username.clone();
                        let realname = session.profile.realname.clone();
                        state.send_irc_line(
                            connection_id,
                            "USER",
                            &[&username, "0", "*", &realname],
                        );
                    }
                }
                RegState::Registered => {
                    state.drive_registered(connection_id);
                }
            }
        }

        let idle_profiles: Vec<String> = state
            .profiles
            .iter()
            .filter(|(name, profile)| profile.connect && !active_profiles.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        for profile in idle_profiles {
            state.try_connect(&profile);
        }
        info!(active = active_profiles.len(), "Catch-up complete");
    }

    /// Run one scheduler action.
    pub(crate) fn fire(&self, action: ScheduledAction) {
        let mut state = self.state();
        if state.terminating {
            return;
        }
        match action {
            ScheduledAction::ReconnectAttempt { profile } => {
                state.attempt_connect(&profile);
            }
            ScheduledAction::ThrottledSend { line } => {
                state.send_control(line);
            }
            ScheduledAction::ForceDisconnect { connection_id } => {
                if state.sessions.contains_key(&connection_id) {
                    state.send_control(format!("disconnect {connection_id}").into_bytes());
                }
            }
            ScheduledAction::NamesRefresh => {
                let requests: Vec<(u64, Vec<String>)> = state
                    .sessions
                    .iter()
                    .map(|(&id, session)| {
                        (
                            id,
                            session
                                .channels
                                .keys()
                                .map(|chan| chan.proper().to_string())
                                .collect(),
                        )
                    })
                    .collect();
                for (connection_id, channels) in requests {
                    for channel in channels {
                        state.send_irc_line(connection_id, "NAMES", &[&channel]);
                    }
                }
                if let Some(scheduler) = &state.scheduler {
                    scheduler.schedule_after(NAMES_REFRESH_INTERVAL, ScheduledAction::NamesRefresh);
                }
            }
        }
        drop(state);
        self.new_updates.notify_waiters();
    }

    /// Shut down: cancel timers and wake every waiter.
    pub fn terminate(&self) {
        let mut state = self.state();
        state.terminating = true;
        if let Some(scheduler) = state.scheduler.take() {
            scheduler.shutdown();
        }
        state.link = None;
        drop(state);
        self.new_updates.notify_waiters();
    }

    /// The id the next update will get.
    pub fn next_update_id(&self) -> u64 {
        self.state().updates.next_id()
    }

    /// Long-poll for updates with id ≥ `start_id`. Returns `None` when the
    /// caller must resynchronize with a full state fetch.
    pub async fn get_updates(&self, start_id: i64, max_wait_ms: u64) -> Option<serde_json::Value> {
        if start_id < 0 {
            return None;
        }
        let start_id = start_id as u64;
        let max_wait = Duration::from_millis(max_wait_ms.min(60_000));
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            let notified = self.new_updates.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a push between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            {
                let state = self.state();
                match state.updates.collect_since(start_id) {
                    UpdatesQuery::Invalid | UpdatesQuery::OutOfRange => return None,
                    UpdatesQuery::Ready(updates) => {
                        let expired = tokio::time::Instant::now() >= deadline;
                        if !updates.is_empty() || expired || state.terminating {
                            return Some(json!({
                                "updates": updates,
                                "nextUpdateId": state.updates.next_id(),
                            }));
                        }
                    }
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Full state snapshot for `get-state.json` (without the CSRF token,
    /// which the HTTP layer owns).
    pub fn get_state(&self, max_messages_per_window: usize) -> serde_json::Value {
        let state = self.state();

        let mut connections = serde_json::Map::new();
        for session in state.sessions.values() {
            let mut channels = serde_json::Map::new();
            for (name, chan) in &session.channels {
                channels.insert(
                    name.proper().to_string(),
                    json!({
                        "members": chan.members_sorted(),
                        "topic": chan.topic,
                    }),
                );
            }
            connections.insert(
                session.profile_name.clone(),
                json!({
                    "currentNickname": session.nickname(),
                    "channels": channels,
                }),
            );
        }

        let mut windows_out = Vec::new();
        for (profile, party, window) in state.windows.iter() {
            let skip = window.lines.len().saturating_sub(max_messages_per_window);
            let mut lines = Vec::new();
            let mut prev_timestamp = 0i64;
            for line in window.lines.iter().skip(skip) {
                let mut entry = vec![
                    json!(line.sequence),
                    json!(line.flags),
                    json!(line.timestamp - prev_timestamp),
                ];
                prev_timestamp = line.timestamp;
                entry.extend(line.payload.iter().map(|part| json!(part)));
                lines.push(serde_json::Value::Array(entry));
            }
            windows_out.push(json!([
                profile,
                party.proper(),
                {
                    "lines": lines,
                    "markedReadUntil": window.marked_read_until,
                }
            ]));
        }

        let flag_constants: serde_json::Map<String, serde_json::Value> = flags::constants()
            .into_iter()
            .map(|(name, value)| (name.to_string(), json!(value)))
            .collect();

        json!({
            "connections": connections,
            "windows": windows_out,
            "nextUpdateId": state.updates.next_id(),
            "flagsConstants": flag_constants,
            "initialWindow": state.initial_window.as_ref()
                .map(|(profile, party)| json!([profile, party])),
            "userConfiguration": redacted_profiles(&state.profiles),
        })
    }

    /// Profile snapshot with secrets redacted.
    pub fn get_profiles(&self) -> serde_json::Value {
        redacted_profiles(&self.state().profiles)
    }

    /// Apply a `do-actions` payload. Returns `Err(text)` with a
    /// user-visible message on the first failing operation.
    pub fn apply_actions(&self, parsed: Vec<actions::Action>) -> Result<(), String> {
        let mut state = self.state();
        for action in parsed {
            state.apply_action(action, &self.user_config_path)?;
        }
        drop(state);
        self.new_updates.notify_waiters();
        Ok(())
    }
}

/// Serialize profiles with every NickServ password replaced by `null`.
fn redacted_profiles(profiles: &ProfileMap) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for (name, profile) in profiles {
        let mut value = serde_json::to_value(profile).unwrap_or_default();
        if let Some(object) = value.as_object_mut() {
            object.insert("nickservPassword".to_string(), serde_json::Value::Null);
        }
        out.insert(name.clone(), value);
    }
    serde_json::Value::Object(out)
}

impl ProcessorState {
    fn send_control(&self, line: Vec<u8>) {
        if let Some(link) = &self.link {
            let _ = link.send(line);
        }
    }

    /// Send one IRC command over a connection, `send <id> <cmd> ... :<last>`.
    fn send_irc_line(&self, connection_id: u64, command: &str, params: &[&str]) {
        let mut line = format!("send {connection_id} ").into_bytes();
        line.extend_from_slice(build_line(command, params).as_bytes());
        self.send_control(line);
    }

    /// Close a connection: immediately, or QUIT first with a grace period.
    fn send_disconnect(&self, connection_id: u64, send_quit: bool) {
        if !send_quit {
            self.send_control(format!("disconnect {connection_id}").into_bytes());
            return;
        }
        self.send_irc_line(connection_id, "QUIT", &[QUIT_MESSAGE]);
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule_after(
                QUIT_GRACE,
                ScheduledAction::ForceDisconnect { connection_id },
            );
        }
    }

    /// NickServ IDENTIFY (once per session) plus the profile's auto-joins.
    fn drive_registered(&mut self, connection_id: u64) {
        let Some(session) = self.sessions.get(&connection_id) else {
            return;
        };
        let mut commands: Vec<(String, Vec<String>)> = Vec::new();
        if let Some(password) = &session.profile.nickserv_password {
            if !session.sent_nickserv_password {
                commands.push((
                    "PRIVMSG".to_string(),
                    vec!["NickServ".to_string(), format!("IDENTIFY {password}")],
                ));
            }
        }
        for entry in &session.profile.channels {
            let mut parts = entry.splitn(2, ' ');
            let channel = parts.next().unwrap_or_default();
            if channel.is_empty() || session.has_channel(channel) {
                continue;
            }
            let mut params = vec![channel.to_string()];
            if let Some(key) = parts.next() {
                params.push(key.to_string());
            }
            commands.push(("JOIN".to_string(), params));
        }
        for (command, params) in commands {
            let params: Vec<&str> = params.iter().map(String::as_str).collect();
            self.send_irc_line(connection_id, &command, &params);
        }
    }

    /// Schedule the next connect attempt for a profile (delay 0 on the
    /// first attempt of an outage).
    fn try_connect(&mut self, profile: &str) {
        if self.terminating {
            return;
        }
        let delay = self.reconnect.next_delay(profile);
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule_after(
                Duration::from_millis(delay),
                ScheduledAction::ReconnectAttempt {
                    profile: profile.to_string(),
                },
            );
        }
    }

    /// A scheduled reconnect fired: dial the profile's next server.
    fn attempt_connect(&mut self, profile_name: &str) {
        if self
            .sessions
            .values()
            .any(|session| session.profile_name == profile_name)
        {
            return;
        }
        let Some(profile) = self.profiles.get(profile_name) else {
            self.reconnect.clear(profile_name);
            return;
        };
        if profile.servers.is_empty() {
            warn!(profile = %profile_name, "Profile has no servers to connect to");
            return;
        }
        let index = self.reconnect.take_attempt(profile_name, profile.servers.len());
        let server = &profile.servers[index];
        let line = format!(
            "connect {} {} {} {}",
            server.hostname, server.port, server.ssl, profile_name
        );
        self.send_control(line.into_bytes());
    }

    /// Append a line to a window and emit the matching APPEND update.
    fn append_line(
        &mut self,
        profile: &str,
        party: &str,
        flags: u32,
        timestamp_ms: i64,
        payload: Vec<String>,
    ) {
        let timestamp = timestamp_ms.div_euclid(1000);
        let (window, _created) = self.windows.get_or_create(profile, party);
        let sequence = window.append(flags, timestamp, payload.clone());
        self.updates.push(Update::Append {
            profile: profile.to_string(),
            party: party.to_string(),
            sequence,
            flags,
            timestamp,
            payload,
        });
    }

    fn push_update(&mut self, update: Update) {
        self.updates.push(update);
    }

    fn apply_action(
        &mut self,
        action: actions::Action,
        user_config_path: &std::path::Path,
    ) -> Result<(), String> {
        match action {
            actions::Action::SendLine { profile, line } => self.user_send_line(&profile, &line),
            actions::Action::MarkRead {
                profile,
                party,
                sequence,
            } => {
                let window = self
                    .windows
                    .get_mut(&profile, &party)
                    .ok_or_else(|| format!("No such window: {profile} {party}"))?;
                window.marked_read_until = sequence;
                self.push_update(Update::MarkRead {
                    profile,
                    party,
                    sequence,
                });
                Ok(())
            }
            actions::Action::ClearLines {
                profile,
                party,
                sequence,
            } => {
                let window = self
                    .windows
                    .get_mut(&profile, &party)
                    .ok_or_else(|| format!("No such window: {profile} {party}"))?;
                window.clear_until(sequence);
                self.push_update(Update::ClearLines {
                    profile,
                    party,
                    sequence,
                });
                Ok(())
            }
            actions::Action::OpenWindow { profile, party } => {
                if self.windows.open_window(&profile, &party) {
                    self.push_update(Update::OpenWindow { profile, party });
                }
                Ok(())
            }
            actions::Action::CloseWindow { profile, party } => {
                if self.windows.close_window(&profile, &party) {
                    self.push_update(Update::CloseWindow { profile, party });
                }
                Ok(())
            }
            actions::Action::SetInitialWindow { profile, party } => {
                self.initial_window = Some((profile, party));
                Ok(())
            }
            actions::Action::SetProfiles { profiles } => {
                self.set_profiles(profiles, user_config_path)
            }
        }
    }

    /// Submit a user line to a profile's connection, honoring the session
    /// send throttle.
    fn user_send_line(&mut self, profile: &str, line: &str) -> Result<(), String> {
        let entry = self
            .sessions
            .iter_mut()
            .find(|(_, session)| session.profile_name == profile);
        let Some((&connection_id, session)) = entry else {
            return Err(format!("Profile not connected: {profile}"));
        };
        let mut control = format!("send {connection_id} ").into_bytes();
        control.extend_from_slice(line.as_bytes());
        match session.throttle.acquire(std::time::Instant::now()) {
            None => self.send_control(control),
            Some(at) => {
                if let Some(scheduler) = &self.scheduler {
                    scheduler.schedule(
                        tokio::time::Instant::from_std(at),
                        ScheduledAction::ThrottledSend { line: control },
                    );
                }
            }
        }
        Ok(())
    }

    /// Replace the profile configuration: rewrite the file, reconcile live
    /// connections, and dial newly enabled profiles.
    fn set_profiles(
        &mut self,
        mut profiles: ProfileMap,
        user_config_path: &std::path::Path,
    ) -> Result<(), String> {
        // A null password on an existing profile keeps the stored secret
        // (get-profiles redacts it, so round-trips would otherwise lose it).
        for (name, profile) in profiles.iter_mut() {
            if profile.nickserv_password.is_none() {
                if let Some(old) = self.profiles.get(name) {
                    profile.nickserv_password = old.nickserv_password.clone();
                }
            }
        }
        config::save_profiles(user_config_path, &profiles)
            .map_err(|e| format!("Could not save profiles: {e}"))?;
        self.profiles = profiles;

        let mut active: HashSet<String> = HashSet::new();
        let live: Vec<(u64, String, RegState)> = self
            .sessions
            .iter()
            .map(|(&id, s)| (id, s.profile_name.clone(), s.reg_state()))
            .collect();
        for (connection_id, name, reg_state) in live {
            match self.profiles.get(&name) {
                Some(profile) if profile.connect => {
                    active.insert(name);
                    if reg_state == RegState::Registered {
                        self.drive_registered(connection_id);
                    }
                }
                _ => self.send_disconnect(connection_id, true),
            }
        }

        let idle: Vec<String> = self
            .profiles
            .iter()
            .filter(|(name, profile)| profile.connect && !active.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in idle {
            self.try_connect(&name);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event handlers. All take the state lock already held; the collect-then-
// emit structure keeps session borrows disjoint from window appends.
// ---------------------------------------------------------------------------

fn handle_connection(
    state: &mut ProcessorState,
    connection_id: u64,
    timestamp: i64,
    line: &str,
    realtime: bool,
) {
    if let Some(rest) = line.strip_prefix("connect ") {
        let mut parts = rest.splitn(4, ' ');
        let (Some(hostname), Some(port), Some(ssl), Some(profile_name)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            warn!(connection_id, line, "Malformed connect event");
            return;
        };
        let Some(profile) = state.profiles.get(profile_name).cloned() else {
            error!(connection_id, profile = %profile_name, "Connect event for unknown profile");
            return;
        };
        let profile_name = profile_name.to_string();
        state.sessions.insert(
            connection_id,
            IrcSession::new(profile_name.clone(), profile),
        );
        let ssl = if ssl == "true" { "ssl" } else { "nossl" };
        state.append_line(
            &profile_name,
            "",
            flags::CONNECTING,
            timestamp,
            vec![hostname.to_string(), port.to_string(), ssl.to_string()],
        );
    } else if let Some(remote_ip) = line.strip_prefix("opened ") {
        let Some(session) = state.sessions.get_mut(&connection_id) else {
            error!(connection_id, "Opened event without session");
            return;
        };
        session.set_reg_state(RegState::Opened);
        let profile_name = session.profile_name.clone();
        let first_nick = session.profile.nicknames.first().cloned();
        if realtime {
            if let Some(nick) = first_nick {
                state.send_irc_line(connection_id, "NICK", &[&nick]);
            }
        }
        state.push_update(Update::Connected {
            profile: profile_name.clone(),
        });
        state.append_line(
            &profile_name,
            "",
            flags::CONNECTED,
            timestamp,
            vec![remote_ip.to_string()],
        );
    } else if line == "disconnect" {
        // Graceful close requested; the closed event does the work.
    } else if line == "closed" {
        let Some(session) = state.sessions.remove(&connection_id) else {
            return;
        };
        let profile_name = session.profile_name.clone();
        state.push_update(Update::Disconnected {
            profile: profile_name.clone(),
        });
        for channel in session.channels.keys() {
            state.append_line(
                &profile_name,
                channel.proper(),
                flags::DISCONNECTED,
                timestamp,
                Vec::new(),
            );
        }
        state.append_line(&profile_name, "", flags::DISCONNECTED, timestamp, Vec::new());
        if realtime {
            let reconnect = state
                .profiles
                .get(&profile_name)
                .is_some_and(|profile| profile.connect);
            if reconnect {
                state.try_connect(&profile_name);
            }
        }
    } else {
        warn!(connection_id, line, "Unknown connection event");
    }
}

fn handle_receive(
    state: &mut ProcessorState,
    connection_id: u64,
    timestamp: i64,
    raw: &str,
    realtime: bool,
) {
    if !state.sessions.contains_key(&connection_id) {
        error!(connection_id, "RECEIVE event without session");
        return;
    }
    let line = match IrcLine::parse(raw) {
        Ok(line) => line,
        Err(e) => {
            debug!(connection_id, raw, error = %e, "Dropping unparseable IRC line");
            return;
        }
    };
    let profile = match state.sessions.get(&connection_id) {
        Some(session) => session.profile_name.clone(),
        None => return,
    };

    match line.command.as_str() {
        "NICK" => receive_nick(state, connection_id, &profile, timestamp, &line),
        "JOIN" => receive_join(state, connection_id, &profile, timestamp, &line),
        "PART" => receive_part(state, connection_id, &profile, timestamp, &line),
        "KICK" => receive_kick(state, connection_id, &profile, timestamp, &line),
        "QUIT" => receive_quit(state, connection_id, &profile, timestamp, &line),
        "PRIVMSG" => receive_privmsg(state, connection_id, &profile, timestamp, &line),
        "NOTICE" => receive_notice(state, &profile, timestamp, &line),
        "MODE" => receive_mode(state, &profile, timestamp, &line),
        "TOPIC" => receive_topic(state, connection_id, &profile, timestamp, &line),
        "001" | "002" | "003" | "004" | "005" => {
            receive_welcome(state, connection_id, &profile, &line, realtime);
        }
        "432" | "433" => receive_bad_nickname(state, connection_id, realtime),
        "331" => receive_no_topic(state, connection_id, &profile, timestamp, &line),
        "332" => receive_initial_topic(state, connection_id, &profile, timestamp, &line),
        "353" => receive_names_reply(state, connection_id, &line),
        "366" => receive_end_of_names(state, connection_id, &profile, timestamp),
        _ => {}
    }

    // Surface other numeric replies in the server window, with our own
    // nickname (parameter 0) stripped.
    if line.is_numeric() {
        match line.command.as_str() {
            "331" | "332" | "333" | "353" | "366" => {}
            command => {
                if matches!(command, "432" | "433") {
                    let registered = state
                        .sessions
                        .get(&connection_id)
                        .is_some_and(|s| s.reg_state() == RegState::Registered);
                    if !registered {
                        return;
                    }
                }
                let text = line.params.get(1..).unwrap_or_default().join(" ");
                state.append_line(
                    &profile,
                    "",
                    flags::SERVERREPLY,
                    timestamp,
                    vec![command.to_string(), text],
                );
            }
        }
    }
}

fn receive_nick(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let from = line.source().to_string();
    let to = line.param(0).to_string();
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    let was_self = session.is_current_nickname(&from);
    if was_self {
        session.set_nickname(Some(to.clone()));
    }
    let mut renamed_in = Vec::new();
    for (channel, chan) in session.channels.iter_mut() {
        if chan.remove_member(&from) {
            chan.add_member(&to);
            renamed_in.push(channel.proper().to_string());
        }
    }
    if was_self {
        state.push_update(Update::MyNick {
            profile: profile.to_string(),
            nickname: to.clone(),
        });
    }
    for channel in renamed_in {
        state.append_line(
            profile,
            &channel,
            flags::NICK,
            timestamp,
            vec![from.clone(), to.clone()],
        );
    }
}

fn receive_join(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let who = line.source().to_string();
    let channel = line.param(0).to_string();
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    let mut joined = false;
    if session.is_current_nickname(&who) && !session.has_channel(&channel) {
        session.add_channel(&channel);
        joined = true;
    }
    let added = session
        .channel_mut(&channel)
        .is_some_and(|chan| chan.add_member(&who));
    if joined {
        state.push_update(Update::Joined {
            profile: profile.to_string(),
            channel: channel.clone(),
        });
    }
    if added {
        state.append_line(profile, &channel, flags::JOIN, timestamp, vec![who]);
    }
}

fn receive_part(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let who = line.source().to_string();
    let channel = line.param(0).to_string();
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    let removed = session
        .channel_mut(&channel)
        .is_some_and(|chan| chan.remove_member(&who));
    let was_self = session.is_current_nickname(&who);
    if was_self {
        session.remove_channel(&channel);
    }
    if removed {
        state.append_line(profile, &channel, flags::PART, timestamp, vec![who]);
    }
    if was_self {
        state.push_update(Update::Parted {
            profile: profile.to_string(),
            channel,
        });
    }
}

fn receive_kick(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let kicker = line.source().to_string();
    let channels: Vec<String> = line.param(0).split(',').map(str::to_string).collect();
    let targets: Vec<String> = line.param(1).split(',').map(str::to_string).collect();
    let reason = line.param(2).to_string();

    for channel in channels {
        let mut kicked_others = Vec::new();
        let mut me_kicked = false;
        let mut my_nickname = String::new();
        {
            let Some(session) = state.sessions.get_mut(&connection_id) else {
                return;
            };
            for target in &targets {
                let is_self = session.is_current_nickname(target);
                let removed = session
                    .channel_mut(&channel)
                    .is_some_and(|chan| chan.has_member(target) && chan.remove_member(target));
                if removed {
                    if is_self {
                        me_kicked = true;
                        my_nickname = session.nickname().unwrap_or_default().to_string();
                    } else {
                        kicked_others.push(target.clone());
                    }
                }
            }
            if me_kicked {
                session.remove_channel(&channel);
            }
        }
        for target in kicked_others {
            state.append_line(
                profile,
                &channel,
                flags::KICK,
                timestamp,
                vec![target, kicker.clone(), reason.clone()],
            );
        }
        if me_kicked {
            // Our own kick line goes last, then the window-level update.
            state.append_line(
                profile,
                &channel,
                flags::KICK,
                timestamp,
                vec![my_nickname, kicker.clone(), reason.clone()],
            );
            state.push_update(Update::Kicked {
                profile: profile.to_string(),
                channel: channel.clone(),
                kicker: kicker.clone(),
                reason: reason.clone(),
            });
        }
    }
}

fn receive_quit(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let who = line.source().to_string();
    let reason = line.param(0).to_string();
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    if session.is_current_nickname(&who) {
        // Our own quit; the closed event will retire the windows.
        return;
    }
    let mut left = Vec::new();
    for (channel, chan) in session.channels.iter_mut() {
        if chan.remove_member(&who) {
            left.push(channel.proper().to_string());
        }
    }
    for channel in left {
        state.append_line(
            profile,
            &channel,
            flags::QUIT,
            timestamp,
            vec![who.clone(), reason.clone()],
        );
    }
}

fn receive_privmsg(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let who = line.source().to_string();
    let target = line.param(0);
    let text = line.param(1).to_string();
    let party = if is_channel_name(target) {
        target.to_string()
    } else {
        who.clone()
    };
    let mut line_flags = flags::PRIVMSG;
    if let Some(session) = state.sessions.get(&connection_id) {
        if session.nickflag_matches(&text) {
            line_flags |= flags::NICKFLAG;
        }
    }
    state.append_line(profile, &party, line_flags, timestamp, vec![who, text]);
}

fn receive_notice(state: &mut ProcessorState, profile: &str, timestamp: i64, line: &IrcLine) {
    let who = line.source().to_string();
    let target = line.param(0);
    let text = line.param(1).to_string();
    let party = if is_channel_name(target) {
        target.to_string()
    } else {
        who.clone()
    };
    state.append_line(profile, &party, flags::NOTICE, timestamp, vec![who, text]);
}

fn receive_mode(state: &mut ProcessorState, profile: &str, timestamp: i64, line: &IrcLine) {
    let source = line.source().to_string();
    let target = line.param(0);
    // A mode on a non-channel target is about our own user: server window.
    let party = if is_channel_name(target) {
        target.to_string()
    } else {
        String::new()
    };
    let text = line.params.get(1..).unwrap_or_default().join(" ");
    state.append_line(profile, &party, flags::MODE, timestamp, vec![source, text]);
}

fn receive_topic(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let who = line.source().to_string();
    let channel = line.param(0).to_string();
    let text = line.param(1).to_string();
    if let Some(session) = state.sessions.get_mut(&connection_id) {
        if let Some(chan) = session.channel_mut(&channel) {
            chan.topic = Some(text.clone());
        }
    }
    state.append_line(profile, &channel, flags::TOPIC, timestamp, vec![who, text]);
}

fn receive_welcome(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    line: &IrcLine,
    realtime: bool,
) {
    let feedback_nick = line.param(0).to_string();
    {
        let Some(session) = state.sessions.get_mut(&connection_id) else {
            return;
        };
        if session.reg_state() == RegState::Registered {
            return;
        }
        // Some servers silently truncate the proposed nickname; the welcome
        // carries the name they actually accepted.
        if let Some(current) = session.nickname() {
            if current.starts_with(&feedback_nick) && current != feedback_nick {
                session.set_nickname(Some(feedback_nick.clone()));
            }
        }
        session.set_reg_state(RegState::Registered);
    }
    if realtime {
        state.drive_registered(connection_id);
    }
    let nickname = state
        .sessions
        .get(&connection_id)
        .and_then(|s| s.nickname())
        .unwrap_or_default()
        .to_string();
    state.push_update(Update::MyNick {
        profile: profile.to_string(),
        nickname,
    });
    state.reconnect.clear(profile);
}

fn receive_bad_nickname(state: &mut ProcessorState, connection_id: u64, realtime: bool) {
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    if session.reg_state() == RegState::Registered {
        return;
    }
    session.move_nickname_to_rejected();
    if realtime {
        match session.next_usable_nickname().map(str::to_string) {
            Some(nick) => state.send_irc_line(connection_id, "NICK", &[&nick]),
            None => state.send_disconnect(connection_id, false),
        }
    }
}

fn receive_no_topic(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let channel = line.param(1).to_string();
    if let Some(session) = state.sessions.get_mut(&connection_id) {
        if let Some(chan) = session.channel_mut(&channel) {
            chan.topic = None;
        }
    }
    state.append_line(profile, &channel, flags::INITNOTOPIC, timestamp, Vec::new());
}

fn receive_initial_topic(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
    line: &IrcLine,
) {
    let channel = line.param(1).to_string();
    let text = line.param(2).to_string();
    if let Some(session) = state.sessions.get_mut(&connection_id) {
        if let Some(chan) = session.channel_mut(&channel) {
            chan.topic = Some(text.clone());
        }
    }
    state.append_line(profile, &channel, flags::INITTOPIC, timestamp, vec![text]);
}

fn receive_names_reply(state: &mut ProcessorState, connection_id: u64, line: &IrcLine) {
    let channel = line.param(2).to_string();
    let names = line.param(3).to_string();
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    let Some(chan) = session.channel_mut(&channel) else {
        return;
    };
    // First reply of a burst replaces the member set wholesale.
    if !chan.processing_names_reply {
        chan.processing_names_reply = true;
        chan.members.clear();
    }
    for name in names.split(' ') {
        let name = name
            .strip_prefix(&['@', '+', '!', '%', '&', '~'][..])
            .unwrap_or(name);
        if !name.is_empty() {
            chan.add_member(name);
        }
    }
}

fn receive_end_of_names(
    state: &mut ProcessorState,
    connection_id: u64,
    profile: &str,
    timestamp: i64,
) {
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    let mut flushes = Vec::new();
    for (channel, chan) in session.channels.iter_mut() {
        if chan.processing_names_reply {
            chan.processing_names_reply = false;
            flushes.push((channel.proper().to_string(), chan.members_sorted()));
        }
    }
    for (channel, members) in flushes {
        state.append_line(profile, &channel, flags::NAMES, timestamp, members);
    }
}

fn handle_send(state: &mut ProcessorState, connection_id: u64, timestamp: i64, raw: &str) {
    if !state.sessions.contains_key(&connection_id) {
        error!(connection_id, "SEND event without session");
        return;
    }
    let line = match IrcLine::parse(raw) {
        Ok(line) => line,
        Err(e) => {
            debug!(connection_id, raw, error = %e, "Dropping unparseable sent line");
            return;
        }
    };
    let Some(session) = state.sessions.get_mut(&connection_id) else {
        return;
    };
    let profile = session.profile_name.clone();

    match line.command.as_str() {
        "NICK" => {
            if session.reg_state() == RegState::Opened {
                session.set_reg_state(RegState::NickSent);
            }
            if session.reg_state() != RegState::Registered {
                session.set_nickname(Some(line.param(0).to_string()));
            }
            // Once registered, the server's NICK echo is authoritative.
        }
        "USER" => {
            if session.reg_state() == RegState::NickSent {
                session.set_reg_state(RegState::UserSent);
            }
        }
        "PRIVMSG" => {
            if line.params.len() == 2
                && line.param(0) == "NickServ"
                && line.param(1).to_ascii_uppercase().starts_with("IDENTIFY ")
            {
                session.sent_nickserv_password = true;
            }
            let from = session.nickname().unwrap_or_default().to_string();
            let party = line.param(0).to_string();
            let text = line.param(1).to_string();
            state.append_line(
                &profile,
                &party,
                flags::PRIVMSG | flags::OUTGOING,
                timestamp,
                vec![from, text],
            );
        }
        "NOTICE" => {
            let from = session.nickname().unwrap_or_default().to_string();
            let party = line.param(0).to_string();
            let text = line.param(1).to_string();
            state.append_line(
                &profile,
                &party,
                flags::NOTICE | flags::OUTGOING,
                timestamp,
                vec![from, text],
            );
        }
        _ => {}
    }
}
