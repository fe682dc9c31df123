//! Configuration loading and management.
//!
//! Each binary takes exactly one JSON configuration path. The processor's
//! configuration additionally points at the user-profile file, a JSON map of
//! profile name → IRC network definition that `set-profiles` rewrites
//! atomically (temp file + rename).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Connector process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    /// Loopback port for the processor control channel.
    pub control_port: u16,
    /// Shared secret the processor must present first.
    pub control_password: String,
    /// Path to the SQLite event journal.
    pub journal_file: PathBuf,
}

/// Processor process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Connector control port to attach to (loopback).
    pub control_port: u16,
    /// Shared secret for the control channel.
    pub control_password: String,
    /// Port for the web UI HTTP API (loopback).
    pub http_port: u16,
    /// Password the web UI must present to obtain a session cookie.
    pub http_password: String,
    /// Path to the user-profile JSON file.
    pub user_config_file: PathBuf,
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl ConnectorConfig {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }
}

impl ProcessorConfig {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }
}

/// One server endpoint within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Host name or address.
    pub hostname: String,
    /// TCP port.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub ssl: bool,
}

/// A user-defined IRC network: where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Whether the processor should keep a connection to this network.
    pub connect: bool,
    /// Servers tried in rotation by the reconnect controller.
    pub servers: Vec<ServerEndpoint>,
    /// Nicknames tried in order during registration.
    pub nicknames: Vec<String>,
    /// Username (ident) for the USER command.
    pub username: String,
    /// Real name for the USER command.
    pub realname: String,
    /// NickServ password, sent once per session after registration.
    #[serde(default)]
    pub nickserv_password: Option<String>,
    /// Channels to auto-join; an entry may be `"#chan"` or `"#chan key"`.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// The user-profile file: profile name → network definition.
pub type ProfileMap = BTreeMap<String, Profile>;

/// Load the user-profile file.
pub fn load_profiles(path: impl AsRef<Path>) -> Result<ProfileMap, ConfigError> {
    load_json(path.as_ref())
}

/// Rewrite the user-profile file atomically: serialize to a sibling temp
/// file, then rename over the original so readers never observe a torn
/// write.
pub fn save_profiles(path: &Path, profiles: &ProfileMap) -> Result<(), ConfigError> {
    let content = serde_json::to_vec_pretty(profiles)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connector_config() {
        let cfg: ConnectorConfig = serde_json::from_str(
            r#"{"controlPort": 20001, "controlPassword": "s3cret", "journalFile": "journal.db"}"#,
        )
        .unwrap();
        assert_eq!(cfg.control_port, 20001);
        assert_eq!(cfg.journal_file, PathBuf::from("journal.db"));
    }

    #[test]
    fn parses_profile_map() {
        let profiles: ProfileMap = serde_json::from_str(
            r##"{
                "libera": {
                    "connect": true,
                    "servers": [{"hostname": "irc.libera.chat", "port": 6697, "ssl": true}],
                    "nicknames": ["Alice", "Alice_"],
                    "username": "alice",
                    "realname": "Alice Example",
                    "nickservPassword": "hunter2",
                    "channels": ["#rust", "#secret thekey"]
                }
            }"##,
        )
        .unwrap();
        let p = &profiles["libera"];
        assert!(p.connect);
        assert_eq!(p.servers[0].port, 6697);
        assert_eq!(p.nicknames, vec!["Alice", "Alice_"]);
        assert_eq!(p.nickserv_password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn optional_fields_default() {
        let p: Profile = serde_json::from_str(
            r#"{"connect": false, "servers": [], "nicknames": ["n"],
                "username": "u", "realname": "r"}"#,
        )
        .unwrap();
        assert_eq!(p.nickserv_password, None);
        assert!(p.channels.is_empty());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        let mut profiles = ProfileMap::new();
        profiles.insert(
            "net".to_string(),
            Profile {
                connect: true,
                servers: vec![ServerEndpoint {
                    hostname: "irc.example.org".into(),
                    port: 6667,
                    ssl: false,
                }],
                nicknames: vec!["Nick".into()],
                username: "nick".into(),
                realname: "Nick".into(),
                nickserv_password: None,
                channels: vec!["#chat".into()],
            },
        );
        save_profiles(&path, &profiles).unwrap();
        let reloaded = load_profiles(&path).unwrap();
        assert_eq!(reloaded, profiles);
    }
}
