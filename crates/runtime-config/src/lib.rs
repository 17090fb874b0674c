//! Relay configuration types.
//!
//! The server reads `huddle.toml`, then applies environment overrides and
//! finally its command-line flags. Every field has a serde default so a
//! partial (or absent) file is always valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Canonical config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "huddle.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Top-level relay configuration (persisted as `huddle.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitSettings {
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_video_participants")]
    pub max_video_participants: usize,
    #[serde(default = "default_max_rooms_per_connection")]
    pub max_rooms_per_connection: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
            max_video_participants: default_max_video_participants(),
            max_rooms_per_connection: default_max_rooms_per_connection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatSettings {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
        }
    }
}

impl HeartbeatSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// How long a connection may stay silent before it is dropped.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs + self.ping_timeout_secs)
    }
}

impl RelayConfig {
    /// Load from `path`, or from `huddle.toml` in the working directory when
    /// no path is given. Only an explicit path is required to exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(CONFIG_FILE_NAME), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        apply_fallbacks(&mut config);
        Ok(config)
    }

    /// Apply `PORT`, `HUDDLE_BIND` and `HUDDLE_CORS_ORIGINS` from `lookup`.
    /// Returns true when any field was updated.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<bool, ConfigError> {
        let mut changed = false;

        if let Some(port) = non_empty(lookup("PORT")) {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PORT",
                value: port.clone(),
            })?;
            changed = true;
        }

        if let Some(bind) = non_empty(lookup("HUDDLE_BIND")) {
            self.server.bind = bind;
            changed = true;
        }

        if let Some(origins) = non_empty(lookup("HUDDLE_CORS_ORIGINS")) {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
            changed = true;
        }

        Ok(changed)
    }

    pub fn listen_addr(&self) -> String {
        let bind = &self.server.bind;
        if bind.contains(':') && !bind.starts_with('[') {
            format!("[{bind}]:{}", self.server.port)
        } else {
            format!("{bind}:{}", self.server.port)
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ── Serde default functions ─────────────────────────────────────────────

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3001
}
fn default_max_message_bytes() -> usize {
    64 * 1024
}
fn default_max_video_participants() -> usize {
    8
}
fn default_max_rooms_per_connection() -> usize {
    64
}
fn default_ping_interval_secs() -> u64 {
    25
}
fn default_ping_timeout_secs() -> u64 {
    20
}

/// Replace zero limits and an empty bind address with defaults.
/// Returns true when any field was updated.
pub fn apply_fallbacks(config: &mut RelayConfig) -> bool {
    let mut changed = false;

    if config.server.bind.trim().is_empty() {
        config.server.bind = default_bind();
        changed = true;
    }

    let limits = &mut config.limits;
    for (value, default) in [
        (&mut limits.max_message_bytes, default_max_message_bytes()),
        (
            &mut limits.max_video_participants,
            default_max_video_participants(),
        ),
        (
            &mut limits.max_rooms_per_connection,
            default_max_rooms_per_connection(),
        ),
    ] {
        if *value == 0 {
            *value = default;
            changed = true;
        }
    }

    if config.heartbeat.ping_interval_secs == 0 {
        config.heartbeat.ping_interval_secs = default_ping_interval_secs();
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_stable() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:3001");
        assert!(cfg.server.cors_origins.is_empty());
        assert_eq!(cfg.limits.max_message_bytes, 65_536);
        assert_eq!(cfg.limits.max_video_participants, 8);
        assert_eq!(cfg.heartbeat.idle_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
[server]
port = 4000

[limits]
max_video_participants = 4
"#,
        )
        .expect("parse toml");

        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.limits.max_video_participants, 4);
        assert_eq!(cfg.limits.max_rooms_per_connection, 64);
        assert_eq!(cfg.heartbeat.ping_interval_secs, 25);
    }

    #[test]
    fn fallbacks_replace_zero_values() {
        let mut cfg: RelayConfig = toml::from_str(
            r#"
[server]
bind = ""

[limits]
max_message_bytes = 0
max_video_participants = 0

[heartbeat]
ping_interval_secs = 0
ping_timeout_secs = 0
"#,
        )
        .expect("parse toml");

        assert!(apply_fallbacks(&mut cfg));
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.limits.max_message_bytes, 65_536);
        assert_eq!(cfg.limits.max_video_participants, 8);
        assert_eq!(cfg.heartbeat.ping_interval_secs, 25);
        // A zero timeout is legitimate: drop as soon as a ping goes unanswered.
        assert_eq!(cfg.heartbeat.ping_timeout_secs, 0);
    }

    #[test]
    fn fallbacks_are_noop_for_defaults() {
        let mut cfg = RelayConfig::default();
        assert!(!apply_fallbacks(&mut cfg));
        assert_eq!(cfg, RelayConfig::default());
    }

    #[test]
    fn env_overrides_port_bind_and_origins() {
        let mut cfg = RelayConfig::default();
        let changed = cfg
            .apply_env_overrides(env(&[
                ("PORT", "8080"),
                ("HUDDLE_BIND", "127.0.0.1"),
                ("HUDDLE_CORS_ORIGINS", "https://app.example.com, http://localhost:5173,"),
            ]))
            .expect("apply env");

        assert!(changed);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:8080");
        assert_eq!(
            cfg.server.cors_origins,
            vec!["https://app.example.com", "http://localhost:5173"]
        );
    }

    #[test]
    fn ipv6_bind_is_bracketed() {
        let mut cfg = RelayConfig::default();
        cfg.server.bind = "::".into();
        assert_eq!(cfg.listen_addr(), "[::]:3001");
    }

    #[test]
    fn env_override_rejects_bad_port() {
        let mut cfg = RelayConfig::default();
        let err = cfg
            .apply_env_overrides(env(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "PORT", .. }));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = RelayConfig::default();
        let changed = cfg
            .apply_env_overrides(env(&[("PORT", ""), ("HUDDLE_BIND", "  ")]))
            .expect("apply env");
        assert!(!changed);
        assert_eq!(cfg, RelayConfig::default());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[heartbeat]\nping_interval_secs = 10\n").expect("write config");

        let cfg = RelayConfig::load(Some(&path)).expect("load config");
        assert_eq!(cfg.heartbeat.ping_interval_secs, 10);
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RelayConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server]\nport = \"high\"\n").expect("write config");

        let err = RelayConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
