//! Configuration loading: TOML file + compiled defaults, with environment
//! variable overrides for the handful of values worth overriding without a
//! file edit. Precedence is env var > config file > compiled default,
//! mirroring the teacher's `config.rs`. Loading from a host key/value store
//! (UCI, etc.) is out of scope here — see `original_source/at-server.py`
//! for the shape this crate's section names are kept compatible with.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub websocket: WebSocketConfig,
    pub notifications: NotificationsConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            websocket: WebSocketConfig::default(),
            notifications: NotificationsConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportKind {
    Network,
    Serial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SerialMethod {
    Direct,
    Helper,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub network: NetworkConfig,
    pub serial: SerialConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Network,
            network: NetworkConfig::default(),
            serial: SerialConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub timeout_s: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            timeout_s: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub timeout_s: u64,
    pub method: SerialMethod,
    pub feature: Option<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB2".to_string(),
            baudrate: 115200,
            timeout_s: 5,
            method: SerialMethod::Direct,
            feature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub port: u16,
    /// Empty string means auth is disabled.
    pub auth_key: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            port: 7890,
            auth_key: String::new(),
        }
    }
}

impl WebSocketConfig {
    pub fn auth_enabled(&self) -> bool {
        !self.auth_key.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    pub log_file: Option<String>,
    pub send_interval_s: u64,
    pub enable_sms: bool,
    pub enable_call: bool,
    pub enable_memory_full: bool,
    pub enable_signal: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            log_file: None,
            send_interval_s: 60,
            enable_sms: true,
            enable_call: true,
            enable_memory_full: true,
            enable_signal: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NotificationKind {
    Sms,
    Call,
    MemoryFull,
    Signal,
}

impl NotificationsConfig {
    pub fn kind_enabled(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Sms => self.enable_sms,
            NotificationKind::Call => self.enable_call,
            NotificationKind::MemoryFull => self.enable_memory_full,
            NotificationKind::Signal => self.enable_signal,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub check_interval_s: u64,
    pub no_service_timeout_s: u64,
    pub unlock_lte: bool,
    pub unlock_nr: bool,
    pub toggle_airplane: bool,
    pub night: WindowConfig,
    pub day: WindowConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_s: 60,
            no_service_timeout_s: 180,
            unlock_lte: true,
            unlock_nr: true,
            toggle_airplane: true,
            night: WindowConfig {
                enabled: false,
                start: "22:00".to_string(),
                end: "06:00".to_string(),
                lte: RatLock::default(),
                nr: RatLock::default(),
            },
            day: WindowConfig {
                enabled: false,
                start: "06:00".to_string(),
                end: "22:00".to_string(),
                lte: RatLock::default(),
                nr: RatLock::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub enabled: bool,
    /// `HH:MM` wall-clock boundary, local time.
    pub start: String,
    pub end: String,
    pub lte: RatLock,
    pub nr: RatLock,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "00:00".to_string(),
            end: "00:00".to_string(),
            lte: RatLock::default(),
            nr: RatLock::default(),
        }
    }
}

/// Per-RAT band-lock parameters. `lock_type` follows spec §6: `0` = no
/// lock, `1` = EARFCN/NR-ARFCN lock, `2` = cell lock (adds PCIs), `3` =
/// band-only lock.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RatLock {
    pub lock_type: u8,
    pub bands: Vec<String>,
    pub arfcns: Vec<String>,
    pub pcis: Vec<String>,
    pub scs_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration with precedence: explicit `path` > `atgated.toml`
    /// in the current directory > compiled defaults. Environment variable
    /// overrides are then applied on top.
    pub fn load(path: Option<&str>) -> Result<Config, String> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new("atgated.toml").exists() {
            Self::from_file("atgated.toml")?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Config, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {path}: {e}"))?;
        toml::from_str(&text).map_err(|e| format!("failed to parse config file {path}: {e}"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ATGATED_WEBSOCKET_AUTH_KEY") {
            self.websocket.auth_key = v;
        }
        if let Ok(v) = std::env::var("ATGATED_WEBSOCKET_PORT") {
            if let Ok(port) = v.parse() {
                self.websocket.port = port;
            }
        }
        if let Ok(v) = std::env::var("ATGATED_TRANSPORT_NETWORK_HOST") {
            self.transport.network.host = v;
        }
        if let Ok(v) = std::env::var("ATGATED_TRANSPORT_SERIAL_PORT") {
            self.transport.serial.port = v;
        }
        if let Ok(v) = std::env::var("ATGATED_NOTIFICATIONS_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(v);
        }
        if let Ok(v) = std::env::var("ATGATED_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_auth_disabled() {
        let cfg = Config::default();
        assert!(!cfg.websocket.auth_enabled());
    }

    #[test]
    fn env_override_sets_auth_key() {
        std::env::set_var("ATGATED_WEBSOCKET_AUTH_KEY", "secret123");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.websocket.auth_key, "secret123");
        assert!(cfg.websocket.auth_enabled());
        std::env::remove_var("ATGATED_WEBSOCKET_AUTH_KEY");
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            [transport]
            type = "SERIAL"

            [transport.serial]
            port = "/dev/ttyUSB3"
            baudrate = 921600
            method = "HELPER"
            feature = "tom_modem"
        "#;
        let cfg: Config = toml::from_str(toml_str).expect("parse");
        assert_eq!(cfg.transport.kind, TransportKind::Serial);
        assert_eq!(cfg.transport.serial.port, "/dev/ttyUSB3");
        assert_eq!(cfg.transport.serial.method, SerialMethod::Helper);
    }
}
