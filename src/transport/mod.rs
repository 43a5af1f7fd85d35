//! Polymorphic AT byte-stream transport: TCP, native serial, or an external
//! helper process. Modeled as a tagged enum (spec §9's design note prefers
//! tagged variants over a trait-object hierarchy for a fixed, small
//! capability set: `open`, `close`, `write`, `read`).

mod helper;
mod serial;
mod tcp;

use std::time::Duration;

pub use helper::HelperTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use crate::config::{TransportConfig, TransportKind};

/// Soft read timeout enforced by every variant — `read` must never block
/// indefinitely (spec §4.2).
pub const READ_TIMEOUT: Duration = Duration::from_millis(150);

pub enum Transport {
    Tcp(TcpTransport),
    Serial(SerialTransport),
    Helper(HelperTransport),
}

impl Transport {
    pub fn from_config(config: &TransportConfig) -> Self {
        match config.kind {
            TransportKind::Network => Transport::Tcp(TcpTransport::new(
                config.network.host.clone(),
                config.network.port,
                Duration::from_secs(config.network.timeout_s),
            )),
            TransportKind::Serial => {
                let serial = &config.serial;
                match serial.method {
                    crate::config::SerialMethod::Direct => Transport::Serial(SerialTransport::new(
                        serial.port.clone(),
                        serial.baudrate,
                        Duration::from_secs(serial.timeout_s),
                    )),
                    crate::config::SerialMethod::Helper => Transport::Helper(HelperTransport::new(
                        serial.port.clone(),
                        serial.feature.clone(),
                    )),
                }
            }
        }
    }

    /// Open the underlying connection. A failed open returns `false`; the
    /// Supervisor is responsible for retrying.
    pub async fn open(&mut self) -> bool {
        match self {
            Transport::Tcp(t) => t.open().await,
            Transport::Serial(t) => t.open().await,
            Transport::Helper(t) => t.open().await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            Transport::Tcp(t) => t.close().await,
            Transport::Serial(t) => t.close().await,
            Transport::Helper(t) => t.close().await,
        }
    }

    /// Write raw bytes, returning the number written, or an error that
    /// marks the transport not-connected.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, String> {
        match self {
            Transport::Tcp(t) => t.write(bytes).await,
            Transport::Serial(t) => t.write(bytes).await,
            Transport::Helper(t) => t.write(bytes).await,
        }
    }

    /// Read up to `max` bytes, with an internal soft timeout; returns an
    /// empty vec (not an error) when no data arrived within the timeout.
    pub async fn read(&mut self, max: usize) -> Result<Vec<u8>, String> {
        match self {
            Transport::Tcp(t) => t.read(max).await,
            Transport::Serial(t) => t.read(max).await,
            Transport::Helper(t) => t.read(max).await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Transport::Tcp(t) => t.is_connected(),
            Transport::Serial(t) => t.is_connected(),
            Transport::Helper(t) => t.is_connected(),
        }
    }

    pub fn mark_disconnected(&mut self) {
        match self {
            Transport::Tcp(t) => t.connected = false,
            Transport::Serial(t) => t.connected = false,
            Transport::Helper(t) => t.connected = false,
        }
    }

    /// `0` for a network transport, `1` for serial/helper — the value the
    /// Hub's synthetic `AT+CONNECT?` handler reports (spec §4.6).
    pub fn connect_kind_code(&self) -> u8 {
        match self {
            Transport::Tcp(_) => 0,
            Transport::Serial(_) | Transport::Helper(_) => 1,
        }
    }
}
