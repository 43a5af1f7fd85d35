use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::READ_TIMEOUT;

pub struct SerialTransport {
    port: String,
    baudrate: u32,
    #[allow(dead_code)] // retained for reconnect bookkeeping, matched to config
    open_timeout: Duration,
    stream: Option<SerialStream>,
    pub(super) connected: bool,
}

impl SerialTransport {
    pub fn new(port: String, baudrate: u32, open_timeout: Duration) -> Self {
        Self {
            port,
            baudrate,
            open_timeout,
            stream: None,
            connected: false,
        }
    }

    pub async fn open(&mut self) -> bool {
        match tokio_serial::new(&self.port, self.baudrate).open_native_async() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.connected = true;
                true
            }
            Err(e) => {
                tracing::warn!(port = %self.port, error = %e, "failed to open serial device");
                self.connected = false;
                false
            }
        }
    }

    pub async fn close(&mut self) {
        self.stream = None;
        self.connected = false;
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, String> {
        let stream = self.stream.as_mut().ok_or("serial transport not open")?;
        match stream.write_all(bytes).await {
            Ok(()) => Ok(bytes.len()),
            Err(e) => {
                self.connected = false;
                Err(format!("serial write error: {e}"))
            }
        }
    }

    /// Returns only bytes already buffered by the OS; never blocks beyond
    /// the soft read timeout.
    pub async fn read(&mut self, max: usize) -> Result<Vec<u8>, String> {
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Err("serial transport not open".to_string()),
        };
        let mut buf = vec![0u8; max];
        match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => {
                self.connected = false;
                Err(format!("serial read error: {e}"))
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
