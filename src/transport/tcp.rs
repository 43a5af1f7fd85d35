use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::READ_TIMEOUT;

pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    pub(super) connected: bool,
}

impl TcpTransport {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            connect_timeout,
            stream: None,
            connected: false,
        }
    }

    pub async fn open(&mut self) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                self.stream = Some(stream);
                self.connected = true;
                true
            }
            _ => {
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
        let stream = self.stream.as_mut().ok_or("tcp transport not open")?;
        match stream.write_all(bytes).await {
            Ok(()) => Ok(bytes.len()),
            Err(e) => {
                self.connected = false;
                Err(format!("tcp write error: {e}"))
            }
        }
    }

    pub async fn read(&mut self, max: usize) -> Result<Vec<u8>, String> {
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Err("tcp transport not open".to_string()),
        };
        let mut buf = vec![0u8; max];
        match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                self.connected = false;
                Err("tcp connection closed by peer".to_string())
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => {
                self.connected = false;
                Err(format!("tcp read error: {e}"))
            }
            Err(_) => Ok(Vec::new()), // soft timeout, no data available
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
