use std::collections::VecDeque;

use tokio::process::Command;

/// Shells out to an external helper for each write; the helper's stdout is
/// captured and surfaced by the next `read` call (one-shot). `open`/`close`
/// are no-ops — the "connection" is logically always up, matching spec
/// §4.2's helper-process variant.
pub struct HelperTransport {
    command: String,
    feature: Option<String>,
    pending: VecDeque<u8>,
    pub(super) connected: bool,
}

impl HelperTransport {
    pub fn new(command: String, feature: Option<String>) -> Self {
        Self {
            command,
            feature,
            pending: VecDeque::new(),
            connected: true,
        }
    }

    pub async fn open(&mut self) -> bool {
        self.connected = true;
        true
    }

    pub async fn close(&mut self) {
        // no-op: the helper process is spawned per-call, nothing to tear down
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, String> {
        let line = String::from_utf8_lossy(bytes).trim().to_string();
        let mut cmd = Command::new(&self.command);
        cmd.arg(&line);
        if let Some(feature) = &self.feature {
            cmd.arg(feature);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| format!("helper process error: {e}"))?;
        if !output.status.success() {
            self.connected = false;
            return Err(format!(
                "helper process exited with status {}",
                output.status
            ));
        }
        self.pending.extend(output.stdout);
        Ok(bytes.len())
    }

    pub async fn read(&mut self, max: usize) -> Result<Vec<u8>, String> {
        let n = self.pending.len().min(max);
        Ok(self.pending.drain(..n).collect())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
