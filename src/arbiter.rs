//! Half-duplex AT command arbiter.
//!
//! A single background task owns the [`Transport`] exclusively and runs a
//! continuous read pump: every line read off the wire is classified, in
//! the order it arrived, as either part of the in-flight command's
//! response or a URC. This is deliberately not a strict bracketing model —
//! see `DESIGN.md`'s Open Question 3 — so URCs are never withheld while a
//! command is in flight.
//!
//! Grounded on the teacher's `modem.rs` request/response oneshot
//! correlation idiom, generalized from a per-command blocking thread to a
//! long-lived pump task so URC capture and command responses share one
//! reader without contention.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::transport::Transport;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
const TRAILING_GRACE: Duration = Duration::from_millis(100);
const MIN_COMMAND_GAP: Duration = Duration::from_millis(100);
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
const URC_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub ok: bool,
    pub body: Option<String>,
    pub error: Option<String>,
    /// Set when the response buffer hit the 1 MiB cap before a terminator
    /// was seen (spec §3 invariant, §8 property 4).
    pub truncated: bool,
}

struct PendingCommand {
    echo: String,
    buf: Vec<u8>,
    terminator_seen_at: Option<Instant>,
    reply: Option<oneshot::Sender<AtResponse>>,
}

enum PumpMessage {
    Write(Vec<u8>, oneshot::Sender<AtResponse>),
    Reconnect(oneshot::Sender<bool>),
}

/// Handle used by every other component (Hub, handlers, scheduler) to send
/// commands through the single owning lane.
#[derive(Clone)]
pub struct Arbiter {
    send_lock: std::sync::Arc<Mutex<()>>,
    pump_tx: mpsc::Sender<PumpMessage>,
    urc_tx: broadcast::Sender<String>,
    connected: std::sync::Arc<std::sync::atomic::AtomicBool>,
    connect_kind_code: u8,
}

impl Arbiter {
    /// Spawn the pump task over an already-constructed transport and
    /// return a handle. The transport is moved into the pump and is no
    /// longer reachable from outside the Arbiter.
    pub fn spawn(transport: Transport) -> Self {
        let connect_kind_code = transport.connect_kind_code();
        let (pump_tx, pump_rx) = mpsc::channel::<PumpMessage>(8);
        let (urc_tx, _) = broadcast::channel(URC_CHANNEL_CAPACITY);
        let connected = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(
            transport.is_connected(),
        ));

        let urc_tx_pump = urc_tx.clone();
        let connected_pump = connected.clone();
        tokio::spawn(run_pump(transport, pump_rx, urc_tx_pump, connected_pump));

        Self {
            send_lock: std::sync::Arc::new(Mutex::new(())),
            pump_tx,
            urc_tx,
            connected,
            connect_kind_code,
        }
    }

    pub fn subscribe_urc(&self) -> broadcast::Receiver<String> {
        self.urc_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// `0` for a network transport, `1` for serial/helper (spec §4.6's
    /// synthetic `AT+CONNECT?` response). Cached at spawn time since the
    /// transport itself is moved into the pump task.
    pub fn connect_kind_code(&self) -> u8 {
        self.connect_kind_code
    }

    /// Serialize and send a single AT command, returning its response (or
    /// a disconnected error). Enforces the minimum inter-command gap.
    pub async fn send(&self, command: &str) -> Result<AtResponse, String> {
        let _guard = self.send_lock.lock().await;

        let mut line = command.trim_end().to_string();
        if !line.ends_with('\r') {
            line.push('\r');
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pump_tx
            .send(PumpMessage::Write(line.into_bytes(), reply_tx))
            .await
            .map_err(|_| "arbiter pump task is gone".to_string())?;

        match tokio::time::timeout(RESPONSE_TIMEOUT + TRAILING_GRACE + Duration::from_millis(200), reply_rx).await {
            Ok(Ok(response)) => {
                if response.body.is_none() && !response.ok && response.error.is_none() {
                    self.connected
                        .store(false, std::sync::atomic::Ordering::Relaxed);
                }
                Ok(response)
            }
            _ => {
                self.connected
                    .store(false, std::sync::atomic::Ordering::Relaxed);
                Err("arbiter send timed out".to_string())
            }
        }
    }

    pub async fn send_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<AtResponse, String> {
        tokio::time::timeout(timeout, self.send(command))
            .await
            .map_err(|_| "arbiter send timed out".to_string())?
    }

    /// Ask the pump task to close and reopen its transport. Used by the
    /// Supervisor's reconnect loop; returns whether the reopen succeeded.
    pub async fn reconnect(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.pump_tx.send(PumpMessage::Reconnect(tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

async fn run_pump(
    mut transport: Transport,
    mut pump_rx: mpsc::Receiver<PumpMessage>,
    urc_tx: broadcast::Sender<String>,
    connected: std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    let mut line_buf: Vec<u8> = Vec::new();
    let mut pending: Option<PendingCommand> = None;
    let mut last_send: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            msg = pump_rx.recv() => {
                let (bytes, reply_tx) = match msg {
                    Some(PumpMessage::Write(bytes, reply_tx)) => (bytes, reply_tx),
                    Some(PumpMessage::Reconnect(done_tx)) => {
                        transport.close().await;
                        let opened = transport.open().await;
                        connected.store(opened, std::sync::atomic::Ordering::Relaxed);
                        let _ = done_tx.send(opened);
                        continue;
                    }
                    None => break,
                };
                if let Some(gap_remaining) = last_send
                    .map(|t| MIN_COMMAND_GAP.saturating_sub(t.elapsed()))
                    .filter(|d| !d.is_zero())
                {
                    tokio::time::sleep(gap_remaining).await;
                }
                line_buf.clear();
                let echo = String::from_utf8_lossy(&bytes).trim().to_string();
                if let Err(e) = transport.write(&bytes).await {
                    warn!(error = %e, "arbiter write failed");
                    connected.store(false, std::sync::atomic::Ordering::Relaxed);
                    let _ = reply_tx.send(AtResponse { ok: false, body: None, error: Some(e), truncated: false });
                    last_send = Some(Instant::now());
                    continue;
                }
                last_send = Some(Instant::now());
                pending = Some(PendingCommand {
                    echo,
                    buf: Vec::new(),
                    terminator_seen_at: None,
                    reply: Some(reply_tx),
                });
                run_response_wait(&mut transport, &mut pending, &urc_tx, &connected).await;
            }

            _ = tokio::time::sleep(Duration::from_millis(150)), if pending.is_none() => {
                // idle poll: drain any URC traffic that arrives with no command in flight
                match transport.read(4096).await {
                    Ok(bytes) if !bytes.is_empty() => {
                        connected.store(true, std::sync::atomic::Ordering::Relaxed);
                        line_buf.extend_from_slice(&bytes);
                        drain_lines(&mut line_buf, &mut pending, &urc_tx);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "arbiter idle read error");
                        connected.store(false, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Reads until the in-flight command completes (terminator + trailing
/// grace, or timeout), classifying every line as response-body or URC.
async fn run_response_wait(
    transport: &mut Transport,
    pending: &mut Option<PendingCommand>,
    urc_tx: &broadcast::Sender<String>,
    connected: &std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    let deadline = Instant::now() + RESPONSE_TIMEOUT;
    let mut line_buf: Vec<u8> = Vec::new();

    loop {
        let now = Instant::now();
        if let Some(p) = pending.as_ref() {
            if let Some(seen_at) = p.terminator_seen_at {
                if now >= seen_at + TRAILING_GRACE {
                    complete_pending(pending, false);
                    return;
                }
            } else if now >= deadline {
                complete_pending(pending, true);
                return;
            }
        } else {
            return;
        }

        let remaining = if let Some(seen_at) = pending.as_ref().and_then(|p| p.terminator_seen_at)
        {
            (seen_at + TRAILING_GRACE).saturating_duration_since(now)
        } else {
            deadline.saturating_duration_since(now)
        };
        let read_budget = remaining.min(Duration::from_millis(150)).max(Duration::from_millis(10));

        match tokio::time::timeout(read_budget, transport.read(4096)).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => {
                connected.store(true, std::sync::atomic::Ordering::Relaxed);
                line_buf.extend_from_slice(&bytes);
                drain_lines(&mut line_buf, pending, urc_tx);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "arbiter read error during command");
                connected.store(false, std::sync::atomic::Ordering::Relaxed);
            }
            Err(_) => {} // soft per-iteration timeout, loop re-checks deadlines
        }
    }
}

fn complete_pending(pending: &mut Option<PendingCommand>, timed_out: bool) {
    let Some(mut p) = pending.take() else { return };
    let Some(reply) = p.reply.take() else { return };

    if timed_out {
        let _ = reply.send(AtResponse {
            ok: false,
            body: None,
            error: Some("response timeout".to_string()),
            truncated: p.buf.len() >= MAX_RESPONSE_BYTES,
        });
        return;
    }

    let raw = String::from_utf8_lossy(&p.buf).to_string();
    let response = parse_response(&raw, &p.echo);
    let _ = reply.send(response);
}

/// Splits `line_buf` on `\n`, feeding complete lines to either the pending
/// command's buffer or the URC broadcast channel. Any partial trailing
/// line is left in `line_buf` for the next read.
fn drain_lines(
    line_buf: &mut Vec<u8>,
    pending: &mut Option<PendingCommand>,
    urc_tx: &broadcast::Sender<String>,
) {
    loop {
        let Some(newline_pos) = line_buf.iter().position(|&b| b == b'\n') else {
            break;
        };
        let raw_line: Vec<u8> = line_buf.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&raw_line).trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(p) = pending.as_mut() {
            if p.buf.len() < MAX_RESPONSE_BYTES {
                let remaining = MAX_RESPONSE_BYTES - p.buf.len();
                let mut with_newline = line.clone();
                with_newline.push('\n');
                let bytes = with_newline.as_bytes();
                let take = bytes.len().min(remaining);
                p.buf.extend_from_slice(&bytes[..take]);
            } else {
                warn!("arbiter response buffer truncated at 1 MiB cap");
            }

            if is_echo_line(&line, &p.echo) {
                // echo is not part of the body; already appended above, so
                // drop it back out
                let echo_bytes_len = line.len() + 1;
                let new_len = p.buf.len().saturating_sub(echo_bytes_len);
                p.buf.truncate(new_len);
                continue;
            }

            if is_terminator(&line) {
                p.terminator_seen_at = Some(Instant::now());
                continue;
            }

            // Non-echo, non-terminator lines received while a command is
            // in flight are still forwarded as URCs per spec §4.3's
            // minimal guarantee, in addition to being kept in the body.
            let _ = urc_tx.send(line);
        } else {
            let _ = urc_tx.send(line);
        }
    }
}

fn is_echo_line(line: &str, echo: &str) -> bool {
    let echo_trimmed = echo.trim_end_matches('\r');
    line == echo_trimmed
}

fn is_terminator(line: &str) -> bool {
    line == "OK"
        || line == "ERROR"
        || line.starts_with("+CME ERROR:")
        || line.starts_with("+CMS ERROR:")
}

/// Build an [`AtResponse`] from the accumulated raw body and the command
/// echo, matching the teacher's `strip_echo`/`response_is_complete` idiom.
fn parse_response(raw: &str, echo: &str) -> AtResponse {
    let echo_trimmed = echo.trim_end_matches('\r');
    let mut body_lines = Vec::new();
    let mut ok = false;
    let mut error = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == echo_trimmed {
            continue;
        }
        if trimmed == "OK" {
            ok = true;
            continue;
        }
        if trimmed == "ERROR" {
            error = Some("ERROR".to_string());
            continue;
        }
        if trimmed.starts_with("+CME ERROR:") || trimmed.starts_with("+CMS ERROR:") {
            error = Some(trimmed.to_string());
            continue;
        }
        body_lines.push(trimmed.to_string());
    }

    let body = if body_lines.is_empty() {
        None
    } else {
        Some(body_lines.join("\n"))
    };

    AtResponse {
        ok,
        body,
        error,
        truncated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_response_with_body() {
        let raw = "AT+CSQ\n+CSQ: 20,99\nOK\n";
        let resp = parse_response(raw, "AT+CSQ\r");
        assert!(resp.ok);
        assert_eq!(resp.body.as_deref(), Some("+CSQ: 20,99"));
        assert!(resp.error.is_none());
    }

    #[test]
    fn parses_error_response() {
        let raw = "AT+CMGR=99\n+CMS ERROR: 321\n";
        let resp = parse_response(raw, "AT+CMGR=99\r");
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("+CMS ERROR: 321"));
    }

    #[test]
    fn recognizes_terminators() {
        assert!(is_terminator("OK"));
        assert!(is_terminator("ERROR"));
        assert!(is_terminator("+CME ERROR: 10"));
        assert!(is_terminator("+CMS ERROR: 500"));
        assert!(!is_terminator("+CSQ: 20,99"));
    }

    #[test]
    fn drains_urc_lines_when_idle() {
        let (urc_tx, mut urc_rx) = broadcast::channel(8);
        let mut pending = None;
        let mut buf = b"+CMTI: \"SM\",3\n".to_vec();
        drain_lines(&mut buf, &mut pending, &urc_tx);
        let received = urc_rx.try_recv().expect("expected a URC");
        assert_eq!(received, "+CMTI: \"SM\",3");
    }
}
