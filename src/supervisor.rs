//! Transport reconnection supervisor (spec §4.8).
//!
//! Grounded on `tunnel/client.rs`'s `ConnectError`/`DisconnectReason`
//! classification idiom, adapted from that module's doubling backoff to
//! this spec's linear-then-fixed schedule, and driving the Arbiter's
//! `reconnect()` instead of a raw socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::arbiter::Arbiter;

const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const LINEAR_BACKOFF_ATTEMPTS: u32 = 3;
const LINEAR_BACKOFF_UNIT: Duration = Duration::from_secs(5);
const FIXED_BACKOFF: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 100;

/// Target `AT+CNMI`/`AT+CMGF` values applied once per successful
/// (re)connection so the modem's URC delivery and SMS mode match what the
/// rest of the gateway expects. `AT+CLIP=1` enables caller-ID notification
/// for the call URC handler and is sent unconditionally.
const CNMI_TARGET: &str = "2,1,0,2,0";
const CMGF_TARGET: &str = "0";

/// Drives the initial connect attempt with linear-then-fixed backoff, then
/// hands off to a background task that re-triggers the same schedule
/// whenever the Arbiter reports it has gone offline. Never returns.
pub async fn run(arbiter: Arc<Arbiter>) {
    connect_with_backoff(&arbiter).await;
    reinitialize(&arbiter).await;

    let reconnecting = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);

    loop {
        ticker.tick().await;

        if arbiter.is_connected() {
            continue;
        }
        if reconnecting.swap(true, Ordering::SeqCst) {
            continue; // a reconnect attempt is already in flight
        }

        let arbiter = arbiter.clone();
        let reconnecting = reconnecting.clone();
        tokio::spawn(async move {
            warn!("supervisor: arbiter reports disconnected, starting reconnect");
            connect_with_backoff(&arbiter).await;
            reinitialize(&arbiter).await;
            reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

/// Attempts `arbiter.reconnect()` up to [`MAX_ATTEMPTS`] times: the first
/// [`LINEAR_BACKOFF_ATTEMPTS`] failures wait `5s * attempt`, every attempt
/// after that waits a fixed 60s.
async fn connect_with_backoff(arbiter: &Arbiter) {
    for attempt in 1..=MAX_ATTEMPTS {
        if arbiter.reconnect().await {
            info!(attempt, "supervisor: transport reconnected");
            return;
        }

        let wait = if attempt <= LINEAR_BACKOFF_ATTEMPTS {
            LINEAR_BACKOFF_UNIT * attempt
        } else {
            FIXED_BACKOFF
        };
        warn!(attempt, wait_s = wait.as_secs(), "supervisor: reconnect failed, backing off");
        tokio::time::sleep(wait).await;
    }
    error!(MAX_ATTEMPTS, "supervisor: exhausted reconnect attempts, giving up");
}

/// Reinitialize the modem per spec §4.8/§6: probe `AT+CPIN?` to confirm the
/// SIM is ready, then `AT+CNMI?`/`AT+CMGF?` to probe current settings and
/// only issue the corresponding `=` command when they differ from the
/// target. `AT+CLIP=1` has no probe counterpart and is always sent.
async fn reinitialize(arbiter: &Arbiter) {
    if !arbiter.is_connected() {
        return;
    }

    match arbiter.send("AT+CPIN?").await {
        Ok(resp) if !command_already_set(resp.body.as_deref(), "READY") => {
            warn!("supervisor: SIM not ready, skipping modem reinit");
            return;
        }
        Err(e) => {
            warn!(error = %e, "supervisor: AT+CPIN? probe failed, skipping modem reinit");
            return;
        }
        Ok(_) => {}
    }

    ensure_set(arbiter, "AT+CNMI?", CNMI_TARGET, "AT+CNMI=2,1,0,2,0").await;
    ensure_set(arbiter, "AT+CMGF?", CMGF_TARGET, "AT+CMGF=0").await;

    if let Err(e) = arbiter.send("AT+CLIP=1").await {
        warn!(command = "AT+CLIP=1", error = %e, "supervisor: reinit command failed");
    }
}

/// Probe `query`; send `set_command` only if the probe's response body does
/// not already contain `expected`.
async fn ensure_set(arbiter: &Arbiter, query: &str, expected: &str, set_command: &str) {
    let already_set = match arbiter.send(query).await {
        Ok(resp) => command_already_set(resp.body.as_deref(), expected),
        Err(e) => {
            warn!(query, error = %e, "supervisor: reinit probe failed");
            false
        }
    };
    if already_set {
        return;
    }
    if let Err(e) = arbiter.send(set_command).await {
        warn!(command = set_command, error = %e, "supervisor: reinit command failed");
    }
}

fn command_already_set(body: Option<&str>, expected: &str) -> bool {
    body.is_some_and(|b| b.contains(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_already_set_probe_responses() {
        assert!(command_already_set(Some("+CNMI: 2,1,0,2,0"), CNMI_TARGET));
        assert!(!command_already_set(Some("+CNMI: 1,0,0,0,0"), CNMI_TARGET));
        assert!(command_already_set(Some("+CPIN: READY"), "READY"));
        assert!(!command_already_set(None, CMGF_TARGET));
    }

    #[test]
    fn linear_backoff_schedule_then_fixed() {
        let waits: Vec<Duration> = (1..=5u32)
            .map(|attempt| {
                if attempt <= LINEAR_BACKOFF_ATTEMPTS {
                    LINEAR_BACKOFF_UNIT * attempt
                } else {
                    FIXED_BACKOFF
                }
            })
            .collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15),
                Duration::from_secs(60),
                Duration::from_secs(60),
            ]
        );
    }
}
