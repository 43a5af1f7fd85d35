//! Scheduled LTE/NR band-lock controller and no-service watchdog (spec
//! §4.7). Grounded on the teacher's `lte.rs` ticker-loop idiom
//! (`spawn_lte_poller`) and `supervisor.rs`'s timer bookkeeping style,
//! driving the AT Arbiter instead of parsing signal URCs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use tracing::{info, warn};

use crate::arbiter::Arbiter;
use crate::config::{RatLock, ScheduleConfig, WindowConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleMode {
    Night,
    Day,
    Unlocked,
}

/// `(band, (min_arfcn, max_arfcn))` for validating EARFCN locks. Covers the
/// commonly deployed LTE bands for this gateway's target modems; an
/// unrecognized band is treated as a validation failure (fallback unlock).
const LTE_BAND_ARFCN_RANGES: &[(&str, (u32, u32))] = &[
    ("1", (0, 599)),
    ("3", (1200, 1949)),
    ("5", (2400, 2649)),
    ("7", (2750, 3449)),
    ("8", (3450, 3799)),
    ("20", (6150, 6449)),
    ("28", (9210, 9659)),
    ("38", (37750, 38249)),
    ("40", (38650, 39649)),
    ("41", (39650, 41589)),
];

/// NR SCS auto-derive table (spec §4.7 step 3).
fn derive_nr_scs(band: &str) -> u8 {
    match band {
        "78" | "79" | "258" | "260" | "41" | "77" => 1,
        "28" | "71" => 0,
        _ => 1,
    }
}

fn validate_lte_band_arfcn(band: &str, arfcn: u32) -> bool {
    LTE_BAND_ARFCN_RANGES
        .iter()
        .find(|(b, _)| *b == band)
        .is_some_and(|(_, (lo, hi))| arfcn >= *lo && arfcn <= *hi)
}

pub async fn run(config: ScheduleConfig, arbiter: Arc<Arbiter>) {
    if !config.enabled {
        return;
    }

    let mut applied_mode: Option<ScheduleMode> = None;
    let mut ticker = tokio::time::interval(Duration::from_secs(config.check_interval_s));
    let mut last_service_seen = tokio::time::Instant::now();

    loop {
        ticker.tick().await;

        let target = compute_mode(&config);
        if Some(target) != applied_mode {
            info!(?target, "schedule: applying band-lock mode change");
            apply_mode(&config, target, &arbiter).await;
            applied_mode = Some(target);
        }

        if check_service(&arbiter).await {
            last_service_seen = tokio::time::Instant::now();
        } else if last_service_seen.elapsed() >= Duration::from_secs(config.no_service_timeout_s) {
            warn!("schedule: no service timeout exceeded, unlocking");
            unlock_all(&arbiter).await;
            last_service_seen = tokio::time::Instant::now();
        }
    }
}

fn compute_mode(config: &ScheduleConfig) -> ScheduleMode {
    let now_minutes = {
        let now = Local::now();
        now.hour() * 60 + now.minute()
    };

    if config.night.enabled && in_window(&config.night, now_minutes) {
        ScheduleMode::Night
    } else if config.day.enabled && in_window(&config.day, now_minutes) {
        ScheduleMode::Day
    } else {
        ScheduleMode::Unlocked
    }
}

fn in_window(window: &WindowConfig, now_minutes: u32) -> bool {
    let (Some(start), Some(end)) = (parse_hhmm(&window.start), parse_hhmm(&window.end)) else {
        return false;
    };
    if start <= end {
        now_minutes >= start && now_minutes < end
    } else {
        // wraps across midnight
        now_minutes >= start || now_minutes < end
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    Some(h * 60 + m)
}

async fn apply_mode(config: &ScheduleConfig, mode: ScheduleMode, arbiter: &Arbiter) {
    if config.toggle_airplane {
        let _ = arbiter.send("AT+CFUN=0").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let (lte, nr) = match mode {
        ScheduleMode::Night => (Some(&config.night.lte), Some(&config.night.nr)),
        ScheduleMode::Day => (Some(&config.day.lte), Some(&config.day.nr)),
        ScheduleMode::Unlocked => (None, None),
    };

    apply_lte(lte, config.unlock_lte, arbiter).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    apply_nr(nr, config.unlock_nr, arbiter).await;

    if config.toggle_airplane {
        let _ = arbiter.send("AT+CFUN=1").await;
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
}

async fn apply_lte(lock: Option<&RatLock>, unlock_lte: bool, arbiter: &Arbiter) {
    match lock {
        Some(lock) if lock.lock_type > 0 => {
            if let Some(cmd) = build_lte_lock_command(lock) {
                let _ = arbiter.send(&cmd).await;
            } else {
                warn!("schedule: LTE lock validation failed, falling back to unlock");
                let _ = arbiter.send("AT^LTEFREQLOCK=0").await;
            }
        }
        _ if unlock_lte => {
            let _ = arbiter.send("AT^LTEFREQLOCK=0").await;
        }
        _ => {}
    }
}

async fn apply_nr(lock: Option<&RatLock>, unlock_nr: bool, arbiter: &Arbiter) {
    match lock {
        Some(lock) if lock.lock_type > 0 => {
            if let Some(cmd) = build_nr_lock_command(lock) {
                let _ = arbiter.send(&cmd).await;
            } else {
                warn!("schedule: NR lock validation failed, falling back to unlock");
                let _ = arbiter.send("AT^NRFREQLOCK=0").await;
            }
        }
        _ if unlock_nr => {
            let _ = arbiter.send("AT^NRFREQLOCK=0").await;
        }
        _ => {}
    }
}

/// Builds `AT^LTEFREQLOCK=<type>,0,<n>,"<bands>"[,"<arfcns>"[,"<pcis>"]]`,
/// validating band/ARFCN pairing for type 1 (EARFCN lock) and list-length
/// parity for type 2 (cell lock). Returns `None` on any validation failure.
fn build_lte_lock_command(lock: &RatLock) -> Option<String> {
    let n = lock.bands.len();
    if n == 0 {
        return None;
    }

    if lock.lock_type == 1 {
        if lock.arfcns.len() != n {
            return None;
        }
        for (band, arfcn) in lock.bands.iter().zip(lock.arfcns.iter()) {
            let arfcn_val: u32 = arfcn.parse().ok()?;
            if !validate_lte_band_arfcn(band, arfcn_val) {
                return None;
            }
        }
    } else if lock.lock_type == 2 && (lock.arfcns.len() != n || lock.pcis.len() != n) {
        return None;
    }

    let bands = lock.bands.join(",");
    let mut cmd = format!("AT^LTEFREQLOCK={},0,{},\"{}\"", lock.lock_type, n, bands);
    if !lock.arfcns.is_empty() {
        cmd.push_str(&format!(",\"{}\"", lock.arfcns.join(",")));
    }
    if !lock.pcis.is_empty() {
        cmd.push_str(&format!(",\"{}\"", lock.pcis.join(",")));
    }
    Some(cmd)
}

fn build_nr_lock_command(lock: &RatLock) -> Option<String> {
    let n = lock.bands.len();
    if n == 0 {
        return None;
    }
    if lock.lock_type == 2 && (lock.arfcns.len() != n || lock.pcis.len() != n) {
        return None;
    }
    if lock.lock_type == 1 && lock.arfcns.len() != n {
        return None;
    }

    let scs_types: Vec<String> = if lock.scs_types.len() == n {
        lock.scs_types.clone()
    } else {
        lock.bands.iter().map(|b| derive_nr_scs(b).to_string()).collect()
    };

    let bands = lock.bands.join(",");
    let mut cmd = format!("AT^NRFREQLOCK={},0,{},\"{}\"", lock.lock_type, n, bands);
    if !lock.arfcns.is_empty() {
        cmd.push_str(&format!(",\"{}\"", lock.arfcns.join(",")));
    }
    cmd.push_str(&format!(",\"{}\"", scs_types.join(",")));
    if !lock.pcis.is_empty() {
        cmd.push_str(&format!(",\"{}\"", lock.pcis.join(",")));
    }
    Some(cmd)
}

async fn unlock_all(arbiter: &Arbiter) {
    let _ = arbiter.send("AT^LTEFREQLOCK=0").await;
    let _ = arbiter.send("AT^NRFREQLOCK=0").await;
}

/// `AT+CREG?`/`AT+CEREG?`: "registered" is stat `1` or `5`.
async fn check_service(arbiter: &Arbiter) -> bool {
    for cmd in ["AT+CREG?", "AT+CEREG?"] {
        if let Ok(response) = arbiter.send(cmd).await {
            if let Some(body) = response.body {
                if body.contains(",1") || body.contains(",5") {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_window_handles_midnight_wrap() {
        let window = WindowConfig {
            enabled: true,
            start: "22:00".to_string(),
            end: "06:00".to_string(),
            lte: RatLock::default(),
            nr: RatLock::default(),
        };
        assert!(in_window(&window, 23 * 60));
        assert!(in_window(&window, 1 * 60));
        assert!(!in_window(&window, 12 * 60));
    }

    #[test]
    fn in_window_non_wrapping() {
        let window = WindowConfig {
            enabled: true,
            start: "06:00".to_string(),
            end: "22:00".to_string(),
            lte: RatLock::default(),
            nr: RatLock::default(),
        };
        assert!(in_window(&window, 12 * 60));
        assert!(!in_window(&window, 23 * 60));
    }

    #[test]
    fn derives_scs_per_band_table() {
        assert_eq!(derive_nr_scs("78"), 1);
        assert_eq!(derive_nr_scs("28"), 0);
        assert_eq!(derive_nr_scs("999"), 1);
    }

    #[test]
    fn builds_lte_type3_lock_command() {
        let lock = RatLock {
            lock_type: 3,
            bands: vec!["3".to_string(), "41".to_string()],
            arfcns: vec![],
            pcis: vec![],
            scs_types: vec![],
        };
        let cmd = build_lte_lock_command(&lock).unwrap();
        assert_eq!(cmd, "AT^LTEFREQLOCK=3,0,2,\"3,41\"");
    }

    #[test]
    fn rejects_mismatched_band_arfcn_for_type1() {
        let lock = RatLock {
            lock_type: 1,
            bands: vec!["3".to_string()],
            arfcns: vec!["99999".to_string()], // out of range for band 3
            pcis: vec![],
            scs_types: vec![],
        };
        assert!(build_lte_lock_command(&lock).is_none());
    }

    #[test]
    fn rejects_length_mismatch_for_type2() {
        let lock = RatLock {
            lock_type: 2,
            bands: vec!["3".to_string(), "41".to_string()],
            arfcns: vec!["1300".to_string()],
            pcis: vec!["10".to_string()],
            scs_types: vec![],
        };
        assert!(build_lte_lock_command(&lock).is_none());
    }
}
