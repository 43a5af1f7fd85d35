//! Signal-quality handler (spec §4.4): `^CERSSI:` and `^HCSQ:` URCs,
//! enriched with an `AT^MONSC` query on every notification.
//!
//! `^CERSSI` field offsets are modem-family specific (spec §9 Open
//! Question) — named here as constants so a portable override is a
//! one-line change rather than a hunt through the parser.

use tracing::error;

use crate::events::Event;

const CERSSI_RSRP_FIELD: usize = 18;
const CERSSI_RSRQ_FIELD: usize = 19;
const CERSSI_SINR_FIELD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    rsrp: f64,
    rsrq: f64,
    sinr_or_rssi: f64,
}

#[derive(Default)]
pub struct SignalHandler {
    last_signal: Option<Sample>,
    last_sys_mode: Option<String>,
}

impl SignalHandler {
    pub async fn handle(&mut self, line: &str, ctx: &super::HandlerContext) -> bool {
        let parsed = if let Some(sample) = parse_cerssi(line) {
            Some(("LTE".to_string(), sample))
        } else {
            parse_hcsq(line)
        };

        let Some((sys_mode, sample)) = parsed else {
            return false;
        };

        if let Err(e) = self.evaluate(sys_mode, sample, ctx).await {
            error!(error = %e, "signal handler error");
        }
        true
    }

    async fn evaluate(
        &mut self,
        sys_mode: String,
        sample: Sample,
        ctx: &super::HandlerContext,
    ) -> Result<(), String> {
        let mode_changed = self.last_sys_mode.as_deref() != Some(sys_mode.as_str());
        let delta_significant = self
            .last_signal
            .is_none_or(|prev| (prev.rsrp - sample.rsrp).abs() >= 1.0);
        let should_notify = self.last_signal.is_none() || delta_significant || mode_changed;

        self.last_signal = Some(sample);
        self.last_sys_mode = Some(sys_mode.clone());

        let event = Event::Signal {
            sys_mode: sys_mode.clone(),
            rsrp: sample.rsrp,
            rsrq: sample.rsrq,
            sinr_or_rssi: sample.sinr_or_rssi,
        };
        ctx.broadcast(event.clone());

        if should_notify {
            let monsc = ctx.arbiter.send("AT^MONSC").await.ok();
            let enrichment = monsc.and_then(|r| r.body).unwrap_or_default();
            let tier = signal_tier(sample.rsrp);
            let body = format!(
                "📶 信号质量: {tier}\n制式: {sys_mode}\nRSRP: {:.1} dBm\nRSRQ: {:.1} dB\n{enrichment}",
                sample.rsrp, sample.rsrq
            );
            ctx.notify(&event, body).await;
        }
        Ok(())
    }
}

fn signal_tier(rsrp: f64) -> &'static str {
    if rsrp >= -85.0 {
        "excellent"
    } else if rsrp >= -95.0 {
        "good"
    } else if rsrp >= -105.0 {
        "fair"
    } else {
        "poor"
    }
}

fn parse_cerssi(line: &str) -> Option<Sample> {
    let rest = line.strip_prefix("^CERSSI:")?;
    let fields: Vec<&str> = rest.trim().split(',').map(str::trim).collect();
    let rsrp: f64 = fields.get(CERSSI_RSRP_FIELD)?.parse().ok()?;
    let rsrq: f64 = fields.get(CERSSI_RSRQ_FIELD)?.parse().ok()?;
    let sinr: f64 = fields.get(CERSSI_SINR_FIELD)?.parse().ok()?;
    Some(Sample {
        rsrp,
        rsrq,
        sinr_or_rssi: sinr,
    })
}

fn parse_hcsq(line: &str) -> Option<(String, Sample)> {
    let rest = line.strip_prefix("^HCSQ:")?;
    let fields: Vec<&str> = rest.trim().split(',').map(str::trim).collect();
    let sys_mode = (*fields.first()?).to_string();
    let rsrp_raw: f64 = fields.get(1)?.parse().ok()?;
    let sinr_raw: f64 = fields.get(2)?.parse().ok()?;
    let rsrq_raw: f64 = fields.get(3)?.parse().ok()?;
    let sample = Sample {
        rsrp: -140.0 + rsrp_raw,
        rsrq: rsrq_raw * 0.5 - 20.0,
        sinr_or_rssi: sinr_raw * 0.2 - 20.0,
    };
    Some((sys_mode, sample))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hcsq_with_conversions() {
        let (mode, sample) = parse_hcsq("^HCSQ: \"LTE\",60,40,60").unwrap();
        assert_eq!(mode, "\"LTE\"");
        assert_eq!(sample.rsrp, -80.0);
        assert_eq!(sample.sinr_or_rssi, -12.0);
        assert_eq!(sample.rsrq, 10.0);
    }

    #[test]
    fn non_matching_line_returns_none() {
        assert!(parse_hcsq("OK").is_none());
        assert!(parse_cerssi("OK").is_none());
    }

    #[test]
    fn signal_tiers() {
        assert_eq!(signal_tier(-80.0), "excellent");
        assert_eq!(signal_tier(-90.0), "good");
        assert_eq!(signal_tier(-100.0), "fair");
        assert_eq!(signal_tier(-120.0), "poor");
    }
}
