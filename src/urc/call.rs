//! Incoming-call state machine (spec §4.4): `RING`/`IRING`/`+CLIP`/`^CEND`/
//! `NO CARRIER`.

use std::time::{Duration, Instant};

use tracing::error;

use crate::events::Event;

const DEDUP_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Idle,
    Ringing,
}

pub struct CallHandler {
    state: CallState,
    #[allow(dead_code)]
    ring_received: bool,
    last_number: Option<String>,
    last_time: Option<Instant>,
    last_handled: bool,
}

impl Default for CallHandler {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            ring_received: false,
            last_number: None,
            last_time: None,
            last_handled: false,
        }
    }
}

impl CallHandler {
    pub async fn handle(&mut self, line: &str, ctx: &super::HandlerContext) -> bool {
        if let Err(e) = self.try_handle(line, ctx).await {
            error!(error = %e, %line, "call handler error");
            true
        } else {
            self.last_handled
        }
    }

    async fn try_handle(&mut self, line: &str, ctx: &super::HandlerContext) -> Result<(), String> {
        self.last_handled = false;

        if line == "RING" || line == "IRING" {
            self.state = CallState::Ringing;
            self.ring_received = true;
            self.last_handled = true;
            return Ok(());
        }

        if let Some(number) = parse_clip(line) {
            let was_idle = self.state == CallState::Idle;
            self.state = CallState::Ringing;

            let should_notify = was_idle
                || self.last_number.as_deref() != Some(number.as_str())
                || self
                    .last_time
                    .is_none_or(|t| t.elapsed() > DEDUP_WINDOW);

            self.last_number = Some(number.clone());
            self.last_time = Some(Instant::now());

            let event = Event::IncomingCall {
                time: chrono::Utc::now().to_rfc3339(),
                number: number.clone(),
                state: "ringing".to_string(),
            };
            ctx.broadcast(event.clone());
            if should_notify {
                ctx.notify(&event, format!("📞 来电提醒\n来电号码: {number}")).await;
            }
            self.last_handled = true;
            return Ok(());
        }

        if line.starts_with("^CEND:") || line == "NO CARRIER" {
            if let Some(number) = self.last_number.clone() {
                let event = Event::IncomingCall {
                    time: chrono::Utc::now().to_rfc3339(),
                    number: number.clone(),
                    state: "ended".to_string(),
                };
                ctx.broadcast(event.clone());
                ctx.notify(&event, format!("📞 通话结束\n号码: {number}")).await;
            }
            self.state = CallState::Idle;
            self.ring_received = false;
            self.last_handled = true;
            return Ok(());
        }

        Ok(())
    }
}

fn parse_clip(line: &str) -> Option<String> {
    let rest = line.strip_prefix("+CLIP: ")?;
    let start = rest.find('"')? + 1;
    let end = rest[start..].find('"')? + start;
    Some(rest[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clip_number() {
        assert_eq!(
            parse_clip("+CLIP: \"15555550100\",129,\"\",,\"\",0"),
            Some("15555550100".to_string())
        );
    }

    #[test]
    fn non_clip_line_returns_none() {
        assert_eq!(parse_clip("RING"), None);
    }
}
