//! New-SMS handler (spec §4.4): `+CMTI:` triggers an `AT+CMGR` fetch, PDU
//! decode, and either an immediate event or reassembly-store insertion.

use tracing::error;

use crate::events::Event;
use crate::pdu;
use crate::reassembly::ReassemblyStore;

#[derive(Default)]
pub struct NewSmsHandler {
    store: ReassemblyStore,
}

impl NewSmsHandler {
    pub async fn handle(&mut self, line: &str, ctx: &super::HandlerContext) -> bool {
        let Some(index) = parse_cmti(line) else {
            return false;
        };
        if let Err(e) = self.fetch_and_emit(index, ctx).await {
            error!(error = %e, index, "new sms handler error");
        }
        true
    }

    async fn fetch_and_emit(
        &mut self,
        index: u32,
        ctx: &super::HandlerContext,
    ) -> Result<(), String> {
        let response = ctx.arbiter.send(&format!("AT+CMGR={index}")).await?;
        let Some(body) = response.body else {
            return Err("AT+CMGR returned no body".to_string());
        };
        let hex = extract_pdu_hex(&body).ok_or("no PDU hex line in AT+CMGR response")?;
        let decoded = pdu::decode_pdu(&hex);

        match decoded.partial {
            None => {
                let event = Event::NewSms {
                    sender: decoded.sender.clone(),
                    content: decoded.content.clone(),
                    time: decoded.timestamp.to_rfc3339(),
                    is_complete: true,
                };
                ctx.broadcast(event.clone());
                ctx.notify(
                    &event,
                    format!(
                        "📱 新短信通知\n发送者: {}\n内容: {}",
                        decoded.sender, decoded.content
                    ),
                )
                .await;
            }
            Some(partial) => {
                if let Some(combined) = self.store.insert(
                    &decoded.sender,
                    partial.reference,
                    partial.parts_count,
                    partial.part_number,
                    decoded.content.clone(),
                ) {
                    let event = Event::NewSms {
                        sender: decoded.sender.clone(),
                        content: combined.clone(),
                        time: decoded.timestamp.to_rfc3339(),
                        is_complete: true,
                    };
                    ctx.broadcast(event.clone());
                    ctx.notify(
                        &event,
                        format!(
                            "📱 新短信通知\n发送者: {}\n内容: {}",
                            decoded.sender, combined
                        ),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }
}

fn parse_cmti(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("+CMTI:")?.trim();
    let comma = rest.find(',')?;
    rest[comma + 1..].trim().parse().ok()
}

/// `AT+CMGR` bodies look like `+CMGR: <stat>,,<len>\n<pdu-hex>`; find the
/// hex-only line.
fn extract_pdu_hex(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('+') && l.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cmti_index() {
        assert_eq!(parse_cmti("+CMTI: \"SM\",3"), Some(3));
        assert_eq!(parse_cmti("+CMTI: \"ME\",17"), Some(17));
    }

    #[test]
    fn extracts_pdu_hex_from_cmgr_body() {
        let body = "+CMGR: 1,,23\n0004912138000831F000001110210138001" ;
        let hex = extract_pdu_hex(body).unwrap();
        assert!(hex.starts_with("0004"));
    }
}
