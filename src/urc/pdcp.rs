//! PDCP stats handler (spec §4.4): `^PDCPDATAINFO:` broadcast-only, no
//! state, no notification.

use crate::events::Event;

pub struct PdcpHandler;

impl PdcpHandler {
    pub fn handle(&mut self, line: &str, ctx: &super::HandlerContext) -> bool {
        let Some(rest) = line.strip_prefix("^PDCPDATAINFO:") else {
            return false;
        };
        let fields: Vec<String> = rest.trim().split(',').map(|s| s.trim().to_string()).collect();
        ctx.broadcast(Event::PdcpData { fields });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_comma_fields() {
        let line = "^PDCPDATAINFO: 1,2,3,4,5,6,7,8,9,10,11,12,13,14";
        let rest = line.strip_prefix("^PDCPDATAINFO:").unwrap();
        let fields: Vec<&str> = rest.trim().split(',').collect();
        assert_eq!(fields.len(), 14);
    }
}
