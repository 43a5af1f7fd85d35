//! Memory-full handler (spec §4.4): fires a single notification per
//! connection via a sticky flag that never re-arms without an external
//! reset.

use crate::events::Event;

#[derive(Default)]
pub struct MemoryFullHandler {
    notified: bool,
}

impl MemoryFullHandler {
    pub async fn handle(&mut self, line: &str, ctx: &super::HandlerContext) -> bool {
        let matches = line.contains("CMS ERROR: 322")
            || line.contains("MEMORY FULL")
            || line.starts_with("^SMMEMFULL");
        if !matches {
            return false;
        }
        if self.notified {
            return true;
        }
        self.notified = true;
        let event = Event::MemoryFull {
            time: chrono::Utc::now().to_rfc3339(),
        };
        ctx.broadcast(event.clone());
        ctx.notify(&event, "⚠️ 存储空间已满".to_string()).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_patterns() {
        assert!("+CMS ERROR: 322".contains("CMS ERROR: 322"));
        assert!("MEMORY FULL".contains("MEMORY FULL"));
        assert!("^SMMEMFULL: 1".starts_with("^SMMEMFULL"));
    }
}
