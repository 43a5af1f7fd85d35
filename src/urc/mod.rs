//! URC dispatcher: offers each line to an ordered, fixed set of handlers
//! and stops at the first that accepts (spec §4.4). Modeled as a
//! concrete struct with a fixed dispatch order rather than a
//! `Vec<Box<dyn Handler>>`, since the handler set is closed and each
//! handler needs a different async capability (some query the Arbiter,
//! some are pure state machines) — spec §9's "switch over the tag" option.

mod call;
mod memory_full;
mod new_sms;
mod pdcp;
mod signal;

pub use call::CallHandler;
pub use memory_full::MemoryFullHandler;
pub use new_sms::NewSmsHandler;
pub use pdcp::PdcpHandler;
pub use signal::SignalHandler;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::arbiter::Arbiter;
use crate::events::Event;
use crate::notify::NotificationJob;

/// Shared context every handler needs: a way to reach the modem for
/// follow-up commands, a way to broadcast typed events, and a way to
/// enqueue a notification.
#[derive(Clone)]
pub struct HandlerContext {
    pub arbiter: Arc<Arbiter>,
    pub event_tx: broadcast::Sender<Event>,
    pub notify_tx: mpsc::Sender<NotificationJob>,
}

impl HandlerContext {
    pub fn broadcast(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn notify(&self, event: &Event, body: String) {
        if let Some(kind) = event.notification_kind() {
            let job = NotificationJob {
                sender_label: "atgated".to_string(),
                body,
                kind,
                created_at: std::time::Instant::now(),
            };
            let _ = self.notify_tx.send(job).await;
        }
    }
}

pub struct UrcDispatcher {
    call: CallHandler,
    memory_full: MemoryFullHandler,
    new_sms: NewSmsHandler,
    signal: SignalHandler,
    pdcp: PdcpHandler,
}

impl Default for UrcDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UrcDispatcher {
    pub fn new() -> Self {
        Self {
            call: CallHandler::default(),
            memory_full: MemoryFullHandler::default(),
            new_sms: NewSmsHandler::default(),
            signal: SignalHandler::default(),
            pdcp: PdcpHandler,
        }
    }

    /// Route a single URC line through the ordered handler list. Each
    /// handler catches and logs its own errors (spec §7 propagation
    /// policy: one bad URC must never tear down the dispatcher).
    pub async fn dispatch(&mut self, line: &str, ctx: &HandlerContext) {
        if self.call.handle(line, ctx).await {
            return;
        }
        if self.memory_full.handle(line, ctx).await {
            return;
        }
        if self.new_sms.handle(line, ctx).await {
            return;
        }
        if self.signal.handle(line, ctx).await {
            return;
        }
        if self.pdcp.handle(line, ctx) {
            return;
        }
        ctx.broadcast(Event::RawData {
            line: line.to_string(),
        });
    }
}
