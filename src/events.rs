//! The typed event set produced by URC handlers and consumed by the
//! WebSocket Hub (broadcast) and the Notification Fan-out (per-kind sink
//! dispatch). Corresponds to spec §3's `Event` entity.

use serde::Serialize;

use crate::config::NotificationKind;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "new_sms")]
    NewSms {
        sender: String,
        content: String,
        time: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
    #[serde(rename = "incoming_call")]
    IncomingCall {
        time: String,
        number: String,
        state: String,
    },
    #[serde(rename = "memory_full")]
    MemoryFull { time: String },
    #[serde(rename = "signal")]
    Signal {
        sys_mode: String,
        rsrp: f64,
        rsrq: f64,
        sinr_or_rssi: f64,
    },
    #[serde(rename = "pdcp_data")]
    PdcpData { fields: Vec<String> },
    #[serde(rename = "raw_data")]
    RawData { line: String },
}

impl Event {
    /// Which notification kind (if any) this event corresponds to, for
    /// routing through the Notification Fan-out (spec §4.5).
    pub fn notification_kind(&self) -> Option<NotificationKind> {
        match self {
            Event::NewSms { .. } => Some(NotificationKind::Sms),
            Event::IncomingCall { .. } => Some(NotificationKind::Call),
            Event::MemoryFull { .. } => Some(NotificationKind::MemoryFull),
            Event::Signal { .. } => Some(NotificationKind::Signal),
            Event::PdcpData { .. } | Event::RawData { .. } => None,
        }
    }
}
