#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! atgated library — exposes the gateway's core building blocks.
//!
//! - `transport` — TCP / serial / helper-process byte streams to the modem
//! - `arbiter` — half-duplex AT command arbiter with a concurrent URC pump
//! - `pdu` — PDU-mode SMS decoding, including concatenated-SMS reassembly
//! - `reassembly` — bounded, TTL-evicting concatenated-SMS part store
//! - `events` — typed events broadcast to WebSocket clients
//! - `urc` — unsolicited result code classification and dispatch
//! - `notify` — webhook and log-file notification fan-out
//! - `ws` — authenticated WebSocket command/event hub
//! - `schedule` — scheduled LTE/NR band-lock controller and watchdog
//! - `supervisor` — transport reconnection loop
//! - `config` — configuration loading
//! - `state` — shared application state

pub mod arbiter;
pub mod auth;
pub mod config;
pub mod events;
pub mod notify;
pub mod pdu;
pub mod reassembly;
pub mod schedule;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod urc;
pub mod ws;

pub use arbiter::Arbiter;
pub use config::Config;
pub use state::AppState;
