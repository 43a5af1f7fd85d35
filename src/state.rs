//! Shared application state, passed to every WebSocket handler via Axum's
//! `State` extractor. Grounded on the teacher's `state.rs` (`Arc`-wrapped
//! config, a shared broadcast channel for fan-out) with the session/
//! transfer/GPS/LTE fields replaced by the Arbiter handle and event bus.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::arbiter::Arbiter;
use crate::config::Config;
use crate::events::Event;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub arbiter: Arc<Arbiter>,
    pub event_tx: broadcast::Sender<Event>,
}

impl AppState {
    pub fn new(config: Arc<Config>, arbiter: Arc<Arbiter>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            config,
            arbiter,
            event_tx,
        }
    }
}
