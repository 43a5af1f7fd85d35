#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # atgated
//!
//! AT-command cellular modem gateway: decodes PDU-mode SMS (with
//! concatenated-message reassembly), classifies and dispatches unsolicited
//! result codes, fans notifications out to a webhook and/or log file,
//! exposes an authenticated WebSocket command/event hub, and runs a
//! scheduled LTE/NR band-lock controller with a no-service watchdog.

use std::sync::Arc;

use atgated::arbiter::Arbiter;
use atgated::config::Config;
use atgated::events::Event;
use atgated::notify::NotificationManager;
use atgated::state::AppState;
use atgated::transport::Transport;
use atgated::urc::{HandlerContext, UrcDispatcher};
use atgated::{schedule, supervisor, ws};

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Parser)]
#[command(name = "atgated", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    run(cli.config.as_deref()).await;
}

async fn run(config_path: Option<&str>) {
    let config = Config::load(config_path).unwrap_or_else(|e| {
        eprintln!("config error: {e}");
        std::process::exit(1);
    });

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("atgated v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);

    let transport = Transport::from_config(&config.transport);
    let arbiter = Arc::new(Arbiter::spawn(transport));

    let (event_tx, _) = broadcast::channel::<Event>(256);
    let (notify_manager, notify_tx) = NotificationManager::new(config.notifications.clone());
    info!(
        webhook = notify_manager.is_webhook_enabled(),
        log_file = notify_manager.is_log_file_enabled(),
        "notification sinks registered"
    );

    let state = AppState::new(config.clone(), arbiter.clone(), event_tx.clone());

    let ctx = HandlerContext {
        arbiter: arbiter.clone(),
        event_tx: event_tx.clone(),
        notify_tx,
    };
    let mut urc_rx = arbiter.subscribe_urc();
    let urc_task = tokio::spawn(async move {
        let mut dispatcher = UrcDispatcher::new();
        loop {
            match urc_rx.recv().await {
                Ok(line) => dispatcher.dispatch(&line, &ctx).await,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let supervisor_task = tokio::spawn(supervisor::run(arbiter.clone()));
    let schedule_task = tokio::spawn(schedule::run(config.schedule.clone(), arbiter.clone()));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    if let Err(e) = ws::serve(state, config.websocket.port, shutdown).await {
        tracing::error!(error = %e, "websocket hub exited with error");
    }

    info!("shutting down");
    urc_task.abort();
    supervisor_task.abort();
    schedule_task.abort();
    info!("goodbye");
}
