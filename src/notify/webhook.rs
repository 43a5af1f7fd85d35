//! Webhook notification channel (spec §4.5). Grounded on
//! `EFForg-rayhunter/daemon/src/notifications.rs`: an mpsc-fed background
//! worker, a bounded pending list, a batching timer, and a retrying
//! dispatch with a small `thiserror` error enum.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, warn};

use super::{format_batch, NotificationJob};

const PENDING_CAP: usize = 1000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    HttpError(reqwest::StatusCode),
    #[error("webhook returned errcode {0}")]
    NonZeroErrcode(i64),
}

#[derive(Deserialize)]
struct WebhookAck {
    errcode: i64,
}

/// Spawn the batching/retry worker and return the channel producers feed
/// jobs into.
pub fn spawn_worker(url: String, send_interval_s: u64) -> mpsc::Sender<NotificationJob> {
    let (tx, rx) = mpsc::channel::<NotificationJob>(PENDING_CAP);
    tokio::spawn(run_worker(url, Duration::from_secs(send_interval_s), rx));
    tx
}

pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    pub async fn send(&self, body: &str) -> Result<(), NotificationError> {
        let payload = serde_json::json!({"msgtype": "text", "text": {"content": body}});
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::HttpError(status));
        }
        let ack: WebhookAck = response.json().await?;
        if ack.errcode != 0 {
            return Err(NotificationError::NonZeroErrcode(ack.errcode));
        }
        Ok(())
    }

    pub async fn send_with_retry(&self, body: &str) -> Result<(), NotificationError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.send(body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "webhook notification attempt failed");
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }
}

async fn run_worker(url: String, send_interval: Duration, mut rx: mpsc::Receiver<NotificationJob>) {
    let channel = WebhookChannel::new(url);
    let mut pending: Vec<NotificationJob> = Vec::new();
    let mut ticker = interval(send_interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                if pending.len() >= PENDING_CAP {
                    pending.remove(0);
                }
                pending.push(job);
            }
            _ = ticker.tick() => {
                if pending.is_empty() {
                    continue;
                }
                let batch = std::mem::take(&mut pending);
                let body = format_batch(&batch);
                if let Err(e) = channel.send_with_retry(&body).await {
                    error!(error = %e, count = batch.len(), "dropping notification batch after retries exhausted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    async fn setup_test_server(
        response: serde_json::Value,
        status: u16,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();

        let app = Router::new().route(
            "/webhook",
            post(move |Json(body): Json<serde_json::Value>| {
                let captured = captured_clone.clone();
                let response = response.clone();
                async move {
                    captured.lock().unwrap().push(body.to_string());
                    (axum::http::StatusCode::from_u16(status).unwrap(), Json(response))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/webhook"), captured)
    }

    #[tokio::test]
    async fn sends_message_and_succeeds_on_errcode_zero() {
        let (url, captured) = setup_test_server(serde_json::json!({"errcode": 0}), 200).await;
        let channel = WebhookChannel::new(url);
        channel.send("hello").await.expect("should succeed");
        let bodies = captured.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_errcode_is_a_failure() {
        let (url, _captured) = setup_test_server(serde_json::json!({"errcode": 1}), 200).await;
        let channel = WebhookChannel::new(url);
        let result = channel.send("hello").await;
        assert!(matches!(result, Err(NotificationError::NonZeroErrcode(1))));
    }

    #[tokio::test]
    async fn http_error_status_is_a_failure() {
        let (url, _captured) = setup_test_server(serde_json::json!({"errcode": 0}), 500).await;
        let channel = WebhookChannel::new(url);
        let result = channel.send("hello").await;
        assert!(matches!(result, Err(NotificationError::HttpError(_))));
    }
}
