//! Notification Fan-out (spec §4.5): a `NotificationManager` holding zero
//! or more sink channels, each skipped when its event kind is disabled.

mod logfile;
mod webhook;

pub use logfile::LogFileChannel;
pub use webhook::{NotificationError, WebhookChannel};

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::warn;

use crate::config::{NotificationKind, NotificationsConfig};

#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub sender_label: String,
    pub body: String,
    pub kind: NotificationKind,
    pub created_at: Instant,
}

/// Reports which sinks ended up registered; the actual sink resources live
/// inside the background fan-out task spawned by `new`.
pub struct NotificationManager {
    webhook_enabled: bool,
    log_file_enabled: bool,
}

impl NotificationManager {
    /// Construct from config, spawning the webhook worker if a URL is
    /// configured and opening the log file if a path is configured. A
    /// log-file open failure is fatal only to that sink (spec §7).
    pub fn new(config: NotificationsConfig) -> (Self, mpsc::Sender<NotificationJob>) {
        let (manager_tx, mut manager_rx) = mpsc::channel::<NotificationJob>(256);

        let webhook_tx = config
            .webhook_url
            .clone()
            .map(|url| webhook::spawn_worker(url, config.send_interval_s));

        let mut log_file = match &config.log_file {
            Some(path) => match LogFileChannel::open(path) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(error = %e, path, "log file notification channel not registered");
                    None
                }
            },
            None => None,
        };

        let manager = Self {
            webhook_enabled: webhook_tx.is_some(),
            log_file_enabled: log_file.is_some(),
        };

        // Fan-out task: receives every job and forwards to enabled sinks.
        tokio::spawn(async move {
            while let Some(job) = manager_rx.recv().await {
                if !config.kind_enabled(job.kind) {
                    continue;
                }
                if let Some(tx) = &webhook_tx {
                    let _ = tx.send(job.clone()).await;
                }
                if let Some(log) = log_file.as_mut() {
                    if let Err(e) = log.append(&job) {
                        warn!(error = %e, "log file notification append failed");
                    }
                }
            }
        });

        (manager, manager_tx)
    }

    pub fn is_webhook_enabled(&self) -> bool {
        self.webhook_enabled
    }

    pub fn is_log_file_enabled(&self) -> bool {
        self.log_file_enabled
    }
}

/// Build the human-readable body for a batch of jobs, matching spec
/// §4.5's single-entry template / multi-entry numbered-digest rule.
pub fn format_batch(jobs: &[NotificationJob]) -> String {
    if jobs.len() == 1 {
        jobs[0].body.clone()
    } else {
        jobs.iter()
            .enumerate()
            .map(|(i, job)| format!("{}. {}", i + 1, job.body.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationKind;

    #[test]
    fn single_job_uses_its_own_body() {
        let jobs = vec![NotificationJob {
            sender_label: "atgated".to_string(),
            body: "hello".to_string(),
            kind: NotificationKind::Sms,
            created_at: Instant::now(),
        }];
        assert_eq!(format_batch(&jobs), "hello");
    }

    #[test]
    fn multiple_jobs_become_a_numbered_digest() {
        let jobs = vec![
            NotificationJob {
                sender_label: "atgated".to_string(),
                body: "first".to_string(),
                kind: NotificationKind::Sms,
                created_at: Instant::now(),
            },
            NotificationJob {
                sender_label: "atgated".to_string(),
                body: "second".to_string(),
                kind: NotificationKind::Call,
                created_at: Instant::now(),
            },
        ];
        let digest = format_batch(&jobs);
        assert_eq!(digest, "1. first\n2. second");
    }
}
