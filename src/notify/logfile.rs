//! Log-file notification channel (spec §4.5). Resolves the path to
//! absolute, creates the parent directory (mode 0755), and verifies
//! writability by appending an init line at construction; any failure is
//! fatal only to this channel.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::NotificationJob;

const SEPARATOR: &str = "--------------------------------------------------";

pub struct LogFileChannel {
    path: PathBuf,
    file: File,
}

impl LogFileChannel {
    pub fn open(path: &str) -> Result<Self, String> {
        let absolute = Self::to_absolute(path)?;
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create log directory {parent:?}: {e}"))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755));
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&absolute)
            .map_err(|e| format!("failed to open log file {absolute:?}: {e}"))?;

        writeln!(file, "[{}] atgated notification log opened", Utc::now().to_rfc3339())
            .map_err(|e| format!("log file {absolute:?} is not writable: {e}"))?;

        Ok(Self {
            path: absolute,
            file,
        })
    }

    fn to_absolute(path: &str) -> Result<PathBuf, String> {
        let p = Path::new(path);
        if p.is_absolute() {
            Ok(p.to_path_buf())
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(p))
                .map_err(|e| format!("failed to resolve current directory: {e}"))
        }
    }

    pub fn append(&mut self, job: &NotificationJob) -> Result<(), String> {
        writeln!(
            self.file,
            "[{}] {} ({:?})\n{}\n{}",
            Utc::now().to_rfc3339(),
            job.sender_label,
            job.kind,
            job.body,
            SEPARATOR
        )
        .map_err(|e| format!("failed to append to log file {:?}: {e}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationKind;
    use std::time::Instant;

    #[test]
    fn opens_and_appends() {
        let dir = std::env::temp_dir().join(format!("atgated-test-{}", std::process::id()));
        let path = dir.join("notifications.log");
        let mut channel = LogFileChannel::open(path.to_str().unwrap()).expect("should open");
        channel
            .append(&NotificationJob {
                sender_label: "atgated".to_string(),
                body: "test body".to_string(),
                kind: NotificationKind::Sms,
                created_at: Instant::now(),
            })
            .expect("should append");
        let contents = std::fs::read_to_string(&path).expect("should read back");
        assert!(contents.contains("test body"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
