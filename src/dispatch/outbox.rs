//! Filesystem outbox transport
//!
//! Spools outgoing messages as JSON files for a separate relay process (or a
//! human) to pick up. Used by the CLI when no provider is wired in.
//!
//! Directory structure:
//! ```text
//! <outbox>/
//!   email/
//!     <timestamp>-<seq>.json
//!   sms/
//!     <timestamp>-<seq>.json
//! ```

use super::sender::SenderKind;
use super::transport::{EmailRequest, EmailTransport, Result, SmsRequest, SmsTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// One spooled message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutboxEntry {
    Email {
        queued_at: DateTime<Utc>,
        request: EmailRequest,
    },
    Sms {
        queued_at: DateTime<Utc>,
        request: SmsRequest,
    },
}

impl OutboxEntry {
    pub fn queued_at(&self) -> DateTime<Utc> {
        match self {
            OutboxEntry::Email { queued_at, .. } | OutboxEntry::Sms { queued_at, .. } => *queued_at,
        }
    }
}

/// Transport that writes each message to its own JSON file
#[derive(Debug)]
pub struct FilesystemOutbox {
    base_path: PathBuf,
    seq: AtomicU64,
}

impl FilesystemOutbox {
    /// Open (creating if needed) an outbox rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(base_path.join(dir_name(SenderKind::Email)))?;
        fs::create_dir_all(base_path.join(dir_name(SenderKind::Sms)))?;

        Ok(Self {
            base_path,
            seq: AtomicU64::new(0),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn spool(&self, kind: SenderKind, entry: &OutboxEntry) -> Result<PathBuf> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{:06}.json",
            entry.queued_at().format("%Y%m%dT%H%M%S%.6f"),
            seq
        );
        let path = self.base_path.join(dir_name(kind)).join(name);

        let json = serde_json::to_string_pretty(entry)?;
        let mut file = fs::File::create(&path)?;
        file.write_all(json.as_bytes())?;

        tracing::debug!(path = %path.display(), %kind, "Spooled message");
        Ok(path)
    }

    /// Every spooled message of `kind`, oldest first
    ///
    /// Files that cannot be read or parsed are skipped with a warning.
    pub fn pending(&self, kind: SenderKind) -> Result<Vec<OutboxEntry>> {
        let dir = self.base_path.join(dir_name(kind));
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&dir)? {
            let path = dirent?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }

            match read_entry(&path) {
                Ok(entry) => entries.push((path, entry)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable outbox file");
                }
            }
        }

        // File names sort by queue time, then sequence
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }
}

fn read_entry(path: &Path) -> Result<OutboxEntry> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn dir_name(kind: SenderKind) -> &'static str {
    match kind {
        SenderKind::Email => "email",
        SenderKind::Sms => "sms",
    }
}

#[async_trait]
impl EmailTransport for FilesystemOutbox {
    async fn send_email(&self, request: &EmailRequest) -> Result<()> {
        let entry = OutboxEntry::Email {
            queued_at: Utc::now(),
            request: request.clone(),
        };
        self.spool(SenderKind::Email, &entry)?;
        Ok(())
    }
}

#[async_trait]
impl SmsTransport for FilesystemOutbox {
    async fn send_sms(&self, request: &SmsRequest) -> Result<()> {
        let entry = OutboxEntry::Sms {
            queued_at: Utc::now(),
            request: request.clone(),
        };
        self.spool(SenderKind::Sms, &entry)?;
        Ok(())
    }
}
