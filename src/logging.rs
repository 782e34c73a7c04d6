// Append-only download log
//
// One line per event: `<RFC3339 UTC> [<tag>] <message>`. The directory and
// the file are created on the first write. Writes from concurrent workers are
// serialized by one lock, and each is a full open-append-close cycle.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const LOG_FILE_NAME: &str = "downloads.log";

#[derive(Debug)]
pub struct DownloadLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl DownloadLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: Some(dir.as_ref().join(LOG_FILE_NAME)),
            write_lock: Mutex::new(()),
        }
    }

    /// A log that only forwards to `tracing`.
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Never fails; a broken log must not break a download.
    pub fn write(&self, tag: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!("[{}] {}", tag, message);

        let Some(path) = &self.path else {
            return;
        };

        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown-time".to_string());
        let line = format!("{} [{}] {}\n", timestamp, tag, message);

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = append(path, &line) {
            tracing::warn!("[log] cannot write {}: {}", path.display(), e);
        }
    }
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
