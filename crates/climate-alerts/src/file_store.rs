//! File-backed alert storage.
//!
//! [`FileAlertStore`] appends one full alert snapshot per write to a
//! JSON-lines log and syncs it before returning. On open the log is
//! replayed with last-write-wins per alert ID. Reads are served from an
//! in-memory copy.
//!
//! Every write takes the one log lock and waits for its own sync, so
//! persists for unrelated (rule, sensor) pairs queue behind each other.
//! Callers that need independent pairs must use
//! [`MemoryAlertStore`](crate::store::MemoryAlertStore).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::alert::{Alert, AlertFilter, AlertSummary, EpisodeKey};
use crate::error::{AlertError, Result};
use crate::store::{AlertStore, MemoryAlertStore};
use crate::types::{AlertId, Page};

/// Durable alert store backed by an append-only JSON-lines file.
///
/// Writes are serialised on a single file lock followed by `sync_data`.
#[derive(Debug)]
pub struct FileAlertStore {
    path: PathBuf,
    file: Mutex<File>,
    cache: MemoryAlertStore,
}

impl FileAlertStore {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// Unparseable lines, such as a torn final write, are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be created or read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = if path.exists() {
            fs::read_to_string(&path)?
        } else {
            String::new()
        };

        let cache = MemoryAlertStore::new();
        let mut skipped = 0usize;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Alert>(line) {
                Ok(alert) => cache.restore(alert),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "skipped unreadable alert log lines");
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        terminate_line(&mut file)?;
        info!(
            path = %path.display(),
            alerts = cache.len(),
            open = cache.open_count(),
            "opened alert log"
        );

        Ok(Self {
            path,
            file: Mutex::new(file),
            cache,
        })
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, alert: &Alert) -> Result<()> {
        let mut line = serde_json::to_string(alert)?;
        line.push('\n');

        let mut file = self.file.lock();
        let written = terminate_line(&mut file).and_then(|previous| {
            let result = file
                .write_all(line.as_bytes())
                .and_then(|()| file.sync_data());
            if result.is_err() {
                if let Err(e) = file.set_len(previous) {
                    warn!(path = %self.path.display(), error = %e, "could not drop partial alert record");
                }
            }
            result
        });
        if let Err(e) = written {
            warn!(path = %self.path.display(), alert_id = %alert.id, error = %e, "alert log write failed");
            return Err(e.into());
        }
        self.cache.restore(alert.clone());
        Ok(())
    }
}

/// Ends an unterminated last line so the next record starts on its own line.
///
/// Returns the resulting file length.
fn terminate_line(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }
    file.write_all(b"\n")?;
    Ok(len + 1)
}

impl AlertStore for FileAlertStore {
    fn insert(&self, alert: Alert) -> Result<()> {
        self.append(&alert)
    }

    fn update(&self, alert: Alert) -> Result<()> {
        if self.cache.get(alert.id).is_none() {
            return Err(AlertError::AlertNotFound {
                id: alert.id.to_string(),
            });
        }
        self.append(&alert)
    }

    fn get(&self, id: AlertId) -> Option<Alert> {
        self.cache.get(id)
    }

    fn find_open(&self, key: &EpisodeKey) -> Option<Alert> {
        self.cache.find_open(key)
    }

    fn last_fired(&self, key: &EpisodeKey) -> Option<DateTime<Utc>> {
        self.cache.last_fired(key)
    }

    fn query(&self, filter: &AlertFilter, page: Page) -> Vec<Alert> {
        self.cache.query(filter, page)
    }

    fn summary(&self, filter: &AlertFilter) -> AlertSummary {
        self.cache.summary(filter)
    }

    fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertState;
    use crate::store::tests::draft;
    use crate::types::RuleId;
    use tempfile::TempDir;

    fn make_temp_store() -> (FileAlertStore, TempDir) {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = FileAlertStore::open(temp_dir.path().join("alerts.jsonl")).expect("open store");
        (store, temp_dir)
    }

    #[test]
    fn open_creates_directories() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("nested/data/alerts.jsonl");
        let store = FileAlertStore::open(&path);
        assert!(store.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn insert_is_readable_immediately() {
        let (store, _dir) = make_temp_store();
        let alert = Alert::from_draft(draft(RuleId::new(), "s-1"), Utc::now());
        assert!(store.insert(alert.clone()).is_ok());
        assert_eq!(store.get(alert.id), Some(alert));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replay_keeps_latest_state() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("alerts.jsonl");
        let rule = RuleId::new();

        let (resolved_id, open_id) = {
            let store = FileAlertStore::open(&path).expect("open store");
            let mut first = Alert::from_draft(draft(rule, "s-1"), Utc::now());
            assert!(store.insert(first.clone()).is_ok());
            assert!(first.transition(AlertState::Resolved, Utc::now()));
            assert!(store.update(first.clone()).is_ok());

            let second = Alert::from_draft(draft(rule, "s-1"), Utc::now());
            assert!(store.insert(second.clone()).is_ok());
            (first.id, second.id)
        };

        let reopened = FileAlertStore::open(&path).expect("reopen store");
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.get(resolved_id).map(|a| a.state),
            Some(AlertState::Resolved)
        );
        assert_eq!(
            reopened.find_open(&EpisodeKey::new(rule, "s-1")).map(|a| a.id),
            Some(open_id)
        );
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("alerts.jsonl");
        let alert = Alert::from_draft(draft(RuleId::new(), "s-1"), Utc::now());
        {
            let store = FileAlertStore::open(&path).expect("open store");
            assert!(store.insert(alert.clone()).is_ok());
        }
        let mut file = OpenOptions::new().append(true).open(&path).expect("open log");
        assert!(file.write_all(b"{\"id\":\"trunc").is_ok());
        drop(file);

        let next = Alert::from_draft(draft(RuleId::new(), "s-2"), Utc::now());
        {
            let reopened = FileAlertStore::open(&path).expect("reopen store");
            assert_eq!(reopened.len(), 1);
            assert_eq!(reopened.get(alert.id), Some(alert));
            assert!(reopened.insert(next.clone()).is_ok());
        }

        let again = FileAlertStore::open(&path).expect("reopen store");
        assert_eq!(again.len(), 2);
        assert_eq!(again.get(next.id), Some(next));
    }

    #[test]
    fn partial_record_does_not_swallow_next_insert() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("alerts.jsonl");
        let rule = RuleId::new();
        let first = Alert::from_draft(draft(rule, "s-1"), Utc::now());
        let second = Alert::from_draft(draft(rule, "s-2"), Utc::now());
        {
            let store = FileAlertStore::open(&path).expect("open store");
            store.insert(first.clone()).expect("insert first");

            let mut other = OpenOptions::new().append(true).open(&path).expect("open log");
            other.write_all(b"{\"id\":\"trunc").expect("write fragment");
            drop(other);

            store.insert(second.clone()).expect("insert second");
        }

        let reopened = FileAlertStore::open(&path).expect("reopen store");
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(second.id), Some(second));
        assert!(reopened.find_open(&EpisodeKey::new(rule, "s-2")).is_some());
    }

    #[test]
    fn terminate_line_reports_length() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("log");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .expect("open file");
        assert_eq!(terminate_line(&mut file).expect("empty"), 0);

        file.write_all(b"abc").expect("write");
        assert_eq!(terminate_line(&mut file).expect("torn"), 4);
        assert_eq!(terminate_line(&mut file).expect("clean"), 4);
        assert_eq!(fs::read_to_string(&path).expect("read"), "abc\n");
    }

    #[test]
    fn concurrent_inserts_share_one_log() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("alerts.jsonl");
        let store = std::sync::Arc::new(FileAlertStore::open(&path).expect("open store"));
        let rule = RuleId::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    let alert = Alert::from_draft(draft(rule, &format!("s-{i}")), Utc::now());
                    store.insert(alert)
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join").expect("insert");
        }
        drop(store);

        let reopened = FileAlertStore::open(&path).expect("reopen store");
        assert_eq!(reopened.len(), 8);
        assert_eq!(reopened.cache.open_count(), 8);
    }

    #[test]
    fn update_unknown_alert_fails() {
        let (store, _dir) = make_temp_store();
        let alert = Alert::from_draft(draft(RuleId::new(), "s-1"), Utc::now());
        assert!(matches!(store.update(alert), Err(AlertError::AlertNotFound { .. })));
    }
}
