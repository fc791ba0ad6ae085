//! Dead-letter sink: an append-only file for batches that exhausted
//! `max_batch_retries` (spec.md 4.4, 9 "CleanupOldData"/"dead-letter" notes).

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub struct DeadLetterLog {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

#[derive(Debug, Serialize)]
struct DeadLetterEntry<'a> {
    timestamp: chrono::DateTime<Utc>,
    kind: &'a str,
    reason: &'a str,
    record_count: usize,
    payload: serde_json::Value,
}

impl DeadLetterLog {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn write<T: Serialize>(
        &self,
        kind: &str,
        reason: &str,
        records: &[T],
    ) -> anyhow::Result<()> {
        let entry = DeadLetterEntry {
            timestamp: Utc::now(),
            kind,
            reason,
            record_count: records.len(),
            payload: serde_json::to_value(records)?,
        };
        let line = serde_json::to_string(&entry)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_letter.log");
        let log = DeadLetterLog::open(&path).unwrap();
        log.write("ticker", "storage_unavailable", &[1, 2, 3]).unwrap();
        log.write("ticker", "storage_unavailable", &[4]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
