//! Append-only log of registration requests.
//!
//! Nothing here touches the registry: an operator reviews the log and copies
//! approved lines into the registry file by hand.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::StorageResult;
use crate::models::PendingRegistration;

/// Sink for pending registrations.
pub trait PendingLog: Send + Sync {
    /// Append one registration. Entries are never deduplicated.
    fn record(
        &self,
        registration: PendingRegistration,
    ) -> impl Future<Output = StorageResult<()>> + Send;
}

/// Appends one JSON object per line, creating the file on demand.
#[derive(Debug)]
pub struct JsonLinesPendingLog {
    path: PathBuf,
    /// Serializes appends from concurrent connections.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesPendingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PendingLog for JsonLinesPendingLog {
    async fn record(&self, registration: PendingRegistration) -> StorageResult<()> {
        let mut line = serde_json::to_string(&registration)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps registrations in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryPendingLog {
    entries: Mutex<Vec<PendingRegistration>>,
}

impl MemoryPendingLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingRegistration>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<PendingRegistration> {
        self.lock().clone()
    }
}

impl PendingLog for MemoryPendingLog {
    async fn record(&self, registration: PendingRegistration) -> StorageResult<()> {
        self.lock().push(registration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::{DeviceId, DeviceKey};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registration(id: &str) -> PendingRegistration {
        PendingRegistration::new(DeviceKey::from("12345"), DeviceId::from(id))
    }

    #[tokio::test]
    async fn test_appends_lines() {
        let dir = TempDir::new().unwrap();
        let log = JsonLinesPendingLog::new(dir.path().join("requested-widgets.txt"));

        log.record(registration("abc")).await.unwrap();
        log.record(registration("abc")).await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<PendingRegistration> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|r| r.device_id.as_str() == "abc"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonLinesPendingLog::new(dir.path().join("requested-widgets.txt")));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let log = Arc::clone(&log);
                tokio::spawn(async move { log.record(registration(&format!("dev-{i}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 20);
        for line in contents.lines() {
            serde_json::from_str::<PendingRegistration>(line).unwrap();
        }
    }

    #[tokio::test]
    async fn test_unwritable_path_fails() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened for appending.
        let log = JsonLinesPendingLog::new(dir.path());

        assert!(log.record(registration("abc")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_log() {
        let log = MemoryPendingLog::new();
        log.record(registration("a")).await.unwrap();
        log.record(registration("a")).await.unwrap();

        assert_eq!(log.entries().len(), 2);
    }
}
