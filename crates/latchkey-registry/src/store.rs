//! Persistence backends for the device registry.
//!
//! The registry is read once at startup and rewritten in full whenever a PIN
//! changes. [`JsonLinesStore`] keeps one JSON device per line in a text file;
//! [`MemoryStore`] keeps everything in memory for tests.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use latchkey_core::constants::COMMENT_MARKER;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::models::Device;

/// Backing store for [`DeviceRegistry`](crate::DeviceRegistry).
///
/// Methods return `Send` futures so a registry can be shared by tasks
/// spawned on the Tokio runtime.
pub trait DeviceStore: Send + Sync {
    /// Read every stored device, in file order.
    fn load(&self) -> impl Future<Output = StorageResult<Vec<Device>>> + Send;

    /// Replace the stored devices with `devices`.
    fn save_all(&self, devices: &[Device]) -> impl Future<Output = StorageResult<()>> + Send;
}

/// One JSON device per line.
///
/// Blank lines and lines starting with `#` are skipped on load, which lets an
/// operator comment out a device by hand. Saving writes a sibling temporary
/// file and renames it over the original.
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Parse registry file contents.
///
/// # Errors
///
/// Returns `StorageError::CorruptRecord` with the 1-based line number of the
/// first line that is not a valid device.
pub fn parse_devices(contents: &str) -> StorageResult<Vec<Device>> {
    let mut devices = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            continue;
        }
        let device = serde_json::from_str(line).map_err(|source| StorageError::CorruptRecord {
            line: index + 1,
            source,
        })?;
        devices.push(device);
    }
    Ok(devices)
}

impl DeviceStore for JsonLinesStore {
    async fn load(&self) -> StorageResult<Vec<Device>> {
        // Create the file on first start.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let contents = fs::read_to_string(&self.path).await?;
        let devices = parse_devices(&contents)?;
        debug!(path = %self.path.display(), count = devices.len(), "Read registry file");
        Ok(devices)
    }

    async fn save_all(&self, devices: &[Device]) -> StorageResult<()> {
        let mut contents = String::new();
        for device in devices {
            contents.push_str(&serde_json::to_string(device)?);
            contents.push('\n');
        }

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), count = devices.len(), "Rewrote registry file");
        Ok(())
    }
}

/// In-memory store for tests.
///
/// Clones share state, so a test can keep one clone to inspect what the
/// registry saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    devices: Arc<Mutex<Vec<Device>>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Device>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current stored devices.
    pub fn devices(&self) -> Vec<Device> {
        self.lock().clone()
    }

    /// Number of successful `save_all` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl DeviceStore for MemoryStore {
    async fn load(&self) -> StorageResult<Vec<Device>> {
        Ok(self.devices())
    }

    async fn save_all(&self, devices: &[Device]) -> StorageResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("simulated write failure").into());
        }
        *self.lock() = devices.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::{DeviceId, DeviceKey, Pin};
    use tempfile::TempDir;

    fn device(id: &str, pin: &str) -> Device {
        Device::new(DeviceId::from(id), DeviceKey::from("12345"), Pin::from(pin))
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let contents = r#"
# operator notes
{"device_id": "a", "device_key": "k", "pin": "111111", "flag": "fa"}

   # {"device_id": "b", "device_key": "k", "pin": "222222"}
{"device_id": "c", "device_key": "k", "pin": "333333"}
"#;
        let devices = parse_devices(contents).unwrap();
        let ids: Vec<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_parse_reports_corrupt_line() {
        let contents = "{\"device_id\": \"a\", \"device_key\": \"k\", \"pin\": \"1\"}\n\nnot json\n";
        match parse_devices(contents) {
            Err(StorageError::CorruptRecord { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected corrupt record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registered-widgets.txt");
        let store = JsonLinesStore::new(&path);

        let devices = store.load().await.unwrap();
        assert!(devices.is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonLinesStore::new(dir.path().join("registered-widgets.txt"));
        let devices = vec![
            device("a", "111111").with_unlock_payload("<theflag>"),
            device("b", "222222"),
        ];

        store.save_all(&devices).await.unwrap();
        assert_eq!(store.load().await.unwrap(), devices);

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let store = JsonLinesStore::new(dir.path().join("gone").join("registered-widgets.txt"));

        let result = store.save_all(&[device("a", "111111")]).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_memory_store_failure_toggle() {
        let store = MemoryStore::new(vec![device("a", "111111")]);

        store.set_fail_saves(true);
        assert!(store.save_all(&[]).await.is_err());
        assert_eq!(store.devices().len(), 1);

        store.set_fail_saves(false);
        store.save_all(&[]).await.unwrap();
        assert!(store.devices().is_empty());
        assert_eq!(store.save_count(), 1);
    }
}
