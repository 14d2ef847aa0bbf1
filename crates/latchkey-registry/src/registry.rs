//! In-memory device registry backed by a [`DeviceStore`].

use std::collections::HashMap;

use latchkey_core::{DeviceId, DeviceKey, Pin};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::StorageResult;
use crate::models::Device;
use crate::store::DeviceStore;

/// Result of checking a PIN against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinCheck {
    /// The device exists and the PIN matches. Carries the device's unlock
    /// payload, if it has one.
    Match(Option<String>),
    /// Unknown device or wrong PIN.
    Mismatch,
}

impl PinCheck {
    pub fn is_match(&self) -> bool {
        matches!(self, PinCheck::Match(_))
    }

    /// Unlock payload of a match; `None` on mismatch.
    pub fn into_payload(self) -> Option<String> {
        match self {
            PinCheck::Match(payload) => payload,
            PinCheck::Mismatch => None,
        }
    }
}

/// Devices in load order plus an index by ID.
#[derive(Debug, Default)]
struct Devices {
    entries: Vec<Device>,
    index: HashMap<DeviceId, usize>,
}

impl Devices {
    fn get(&self, device_id: &DeviceId) -> Option<&Device> {
        self.index.get(device_id).map(|&i| &self.entries[i])
    }

    /// Insert unless the ID is taken. Returns `false` for a duplicate.
    fn insert(&mut self, device: Device) -> bool {
        if self.index.contains_key(&device.device_id) {
            return false;
        }
        self.index.insert(device.device_id.clone(), self.entries.len());
        self.entries.push(device);
        true
    }
}

/// Authoritative set of enrolled devices.
///
/// Lookups take a shared read lock. [`update_pin`](Self::update_pin) holds
/// the write lock across the in-memory change and the full rewrite of the
/// store, so concurrent PIN changes never interleave and readers never see a
/// PIN that is not on disk.
///
/// # Examples
///
/// ```
/// use latchkey_core::{DeviceId, DeviceKey, Pin};
/// use latchkey_registry::{Device, DeviceRegistry, MemoryStore};
///
/// # async fn example() -> latchkey_registry::StorageResult<()> {
/// let store = MemoryStore::new(vec![Device::new(
///     DeviceId::from("abc"),
///     DeviceKey::from("12345"),
///     Pin::from("123456"),
/// )]);
/// let registry = DeviceRegistry::load(store).await?;
///
/// assert!(registry.verify_key(&DeviceId::from("abc"), &DeviceKey::from("12345")).await);
/// assert!(registry.update_pin(&DeviceId::from("abc"), Pin::from("654321")).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceRegistry<S> {
    store: S,
    devices: RwLock<Devices>,
}

impl<S: DeviceStore> DeviceRegistry<S> {
    /// Populate the registry from `store`.
    ///
    /// When a device ID appears more than once, the first record wins and
    /// later ones are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns the store's error if it cannot be read.
    pub async fn load(store: S) -> StorageResult<Self> {
        let mut devices = Devices::default();
        for device in store.load().await? {
            let device_id = device.device_id.clone();
            if !devices.insert(device) {
                warn!(device_id = %device_id, "Skipping duplicate device ID");
            }
        }
        info!(count = devices.entries.len(), "Loaded registered devices");

        Ok(Self {
            store,
            devices: RwLock::new(devices),
        })
    }

    /// Snapshot of one device.
    pub async fn lookup(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    /// `true` iff the device exists and its stored key equals `device_key`.
    pub async fn verify_key(&self, device_id: &DeviceId, device_key: &DeviceKey) -> bool {
        self.devices
            .read()
            .await
            .get(device_id)
            .is_some_and(|d| d.device_key == *device_key)
    }

    /// Check `pin` against the device's current PIN.
    pub async fn verify_pin(&self, device_id: &DeviceId, pin: &Pin) -> PinCheck {
        match self.devices.read().await.get(device_id) {
            Some(device) if device.pin == *pin => PinCheck::Match(device.unlock_payload.clone()),
            _ => PinCheck::Mismatch,
        }
    }

    /// Replace a device's PIN and persist every device.
    ///
    /// Returns `Ok(false)` if the device is unknown.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the rewrite fails. The in-memory PIN is
    /// restored first, so memory and store stay in agreement.
    pub async fn update_pin(&self, device_id: &DeviceId, new_pin: Pin) -> StorageResult<bool> {
        let mut devices = self.devices.write().await;
        let Some(&index) = devices.index.get(device_id) else {
            return Ok(false);
        };
        self.replace_pin(&mut devices, index, device_id, new_pin).await?;
        Ok(true)
    }

    /// Replace a device's PIN only if it currently equals `current_pin`.
    ///
    /// The check and the rewrite happen under one write lock, so a PIN
    /// changed concurrently (by a master reset, say) cannot be overwritten on
    /// the strength of the old one. Returns `Ok(false)` if the device is
    /// unknown or `current_pin` does not match.
    ///
    /// # Errors
    ///
    /// Same as [`update_pin`](Self::update_pin).
    pub async fn change_pin_if(
        &self,
        device_id: &DeviceId,
        current_pin: &Pin,
        new_pin: Pin,
    ) -> StorageResult<bool> {
        let mut devices = self.devices.write().await;
        let index = match devices.index.get(device_id) {
            Some(&index) if devices.entries[index].pin == *current_pin => index,
            _ => return Ok(false),
        };
        self.replace_pin(&mut devices, index, device_id, new_pin).await?;
        Ok(true)
    }

    /// Swap the PIN at `index` and persist, restoring it if the store fails.
    async fn replace_pin(
        &self,
        devices: &mut Devices,
        index: usize,
        device_id: &DeviceId,
        new_pin: Pin,
    ) -> StorageResult<()> {
        let previous = std::mem::replace(&mut devices.entries[index].pin, new_pin);
        if let Err(e) = self.store.save_all(&devices.entries).await {
            devices.entries[index].pin = previous;
            warn!(device_id = %device_id, error = %e, "PIN change not persisted, rolled back");
            return Err(e);
        }

        info!(device_id = %device_id, "PIN updated");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.entries.is_empty()
    }

    /// IDs of all devices, in load order.
    pub async fn device_ids(&self) -> Vec<DeviceId> {
        self.devices
            .read()
            .await
            .entries
            .iter()
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonLinesStore, MemoryStore};
    use rstest::rstest;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn device(id: &str, key: &str, pin: &str) -> Device {
        Device::new(DeviceId::from(id), DeviceKey::from(key), Pin::from(pin))
    }

    async fn registry() -> DeviceRegistry<MemoryStore> {
        let store = MemoryStore::new(vec![
            device("abc", "12345", "123456").with_unlock_payload("<theflag>"),
            device("def", "54321", "000000"),
        ]);
        DeviceRegistry::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn test_lookup() {
        let registry = registry().await;

        let found = registry.lookup(&DeviceId::from("abc")).await.unwrap();
        assert_eq!(found.pin, Pin::from("123456"));
        assert!(registry.lookup(&DeviceId::from("zzz")).await.is_none());
        assert_eq!(registry.len().await, 2);
        assert!(!registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_keeps_first_duplicate() {
        let store = MemoryStore::new(vec![
            device("abc", "first", "111111"),
            device("def", "k", "222222"),
            device("abc", "second", "333333"),
        ]);
        let registry = DeviceRegistry::load(store).await.unwrap();

        assert_eq!(registry.len().await, 2);
        assert_eq!(
            registry.device_ids().await,
            vec![DeviceId::from("abc"), DeviceId::from("def")]
        );
        let abc = registry.lookup(&DeviceId::from("abc")).await.unwrap();
        assert_eq!(abc.device_key, DeviceKey::from("first"));
        assert_eq!(abc.pin, Pin::from("111111"));
    }

    #[rstest]
    #[case("abc", "12345", true)]
    #[case("abc", "54321", false)]
    #[case("abc", "", false)]
    #[case("zzz", "12345", false)]
    #[tokio::test]
    async fn test_verify_key(#[case] id: &str, #[case] key: &str, #[case] expected: bool) {
        let registry = registry().await;
        assert_eq!(
            registry.verify_key(&DeviceId::from(id), &DeviceKey::from(key)).await,
            expected
        );
    }

    #[tokio::test]
    async fn test_verify_pin() {
        let registry = registry().await;

        assert_eq!(
            registry.verify_pin(&DeviceId::from("abc"), &Pin::from("123456")).await,
            PinCheck::Match(Some("<theflag>".to_string()))
        );
        assert_eq!(
            registry.verify_pin(&DeviceId::from("def"), &Pin::from("000000")).await,
            PinCheck::Match(None)
        );
        assert_eq!(
            registry.verify_pin(&DeviceId::from("abc"), &Pin::from("654321")).await,
            PinCheck::Mismatch
        );
        assert_eq!(
            registry.verify_pin(&DeviceId::from("zzz"), &Pin::from("123456")).await,
            PinCheck::Mismatch
        );
    }

    #[tokio::test]
    async fn test_update_pin_persists_all_devices() {
        let registry = registry().await;

        assert!(registry.update_pin(&DeviceId::from("abc"), Pin::from("999999")).await.unwrap());
        assert!(registry.verify_pin(&DeviceId::from("abc"), &Pin::from("999999")).await.is_match());
        assert!(!registry.verify_pin(&DeviceId::from("abc"), &Pin::from("123456")).await.is_match());

        let saved = registry.store().devices();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].pin, Pin::from("999999"));
        assert_eq!(saved[1].pin, Pin::from("000000"));
        assert_eq!(registry.store().save_count(), 1);
    }

    #[tokio::test]
    async fn test_update_pin_unknown_device() {
        let registry = registry().await;

        assert!(!registry.update_pin(&DeviceId::from("zzz"), Pin::from("999999")).await.unwrap());
        assert_eq!(registry.store().save_count(), 0);
    }

    #[tokio::test]
    async fn test_update_pin_rolls_back_on_store_failure() {
        let registry = registry().await;
        registry.store().set_fail_saves(true);

        let result = registry.update_pin(&DeviceId::from("abc"), Pin::from("999999")).await;
        assert!(result.is_err());
        assert!(registry.verify_pin(&DeviceId::from("abc"), &Pin::from("123456")).await.is_match());
    }

    #[rstest]
    #[case::matching("abc", "123456", true)]
    #[case::stale("abc", "654321", false)]
    #[case::unknown("zzz", "123456", false)]
    #[tokio::test]
    async fn test_change_pin_if(#[case] id: &str, #[case] current: &str, #[case] changed: bool) {
        let registry = registry().await;

        let result = registry
            .change_pin_if(&DeviceId::from(id), &Pin::from(current), Pin::from("999999"))
            .await
            .unwrap();

        assert_eq!(result, changed);
        assert_eq!(registry.store().save_count(), usize::from(changed));
        let expected = if changed { "999999" } else { "123456" };
        assert!(registry.verify_pin(&DeviceId::from("abc"), &Pin::from(expected)).await.is_match());
    }

    #[tokio::test]
    async fn test_change_pin_if_after_reset_is_refused() {
        let registry = registry().await;
        let abc = DeviceId::from("abc");

        assert!(registry.update_pin(&abc, Pin::from("777777")).await.unwrap());
        assert!(
            !registry
                .change_pin_if(&abc, &Pin::from("123456"), Pin::from("111111"))
                .await
                .unwrap()
        );
        assert!(registry.verify_pin(&abc, &Pin::from("777777")).await.is_match());
    }

    #[tokio::test]
    async fn test_concurrent_conditional_changes_one_wins() {
        let registry = Arc::new(registry().await);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let new_pin = Pin::new(format!("{:06}", 900_000 + i));
                    registry
                        .change_pin_if(&DeviceId::from("abc"), &Pin::from("123456"), new_pin)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.store().save_count(), 1);
    }

    #[tokio::test]
    async fn test_update_pin_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registered-widgets.txt");
        std::fs::write(
            &path,
            "# seed\n{\"device_id\": \"abc\", \"device_key\": \"12345\", \"pin\": \"123456\", \"flag\": \"<theflag>\"}\n",
        )
        .unwrap();

        let registry = DeviceRegistry::load(JsonLinesStore::new(&path)).await.unwrap();
        registry.update_pin(&DeviceId::from("abc"), Pin::from("424242")).await.unwrap();
        drop(registry);

        let reloaded = DeviceRegistry::load(JsonLinesStore::new(&path)).await.unwrap();
        let abc = reloaded.lookup(&DeviceId::from("abc")).await.unwrap();
        assert_eq!(abc.pin, Pin::from("424242"));
        assert_eq!(abc.unlock_payload.as_deref(), Some("<theflag>"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let registry = Arc::new(registry().await);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let pin = Pin::new(format!("{i:06}"));
                    registry.update_pin(&DeviceId::from("abc"), pin).await.unwrap()
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        // Whatever update ran last is what both memory and store hold.
        let in_memory = registry.lookup(&DeviceId::from("abc")).await.unwrap().pin;
        let stored = registry.store().devices()[0].pin.clone();
        assert_eq!(in_memory, stored);
        assert_eq!(registry.store().save_count(), 16);
    }
}
