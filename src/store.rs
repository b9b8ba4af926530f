use serde::{ Deserialize, Serialize };
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Remembers which device pair was connected last.
pub trait DeviceStore: Send + Sync {
    fn last_device(&self) -> Option<String>;
    fn set_last_device(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredState {
    last_connected_device: Option<String>,
}

/// JSON file store. A missing or unreadable file reads as empty.
pub struct FileDeviceStore {
    path: PathBuf,
    cache: Mutex<StoredState>,
}

impl FileDeviceStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = std::fs
            ::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<StoredState>(&raw).ok())
            .unwrap_or_default();
        debug!(path = %path.display(), last = ?cache.last_connected_device, "device store loaded");
        FileDeviceStore { path, cache: Mutex::new(cache) }
    }
}

impl DeviceStore for FileDeviceStore {
    fn last_device(&self) -> Option<String> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_connected_device.clone()
    }

    fn set_last_device(&self, key: &str) -> anyhow::Result<()> {
        let json = {
            let mut state = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if state.last_connected_device.as_deref() == Some(key) {
                return Ok(());
            }
            state.last_connected_device = Some(key.to_string());
            serde_json::to_string_pretty(&*state)?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    last: Mutex<Option<String>>,
}

impl DeviceStore for MemoryDeviceStore {
    fn last_device(&self) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_device(&self, key: &str) -> anyhow::Result<()> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("g1-bridge-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = temp_path("store");
        let _ = std::fs::remove_file(&path);

        let store = FileDeviceStore::open(&path);
        assert_eq!(store.last_device(), None);
        store.set_last_device("07").unwrap();

        let reopened = FileDeviceStore::open(&path);
        assert_eq!(reopened.last_device(), Some("07".to_string()));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("last_connected_device"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileDeviceStore::open(&path).last_device(), None);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryDeviceStore::default();
        store.set_last_device("a").unwrap();
        assert_eq!(store.last_device().as_deref(), Some("a"));
    }
}
