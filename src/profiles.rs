//! Per-device settings persistence
//!
//! Settings that only make sense per output device (exclusive mode, buffer
//! size, volume, ReplayGain behavior) are keyed by device name and survive
//! restarts. Storage is a single JSON file; the engine thread is the only
//! writer.

use crate::dsp::replaygain::ReplayGainMode;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const PROFILE_FILE: &str = "device_profiles.json";

/// Settings remembered for one output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_name: String,

    /// Attempt hardware-direct (format-exact) opens on this device
    pub exclusive_mode: bool,

    /// Requested buffer size in frames; 0 means device default
    #[serde(default)]
    pub buffer_size: u32,

    /// Master volume restored when a stream opens on this device
    #[serde(default = "default_volume")]
    pub volume: f32,

    #[serde(default)]
    pub replaygain_mode: ReplayGainMode,

    /// Cap ReplayGain boost so the track peak cannot clip
    #[serde(default = "default_true")]
    pub clipping_prevention: bool,
}

fn default_volume() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            exclusive_mode: true,
            buffer_size: 0,
            volume: 1.0,
            replaygain_mode: ReplayGainMode::default(),
            clipping_prevention: true,
        }
    }
}

impl DeviceProfile {
    /// Fresh profile for a device seen for the first time.
    pub fn for_device(name: &str) -> Self {
        Self {
            device_name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Profile persistence seam. Profiles are keyed by device name and always
/// read or written whole.
pub trait ProfileStore: Send + Sync {
    fn load(&self, device_name: &str) -> Result<Option<DeviceProfile>>;
    fn save(&self, profile: &DeviceProfile) -> Result<()>;
    fn delete(&self, device_name: &str) -> Result<()>;
    fn all(&self) -> Result<Vec<DeviceProfile>>;
}

/// JSON-file-backed store: one map of device name to profile.
pub struct JsonProfileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file
    io_lock: Mutex<()>,
}

impl JsonProfileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(PROFILE_FILE),
            io_lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<HashMap<String, DeviceProfile>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let data = fs::read_to_string(&self.path)?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Profile(format!("Corrupt profile file: {}", e)))
    }

    fn write_map(&self, map: &HashMap<String, DeviceProfile>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(map)
            .map_err(|e| Error::Profile(format!("Failed to serialize profiles: {}", e)))?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

impl ProfileStore for JsonProfileStore {
    fn load(&self, device_name: &str) -> Result<Option<DeviceProfile>> {
        let _guard = self.io_lock.lock();
        Ok(self.read_map()?.remove(device_name))
    }

    fn save(&self, profile: &DeviceProfile) -> Result<()> {
        let _guard = self.io_lock.lock();
        let mut map = self.read_map()?;
        map.insert(profile.device_name.clone(), profile.clone());
        self.write_map(&map)?;
        debug!("Saved profile for '{}'", profile.device_name);
        Ok(())
    }

    fn delete(&self, device_name: &str) -> Result<()> {
        let _guard = self.io_lock.lock();
        let mut map = self.read_map()?;
        if map.remove(device_name).is_some() {
            self.write_map(&map)?;
            debug!("Deleted profile for '{}'", device_name);
        }
        Ok(())
    }

    fn all(&self) -> Result<Vec<DeviceProfile>> {
        let _guard = self.io_lock.lock();
        let mut profiles: Vec<_> = self.read_map()?.into_values().collect();
        profiles.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = JsonProfileStore::new(dir.path());
        assert!(store.load("USB DAC").unwrap().is_none());
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonProfileStore::new(dir.path());

        let mut profile = DeviceProfile::for_device("USB DAC");
        profile.exclusive_mode = false;
        profile.buffer_size = 512;
        profile.volume = 0.8;
        store.save(&profile).unwrap();

        // A fresh store reading the same file sees the saved values
        let store2 = JsonProfileStore::new(dir.path());
        let loaded = store2.load("USB DAC").unwrap().unwrap();
        assert!(!loaded.exclusive_mode);
        assert_eq!(loaded.buffer_size, 512);
        assert!((loaded.volume - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_save_updates_existing_entry() {
        let dir = tempdir().unwrap();
        let store = JsonProfileStore::new(dir.path());

        store.save(&DeviceProfile::for_device("A")).unwrap();
        store.save(&DeviceProfile::for_device("B")).unwrap();

        let mut updated = DeviceProfile::for_device("A");
        updated.volume = 0.5;
        store.save(&updated).unwrap();

        let profiles = store.all().unwrap();
        assert_eq!(profiles.len(), 2);
        let a = profiles.iter().find(|p| p.device_name == "A").unwrap();
        assert!((a.volume - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_delete_removes_only_the_named_profile() {
        let dir = tempdir().unwrap();
        let store = JsonProfileStore::new(dir.path());

        store.save(&DeviceProfile::for_device("A")).unwrap();
        store.save(&DeviceProfile::for_device("B")).unwrap();

        store.delete("A").unwrap();
        assert!(store.load("A").unwrap().is_none());
        assert!(store.load("B").unwrap().is_some());

        // Deleting a missing profile is not an error
        store.delete("A").unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(PROFILE_FILE), "not json").unwrap();

        let store = JsonProfileStore::new(dir.path());
        assert!(matches!(store.load("X"), Err(Error::Profile(_))));
    }

    #[test]
    fn test_defaults_favor_fidelity() {
        let profile = DeviceProfile::for_device("DAC");
        assert!(profile.exclusive_mode);
        assert!(profile.clipping_prevention);
        assert_eq!(profile.volume, 1.0);
    }
}
