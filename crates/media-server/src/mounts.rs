use std::collections::HashMap;
use std::path::PathBuf;

use media_engine::MountResolver;

/// Static device table; a device is available while its mount directory exists.
#[derive(Debug, Default)]
pub struct ConfiguredMounts {
    devices: HashMap<String, PathBuf>,
}

impl ConfiguredMounts {
    pub fn new(devices: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Configured devices whose mount directory is missing right now.
    pub fn unavailable(&self) -> Vec<(&str, &PathBuf)> {
        let mut missing: Vec<_> = self
            .devices
            .iter()
            .filter(|(_, path)| !path.is_dir())
            .map(|(id, path)| (id.as_str(), path))
            .collect();
        missing.sort();
        missing
    }
}

impl MountResolver for ConfiguredMounts {
    fn mount_path(&self, device_id: &str) -> Option<PathBuf> {
        let Some(path) = self.devices.get(device_id) else {
            tracing::debug!(device = device_id, "unknown device");
            return None;
        };
        if path.is_dir() {
            Some(path.clone())
        } else {
            tracing::debug!(device = device_id, path = %path.display(), "device not mounted");
            None
        }
    }
}
