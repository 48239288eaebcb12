//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::file::File;

/// Where the controller keeps its files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the deployment store file path
    pub fn store_file(&self) -> File {
        File::new(self.base_dir.join("deployments.json"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        if let Some(dir) = std::env::var_os("SEED_HOME") {
            return Self::new(dir);
        }

        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/seed");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".seed");

        Self::new(base_dir)
    }
}
