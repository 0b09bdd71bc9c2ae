use crate::cache::CacheConfig;
use crate::tree::TreeConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything a `geocube init` run decides and a `geocube serve` run
/// needs back: the tree shape and the cache tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub tree: TreeConfig,
    pub cache: CacheConfig,
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerDe(#[from] serde_json::Error),
}

fn settings_file(path: &Path) -> PathBuf {
    path.join("settings.json")
}

impl Settings {
    pub fn load_from_data_folder(path: &Path) -> Result<Self, SettingsError> {
        let file = File::open(settings_file(path))?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn save_to_data_folder(&self, path: &Path) -> Result<(), SettingsError> {
        let file = File::create(settings_file(path))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            tree: TreeConfig {
                dims: vec![0, 1],
                d_caps: vec![4, 4],
                split_ratio: 0.9,
                init_mins: vec![0.0, 0.0],
                init_maxs: vec![10.0, 10.0],
            },
            cache: CacheConfig::default(),
        };
        settings.save_to_data_folder(dir.path()).unwrap();
        let loaded = Settings::load_from_data_folder(dir.path()).unwrap();
        assert_eq!(loaded.tree.dims, settings.tree.dims);
        assert_eq!(loaded.cache.cache_size, settings.cache.cache_size);
    }
}
