//! JSON file backends for a site's config and data.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use dkm_core::{Dataset, DatasetSource, DkmError, Result, SiteConfig, SiteConfigStore, SiteState};
use tracing::debug;

/// Site config persisted as `dkm_config.json` in the site's output directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileConfigStore;

impl SiteConfigStore for FileConfigStore {
    fn lookup(&self, state: &SiteState) -> Result<Option<String>> {
        let config_ref = self.config_ref(state);
        Ok(Path::new(&config_ref).is_file().then_some(config_ref))
    }

    fn write(&mut self, state: &SiteState, config: &SiteConfig) -> Result<String> {
        fs::create_dir_all(&state.output_directory)?;
        let config_ref = self.config_ref(state);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&config_ref) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(DkmError::Configuration(format!(
                    "config already written: {}",
                    config_ref
                )))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(config)?.as_bytes())?;
        debug!(site = %state.site_id, path = %config_ref, "wrote site config");
        Ok(config_ref)
    }

    fn load(&self, config_ref: &str) -> Result<SiteConfig> {
        let text = fs::read_to_string(config_ref)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Datasets stored as JSON arrays of matrices, resolved under `root`.
#[derive(Debug, Clone)]
pub struct FileDatasetSource {
    root: PathBuf,
}

impl FileDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DatasetSource for FileDatasetSource {
    fn load(&self, data_ref: &str) -> Result<Dataset> {
        read_dataset(&self.root.join(data_ref))
    }
}

pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(dataset)?)?;
    Ok(())
}
