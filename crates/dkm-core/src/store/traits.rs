//! Storage trait definitions

use std::path::PathBuf;

use crate::config::SiteConfig;
use crate::context::SiteState;
use crate::data::Dataset;
use crate::error::Result;

/// File name of a site's persisted configuration inside its output directory.
pub const CONFIG_FILE: &str = "dkm_config.json";

/// Write-once storage of a site's configuration.
///
/// Each store is owned by exactly one site; no two roles ever write the same
/// site's config.
pub trait SiteConfigStore: Send {
    /// Reference of the site's config if it has been written.
    fn lookup(&self, state: &SiteState) -> Result<Option<String>>;

    /// Persist the site's config and return its reference.
    ///
    /// Returns `DkmError::Configuration` if a config is already present.
    fn write(&mut self, state: &SiteState, config: &SiteConfig) -> Result<String>;

    /// Read a config back by reference.
    fn load(&self, config_ref: &str) -> Result<SiteConfig>;

    /// Reference a site's config would be stored under.
    fn config_ref(&self, state: &SiteState) -> String {
        let path: PathBuf = state.output_directory.join(CONFIG_FILE);
        path.to_string_lossy().into_owned()
    }
}

/// Initialize a site's config unless it already exists.
///
/// Re-initialization is a no-op: `make` is not called and the existing
/// reference is returned.
pub fn init_once<F>(store: &mut dyn SiteConfigStore, state: &SiteState, make: F) -> Result<String>
where
    F: FnOnce() -> Result<SiteConfig>,
{
    if let Some(existing) = store.lookup(state)? {
        return Ok(existing);
    }
    let config = make()?;
    store.write(state, &config)
}

/// Resolves a site's `data_ref` to its local dataset.
pub trait DatasetSource: Send + Sync {
    fn load(&self, data_ref: &str) -> Result<Dataset>;
}
