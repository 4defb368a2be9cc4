//! In-memory storage backends
//!
//! HashMap-based implementations for tests and in-process simulations.

use std::collections::HashMap;

use crate::config::SiteConfig;
use crate::context::SiteState;
use crate::data::Dataset;
use crate::error::{DkmError, Result};
use crate::store::traits::{DatasetSource, SiteConfigStore};

/// In-memory site config store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    configs: HashMap<String, SiteConfig>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl SiteConfigStore for MemoryConfigStore {
    fn lookup(&self, state: &SiteState) -> Result<Option<String>> {
        let key = self.config_ref(state);
        Ok(self.configs.contains_key(&key).then_some(key))
    }

    fn write(&mut self, state: &SiteState, config: &SiteConfig) -> Result<String> {
        let key = self.config_ref(state);
        if self.configs.contains_key(&key) {
            return Err(DkmError::config(format!("config already written: {}", key)));
        }
        self.configs.insert(key.clone(), config.clone());
        Ok(key)
    }

    fn load(&self, config_ref: &str) -> Result<SiteConfig> {
        self.configs
            .get(config_ref)
            .cloned()
            .ok_or_else(|| DkmError::config(format!("no config at {}", config_ref)))
    }
}

/// In-memory dataset source keyed by data reference.
#[derive(Debug, Default, Clone)]
pub struct MemoryDatasetSource {
    datasets: HashMap<String, Dataset>,
}

impl MemoryDatasetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, data_ref: impl Into<String>, dataset: Dataset) -> Self {
        self.insert(data_ref, dataset);
        self
    }

    pub fn insert(&mut self, data_ref: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(data_ref.into(), dataset);
    }
}

impl DatasetSource for MemoryDatasetSource {
    fn load(&self, data_ref: &str) -> Result<Dataset> {
        self.datasets
            .get(data_ref)
            .cloned()
            .ok_or_else(|| DkmError::config(format!("unknown data reference '{}'", data_ref)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OptimizationMode, SiteInit};
    use crate::data::vector;
    use crate::store::init_once;

    fn config(k: usize) -> SiteConfig {
        SiteConfig::from_init(
            "site.json",
            &SiteInit {
                k: Some(k),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn config_is_write_once() {
        let mut store = MemoryConfigStore::new();
        let state = SiteState::new("a", "/out/a");

        let first = init_once(&mut store, &state, || Ok(config(2))).unwrap();
        let second = init_once(&mut store, &state, || Ok(config(9))).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.load(&first).unwrap().k, 2);
        assert_eq!(store.len(), 1);
        assert!(store.write(&state, &config(3)).is_err());
    }

    #[test]
    fn reinit_does_not_evaluate_new_config() {
        let mut store = MemoryConfigStore::new();
        let state = SiteState::new("a", "/out/a");
        init_once(&mut store, &state, || Ok(config(2))).unwrap();
        let again = init_once(&mut store, &state, || {
            Err(DkmError::config("must not be called"))
        });
        assert!(again.is_ok());
    }

    #[test]
    fn sites_get_separate_configs() {
        let mut store = MemoryConfigStore::new();
        let a = init_once(&mut store, &SiteState::new("a", "/out/a"), || Ok(config(2))).unwrap();
        let b = init_once(&mut store, &SiteState::new("b", "/out/b"), || Ok(config(4))).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.load(&b).unwrap().optimization, OptimizationMode::Lloyd);
        assert!(store.load("/nowhere").is_err());
    }

    #[test]
    fn dataset_source_resolves_refs() {
        let data = Dataset::new(vec![vector(&[1.0])]).unwrap();
        let source = MemoryDatasetSource::new().with_dataset("one", data.clone());
        assert_eq!(source.load("one").unwrap(), data);
        assert!(matches!(source.load("two"), Err(DkmError::Configuration(_))));
    }
}
