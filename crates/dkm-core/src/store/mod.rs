//! Site-local storage seams
//!
//! A site persists its configuration once and resolves its data by
//! reference. Both concerns sit behind traits so the message-driven path can
//! run against in-memory backends in tests and against files in deployment:
//!
//! - **Memory**: `MemoryConfigStore`, `MemoryDatasetSource` (this crate)
//! - **Files**: JSON-backed stores in the `dkm` binary
//!
//! # Example
//!
//! ```rust
//! use dkm_core::context::SiteState;
//! use dkm_core::config::{SiteConfig, SiteInit};
//! use dkm_core::store::{init_once, MemoryConfigStore, SiteConfigStore};
//!
//! let mut store = MemoryConfigStore::new();
//! let state = SiteState::new("site0", "/out/site0");
//! let config = SiteConfig::from_init("site0.json", &SiteInit::default()).unwrap();
//!
//! let config_ref = init_once(&mut store, &state, || Ok(config.clone())).unwrap();
//! assert_eq!(store.load(&config_ref).unwrap(), config);
//! ```

mod memory;
mod traits;

pub use memory::{MemoryConfigStore, MemoryDatasetSource};
pub use traits::{init_once, DatasetSource, SiteConfigStore, CONFIG_FILE};
