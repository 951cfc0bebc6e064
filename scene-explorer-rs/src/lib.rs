//! Traffic-scene dataset adapters and scene indexing.
//!
//! This crate provides tools for:
//! - Serving heterogeneous trajectory datasets (V2X-Traj, V2X-Seq, inD,
//!   SinD, Consider.it CPM logs) behind one scene-oriented interface
//! - Indexing scenes per split and group, with paging and location lookup
//! - Materializing scene bundles with per-tick frames and a clipped map
//! - Detecting the layout of unknown dataset folders and validating the
//!   resulting profiles
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use scene_explorer::{BundleOptions, DatasetStore, ExplorerConfig};
//!
//! let store = DatasetStore::from_registry(Path::new("."), ExplorerConfig::default()).unwrap();
//! let adapter = store.get_adapter("v2x-traj").unwrap();
//! let page = adapter.list_scenes("train", None, 50, 0);
//! let bundle = adapter
//!     .load_scene_bundle("train", &page.items[0].scene_id, &BundleOptions::default())
//!     .unwrap();
//! println!("{} frames", bundle.frames.len());
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod detect;
pub mod indexing;
pub mod maps;
pub mod store;

pub use adapters::{Adapter, SceneBundle};
pub use config::{BundleOptions, DatasetSpec, ExplorerConfig};
pub use detect::{detect_profile, validate_profile, DatasetProfile};
pub use store::DatasetStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
