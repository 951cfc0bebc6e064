//! Scene index builders.
//!
//! Each dataset family segments its raw files into scenes differently:
//!
//! * [`trajectory`]: one file per (modality, scene), grouped by intersection
//! * [`windowing`]: gap-aware windows over unsegmented object logs, and fixed
//!   frame windows over recordings
//! * [`recording`]: drone recordings sliced into fixed windows
//! * [`scenario`]: one folder per scenario, grouped by city
//!
//! All of them feed a [`catalog::SceneCatalog`] for listing and lookup.

pub mod catalog;
pub mod recording;
pub mod scenario;
pub mod trajectory;
pub mod windowing;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::loaders::LoaderError;
use crate::core::schema::SchemaError;

pub use catalog::{GroupOrder, GroupSummary, SceneCatalog, SceneList, SceneLocation, SceneSummary};

/// Errors that can occur while building a scene index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Missing required columns in {path}: {columns}")]
    MissingColumns { path: PathBuf, columns: String },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("no scenes found under {0}")]
    NoScenes(PathBuf),
}

/// Result type for index building.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Dense 1-based scene ids for items already in their natural order.
pub fn dense_ids(count: usize) -> impl Iterator<Item = String> {
    (1..=count).map(|n| n.to_string())
}
