//! Core data types and I/O operations.

pub mod cache;
pub mod geometry;
pub mod loaders;
pub mod projection;
pub mod schema;
pub mod writers;

pub use geometry::{BBox, Point};
pub use loaders::{ModalityStats, ModalityTable, Record};
pub use writers::{write_scene_index_csv, SceneIndexRow, WriteError};
