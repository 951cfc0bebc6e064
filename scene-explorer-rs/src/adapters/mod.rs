//! Dataset adapters.
//!
//! An adapter owns every index derived from one dataset and answers the
//! query surface: groups, scene pages, scene lookup, scene bundles and scene
//! backgrounds. The family set is closed, so adapters are one enum.

pub mod bundle;
pub mod check;
pub mod cpm;
pub mod ind;
pub mod sind;
pub mod trajectory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::{BundleOptions, DatasetSpec, ExplorerConfig, Family};
use crate::core::geometry::BBox;
use crate::core::loaders::{ModalityStats, Record};
use crate::indexing::{GroupSummary, IndexError, SceneCatalog, SceneList, SceneLocation};
use crate::maps::ClippedMap;

pub use check::{check_alignment, AlignmentReport};
pub use cpm::CpmAdapter;
pub use ind::IndAdapter;
pub use sind::SindAdapter;
pub use trajectory::TrajectoryAdapter;

/// Errors raised by adapters.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("scene not found: {0}")]
    SceneNotFound(String),

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),

    #[error("unsupported dataset family: {0}")]
    UnsupportedFamily(String),
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Records of every modality at one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub tick: i64,
    #[serde(flatten)]
    pub modalities: BTreeMap<String, Vec<Record>>,
}

/// A materialized scene ready for playback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneBundle {
    pub dataset_id: String,
    pub split: String,
    pub scene_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_label: Option<String>,
    pub city: Option<String>,
    pub group_id: Option<String>,
    pub group_label: Option<String>,
    /// Group id reported by each modality file
    pub group_by_modality: BTreeMap<String, Option<String>>,
    pub map_id: Option<u32>,
    pub t0: Option<f64>,
    /// Seconds of each frame, aligned with `frames`
    pub timestamps: Vec<f64>,
    pub extent: BBox,
    pub modality_stats: BTreeMap<String, ModalityStats>,
    pub frames: Vec<Frame>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<ClippedMap>,
}

impl SceneBundle {
    pub fn new(dataset_id: &str, split: &str, scene_id: &str) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            split: split.to_string(),
            scene_id: scene_id.to_string(),
            scene_label: None,
            city: None,
            group_id: None,
            group_label: None,
            group_by_modality: BTreeMap::new(),
            map_id: None,
            t0: None,
            timestamps: Vec::new(),
            extent: BBox::empty(),
            modality_stats: BTreeMap::new(),
            frames: Vec::new(),
            warnings: Vec::new(),
            map: None,
        }
    }

    /// Number of records across all frames and modalities.
    pub fn record_count(&self) -> usize {
        self.frames
            .iter()
            .flat_map(|f| f.modalities.values())
            .map(Vec::len)
            .sum()
    }
}

/// An adapter for one dataset, by family.
pub enum Adapter {
    /// Both cooperative trajectory families
    Trajectory(TrajectoryAdapter),
    Cpm(CpmAdapter),
    Ind(IndAdapter),
    Sind(SindAdapter),
}

impl Adapter {
    /// Builds the adapter for `spec`, indexing its files.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::UnsupportedFamily`] for unknown families and
    /// the index error when no scene can be built.
    pub fn build(spec: DatasetSpec, config: &ExplorerConfig) -> Result<Adapter> {
        let family = spec
            .family()
            .ok_or_else(|| AdapterError::UnsupportedFamily(spec.family_name.clone()))?;
        Ok(match family {
            Family::V2xTraj | Family::V2xSeq => Adapter::Trajectory(TrajectoryAdapter::build(spec, family, &config.cache)?),
            Family::CpmObjects => Adapter::Cpm(CpmAdapter::build(spec, &config.windows)?),
            Family::Ind => Adapter::Ind(IndAdapter::build(spec, config)?),
            Family::Sind => Adapter::Sind(SindAdapter::build(spec, &config.cache)?),
        })
    }

    pub fn spec(&self) -> &DatasetSpec {
        match self {
            Adapter::Trajectory(a) => a.spec(),
            Adapter::Cpm(a) => a.spec(),
            Adapter::Ind(a) => a.spec(),
            Adapter::Sind(a) => a.spec(),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Adapter::Trajectory(a) => a.family(),
            Adapter::Cpm(_) => Family::CpmObjects,
            Adapter::Ind(_) => Family::Ind,
            Adapter::Sind(_) => Family::Sind,
        }
    }

    pub fn catalog(&self) -> &SceneCatalog {
        match self {
            Adapter::Trajectory(a) => a.catalog(),
            Adapter::Cpm(a) => a.catalog(),
            Adapter::Ind(a) => a.catalog(),
            Adapter::Sind(a) => a.catalog(),
        }
    }

    /// Groups of a split with their scene counts.
    pub fn list_intersections(&self, split: &str) -> Vec<GroupSummary> {
        self.catalog().list_groups(split)
    }

    /// A page of scenes, optionally restricted to one group.
    pub fn list_scenes(&self, split: &str, group_id: Option<&str>, limit: usize, offset: usize) -> SceneList {
        self.catalog().list_scenes(split, group_id, limit, offset)
    }

    pub fn locate_scene(&self, split: &str, scene_id: &str) -> SceneLocation {
        self.catalog().locate(split, scene_id)
    }

    /// Materializes a scene.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::SceneNotFound`] for unknown scene ids; every
    /// other fault is reported as a warning inside the bundle.
    pub fn load_scene_bundle(&self, split: &str, scene_id: &str, options: &BundleOptions) -> Result<SceneBundle> {
        match self {
            Adapter::Trajectory(a) => a.load_scene_bundle(split, scene_id, options),
            Adapter::Cpm(a) => a.load_scene_bundle(split, scene_id),
            Adapter::Ind(a) => a.load_scene_bundle(split, scene_id, options),
            Adapter::Sind(a) => a.load_scene_bundle(split, scene_id, options),
        }
    }

    /// Background image of a scene, for families that ship one.
    ///
    /// Only single-split families have backgrounds, so `split` is not
    /// consulted.
    pub fn get_scene_background(&self, _split: &str, scene_id: &str) -> Option<PathBuf> {
        match self {
            Adapter::Ind(a) => a.scene_background(scene_id),
            Adapter::Sind(a) => a.scene_background(scene_id),
            _ => None,
        }
    }
}
