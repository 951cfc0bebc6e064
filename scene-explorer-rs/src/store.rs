//! Registry of configured datasets with lazily built adapters.
//!
//! Each dataset owns one slot behind a mutex. The first caller builds the
//! adapter while holding the slot lock, so concurrent first requests for the
//! same dataset wait instead of building twice. A failed build is cached and
//! re-raised without retrying.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::adapters::{Adapter, AdapterError};
use crate::config::{load_registry, ConfigError, DatasetSpec, ExplorerConfig, Family, GeoOrigin};
use crate::indexing::catalog::ALL_SPLIT;
use crate::indexing::trajectory::{ModalityLayout, DEFAULT_SPLITS, V2X_SEQ_MODALITIES, V2X_TRAJ_MODALITIES};

pub const DEFAULT_TILE_URL: &str = "/api/tiles/osm/{z}/{x}/{y}.png";
pub const DEFAULT_ATTRIBUTION: &str = "© OpenStreetMap contributors";

/// Errors raised by the dataset store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown dataset: {0}")]
    NotFound(String),

    #[error("dataset '{id}' has unsupported family '{family}'")]
    Unsupported { id: String, family: String },

    #[error("dataset '{id}' is unavailable: {source}")]
    Unavailable {
        id: String,
        #[source]
        source: Arc<AdapterError>,
    },

    #[error("registry error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Basemap block for geo-referenced datasets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Basemap {
    pub provider: String,
    pub tile_url: String,
    pub attribution: String,
    pub origin: Option<GeoOrigin>,
    pub origin_by_intersect: BTreeMap<String, GeoOrigin>,
}

/// Dataset metadata for clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub id: String,
    pub title: String,
    pub family: String,
    pub supported: bool,
    pub splits: Vec<String>,
    pub default_split: Option<String>,
    pub group_label: Option<String>,
    pub has_map: bool,
    pub modalities: Vec<String>,
    pub modality_labels: BTreeMap<String, String>,
    pub modality_short_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basemap: Option<Basemap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsupported_reason: Option<String>,
}

fn labelled(items: &[(&str, &str, &str)]) -> (Vec<String>, BTreeMap<String, String>, BTreeMap<String, String>) {
    (
        items.iter().map(|(n, _, _)| n.to_string()).collect(),
        items.iter().map(|(n, l, _)| (n.to_string(), l.to_string())).collect(),
        items.iter().map(|(n, _, s)| (n.to_string(), s.to_string())).collect(),
    )
}

fn from_layouts(layouts: &[ModalityLayout]) -> (Vec<String>, BTreeMap<String, String>, BTreeMap<String, String>) {
    let items: Vec<(&str, &str, &str)> = layouts.iter().map(|l| (l.name, l.label, l.short_label)).collect();
    labelled(&items)
}

fn basemap_for(spec: &DatasetSpec) -> Option<Basemap> {
    if spec.geo_origin.is_none() && spec.geo_origin_by_group.is_empty() {
        return None;
    }
    Some(Basemap {
        provider: "osm".to_string(),
        tile_url: spec
            .basemap_tile_url
            .clone()
            .unwrap_or_else(|| DEFAULT_TILE_URL.to_string()),
        attribution: spec
            .basemap_attribution
            .clone()
            .unwrap_or_else(|| DEFAULT_ATTRIBUTION.to_string()),
        origin: spec.geo_origin,
        origin_by_intersect: spec.geo_origin_by_group.clone(),
    })
}

/// Static metadata of a dataset; does not build its adapter.
pub fn dataset_info(spec: &DatasetSpec) -> DatasetInfo {
    let mut info = DatasetInfo {
        id: spec.id.clone(),
        title: spec.title.clone(),
        family: spec.family_name.clone(),
        supported: true,
        splits: vec![ALL_SPLIT.to_string()],
        default_split: Some(ALL_SPLIT.to_string()),
        group_label: None,
        has_map: false,
        modalities: Vec::new(),
        modality_labels: BTreeMap::new(),
        modality_short_labels: BTreeMap::new(),
        basemap: None,
        unsupported_reason: None,
    };
    let Some(family) = spec.family() else {
        info.supported = false;
        info.splits.clear();
        info.default_split = None;
        info.unsupported_reason = Some(format!("Unsupported dataset family: {}", spec.family_name));
        return info;
    };

    let (modalities, labels, short) = match family {
        Family::V2xTraj | Family::V2xSeq => {
            info.splits = DEFAULT_SPLITS.iter().map(|s| s.to_string()).collect();
            info.default_split = Some(DEFAULT_SPLITS[0].to_string());
            info.group_label = Some("Intersection".to_string());
            info.has_map = true;
            from_layouts(if family == Family::V2xSeq {
                V2X_SEQ_MODALITIES
            } else {
                V2X_TRAJ_MODALITIES
            })
        }
        Family::CpmObjects => {
            info.group_label = Some("Sensor".to_string());
            info.basemap = basemap_for(spec);
            labelled(&[("infra", "Objects", "Objects")])
        }
        Family::Ind => {
            info.group_label = Some("Location".to_string());
            info.has_map = true;
            labelled(&[("vehicle", "Vehicles", "Vehicles"), ("vru", "Vulnerable road users", "VRU")])
        }
        Family::Sind => {
            info.group_label = Some("City".to_string());
            info.has_map = true;
            info.basemap = basemap_for(spec);
            labelled(&[
                ("vehicle", "Vehicles", "Vehicles"),
                ("pedestrian", "Pedestrians", "Peds"),
                ("traffic_light", "Traffic lights", "Lights"),
            ])
        }
    };
    info.modalities = modalities;
    info.modality_labels = labels;
    info.modality_short_labels = short;
    info
}

enum SlotState {
    Uninitialized,
    Ready(Arc<Adapter>),
    Failed(Arc<AdapterError>),
}

struct Slot {
    spec: DatasetSpec,
    state: Mutex<SlotState>,
}

/// All configured datasets.
pub struct DatasetStore {
    config: ExplorerConfig,
    order: Vec<String>,
    slots: HashMap<String, Slot>,
}

impl DatasetStore {
    /// Creates a store; a later spec with a duplicate id replaces the earlier.
    pub fn new(specs: Vec<DatasetSpec>, config: ExplorerConfig) -> Self {
        let mut order = Vec::with_capacity(specs.len());
        let mut slots = HashMap::with_capacity(specs.len());
        for spec in specs {
            if !slots.contains_key(&spec.id) {
                order.push(spec.id.clone());
            }
            slots.insert(
                spec.id.clone(),
                Slot {
                    spec,
                    state: Mutex::new(SlotState::Uninitialized),
                },
            );
        }
        Self { config, order, slots }
    }

    /// Creates a store from the registry below `repo_root`.
    pub fn from_registry(repo_root: &Path, config: ExplorerConfig) -> Result<Self> {
        Ok(Self::new(load_registry(repo_root)?, config))
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    pub fn spec(&self, id: &str) -> Option<&DatasetSpec> {
        self.slots.get(id).map(|s| &s.spec)
    }

    /// Metadata of every dataset in registry order.
    pub fn list_datasets(&self) -> Vec<DatasetInfo> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id))
            .map(|s| dataset_info(&s.spec))
            .collect()
    }

    /// The adapter of a dataset, building it on first use.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids, [`StoreError::Unsupported`]
    /// for unknown families and [`StoreError::Unavailable`] when the build
    /// failed, now or on an earlier call.
    pub fn get_adapter(&self, id: &str) -> Result<Arc<Adapter>> {
        let slot = self.slots.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if slot.spec.family().is_none() {
            return Err(StoreError::Unsupported {
                id: id.to_string(),
                family: slot.spec.family_name.clone(),
            });
        }

        let mut state = slot.state.lock();
        match &*state {
            SlotState::Ready(adapter) => return Ok(Arc::clone(adapter)),
            SlotState::Failed(err) => {
                return Err(StoreError::Unavailable {
                    id: id.to_string(),
                    source: Arc::clone(err),
                })
            }
            SlotState::Uninitialized => {}
        }

        let started = Instant::now();
        match Adapter::build(slot.spec.clone(), &self.config) {
            Ok(adapter) => {
                info!(
                    "dataset {}: adapter ready with {} scenes in {:.2?}",
                    id,
                    adapter.catalog().total_scenes(),
                    started.elapsed()
                );
                let adapter = Arc::new(adapter);
                *state = SlotState::Ready(Arc::clone(&adapter));
                Ok(adapter)
            }
            Err(e) => {
                warn!("dataset {}: adapter build failed: {}", id, e);
                let err = Arc::new(e);
                *state = SlotState::Failed(Arc::clone(&err));
                Err(StoreError::Unavailable {
                    id: id.to_string(),
                    source: err,
                })
            }
        }
    }
}
