//! Dataset identity: families, dataset types, role bindings and specs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known binding role names.
pub mod roles {
    pub const SCENES_INDEX: &str = "scenes_index";
    pub const TRAJ_EGO: &str = "traj_ego";
    pub const TRAJ_INFRA: &str = "traj_infra";
    pub const TRAJ_VEHICLE: &str = "traj_vehicle";
    pub const TRAJ_COOPERATIVE: &str = "traj_cooperative";
    pub const TRAFFIC_LIGHT: &str = "traffic_light";
    pub const MAPS_DIR: &str = "maps_dir";
    pub const DATA_DIR: &str = "data_dir";
    pub const CPM_LOGS: &str = "cpm_logs";
    pub const PROTO_SCHEMA: &str = "proto_schema";
    pub const PROFILE_FILE: &str = "profile_file";
}

/// Closed set of supported dataset families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    #[serde(rename = "v2x-traj")]
    V2xTraj,
    #[serde(rename = "v2x-seq")]
    V2xSeq,
    #[serde(rename = "ind")]
    Ind,
    #[serde(rename = "sind")]
    Sind,
    #[serde(rename = "cpm-objects")]
    CpmObjects,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::V2xTraj,
        Family::V2xSeq,
        Family::Ind,
        Family::Sind,
        Family::CpmObjects,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::V2xTraj => "v2x-traj",
            Family::V2xSeq => "v2x-seq",
            Family::Ind => "ind",
            Family::Sind => "sind",
            Family::CpmObjects => "cpm-objects",
        }
    }

    /// Parses a family name or any dataset-type alias.
    pub fn parse(raw: &str) -> Option<Family> {
        let s = raw.trim().to_ascii_lowercase();
        Family::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .or_else(|| DatasetType::normalize(&s).map(|t| t.family()))
    }

    pub fn dataset_type(&self) -> DatasetType {
        match self {
            Family::V2xTraj => DatasetType::V2xTraj,
            Family::V2xSeq => DatasetType::V2xSeq,
            Family::Ind => DatasetType::Ind,
            Family::Sind => DatasetType::Sind,
            Family::CpmObjects => DatasetType::ConsiderItCpm,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset type as used by detection and profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    V2xTraj,
    V2xSeq,
    Ind,
    Sind,
    ConsiderItCpm,
}

const TYPE_ALIASES: &[(DatasetType, &[&str])] = &[
    (DatasetType::V2xTraj, &["v2x-traj", "v2x_traj", "v2xtraj"]),
    (DatasetType::V2xSeq, &["v2x-seq", "v2x_seq", "v2xseq"]),
    (DatasetType::Ind, &["ind", "in-d", "ind_dataset"]),
    (DatasetType::Sind, &["sind", "sin-d", "sin_d", "sind_dataset"]),
    (
        DatasetType::ConsiderItCpm,
        &["consider-it-cpm", "consider_it_cpm", "cpm", "cpm-objects", "considerit"],
    ),
];

impl DatasetType {
    pub const ALL: [DatasetType; 5] = [
        DatasetType::V2xTraj,
        DatasetType::V2xSeq,
        DatasetType::Ind,
        DatasetType::Sind,
        DatasetType::ConsiderItCpm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::V2xTraj => "v2x_traj",
            DatasetType::V2xSeq => "v2x_seq",
            DatasetType::Ind => "ind",
            DatasetType::Sind => "sind",
            DatasetType::ConsiderItCpm => "consider_it_cpm",
        }
    }

    /// Normalizes a dataset-type alias (case-insensitive).
    pub fn normalize(raw: &str) -> Option<DatasetType> {
        let s = raw.trim().to_ascii_lowercase();
        TYPE_ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&s.as_str()))
            .map(|(t, _)| *t)
    }

    pub fn family(&self) -> Family {
        match self {
            DatasetType::V2xTraj => Family::V2xTraj,
            DatasetType::V2xSeq => Family::V2xSeq,
            DatasetType::Ind => Family::Ind,
            DatasetType::Sind => Family::Sind,
            DatasetType::ConsiderItCpm => Family::CpmObjects,
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a bound path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    #[default]
    File,
    Dir,
    FileList,
}

/// A role-to-path binding, with optional detection metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default)]
    pub kind: BindingKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_map: BTreeMap<String, String>,
}

impl Binding {
    pub fn dir(path: impl Into<PathBuf>, required: bool) -> Self {
        Self {
            kind: BindingKind::Dir,
            required,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>, required: bool) -> Self {
        Self {
            kind: BindingKind::File,
            required,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.detected_score = Some(score);
        self
    }

    /// Parses a binding given either as a bare path string or an object.
    pub fn from_value(value: &Value) -> Option<Binding> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Binding {
                path: Some(PathBuf::from(s.trim())),
                ..Default::default()
            }),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

/// Scene segmentation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_ms: Option<i64>,
}

impl SceneStrategy {
    pub fn mode(mode: &str) -> Self {
        Self {
            mode: Some(mode.to_string()),
            ..Default::default()
        }
    }
}

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    pub lat: f64,
    pub lon: f64,
}

impl GeoOrigin {
    /// Parses `{lat|latitude, lon|lng|longitude}` or `[lat, lon]`, range-checked.
    pub fn from_value(value: &Value) -> Option<GeoOrigin> {
        let num = |v: Option<&Value>| -> Option<f64> {
            match v? {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };
        let (lat, lon) = match value {
            Value::Object(m) => (
                num(m.get("lat").or_else(|| m.get("latitude"))),
                num(m.get("lon").or_else(|| m.get("lng")).or_else(|| m.get("longitude"))),
            ),
            Value::Array(a) if a.len() >= 2 => (num(a.first()), num(a.get(1))),
            _ => return None,
        };
        let (lat, lon) = (lat?, lon?);
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(GeoOrigin { lat, lon })
    }
}

/// Immutable description of one configured dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub id: String,
    pub title: String,
    /// Family as written in the registry (may be unsupported).
    pub family_name: String,
    pub root: PathBuf,
    pub bindings: BTreeMap<String, Binding>,
    pub scene_strategy: SceneStrategy,
    pub geo_origin: Option<GeoOrigin>,
    pub geo_origin_by_group: BTreeMap<String, GeoOrigin>,
    pub basemap_tile_url: Option<String>,
    pub basemap_attribution: Option<String>,
}

impl DatasetSpec {
    pub fn new(id: &str, family: Family, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            family_name: family.as_str().to_string(),
            root: root.into(),
            bindings: BTreeMap::new(),
            scene_strategy: SceneStrategy::default(),
            geo_origin: None,
            geo_origin_by_group: BTreeMap::new(),
            basemap_tile_url: None,
            basemap_attribution: None,
        }
    }

    /// Supported family, if the registry names one.
    pub fn family(&self) -> Option<Family> {
        Family::parse(&self.family_name)
    }

    pub fn binding(&self, role: &str) -> Option<&Binding> {
        self.bindings.get(role)
    }

    /// Single path bound to `role`, if any.
    pub fn binding_path(&self, role: &str) -> Option<&Path> {
        self.bindings.get(role).and_then(|b| b.path.as_deref())
    }

    /// Bound path for `role`, or `root/default_rel`.
    pub fn dir_or(&self, role: &str, default_rel: &str) -> PathBuf {
        self.binding_path(role)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.join(default_rel))
    }

    /// Geo origin for a group, falling back to the dataset origin.
    pub fn origin_for(&self, group: Option<&str>) -> Option<GeoOrigin> {
        group
            .and_then(|g| self.geo_origin_by_group.get(g).copied())
            .or(self.geo_origin)
    }
}
