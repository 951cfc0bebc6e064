//! Dataset profiles: a detected (or hand-edited) description of a local
//! dataset copy, convertible into a [`DatasetSpec`].

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::validate::{Capabilities, Validation};
use super::Tier;
use crate::config::{roles, Binding, ConfigError, DatasetSpec, DatasetType, GeoOrigin, SceneStrategy};

/// How a profile was detected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorInfo {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub second_best: f64,
    #[serde(default)]
    pub decision_mode: Tier,
    #[serde(default)]
    pub checked_at: String,
}

/// Basemap placement for geo-referenced datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasemapConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<GeoOrigin>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub origin_by_intersect: BTreeMap<String, GeoOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub name: String,
    /// Raw type name; normalized during validation
    #[serde(default)]
    pub dataset_type: String,
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub bindings: BTreeMap<String, Binding>,
    #[serde(default)]
    pub scene_strategy: SceneStrategy,
    #[serde(default)]
    pub detector: DetectorInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basemap: Option<BasemapConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
}

/// Display name used when a profile is not named.
pub fn default_name(kind: DatasetType) -> &'static str {
    match kind {
        DatasetType::V2xTraj => "V2X-Traj Local",
        DatasetType::V2xSeq => "V2X-Seq Local",
        DatasetType::Ind => "inD Local",
        DatasetType::Sind => "SinD Local",
        DatasetType::ConsiderItCpm => "Consider.it Local",
    }
}

impl DatasetProfile {
    pub fn new(kind: DatasetType, name: Option<&str>, root: PathBuf) -> Self {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(default_name(kind));
        Self {
            name: name.to_string(),
            dataset_type: kind.as_str().to_string(),
            roots: vec![root],
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<DatasetType> {
        DatasetType::normalize(&self.dataset_type)
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Fills in a missing name, profile id and dataset id.
    ///
    /// Profile ids hash the type, roots and creation time; dataset ids are
    /// `profile-<type>-<first 8 id chars>`.
    pub fn ensure_identity(&mut self, kind: DatasetType) {
        if self.name.trim().is_empty() {
            self.name = default_name(kind).to_string();
        }
        if self.profile_id.is_empty() {
            let mut hasher = DefaultHasher::new();
            kind.as_str().hash(&mut hasher);
            self.roots.hash(&mut hasher);
            Utc::now().timestamp_nanos_opt().hash(&mut hasher);
            self.profile_id = format!("{:016x}", hasher.finish());
        }
        if self.dataset_id.is_empty() {
            let short: String = self.profile_id.chars().take(8).collect();
            self.dataset_id = format!("profile-{}-{}", kind.as_str().replace('_', "-"), short);
        }
    }
}

impl DatasetSpec {
    /// Dataset spec served from a validated profile.
    ///
    /// Scenario datasets are rooted at their bound data directory; all other
    /// families at the first profile root. Returns `None` for unknown types
    /// or when no root can be determined.
    pub fn from_profile(profile: &DatasetProfile) -> Option<DatasetSpec> {
        let kind = profile.kind()?;
        let bound_data = profile.bindings.get(roles::DATA_DIR).and_then(|b| b.path.clone());
        let first_bound = || {
            profile
                .bindings
                .values()
                .find_map(|b| b.path.clone().or_else(|| b.paths.first().cloned()))
                .map(|p| if p.is_file() { p.parent().map(Path::to_path_buf).unwrap_or(p) } else { p })
        };
        let root = match kind {
            DatasetType::Sind => bound_data.or_else(|| profile.roots.first().cloned()),
            _ => profile.roots.first().cloned().or_else(first_bound),
        }?;

        let id = [&profile.dataset_id, &profile.profile_id]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("profile-{}", kind.as_str().replace('_', "-")));
        let mut spec = DatasetSpec::new(&id, kind.family(), root);
        if !profile.name.trim().is_empty() {
            spec.title = profile.name.trim().to_string();
        }
        spec.bindings = profile.bindings.clone();
        spec.scene_strategy = profile.scene_strategy.clone();
        if let Some(basemap) = &profile.basemap {
            spec.geo_origin = basemap.origin;
            spec.geo_origin_by_group = basemap.origin_by_intersect.clone();
            spec.basemap_tile_url = basemap.tile_url.clone();
            spec.basemap_attribution = basemap.attribution.clone();
        }
        Some(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use tempfile::tempdir;

    #[test]
    fn test_identity_is_filled_once() {
        let mut p = DatasetProfile::new(DatasetType::ConsiderItCpm, None, PathBuf::from("/data/cpm"));
        assert_eq!(p.name, "Consider.it Local");
        p.ensure_identity(DatasetType::ConsiderItCpm);
        assert_eq!(p.profile_id.len(), 16);
        assert!(p.dataset_id.starts_with("profile-consider-it-cpm-"));

        let before = p.clone();
        p.ensure_identity(DatasetType::ConsiderItCpm);
        assert_eq!(p, before);
    }

    #[test]
    fn test_spec_from_profile() {
        let mut p = DatasetProfile::new(DatasetType::Sind, Some("SinD Tianjin"), PathBuf::from("/data"));
        p.dataset_id = "sind-local".into();
        p.bindings
            .insert(roles::DATA_DIR.into(), Binding::dir("/data/SinD", true));
        p.basemap = Some(BasemapConfig {
            origin: Some(GeoOrigin { lat: 39.0, lon: 117.0 }),
            ..Default::default()
        });

        let spec = DatasetSpec::from_profile(&p).unwrap();
        assert_eq!(spec.id, "sind-local");
        assert_eq!(spec.title, "SinD Tianjin");
        assert_eq!(spec.family(), Some(Family::Sind));
        assert_eq!(spec.root, PathBuf::from("/data/SinD"));
        assert!(spec.geo_origin.is_some());

        let unknown = DatasetProfile {
            dataset_type: "generic".into(),
            ..Default::default()
        };
        assert!(DatasetSpec::from_profile(&unknown).is_none());
    }

    #[test]
    fn test_profile_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let p = DatasetProfile::new(DatasetType::Ind, None, dir.path().to_path_buf());
        p.to_json(&path).unwrap();
        let loaded = DatasetProfile::from_json(&path).unwrap();
        assert_eq!(loaded, p);
        assert_eq!(loaded.kind(), Some(DatasetType::Ind));
    }
}
