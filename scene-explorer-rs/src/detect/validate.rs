//! Profile validation.
//!
//! Checks a profile's bindings against the filesystem and the family's
//! expected layout, fills in inferable bindings, clamps the scene strategy
//! and reports issues with stable codes.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::profile::DatasetProfile;
use super::scoring::{
    collect_cpm_logs, infer_recording_layout, infer_scenario_root, infer_sequence_layout, score_cpm_logs,
    score_recording_dir, score_scenario_root, score_scene_table, score_signal_dir, score_trajectory_dir,
    MIN_DIR_QUALITY,
};
use crate::config::registry::resolve_path;
use crate::config::{roles, Binding, BindingKind, DatasetType, DetectionConfig};
use crate::indexing::catalog::ALL_SPLIT;
use crate::indexing::recording::clamp_window_s;
use crate::indexing::trajectory::DEFAULT_SPLITS;

/// Issue codes.
pub mod codes {
    pub const E_DATASET_UNSUPPORTED: &str = "E_DATASET_UNSUPPORTED";
    pub const E_ROLE_REQUIRED_MISSING: &str = "E_ROLE_REQUIRED_MISSING";
    pub const E_PATH_MISSING: &str = "E_PATH_MISSING";
    pub const E_PATH_UNREADABLE: &str = "E_PATH_UNREADABLE";
    pub const E_SCHEMA_REQUIRED_COLUMNS: &str = "E_SCHEMA_REQUIRED_COLUMNS";
    pub const W_NO_ROOTS: &str = "W_NO_ROOTS";
    pub const W_OPTIONAL_ROLE_MISSING: &str = "W_OPTIONAL_ROLE_MISSING";
    pub const W_LOW_CONFIDENCE_DETECTION: &str = "W_LOW_CONFIDENCE_DETECTION";
    pub const W_NO_MAP_CONFIG: &str = "W_NO_MAP_CONFIG";
}

/// A validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Issue {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            role: None,
            path: None,
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }
}

/// Overall readiness of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ready,
    ReadyWithWarnings,
    BrokenPath,
    SchemaMismatch,
}

impl Status {
    /// Path and missing-role errors mean a broken path; any other error a
    /// schema mismatch.
    pub fn from_issues(errors: &[Issue], warnings: &[Issue]) -> Self {
        if !errors.is_empty() {
            let broken = errors
                .iter()
                .any(|e| e.code.starts_with("E_PATH_") || e.code == codes::E_ROLE_REQUIRED_MISSING);
            if broken {
                Status::BrokenPath
            } else {
                Status::SchemaMismatch
            }
        } else if !warnings.is_empty() {
            Status::ReadyWithWarnings
        } else {
            Status::Ready
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, Status::Ready | Status::ReadyWithWarnings)
    }
}

/// Current UTC time as an RFC 3339 timestamp.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub status: Status,
    #[serde(default)]
    pub errors: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Issue>,
    #[serde(default)]
    pub last_checked: String,
}

impl Validation {
    pub fn new(errors: Vec<Issue>, warnings: Vec<Issue>) -> Self {
        Self {
            status: Status::from_issues(&errors, &warnings),
            errors,
            warnings,
            last_checked: now_utc(),
        }
    }

    /// A validation holding a single error.
    pub fn failed(issue: Issue) -> Self {
        Self::new(vec![issue], Vec::new())
    }
}

/// What a validated dataset can offer the viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub has_map: bool,
    pub has_traffic_lights: bool,
    pub splits: Vec<String>,
    pub group_label: String,
}

impl Capabilities {
    fn new(splits: &[&str], group_label: &str) -> Self {
        Self {
            has_map: false,
            has_traffic_lights: false,
            splits: splits.iter().map(|s| s.to_string()).collect(),
            group_label: group_label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedProfile {
    pub profile: DatasetProfile,
    pub validation: Validation,
    pub capabilities: Capabilities,
}

struct Checker<'a> {
    profile: DatasetProfile,
    config: &'a DetectionConfig,
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
}

impl<'a> Checker<'a> {
    fn error(&mut self, issue: Issue) {
        self.errors.push(issue);
    }

    fn warn(&mut self, issue: Issue) {
        self.warnings.push(issue);
    }

    fn bound_path(&self, role: &str) -> Option<PathBuf> {
        self.profile.bindings.get(role).and_then(|b| b.path.clone())
    }

    /// Bound directory of a required role, reporting why it is unusable.
    fn required_dir(&mut self, role: &str) -> Option<PathBuf> {
        let Some(path) = self.bound_path(role) else {
            self.error(Issue::new(codes::E_ROLE_REQUIRED_MISSING, format!("Required role '{role}' is not bound.")).with_role(role));
            return None;
        };
        if !path.exists() {
            self.error(
                Issue::new(codes::E_PATH_MISSING, format!("Path for '{role}' does not exist."))
                    .with_role(role)
                    .with_path(&path),
            );
            return None;
        }
        if !path.is_dir() || std::fs::read_dir(&path).is_err() {
            self.error(
                Issue::new(codes::E_PATH_UNREADABLE, format!("Path for '{role}' is not a readable directory."))
                    .with_role(role)
                    .with_path(&path),
            );
            return None;
        }
        Some(path)
    }

    /// Bound directory of an optional role; absence is a warning.
    fn optional_dir(&mut self, role: &str) -> Option<PathBuf> {
        match self.bound_path(role) {
            Some(p) if p.is_dir() => Some(p),
            Some(p) => {
                self.warn(
                    Issue::new(codes::W_OPTIONAL_ROLE_MISSING, format!("Optional '{role}' path does not exist."))
                        .with_role(role)
                        .with_path(&p),
                );
                None
            }
            None => {
                self.warn(
                    Issue::new(codes::W_OPTIONAL_ROLE_MISSING, format!("Optional role '{role}' is not bound."))
                        .with_role(role),
                );
                None
            }
        }
    }

    fn low_confidence(&mut self, role: &str, message: String) {
        self.warn(Issue::new(codes::W_LOW_CONFIDENCE_DETECTION, message).with_role(role));
    }

    fn bind_dir(&mut self, role: &str, path: PathBuf, required: bool, score: f64) {
        self.profile
            .bindings
            .insert(role.to_string(), Binding::dir(path, required).with_score(score));
    }

    fn trajectory_quality(&mut self, role: &str, dir: &Path) {
        let q = score_trajectory_dir(dir);
        if q < MIN_DIR_QUALITY {
            self.error(
                Issue::new(
                    codes::E_SCHEMA_REQUIRED_COLUMNS,
                    format!("Trajectory CSVs for '{role}' lack timestamp/x/y columns."),
                )
                .with_role(role)
                .with_path(dir),
            );
        }
    }

    fn v2x_traj(&mut self) -> Capabilities {
        let mut caps = Capabilities::new(DEFAULT_SPLITS, "Intersection");
        for role in [roles::TRAJ_EGO, roles::TRAJ_INFRA, roles::TRAJ_VEHICLE] {
            if let Some(dir) = self.required_dir(role) {
                self.trajectory_quality(role, &dir);
            }
        }

        match self.bound_path(roles::SCENES_INDEX) {
            Some(p) if p.is_file() => {
                let scored = score_scene_table(&p);
                if scored.score < 40.0 {
                    self.low_confidence(
                        roles::SCENES_INDEX,
                        format!("Scene index scored {:.0}/100; scenes will be discovered from folders.", scored.score),
                    );
                }
            }
            _ => self.warn(
                Issue::new(
                    codes::W_OPTIONAL_ROLE_MISSING,
                    "No scene index table; scenes will be discovered from folders.",
                )
                .with_role(roles::SCENES_INDEX),
            ),
        }

        if let Some(dir) = self.optional_dir(roles::TRAFFIC_LIGHT) {
            let q = score_signal_dir(&dir);
            if q < MIN_DIR_QUALITY {
                self.low_confidence(roles::TRAFFIC_LIGHT, format!("Traffic-light layout scored {q:.0}/100."));
            } else {
                caps.has_traffic_lights = true;
            }
        }
        caps.has_map = self.optional_dir(roles::MAPS_DIR).is_some();
        caps
    }

    fn v2x_seq(&mut self) -> Capabilities {
        let mut caps = Capabilities::new(DEFAULT_SPLITS, "Intersection");
        let traj_roles = [roles::TRAJ_COOPERATIVE, roles::TRAJ_INFRA, roles::TRAJ_VEHICLE];

        if !traj_roles.iter().any(|r| self.profile.bindings.contains_key(*r)) {
            let inferred = infer_sequence_layout(&self.profile.roots);
            debug!("sequence layout inferred under {:?} (score {:.1})", inferred.root, inferred.score);
            for (role, (dir, q)) in inferred.bindings {
                self.profile.bindings.entry(role.to_string()).or_insert_with(|| Binding::dir(dir, false).with_score(q));
            }
        }

        let mut any = false;
        for role in traj_roles {
            if self.bound_path(role).is_none() {
                continue;
            }
            any = true;
            if let Some(dir) = self.required_dir(role) {
                self.trajectory_quality(role, &dir);
            }
        }
        if !any {
            self.error(Issue::new(
                codes::E_ROLE_REQUIRED_MISSING,
                "At least one of traj_cooperative, traj_infra or traj_vehicle must be bound.",
            ));
        }

        if let Some(dir) = self.optional_dir(roles::TRAFFIC_LIGHT) {
            let q = score_signal_dir(&dir);
            if q < MIN_DIR_QUALITY {
                self.low_confidence(roles::TRAFFIC_LIGHT, format!("Traffic-light layout scored {q:.0}/100."));
            } else {
                caps.has_traffic_lights = true;
            }
        }
        caps.has_map = self.optional_dir(roles::MAPS_DIR).is_some();
        caps
    }

    fn ind(&mut self) -> Capabilities {
        let mut caps = Capabilities::new(&[ALL_SPLIT], "Location");
        let strategy = &mut self.profile.scene_strategy;
        strategy.mode.get_or_insert_with(|| "recording_window".to_string());
        strategy.window_s = Some(clamp_window_s(strategy.window_s.unwrap_or(60.0)));

        if self.bound_path(roles::DATA_DIR).is_none() {
            let inferred = infer_recording_layout(&self.profile.roots);
            if inferred.details.recordings > 0 {
                self.bind_dir(roles::DATA_DIR, inferred.details.data_dir.clone(), true, inferred.score);
                if let Some(maps) = inferred.maps_dir {
                    self.profile
                        .bindings
                        .entry(roles::MAPS_DIR.to_string())
                        .or_insert_with(|| Binding::dir(maps, false).with_score(100.0));
                }
            }
        }

        let Some(data_dir) = self.required_dir(roles::DATA_DIR) else {
            return caps;
        };
        let scored = score_recording_dir(&data_dir);
        if scored.recordings == 0 {
            self.error(
                Issue::new(
                    codes::E_SCHEMA_REQUIRED_COLUMNS,
                    "No recordings (*_tracks.csv with *_tracksMeta.csv and *_recordingMeta.csv) found.",
                )
                .with_role(roles::DATA_DIR)
                .with_path(&data_dir),
            );
            return caps;
        }
        if scored.triplet_ratio < 1.0 {
            self.low_confidence(
                roles::DATA_DIR,
                format!("{:.0}% of recordings have complete metadata.", scored.triplet_ratio * 100.0),
            );
        }
        if scored.header_ok_ratio < 0.6 {
            self.low_confidence(
                roles::DATA_DIR,
                format!("{:.0}% of sampled recordings have the expected columns.", scored.header_ok_ratio * 100.0),
            );
        }
        caps.has_map = self.bound_path(roles::MAPS_DIR).is_some_and(|p| p.is_dir());
        caps
    }

    fn sind(&mut self) -> Capabilities {
        let mut caps = Capabilities::new(&[ALL_SPLIT], "City");
        self.profile
            .scene_strategy
            .mode
            .get_or_insert_with(|| "scenario_scene".to_string());

        let bound = self
            .bound_path(roles::DATA_DIR)
            .or_else(|| self.profile.roots.first().cloned());
        let scored = match bound.as_deref().map(score_scenario_root) {
            Some(s) if s.scenario_count > 0 => Some(s),
            _ => infer_scenario_root(&self.profile.roots).filter(|s| s.scenario_count > 0),
        };
        let Some(scored) = scored else {
            match bound {
                Some(root) => self.error(
                    Issue::new(codes::E_SCHEMA_REQUIRED_COLUMNS, "No scenario folders with smoothed track tables found.")
                        .with_role(roles::DATA_DIR)
                        .with_path(&root),
                ),
                None => self.error(
                    Issue::new(codes::E_ROLE_REQUIRED_MISSING, "No dataset root or data_dir bound.").with_role(roles::DATA_DIR),
                ),
            }
            return caps;
        };

        self.bind_dir(roles::DATA_DIR, scored.root.clone(), true, scored.score);
        if scored.vehicle_ratio < 0.6 {
            self.low_confidence(
                roles::DATA_DIR,
                format!("{:.0}% of scenarios carry vehicle tracks.", scored.vehicle_ratio * 100.0),
            );
        }
        if scored.pedestrian_ratio < 0.6 {
            self.low_confidence(
                roles::DATA_DIR,
                format!("{:.0}% of scenarios carry pedestrian tracks.", scored.pedestrian_ratio * 100.0),
            );
        }
        match &scored.maps_dir {
            Some(maps) => {
                self.profile
                    .bindings
                    .entry(roles::MAPS_DIR.to_string())
                    .or_insert_with(|| Binding::dir(maps.clone(), false).with_score(scored.map_city_ratio * 100.0));
            }
            None => self.warn(
                Issue::new(codes::W_OPTIONAL_ROLE_MISSING, "No city carries a lanelet map (*.osm).")
                    .with_role(roles::MAPS_DIR),
            ),
        }
        caps.has_map = scored.map_city_ratio > 0.0;
        caps.has_traffic_lights = scored.signal_ratio > 0.0;
        caps
    }

    fn cpm(&mut self) -> Capabilities {
        let mut caps = Capabilities::new(&[ALL_SPLIT], "Sensor");
        let strategy = &mut self.profile.scene_strategy;
        strategy.mode.get_or_insert_with(|| "time_window".to_string());
        strategy.window_s = Some(strategy.window_s.unwrap_or(300.0).max(1.0));
        strategy.gap_s = Some(strategy.gap_s.unwrap_or(120.0).max(0.0));

        let binding = self.profile.bindings.get(roles::CPM_LOGS).cloned().unwrap_or_default();
        let listed: Vec<PathBuf> = binding.path.iter().chain(binding.paths.iter()).cloned().collect();
        let mut logs: Vec<PathBuf> = listed.iter().filter(|p| p.is_file()).cloned().collect();
        let dirs: Vec<PathBuf> = listed.iter().filter(|p| p.is_dir()).cloned().collect();
        if !dirs.is_empty() {
            logs.extend(collect_cpm_logs(&dirs, self.config.max_csv_files));
        }
        if logs.is_empty() {
            logs = collect_cpm_logs(&self.profile.roots, self.config.max_csv_files);
        }
        logs.sort();
        logs.dedup();

        if logs.is_empty() {
            self.error(
                Issue::new(codes::E_ROLE_REQUIRED_MISSING, "No CPM object logs (*.csv) found.").with_role(roles::CPM_LOGS),
            );
            return caps;
        }

        let scores = score_cpm_logs(
            &logs,
            &binding.column_map,
            self.config.sample_rows,
            self.config.max_scored_logs,
        );
        let top = scores.first().map_or(0.0, |s| s.score);
        if !scores.iter().any(|s| s.score >= MIN_DIR_QUALITY) {
            self.error(
                Issue::new(
                    codes::E_SCHEMA_REQUIRED_COLUMNS,
                    "No log has the generation time and x/y distance columns.",
                )
                .with_role(roles::CPM_LOGS),
            );
        } else if top < 75.0 {
            self.low_confidence(roles::CPM_LOGS, format!("Best CPM log scored {top:.0}/100."));
        }

        let mut updated = Binding {
            kind: BindingKind::FileList,
            required: true,
            path: None,
            paths: logs,
            detected_score: Some(top),
            ..binding
        };
        if let Some(best) = scores.first() {
            updated.delimiter.get_or_insert_with(|| (best.delimiter as char).to_string());
            updated.encoding.get_or_insert_with(|| best.encoding.as_str().to_string());
            if updated.column_map.is_empty() {
                updated.column_map = best.column_map.clone();
            }
        }
        self.profile.bindings.insert(roles::CPM_LOGS.to_string(), updated);

        if !self.bound_path(roles::PROTO_SCHEMA).is_some_and(|p| p.is_file()) {
            self.warn(
                Issue::new(codes::W_OPTIONAL_ROLE_MISSING, "No protobuf schema bound; it is recorded only.")
                    .with_role(roles::PROTO_SCHEMA),
            );
        }

        let has_origin = self
            .profile
            .basemap
            .as_ref()
            .is_some_and(|b| b.origin.is_some() || !b.origin_by_intersect.is_empty());
        if self.profile.basemap.is_some() && !has_origin {
            self.warn(Issue::new(
                codes::W_NO_MAP_CONFIG,
                "Basemap configured without a geo origin; objects cannot be placed on tiles.",
            ));
        }
        caps.has_map = has_origin;
        caps
    }
}

fn resolve(repo_root: &Path, p: &Path) -> PathBuf {
    resolve_path(repo_root, &p.to_string_lossy()).unwrap_or_else(|| p.to_path_buf())
}

/// Resolves relative paths against `repo_root`, drops roots that do not
/// exist and derives roots from the bindings when none are given.
fn normalize_paths(profile: &mut DatasetProfile, repo_root: &Path) {
    for binding in profile.bindings.values_mut() {
        binding.path = binding.path.as_deref().map(|p| resolve(repo_root, p));
        binding.paths = binding.paths.iter().map(|p| resolve(repo_root, p)).collect();
    }
    let mut roots: Vec<PathBuf> = profile
        .roots
        .iter()
        .map(|p| resolve(repo_root, p))
        .filter(|p| p.exists())
        .collect();
    if roots.is_empty() {
        roots = profile
            .bindings
            .values()
            .flat_map(|b| b.path.iter().chain(b.paths.iter()))
            .filter(|p| p.exists())
            .map(|p| {
                if p.is_dir() {
                    p.clone()
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or_else(|| p.clone())
                }
            })
            .collect();
    }
    roots.dedup();
    profile.roots = roots;
}

/// Validates `profile` and returns it completed with inferred bindings,
/// ids, a clamped scene strategy and its capabilities.
pub fn validate_profile(repo_root: &Path, profile: &DatasetProfile, config: &DetectionConfig) -> ValidatedProfile {
    let mut profile = profile.clone();
    let Some(kind) = profile.kind() else {
        let validation = Validation::failed(Issue::new(
            codes::E_DATASET_UNSUPPORTED,
            format!("Unknown dataset_type '{}'.", profile.dataset_type),
        ));
        profile.validation = Some(validation.clone());
        return ValidatedProfile {
            profile,
            validation,
            capabilities: Capabilities::default(),
        };
    };
    profile.dataset_type = kind.as_str().to_string();
    normalize_paths(&mut profile, repo_root);
    profile.ensure_identity(kind);

    let mut checker = Checker {
        profile,
        config,
        errors: Vec::new(),
        warnings: Vec::new(),
    };
    if checker.profile.roots.is_empty() {
        checker.warn(Issue::new(codes::W_NO_ROOTS, "No existing root folder is configured."));
    }
    let capabilities = match kind {
        DatasetType::V2xTraj => checker.v2x_traj(),
        DatasetType::V2xSeq => checker.v2x_seq(),
        DatasetType::Ind => checker.ind(),
        DatasetType::Sind => checker.sind(),
        DatasetType::ConsiderItCpm => checker.cpm(),
    };

    let Checker {
        mut profile,
        errors,
        warnings,
        ..
    } = checker;
    let validation = Validation::new(errors, warnings);
    debug!(
        "profile {} ({}): {:?}, {} errors, {} warnings",
        profile.dataset_id,
        kind,
        validation.status,
        validation.errors.len(),
        validation.warnings.len()
    );
    profile.validation = Some(validation.clone());
    profile.capabilities = Some(capabilities.clone());
    ValidatedProfile {
        profile,
        validation,
        capabilities,
    }
}
