//! One detector per dataset family.
//!
//! Each detector scores the selected paths independently and, when the
//! layout is recognizable, proposes a profile. A detector that cannot
//! propose one explains why with a failed validation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::debug;

use super::profile::{DatasetProfile, DetectorInfo};
use super::scoring::{
    candidate_roots, clamp_score, collect_cpm_logs, collect_csv_files, common_root, find_proto_schema,
    infer_recording_layout, infer_scenario_root, infer_sequence_layout, role_prefixes, score_cpm_logs,
    score_scene_table, score_signal_dir, score_trajectory_dir, SceneTableScore, MIN_DIR_QUALITY,
};
use super::validate::{codes, now_utc, Issue, Validation};
use super::Tier;
use crate::config::{roles, Binding, BindingKind, DatasetType, DetectionConfig, SceneStrategy};

/// Scene-like CSVs scored when looking for a scene index.
const MAX_SCENE_TABLE_CANDIDATES: usize = 1200;

/// CSVs scored when no file name looks like a scene index.
const SCENE_TABLE_FALLBACK: usize = 120;

/// Root candidates searched for the intersection layout.
const MAX_INTERSECTION_ROOTS: usize = 100;

/// Parents searched above a selected path or scene table.
const INTERSECTION_PARENT_DEPTH: usize = 6;

const DEFAULT_RECORDING_WINDOW_S: f64 = 60.0;

/// Outcome of one family detector.
#[derive(Debug, Clone)]
pub struct FamilyDetection {
    pub dataset_type: DatasetType,
    pub score: f64,
    pub second_best: f64,
    pub decision_mode: Tier,
    pub profile: Option<DatasetProfile>,
    /// Why no profile was proposed
    pub failure: Option<Validation>,
}

impl FamilyDetection {
    fn proposed(dataset_type: DatasetType, score: f64, second_best: f64, mut profile: DatasetProfile) -> Self {
        let decision_mode = Tier::decide(score, second_best);
        profile.detector = DetectorInfo {
            score,
            second_best,
            decision_mode,
            checked_at: now_utc(),
        };
        Self {
            dataset_type,
            score,
            second_best,
            decision_mode,
            profile: Some(profile),
            failure: None,
        }
    }

    fn rejected(dataset_type: DatasetType, score: f64, issue: Issue) -> Self {
        Self {
            dataset_type,
            score: clamp_score(score),
            second_best: 0.0,
            decision_mode: Tier::Manual,
            profile: None,
            failure: Some(Validation::failed(issue)),
        }
    }

    /// Re-ranks against the runner-up of a multi-family run.
    pub fn set_second_best(&mut self, second_best: f64) {
        self.second_best = second_best;
        self.decision_mode = Tier::decide(self.score, second_best);
        if let Some(profile) = self.profile.as_mut() {
            profile.detector.second_best = second_best;
            profile.detector.decision_mode = self.decision_mode;
        }
    }
}

fn dir_binding(path: PathBuf, required: bool, score: f64) -> Binding {
    Binding::dir(path, required).with_score(score)
}

fn best_scene_table(paths: &[PathBuf], config: &DetectionConfig) -> Option<SceneTableScore> {
    let csvs = collect_csv_files(paths, config.max_csv_files.min(MAX_SCENE_TABLE_CANDIDATES));
    let named = |p: &PathBuf| {
        let low = p.to_string_lossy().to_ascii_lowercase();
        low.contains("scene") || low.contains("index")
    };
    let mut scored: Vec<SceneTableScore> = csvs
        .iter()
        .filter(|p| named(p))
        .map(|p| score_scene_table(p))
        .filter(|s| s.score > 0.0)
        .collect();
    if scored.is_empty() {
        scored = csvs
            .iter()
            .take(SCENE_TABLE_FALLBACK)
            .map(|p| score_scene_table(p))
            .filter(|s| s.score > 0.0)
            .collect();
    }
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.into_iter().next()
}

/// Intersection-indexed trajectories: per-modality folders, optionally a
/// scene-index table.
pub fn detect_intersection(paths: &[PathBuf], name: Option<&str>, config: &DetectionConfig) -> FamilyDetection {
    let kind = DatasetType::V2xTraj;
    let table = best_scene_table(paths, config);
    let prefixes = table.as_ref().map(|t| role_prefixes(&t.tables)).unwrap_or_default();

    let mut starts: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
    if let Some(parent) = table.as_ref().and_then(|t| t.path.parent()) {
        starts.push(parent.to_path_buf());
    }
    let defaults = [
        (roles::TRAJ_EGO, "ego-trajectories", 18.0, 0.05),
        (roles::TRAJ_INFRA, "infrastructure-trajectories", 18.0, 0.05),
        (roles::TRAJ_VEHICLE, "vehicle-trajectories", 18.0, 0.05),
        (roles::TRAFFIC_LIGHT, "traffic-light", 8.0, 0.02),
    ];

    let mut best: Option<(PathBuf, f64, BTreeMap<&str, (PathBuf, f64)>)> = None;
    for root in candidate_roots(&starts, INTERSECTION_PARENT_DEPTH, MAX_INTERSECTION_ROOTS) {
        let mut score = 0.0;
        let mut found = BTreeMap::new();
        for (role, dir, base, weight) in defaults {
            let rel = prefixes.get(role).map_or(dir, String::as_str);
            let path = root.join(rel);
            if !path.is_dir() {
                continue;
            }
            let q = if role == roles::TRAFFIC_LIGHT {
                score_signal_dir(&path)
            } else {
                score_trajectory_dir(&path)
            };
            score += base + q * weight;
            found.insert(role, (path, q));
        }
        let maps = root.join("maps");
        if maps.is_dir() {
            score += 8.0;
            found.insert(roles::MAPS_DIR, (maps, 100.0));
        }
        if best.as_ref().map_or(true, |(_, s, _)| score > *s) {
            best = Some((root, score, found));
        }
    }

    let Some((root, root_score, found)) = best else {
        return FamilyDetection::rejected(
            kind,
            0.0,
            Issue::new(codes::E_SCHEMA_REQUIRED_COLUMNS, "Could not infer a V2X-Traj root from the selected paths."),
        );
    };
    let score = match &table {
        Some(t) => clamp_score(0.55 * t.score + 0.45 * root_score),
        None => clamp_score(root_score),
    };
    debug!("v2x_traj: root {} scored {:.1}", root.display(), score);

    let missing: Vec<&str> = [roles::TRAJ_EGO, roles::TRAJ_INFRA, roles::TRAJ_VEHICLE]
        .into_iter()
        .filter(|r| !found.contains_key(r))
        .collect();
    if !missing.is_empty() {
        return FamilyDetection::rejected(
            kind,
            score * 0.5,
            Issue::new(
                codes::E_ROLE_REQUIRED_MISSING,
                format!("Missing required V2X directories: {}.", missing.join(", ")),
            ),
        );
    }

    let mut profile = DatasetProfile::new(kind, name, root);
    if let Some(t) = table.filter(|t| t.score >= 40.0) {
        profile
            .bindings
            .insert(roles::SCENES_INDEX.to_string(), Binding::file(t.path, false).with_score(t.score));
    }
    for (role, (path, q)) in found {
        let required = role != roles::TRAFFIC_LIGHT && role != roles::MAPS_DIR;
        profile.bindings.insert(role.to_string(), dir_binding(path, required, q));
    }
    profile.scene_strategy = SceneStrategy::mode("intersection_scene");
    FamilyDetection::proposed(kind, score, 0.0, profile)
}

/// Sequence datasets: cooperative and single-side trajectory folders.
pub fn detect_sequence(paths: &[PathBuf], name: Option<&str>) -> FamilyDetection {
    let kind = DatasetType::V2xSeq;
    let inferred = infer_sequence_layout(paths);
    let Some(root) = inferred.root.clone() else {
        return FamilyDetection::rejected(
            kind,
            0.0,
            Issue::new(codes::E_SCHEMA_REQUIRED_COLUMNS, "Could not infer a V2X-Seq root from the selected paths."),
        );
    };
    if !inferred.has_trajectories() {
        return FamilyDetection::rejected(
            kind,
            inferred.score * 0.4,
            Issue::new(codes::E_SCHEMA_REQUIRED_COLUMNS, "No trajectory directories were detected for V2X-Seq."),
        );
    }

    let mut profile = DatasetProfile::new(kind, name, root);
    for (role, (path, q)) in inferred.bindings {
        profile.bindings.insert(role.to_string(), dir_binding(path, false, q));
    }
    profile.scene_strategy = SceneStrategy::mode("sequence_scene");
    FamilyDetection::proposed(kind, inferred.score, 0.0, profile)
}

/// Drone recordings: `<prefix>_tracks.csv` triplets.
pub fn detect_recordings(paths: &[PathBuf], name: Option<&str>) -> FamilyDetection {
    let kind = DatasetType::Ind;
    let inferred = infer_recording_layout(paths);
    let Some(root) = inferred.root.clone() else {
        return FamilyDetection::rejected(
            kind,
            0.0,
            Issue::new(codes::E_SCHEMA_REQUIRED_COLUMNS, "Could not infer an inD root from the selected paths."),
        );
    };
    if inferred.details.recordings == 0 {
        return FamilyDetection::rejected(
            kind,
            inferred.score * 0.4,
            Issue::new(
                codes::E_SCHEMA_REQUIRED_COLUMNS,
                "No inD recording triplets (*_tracks/_tracksMeta/_recordingMeta.csv) were found.",
            ),
        );
    }

    let mut profile = DatasetProfile::new(kind, name, root);
    profile.bindings.insert(
        roles::DATA_DIR.to_string(),
        dir_binding(inferred.details.data_dir.clone(), true, inferred.score),
    );
    if let Some(maps) = inferred.maps_dir {
        profile
            .bindings
            .insert(roles::MAPS_DIR.to_string(), dir_binding(maps, false, 100.0));
    }
    profile.scene_strategy = SceneStrategy {
        mode: Some("recording_window".to_string()),
        window_s: Some(DEFAULT_RECORDING_WINDOW_S),
        ..Default::default()
    };
    FamilyDetection::proposed(kind, inferred.score, 0.0, profile)
}

/// Scenario folders grouped by city.
pub fn detect_scenarios(paths: &[PathBuf], name: Option<&str>) -> FamilyDetection {
    let kind = DatasetType::Sind;
    let scored = infer_scenario_root(paths);
    let score = scored.as_ref().map_or(0.0, |s| s.score);
    let Some(scored) = scored.filter(|s| s.scenario_count > 0) else {
        return FamilyDetection::rejected(
            kind,
            score * 0.4,
            Issue::new(codes::E_SCHEMA_REQUIRED_COLUMNS, "Could not infer a valid SinD root with scenario folders."),
        );
    };

    let mut profile = DatasetProfile::new(kind, name, scored.root.clone());
    profile.bindings.insert(
        roles::DATA_DIR.to_string(),
        dir_binding(scored.root.clone(), true, scored.score),
    );
    if let Some(maps) = scored.maps_dir.clone() {
        profile.bindings.insert(
            roles::MAPS_DIR.to_string(),
            dir_binding(maps, false, scored.map_city_ratio * 100.0),
        );
    }
    profile.scene_strategy = SceneStrategy::mode("scenario_scene");
    FamilyDetection::proposed(kind, scored.score, 0.0, profile)
}

/// Roadside object logs.
pub fn detect_object_logs(paths: &[PathBuf], name: Option<&str>, config: &DetectionConfig) -> FamilyDetection {
    let kind = DatasetType::ConsiderItCpm;
    let logs = collect_cpm_logs(paths, config.max_csv_files);
    let scores = score_cpm_logs(&logs, &BTreeMap::new(), config.sample_rows, config.max_scored_logs);
    let top = scores.first().map_or(0.0, |s| s.score);
    let second = scores.get(1).map_or(0.0, |s| s.score);

    let selected: Vec<PathBuf> = scores
        .iter()
        .filter(|s| s.score >= MIN_DIR_QUALITY)
        .map(|s| s.path.clone())
        .collect();
    let root = common_root(if selected.is_empty() { &logs } else { &selected })
        .or_else(|| common_root(paths))
        .unwrap_or_default();

    let mut profile = DatasetProfile::new(kind, name, root);
    if !logs.is_empty() {
        let best = scores.iter().find(|s| s.score >= MIN_DIR_QUALITY).or(scores.first());
        profile.bindings.insert(
            roles::CPM_LOGS.to_string(),
            Binding {
                kind: BindingKind::FileList,
                required: true,
                paths: logs,
                detected_score: Some(top),
                delimiter: Some(best.map_or(",".to_string(), |b| (b.delimiter as char).to_string())),
                encoding: Some(best.map_or("utf-8", |b| b.encoding.as_str()).to_string()),
                column_map: best.map(|b| b.column_map.clone()).unwrap_or_default(),
                ..Default::default()
            },
        );
    }
    if let Some(proto) = find_proto_schema(paths) {
        profile
            .bindings
            .insert(roles::PROTO_SCHEMA.to_string(), Binding::file(proto, false));
    }
    profile.scene_strategy = SceneStrategy {
        mode: Some("time_window".to_string()),
        window_s: Some(300.0),
        gap_s: Some(120.0),
        bin_ms: None,
    };
    FamilyDetection::proposed(kind, top, second, profile)
}

/// Runs the detector for one family.
pub fn detect_family(kind: DatasetType, paths: &[PathBuf], name: Option<&str>, config: &DetectionConfig) -> FamilyDetection {
    match kind {
        DatasetType::V2xTraj => detect_intersection(paths, name, config),
        DatasetType::V2xSeq => detect_sequence(paths, name),
        DatasetType::Ind => detect_recordings(paths, name),
        DatasetType::Sind => detect_scenarios(paths, name),
        DatasetType::ConsiderItCpm => detect_object_logs(paths, name, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const TRAJ_HEADER: &str = "city,timestamp,id,type,x,y,theta,intersect_id";

    fn write_table(dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("1.csv"), format!("{TRAJ_HEADER}\nPEK,1.0,a,VEHICLE,1,2,0,yizhuang#1\n"))
    }

    #[test]
    fn test_intersection_missing_side_is_rejected() -> std::io::Result<()> {
        let dir = tempdir()?;
        write_table(&dir.path().join("ego-trajectories/train/data"))?;
        write_table(&dir.path().join("infrastructure-trajectories/train/data"))?;

        let paths = vec![dir.path().to_path_buf()];
        let det = detect_intersection(&paths, None, &DetectionConfig::default());
        assert!(det.profile.is_none());
        assert_eq!(det.decision_mode, Tier::Manual);
        let failure = det.failure.unwrap();
        assert_eq!(failure.errors[0].code, codes::E_ROLE_REQUIRED_MISSING);
        assert!(failure.errors[0].message.contains(roles::TRAJ_VEHICLE));
        Ok(())
    }

    #[test]
    fn test_sequence_layout_proposes_optional_roles() -> std::io::Result<()> {
        let dir = tempdir()?;
        write_table(&dir.path().join("cooperative-vehicle-infrastructure/cooperative-trajectories/train/data"))?;
        write_table(&dir.path().join("single-vehicle/trajectories/train/data"))?;

        let paths = vec![dir.path().to_path_buf()];
        let det = detect_sequence(&paths, Some("Seq"));
        let profile = det.profile.unwrap();
        assert_eq!(profile.name, "Seq");
        assert_eq!(profile.roots, vec![dir.path().to_path_buf()]);
        assert!(profile.bindings.contains_key(roles::TRAJ_COOPERATIVE));
        assert!(profile.bindings.contains_key(roles::TRAJ_VEHICLE));
        assert!(!profile.bindings.contains_key(roles::TRAJ_INFRA));
        assert!(profile.bindings.values().all(|b| !b.required));
        assert_eq!(profile.scene_strategy.mode.as_deref(), Some("sequence_scene"));
        assert!(det.score > 80.0);
        Ok(())
    }

    #[test]
    fn test_empty_folder_rejects_trajectory_families() -> std::io::Result<()> {
        let dir = tempdir()?;
        let paths = vec![dir.path().to_path_buf()];
        let config = DetectionConfig::default();
        for kind in [DatasetType::V2xTraj, DatasetType::V2xSeq] {
            let det = detect_family(kind, &paths, None, &config);
            assert!(det.profile.is_none(), "{kind:?}");
            assert!(det.failure.is_some());
        }
        Ok(())
    }
}
