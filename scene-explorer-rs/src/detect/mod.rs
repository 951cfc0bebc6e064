//! Format detection: turns arbitrary folders into validated dataset profiles.
//!
//! Every family detector scores the selected paths on its own (see
//! [`families`]); the best-scoring family wins and its proposed profile is
//! validated. The decision tier tells a front end whether the result can be
//! applied without asking.

pub mod families;
pub mod profile;
pub mod scoring;
pub mod validate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::registry::resolve_path;
use crate::config::{Binding, DatasetType, DetectionConfig, SceneStrategy};

pub use families::FamilyDetection;
pub use profile::{BasemapConfig, DatasetProfile, DetectorInfo};
pub use validate::{validate_profile, Capabilities, Issue, Status, ValidatedProfile, Validation};

/// Score a detection needs for `auto`.
pub const AUTO_SCORE: f64 = 75.0;
/// Lead over the runner-up a detection needs for `auto`.
pub const AUTO_MARGIN: f64 = 12.0;
/// Score a detection needs for `confirm`.
pub const CONFIRM_SCORE: f64 = 50.0;

/// How much confirmation a detection result needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Auto,
    Confirm,
    #[default]
    Manual,
}

impl Tier {
    pub fn decide(score: f64, second_best: f64) -> Tier {
        if score >= AUTO_SCORE && score - second_best >= AUTO_MARGIN {
            Tier::Auto
        } else if score >= CONFIRM_SCORE {
            Tier::Confirm
        } else {
            Tier::Manual
        }
    }
}

/// One family's score in a ranked detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub dataset_type: DatasetType,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<DatasetType>,
    pub score: f64,
    pub second_best: f64,
    pub margin: f64,
    pub decision_mode: Tier,
    pub candidates: Vec<Candidate>,
    pub proposed_bindings: BTreeMap<String, Binding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_strategy: Option<SceneStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<DatasetProfile>,
    pub validation: Validation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl DetectionReport {
    fn failed(error: &str, validation: Validation) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            dataset_type: None,
            score: 0.0,
            second_best: 0.0,
            margin: 0.0,
            decision_mode: Tier::Manual,
            candidates: Vec::new(),
            proposed_bindings: BTreeMap::new(),
            scene_strategy: None,
            profile: None,
            validation,
            capabilities: None,
        }
    }
}

/// Resolves user-supplied paths against `repo_root`, dropping blanks and
/// duplicates.
pub fn resolve_input_paths<S: AsRef<str>>(repo_root: &Path, raw: &[S]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for p in raw.iter().filter_map(|r| resolve_path(repo_root, r.as_ref())) {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

/// Detects the dataset family of `raw_paths` and proposes a validated
/// profile.
///
/// With a type hint only that family's detector runs. Otherwise all run in
/// parallel and are ranked by score; ties keep the order object logs,
/// intersection, sequence, recordings, scenarios.
pub fn detect_profile<S: AsRef<str>>(
    repo_root: &Path,
    raw_paths: &[S],
    type_hint: Option<&str>,
    name: Option<&str>,
    config: &DetectionConfig,
) -> DetectionReport {
    let paths = resolve_input_paths(repo_root, raw_paths);
    if paths.is_empty() {
        return DetectionReport::failed(
            "No paths provided.",
            Validation::failed(Issue::new(
                validate::codes::E_ROLE_REQUIRED_MISSING,
                "Provide at least one folder or file path.",
            )),
        );
    }

    let start = Instant::now();
    let hint = type_hint.and_then(DatasetType::normalize);
    let (picked, candidates) = match hint {
        Some(kind) => {
            let picked = families::detect_family(kind, &paths, name, config);
            let candidates = vec![Candidate {
                dataset_type: kind,
                score: picked.score,
            }];
            (picked, candidates)
        }
        None => {
            const ORDER: [DatasetType; 5] = [
                DatasetType::ConsiderItCpm,
                DatasetType::V2xTraj,
                DatasetType::V2xSeq,
                DatasetType::Ind,
                DatasetType::Sind,
            ];
            let mut ranked: Vec<FamilyDetection> = ORDER
                .par_iter()
                .map(|kind| families::detect_family(*kind, &paths, name, config))
                .collect();
            ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
            let candidates = ranked
                .iter()
                .map(|d| Candidate {
                    dataset_type: d.dataset_type,
                    score: d.score,
                })
                .collect();
            let second = ranked.get(1).map_or(0.0, |d| d.score);
            let mut picked = ranked.swap_remove(0);
            picked.set_second_best(second);
            (picked, candidates)
        }
    };
    info!(
        "detected {} (score {:.1}, runner-up {:.1}, {:?}) in {:.2?}",
        picked.dataset_type,
        picked.score,
        picked.second_best,
        picked.decision_mode,
        start.elapsed()
    );

    let FamilyDetection {
        dataset_type,
        score,
        second_best,
        decision_mode,
        profile,
        failure,
    } = picked;
    let Some(profile) = profile else {
        let mut report = DetectionReport::failed(
            "Could not detect a dataset profile from the provided paths.",
            failure.unwrap_or_default(),
        );
        report.dataset_type = Some(dataset_type);
        report.score = score;
        report.second_best = second_best;
        report.margin = score - second_best;
        report.candidates = candidates;
        return report;
    };

    let validated = validate_profile(repo_root, &profile, config);
    DetectionReport {
        ok: true,
        error: None,
        dataset_type: Some(dataset_type),
        score,
        second_best,
        margin: score - second_best,
        decision_mode,
        candidates,
        proposed_bindings: validated.profile.bindings.clone(),
        scene_strategy: Some(validated.profile.scene_strategy.clone()),
        profile: Some(validated.profile),
        validation: validated.validation,
        capabilities: Some(validated.capabilities),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::roles;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    const TRAJ_HEADER: &str = "city,timestamp,id,type,sub_type,tag,x,y,z,length,width,height,theta,v_x,v_y,intersect_id";

    fn write_intersection_dataset(root: &Path) -> std::io::Result<()> {
        for dir in ["ego-trajectories", "infrastructure-trajectories", "vehicle-trajectories"] {
            let d = root.join(dir).join("train/data");
            fs::create_dir_all(&d)?;
            fs::write(
                d.join("1.csv"),
                format!("{TRAJ_HEADER}\nPEK,1.0,a,VEHICLE,CAR,AV,1,2,0,4,2,1.5,0,1,0,yizhuang#4-1\n"),
            )?;
        }
        let tl = root.join("traffic-light/train/data");
        fs::create_dir_all(&tl)?;
        fs::write(
            tl.join("1.csv"),
            "timestamp,x,y,direction,lane_id,color_1,remain_1,intersect_id\n1.0,1,2,N,3,RED,4,yizhuang#4-1\n",
        )?;
        fs::create_dir_all(root.join("maps"))?;
        Ok(())
    }

    #[test]
    fn test_tier_decision() {
        assert_eq!(Tier::decide(90.0, 70.0), Tier::Auto);
        assert_eq!(Tier::decide(90.0, 80.0), Tier::Confirm);
        assert_eq!(Tier::decide(60.0, 0.0), Tier::Confirm);
        assert_eq!(Tier::decide(49.9, 0.0), Tier::Manual);
    }

    #[test]
    fn test_no_paths() {
        let dir = tempdir().unwrap();
        let report = detect_profile::<&str>(dir.path(), &["  "], None, None, &DetectionConfig::default());
        assert!(!report.ok);
        assert_eq!(report.validation.status, Status::BrokenPath);
    }

    #[test]
    fn test_intersection_dataset_is_auto() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let root = dir.path().join("V2X-Traj");
        write_intersection_dataset(&root)?;

        let report = detect_profile(dir.path(), &["V2X-Traj"], None, Some("Local V2X"), &DetectionConfig::default());
        assert!(report.ok, "{:?}", report.error);
        assert_eq!(report.dataset_type, Some(DatasetType::V2xTraj));
        assert!(report.score >= AUTO_SCORE);
        assert!(report.margin >= AUTO_MARGIN, "{:?}", report.candidates);
        assert_eq!(report.decision_mode, Tier::Auto);
        assert_eq!(report.candidates.len(), 5);
        assert!(report.proposed_bindings.contains_key(roles::TRAJ_EGO));
        assert!(report.proposed_bindings[roles::TRAJ_EGO].required);

        let profile = report.profile.as_ref().unwrap();
        assert_eq!(profile.name, "Local V2X");
        assert_eq!(profile.detector.decision_mode, Tier::Auto);
        assert_eq!(report.validation.status, Status::ReadyWithWarnings);
        assert!(report.capabilities.as_ref().is_some_and(|c| c.has_map && c.has_traffic_lights));
        Ok(())
    }

    #[test]
    fn test_object_logs_detected() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let lidar = dir.path().join("cpm/lidar/rsu_7");
        fs::create_dir_all(&lidar)?;
        for day in ["20240501", "20240502"] {
            let mut f = fs::File::create(lidar.join(format!("{day}-cpm-objects.csv")))?;
            writeln!(f, "generationTime_ms,objectID,xDistance_m,yDistance_m,xSpeed_mps,ySpeed_mps,classificationType")?;
            for i in 0..10 {
                writeln!(f, "{},{},1.0,2.0,0.5,0.5,5", 1_714_521_600_000i64 + i * 100, i)?;
            }
        }

        let report = detect_profile(dir.path(), &["cpm"], None, None, &DetectionConfig::default());
        assert!(report.ok);
        assert_eq!(report.dataset_type, Some(DatasetType::ConsiderItCpm));
        assert_eq!(report.score, 100.0);
        assert!(report.margin >= AUTO_MARGIN, "{:?}", report.candidates);
        assert_eq!(report.decision_mode, Tier::Auto);
        let logs = &report.proposed_bindings[roles::CPM_LOGS];
        assert_eq!(logs.paths.len(), 2);
        assert_eq!(report.scene_strategy.as_ref().and_then(|s| s.window_s), Some(300.0));
        Ok(())
    }

    fn assert_auto(report: &DetectionReport, expected: DatasetType) {
        assert!(report.ok, "{:?}", report.error);
        assert_eq!(report.dataset_type, Some(expected));
        assert!(report.score >= AUTO_SCORE, "{:?}", report.candidates);
        assert!(report.margin >= AUTO_MARGIN, "{:?}", report.candidates);
        assert_eq!(report.decision_mode, Tier::Auto);
    }

    #[test]
    fn test_sequence_dataset_is_auto() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let root = dir.path().join("V2X-Seq");
        let row = format!("{TRAJ_HEADER}\nPEK,1.0,a,VEHICLE,CAR,AV,1,2,0,4,2,1.5,0,1,0,yizhuang#4-1\n");
        for sub in [
            "cooperative-vehicle-infrastructure/cooperative-trajectories",
            "cooperative-vehicle-infrastructure/infrastructure-trajectories",
            "cooperative-vehicle-infrastructure/vehicle-trajectories",
            "single-infrastructure/trajectories",
            "single-vehicle/trajectories",
        ] {
            let d = root.join(sub).join("train/data");
            fs::create_dir_all(&d)?;
            fs::write(d.join("1.csv"), &row)?;
        }
        let tl = root.join("single-infrastructure/traffic-light/train/data");
        fs::create_dir_all(&tl)?;
        fs::write(
            tl.join("1.csv"),
            "timestamp,x,y,direction,lane_id,color_1,remain_1,intersect_id\n1.0,1,2,N,3,RED,4,yizhuang#4-1\n",
        )?;
        fs::create_dir_all(root.join("maps"))?;

        let report = detect_profile(dir.path(), &["V2X-Seq"], None, None, &DetectionConfig::default());
        assert_auto(&report, DatasetType::V2xSeq);
        assert!(report.proposed_bindings.contains_key(roles::TRAJ_COOPERATIVE));
        Ok(())
    }

    #[test]
    fn test_recording_dataset_is_auto() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let root = dir.path().join("inD");
        let data = root.join("data");
        fs::create_dir_all(&data)?;
        fs::create_dir_all(root.join("maps"))?;
        for prefix in ["00", "01", "02"] {
            fs::write(
                data.join(format!("{prefix}_recordingMeta.csv")),
                format!("recordingId,locationId,frameRate\n{},1,25\n", prefix.parse::<u32>()?),
            )?;
            fs::write(
                data.join(format!("{prefix}_tracksMeta.csv")),
                "trackId,initialFrame,finalFrame,class\n0,0,100,car\n",
            )?;
            fs::write(
                data.join(format!("{prefix}_tracks.csv")),
                "trackId,frame,xCenter,yCenter\n0,0,1.0,2.0\n",
            )?;
            fs::write(data.join(format!("{prefix}_background.png")), [0u8; 8])?;
        }

        let report = detect_profile(dir.path(), &["inD"], None, None, &DetectionConfig::default());
        assert_auto(&report, DatasetType::Ind);
        let data = fs::canonicalize(&data)?;
        assert_eq!(report.proposed_bindings[roles::DATA_DIR].path.as_deref(), Some(data.as_path()));
        Ok(())
    }

    #[test]
    fn test_scenario_dataset_is_auto() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let city = dir.path().join("SinD/Tianjin");
        for i in 0..16 {
            let scenario = city.join(format!("8_{i:02}_1"));
            fs::create_dir_all(&scenario)?;
            for file in ["Veh_smoothed_tracks.csv", "Ped_smoothed_tracks.csv"] {
                fs::write(
                    scenario.join(file),
                    "track_id,frame_id,timestamp_ms,agent_type,x,y\n1,0,0,car,1.0,2.0\n",
                )?;
            }
        }
        fs::write(city.join("map.osm"), "<osm/>")?;
        fs::write(city.join("background.png"), [0u8; 8])?;

        let report = detect_profile(dir.path(), &["SinD"], None, None, &DetectionConfig::default());
        assert_auto(&report, DatasetType::Sind);
        Ok(())
    }

    #[test]
    fn test_hint_restricts_detection() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_intersection_dataset(dir.path())?;
        let report = detect_profile(dir.path(), &["."], Some("sind"), None, &DetectionConfig::default());
        assert!(!report.ok);
        assert_eq!(report.dataset_type, Some(DatasetType::Sind));
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.validation.status, Status::SchemaMismatch);
        Ok(())
    }
}
