//! Scenario-folder scenes for signalized-intersection recordings.
//!
//! Each scenario directory holds smoothed vehicle and pedestrian tracks and a
//! signal state table. Scenarios sit either directly under the dataset root
//! or one level down in per-city directories; the city directory also holds
//! the lanelet map and a background image.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use super::catalog::{GroupOrder, SceneCatalog, SceneSummary, ALL_SPLIT};
use super::{dense_ids, IndexError, Result};
use crate::config::DatasetSpec;
use crate::core::loaders::{load_sind_signal_table, load_sind_track_table, ModalityStats, TickScale};

pub const VEHICLE_TRACKS: &str = "Veh_smoothed_tracks.csv";
pub const PEDESTRIAN_TRACKS: &str = "Ped_smoothed_tracks.csv";

/// Modality names in bundle order.
pub const MODALITIES: [&str; 3] = ["vehicle", "pedestrian", "traffic_light"];

/// Files of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub city: String,
    pub dir: PathBuf,
    pub vehicle: Option<PathBuf>,
    pub pedestrian: Option<PathBuf>,
    pub traffic_light: Option<PathBuf>,
}

impl Scenario {
    /// File of a modality, if present.
    pub fn file(&self, modality: &str) -> Option<&Path> {
        match modality {
            "vehicle" => self.vehicle.as_deref(),
            "pedestrian" => self.pedestrian.as_deref(),
            "traffic_light" => self.traffic_light.as_deref(),
            _ => None,
        }
    }
}

/// City-level assets shared by its scenarios.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityAssets {
    pub dir: PathBuf,
    pub map: Option<PathBuf>,
    pub background: Option<PathBuf>,
}

fn existing(dir: &Path, name: &str) -> Option<PathBuf> {
    Some(dir.join(name)).filter(|p| p.is_file())
}

/// True when `dir` contains a smoothed track table.
pub fn is_scenario_dir(dir: &Path) -> bool {
    dir.join(VEHICLE_TRACKS).is_file() || dir.join(PEDESTRIAN_TRACKS).is_file()
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    out.sort();
    out
}

fn file_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Signal state table of a scenario.
///
/// Any CSV whose name mentions `traffic` and not `meta`, skipping editor
/// lock files.
pub fn find_signal_table(dir: &Path) -> Option<PathBuf> {
    sorted_entries(dir).into_iter().filter(|p| p.is_file()).find(|p| {
        let name = file_name(p).to_ascii_lowercase();
        name.ends_with(".csv") && name.contains("traffic") && !name.contains("meta") && !name.starts_with(".~lock")
    })
}

fn first_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    sorted_entries(dir).into_iter().find(|p| {
        p.is_file()
            && p.extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.eq_ignore_ascii_case(ext))
    })
}

/// Map and background image of a city directory.
pub fn city_assets(dir: &Path) -> CityAssets {
    CityAssets {
        dir: dir.to_path_buf(),
        map: first_with_extension(dir, "osm"),
        background: first_with_extension(dir, "png"),
    }
}

fn scenario_at(dir: &Path, city: &str) -> Scenario {
    Scenario {
        name: file_name(dir),
        city: city.to_string(),
        dir: dir.to_path_buf(),
        vehicle: existing(dir, VEHICLE_TRACKS),
        pedestrian: existing(dir, PEDESTRIAN_TRACKS),
        traffic_light: find_signal_table(dir),
    }
}

/// Finds scenarios below `root`, ordered by city then name.
pub fn discover_scenarios(root: &Path) -> (Vec<Scenario>, BTreeMap<String, CityAssets>) {
    let root_city = file_name(root);
    let mut scenarios = Vec::new();
    let mut cities = BTreeMap::new();

    for child in sorted_entries(root).into_iter().filter(|p| p.is_dir()) {
        if is_scenario_dir(&child) {
            cities
                .entry(root_city.clone())
                .or_insert_with(|| city_assets(root));
            scenarios.push(scenario_at(&child, &root_city));
            continue;
        }
        let city = file_name(&child);
        for sub in sorted_entries(&child).into_iter().filter(|p| p.is_dir()) {
            if is_scenario_dir(&sub) {
                cities.entry(city.clone()).or_insert_with(|| city_assets(&child));
                scenarios.push(scenario_at(&sub, &city));
            }
        }
    }
    scenarios.sort_by(|a, b| (&a.city, &a.name).cmp(&(&b.city, &b.name)));
    (scenarios, cities)
}

/// Per-modality statistics of a scenario; unreadable files are left out.
pub fn scenario_stats(scenario: &Scenario) -> BTreeMap<String, ModalityStats> {
    let mut out = BTreeMap::new();
    for m in MODALITIES {
        let Some(path) = scenario.file(m) else {
            continue;
        };
        let loaded = if m == "traffic_light" {
            load_sind_signal_table(path)
        } else {
            load_sind_track_table(path)
        };
        match loaded {
            Ok(t) => {
                out.insert(m.to_string(), t.stats(TickScale::Deciseconds));
            }
            Err(e) => debug!("{}: {} unreadable: {}", scenario.name, m, e),
        }
    }
    out
}

/// Index of a scenario-folder dataset.
#[derive(Debug, Clone, Default)]
pub struct ScenarioIndex {
    pub catalog: SceneCatalog,
    pub scenarios: Vec<Scenario>,
    pub cities: BTreeMap<String, CityAssets>,
    scenes: HashMap<String, usize>,
}

impl ScenarioIndex {
    pub fn scenario(&self, scene_id: &str) -> Option<&Scenario> {
        self.scenes.get(scene_id).and_then(|i| self.scenarios.get(*i))
    }

    pub fn city(&self, city: &str) -> Option<&CityAssets> {
        self.cities.get(city)
    }
}

/// Builds the index for a scenario-folder dataset.
///
/// Scenario statistics load in parallel. Scene ids are dense over (city,
/// scenario name).
///
/// # Errors
///
/// Returns [`IndexError::NoScenes`] when no scenario directory is found.
pub fn build_index(spec: &DatasetSpec) -> Result<ScenarioIndex> {
    let started = Instant::now();
    let (scenarios, cities) = discover_scenarios(&spec.root);
    if scenarios.is_empty() {
        warn!("{}: no scenario directories under {}", spec.id, spec.root.display());
        return Err(IndexError::NoScenes(spec.root.clone()));
    }

    let stats: Vec<BTreeMap<String, ModalityStats>> = scenarios.par_iter().map(scenario_stats).collect();

    let mut summaries = Vec::with_capacity(scenarios.len());
    let mut scenes = HashMap::with_capacity(scenarios.len());
    for ((i, (scenario, by_modality)), scene_id) in scenarios.iter().zip(stats).enumerate().zip(dense_ids(usize::MAX)) {
        summaries.push(SceneSummary {
            scene_id: scene_id.clone(),
            scene_label: Some(format!("{} · {}", scenario.city, scenario.name)),
            split: ALL_SPLIT.to_string(),
            city: Some(scenario.city.clone()),
            group_id: Some(scenario.city.clone()),
            group_label: Some(scenario.city.clone()),
            by_modality,
        });
        scenes.insert(scene_id, i);
    }

    info!(
        "{}: indexed {} scenarios in {} cities in {:.2?}",
        spec.id,
        scenarios.len(),
        cities.len(),
        started.elapsed()
    );
    Ok(ScenarioIndex {
        catalog: SceneCatalog::single(summaries, GroupOrder::ByLabel),
        scenarios,
        cities,
        scenes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use std::fs;
    use tempfile::tempdir;

    fn write_scenario(dir: &Path, with_ped: bool) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join(VEHICLE_TRACKS),
            "track_id,frame_id,timestamp_ms,agent_type,x,y\n1,1,100,car,1,2\n1,2,200,car,2,2\n",
        )?;
        if with_ped {
            fs::write(
                dir.join(PEDESTRIAN_TRACKS),
                "track_id,frame_id,timestamp_ms,agent_type,x,y\nP1,1,100,pedestrian,5,5\n",
            )?;
        }
        fs::write(dir.join("TrafficLight_8_02_1.csv"), "RawFrameID,timestamp(ms),Traffic light 1\n0,100,1\n")?;
        fs::write(dir.join("TrafficLight_meta.csv"), "x\n1\n")?;
        Ok(())
    }

    #[test]
    fn test_city_layout() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        write_scenario(&root.join("Tianjin/8_02_1"), true)?;
        write_scenario(&root.join("Tianjin/8_02_2"), false)?;
        write_scenario(&root.join("Chongqing/1_01_1"), true)?;
        fs::write(root.join("Tianjin/map_Tianjin.osm"), "<osm/>")?;
        fs::write(root.join("Tianjin/background.png"), [0u8; 4])?;
        fs::create_dir_all(root.join("Tianjin/notes"))?;

        let spec = DatasetSpec::new("sind", Family::Sind, root);
        let index = build_index(&spec)?;

        let groups = index.catalog.list_groups("all");
        let labels: Vec<&str> = groups.iter().filter_map(|g| g.group_label.as_deref()).collect();
        assert_eq!(labels, vec!["Chongqing", "Tianjin"]);

        assert_eq!(index.scenario("1").unwrap().name, "1_01_1");
        let s3 = index.scenario("3").unwrap();
        assert_eq!(s3.name, "8_02_2");
        assert!(s3.pedestrian.is_none());
        assert_eq!(
            s3.traffic_light.as_deref().and_then(Path::file_name).and_then(|n| n.to_str()),
            Some("TrafficLight_8_02_1.csv")
        );

        let tianjin = index.city("Tianjin").unwrap();
        assert!(tianjin.map.is_some());
        assert!(tianjin.background.is_some());
        assert!(index.city("Chongqing").unwrap().map.is_none());

        let scene = index.catalog.get("val", "2").unwrap();
        assert_eq!(scene.by_modality["vehicle"].rows, 2);
        assert_eq!(scene.by_modality["traffic_light"].rows, 1);
        Ok(())
    }

    #[test]
    fn test_flat_layout_uses_root_name() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("SinD");
        write_scenario(&root.join("a"), false)?;
        let spec = DatasetSpec::new("sind", Family::Sind, &root);
        let index = build_index(&spec)?;
        assert_eq!(index.scenario("1").unwrap().city, "SinD");
        assert!(index.city("SinD").is_some());
        Ok(())
    }

    #[test]
    fn test_lock_files_are_ignored() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join(".~lock.traffic.csv#"), "")?;
        fs::write(dir.path().join(".~lock.traffic.csv"), "")?;
        assert!(find_signal_table(dir.path()).is_none());
        Ok(())
    }
}
