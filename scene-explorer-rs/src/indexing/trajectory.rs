//! Intersection-indexed scenes for the cooperative trajectory families.
//!
//! Every modality has its own directory tree `<modality>/<split>/data/<id>.csv`
//! and a scene is the set of files sharing a stem. The index is either read
//! from a precomputed scene-index table or discovered by scanning the trees.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use super::catalog::{GroupOrder, SceneCatalog, SceneSummary};
use super::{IndexError, Result};
use crate::config::{roles, DatasetSpec};
use crate::core::loaders::{
    load_traffic_light_table, load_trajectory_table, read_csv_text, ModalityStats, ModalityTable, TickScale,
};
use crate::core::schema::{
    classify_header, parse_int, read_header, safe_float, FieldMap, TableKind, SCENE_INDEX_FIELDS,
    SCENE_INDEX_REQUIRED,
};
use crate::core::writers::SceneIndexRow;
use crate::maps::hdmap::intersection_label;

/// One modality of a trajectory family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalityLayout {
    pub name: &'static str,
    pub role: &'static str,
    /// Directory below the dataset root
    pub dir: &'static str,
    pub kind: TableKind,
    pub label: &'static str,
    pub short_label: &'static str,
}

const fn modality(
    name: &'static str,
    role: &'static str,
    dir: &'static str,
    kind: TableKind,
    label: &'static str,
    short_label: &'static str,
) -> ModalityLayout {
    ModalityLayout {
        name,
        role,
        dir,
        kind,
        label,
        short_label,
    }
}

pub const V2X_TRAJ_MODALITIES: &[ModalityLayout] = &[
    modality("ego", roles::TRAJ_EGO, "ego-trajectories", TableKind::Trajectory, "Ego vehicle", "Ego"),
    modality(
        "infra",
        roles::TRAJ_INFRA,
        "infrastructure-trajectories",
        TableKind::Trajectory,
        "Infrastructure",
        "Infra",
    ),
    modality(
        "vehicle",
        roles::TRAJ_VEHICLE,
        "vehicle-trajectories",
        TableKind::Trajectory,
        "Other vehicles",
        "Vehicles",
    ),
    modality(
        "traffic_light",
        roles::TRAFFIC_LIGHT,
        "traffic-light",
        TableKind::TrafficLight,
        "Traffic lights",
        "Lights",
    ),
];

pub const V2X_SEQ_MODALITIES: &[ModalityLayout] = &[
    modality(
        "cooperative",
        roles::TRAJ_COOPERATIVE,
        "cooperative-vehicle-infrastructure/cooperative-trajectories",
        TableKind::Trajectory,
        "Cooperative tracks",
        "Coop",
    ),
    modality(
        "infra",
        roles::TRAJ_INFRA,
        "cooperative-vehicle-infrastructure/infrastructure-trajectories",
        TableKind::Trajectory,
        "Infrastructure",
        "Infra",
    ),
    modality(
        "vehicle",
        roles::TRAJ_VEHICLE,
        "cooperative-vehicle-infrastructure/vehicle-trajectories",
        TableKind::Trajectory,
        "Vehicle",
        "Vehicle",
    ),
    modality(
        "traffic_light",
        roles::TRAFFIC_LIGHT,
        "cooperative-vehicle-infrastructure/traffic-light",
        TableKind::TrafficLight,
        "Traffic lights",
        "Lights",
    ),
];

/// Splits every trajectory dataset exposes, even when empty.
pub const DEFAULT_SPLITS: &[&str] = &["train", "val"];

const KNOWN_SPLITS: &[&str] = &["train", "val", "test"];

/// Split named by a table path segment (`train`, `val` or `test`).
pub fn split_from_table(table: &str) -> Option<&'static str> {
    table
        .split(['/', '\\'])
        .find_map(|seg| KNOWN_SPLITS.iter().find(|s| **s == seg).copied())
}

/// Modality whose directory prefixes the table path.
pub fn modality_from_table<'a>(table: &str, layouts: &'a [ModalityLayout]) -> Option<&'a ModalityLayout> {
    let table = table.replace('\\', "/");
    layouts
        .iter()
        .find(|l| table.starts_with(&format!("{}/", l.dir)))
        .or_else(|| {
            // tables written relative to the family root's parent directory
            layouts.iter().find(|l| {
                l.dir
                    .rsplit('/')
                    .next()
                    .is_some_and(|leaf| table.starts_with(&format!("{leaf}/")))
            })
        })
}

/// Directory holding a modality's split trees.
pub fn modality_dir(spec: &DatasetSpec, layout: &ModalityLayout) -> PathBuf {
    spec.dir_or(layout.role, layout.dir)
}

/// One (modality, scene) table known to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub modality: &'static str,
    pub split: String,
    pub scene_id: String,
    pub path: PathBuf,
    pub stats: ModalityStats,
    pub city: Option<String>,
    pub group_id: Option<String>,
    pub group_variants: usize,
}

impl TableEntry {
    /// Scene-index row for this table, paths relative to `root` when possible.
    pub fn to_index_row(&self, root: &Path, layout: &ModalityLayout) -> SceneIndexRow {
        let in_data = self
            .path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|n| n == "data");
        let table = if in_data {
            format!("{}/{}/data", layout.dir, self.split)
        } else {
            format!("{}/{}", layout.dir, self.split)
        };
        let file = self
            .path
            .strip_prefix(root)
            .unwrap_or(&self.path)
            .to_string_lossy()
            .replace('\\', "/");
        SceneIndexRow {
            table,
            scene_id: self.scene_id.clone(),
            file,
            rows: self.stats.rows,
            min_ts: self.stats.min_ts,
            max_ts: self.stats.max_ts,
            unique_ts: self.stats.unique_ts,
            duration_s: self.stats.duration_s,
            unique_agents: self.stats.unique_agents,
            intersect_label: self.group_id.as_deref().map(intersection_label),
            intersect_id: self.group_id.clone(),
            intersect_id_variants: self.group_variants,
            city: self.city.clone(),
        }
    }
}

/// Index of a trajectory dataset.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryIndex {
    pub catalog: SceneCatalog,
    files: HashMap<(String, String), BTreeMap<&'static str, PathBuf>>,
}

impl TrajectoryIndex {
    /// Per-modality files of a scene.
    pub fn files(&self, split: &str, scene_id: &str) -> Option<&BTreeMap<&'static str, PathBuf>> {
        self.files.get(&(split.to_string(), scene_id.to_string()))
    }
}

/// Loads one modality table with the binding's column overrides.
pub fn load_modality(
    spec: &DatasetSpec,
    layout: &ModalityLayout,
    path: &Path,
) -> crate::core::loaders::Result<ModalityTable> {
    let empty = BTreeMap::new();
    let overrides = spec.binding(layout.role).map_or(&empty, |b| &b.column_map);
    match layout.kind {
        TableKind::TrafficLight => load_traffic_light_table(path, overrides),
        _ => load_trajectory_table(path, overrides),
    }
}

fn csv_files(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter(|p| {
                    p.extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| x.eq_ignore_ascii_case("csv"))
                })
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

fn split_dirs(modality_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut out: Vec<(String, PathBuf)> = std::fs::read_dir(modality_dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .filter_map(|p| {
                    let name = p.file_name()?.to_str()?.to_string();
                    Some((name, p))
                })
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

/// Discovers and summarizes every scene table below the modality trees.
///
/// A file is accepted for a modality only if its header classifies as that
/// modality's table kind. Tables are loaded in parallel; unreadable files are
/// skipped with a warning. Entries come back in layout order, then path order.
pub fn discover_tables(spec: &DatasetSpec, layouts: &[ModalityLayout]) -> Vec<TableEntry> {
    let mut jobs: Vec<(usize, String, PathBuf)> = Vec::new();
    for (li, layout) in layouts.iter().enumerate() {
        let dir = modality_dir(spec, layout);
        if !dir.is_dir() {
            debug!("{}: no {} directory at {}", spec.id, layout.name, dir.display());
            continue;
        }
        for (split, split_dir) in split_dirs(&dir) {
            let data = split_dir.join("data");
            let files = if data.is_dir() { csv_files(&data) } else { csv_files(&split_dir) };
            jobs.extend(files.into_iter().map(|p| (li, split.clone(), p)));
        }
    }

    let mut entries: Vec<(usize, TableEntry)> = jobs
        .par_iter()
        .filter_map(|(li, split, path)| {
            let layout = &layouts[*li];
            let kind = classify_header(&read_header(path));
            if kind != Some(layout.kind) {
                debug!("{}: {} is not a {} table ({:?})", spec.id, path.display(), layout.name, kind);
                return None;
            }
            let table = match load_modality(spec, layout, path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("{}: skipping {}: {}", spec.id, path.display(), e);
                    return None;
                }
            };
            let scene_id = path.file_stem()?.to_string_lossy().into_owned();
            Some((
                *li,
                TableEntry {
                    modality: layout.name,
                    split: split.clone(),
                    scene_id,
                    path: path.clone(),
                    stats: table.stats(TickScale::Deciseconds),
                    city: table.city.clone(),
                    group_id: table.group_id.clone(),
                    group_variants: table.group_variants(),
                },
            ))
        })
        .collect();

    entries.sort_by(|a, b| (a.0, &a.1.path).cmp(&(b.0, &b.1.path)));
    entries.into_iter().map(|(_, e)| e).collect()
}

/// Reads a precomputed scene-index table.
///
/// Split and modality come from the `table` column; rows with an unknown
/// split or modality, or no scene id, are skipped. The per-scene file is the
/// `file` column when present, else `<modality dir>/<split>/data/<id>.csv`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or lacks `table`/`scene_id`.
pub fn load_scene_table(spec: &DatasetSpec, path: &Path, layouts: &[ModalityLayout]) -> Result<Vec<TableEntry>> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let headers = crate::core::schema::reader_headers(&mut reader)?;
    let fields = FieldMap::from_headers(&headers, SCENE_INDEX_FIELDS);
    let missing = fields.missing(SCENE_INDEX_REQUIRED);
    if !missing.is_empty() {
        return Err(IndexError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing.join(", "),
        });
    }

    let mut out = Vec::new();
    for record in reader.records().flatten() {
        let Some(table) = fields.value(&record, "table") else {
            continue;
        };
        let (Some(split), Some(layout)) = (split_from_table(table), modality_from_table(table, layouts)) else {
            continue;
        };
        let Some(scene_id) = fields.string(&record, "scene_id") else {
            continue;
        };

        let base = modality_dir(spec, layout);
        let normalized = table.replace('\\', "/");
        let table_dir = match normalized.strip_prefix(&format!("{}/", layout.dir)) {
            Some(rest) => base.join(rest),
            None => base.join(normalized.split_once('/').map_or("", |(_, rest)| rest)),
        };
        let file = match fields.value(&record, "file") {
            Some(f) if f.contains(['/', '\\']) => {
                let p = PathBuf::from(f);
                if p.is_absolute() {
                    p
                } else {
                    spec.root.join(p)
                }
            }
            Some(f) => table_dir.join(f),
            None => base.join(split).join("data").join(format!("{scene_id}.csv")),
        };

        out.push(TableEntry {
            modality: layout.name,
            split: split.to_string(),
            scene_id,
            path: file,
            stats: ModalityStats {
                rows: fields.value(&record, "rows").and_then(parse_int).unwrap_or(0).max(0) as usize,
                min_ts: fields.value(&record, "min_ts").and_then(safe_float),
                max_ts: fields.value(&record, "max_ts").and_then(safe_float),
                unique_ts: fields.value(&record, "unique_ts").and_then(parse_int).unwrap_or(0).max(0) as usize,
                duration_s: fields.value(&record, "duration_s").and_then(safe_float),
                unique_agents: fields
                    .value(&record, "unique_agents")
                    .and_then(parse_int)
                    .map(|v| v.max(0) as usize),
            },
            city: fields.string(&record, "city"),
            group_id: fields.string(&record, "intersect_id"),
            group_variants: 0,
        });
    }
    Ok(out)
}

/// Folds table entries into scenes and the catalog.
pub fn assemble(entries: Vec<TableEntry>) -> TrajectoryIndex {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut scenes: HashMap<(String, String), SceneSummary> = HashMap::new();
    let mut files: HashMap<(String, String), BTreeMap<&'static str, PathBuf>> = HashMap::new();

    for e in entries {
        let key = (e.split.clone(), e.scene_id.clone());
        let scene = scenes.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            SceneSummary {
                scene_id: e.scene_id.clone(),
                split: e.split.clone(),
                ..Default::default()
            }
        });
        if scene.city.is_none() {
            scene.city = e.city.clone();
        }
        if scene.group_id.is_none() {
            scene.group_label = e.group_id.as_deref().map(intersection_label);
            scene.group_id = e.group_id.clone();
        }
        scene.by_modality.insert(e.modality.to_string(), e.stats);
        files.entry(key).or_default().insert(e.modality, e.path);
    }

    let summaries: Vec<SceneSummary> = order.into_iter().filter_map(|k| scenes.remove(&k)).collect();
    TrajectoryIndex {
        catalog: SceneCatalog::by_split(summaries, DEFAULT_SPLITS, GroupOrder::MostCommon),
        files,
    }
}

/// Builds the index for a trajectory dataset.
///
/// Uses the scene-index table (binding `scenes_index`, else
/// `<root>/scenes.csv`) when it exists, otherwise discovers tables.
///
/// # Errors
///
/// Returns [`IndexError::NoScenes`] when neither source yields a scene, or
/// the scene-index table's read error.
pub fn build_index(spec: &DatasetSpec, layouts: &[ModalityLayout]) -> Result<TrajectoryIndex> {
    let started = Instant::now();
    let table_path = spec
        .binding_path(roles::SCENES_INDEX)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| spec.root.join("scenes.csv"));

    let (entries, source) = if table_path.is_file() {
        (load_scene_table(spec, &table_path, layouts)?, "scene table")
    } else {
        (discover_tables(spec, layouts), "discovery")
    };

    let index = assemble(entries);
    if index.catalog.total_scenes() == 0 {
        return Err(IndexError::NoScenes(spec.root.clone()));
    }
    info!(
        "{}: indexed {} scenes from {} in {:.2?}",
        spec.id,
        index.catalog.total_scenes(),
        source,
        started.elapsed()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    const TRAJ_HEADER: &str = "city,timestamp,id,type,sub_type,tag,x,y,z,length,width,height,theta,v_x,v_y,intersect_id";

    fn write_traj(root: &Path, dir: &str, split: &str, id: &str, intersect: &str) -> std::io::Result<()> {
        let d = root.join(dir).join(split).join("data");
        fs::create_dir_all(&d)?;
        let mut f = fs::File::create(d.join(format!("{id}.csv")))?;
        writeln!(f, "{TRAJ_HEADER}")?;
        writeln!(f, "PEK,100.0,a,VEHICLE,CAR,AV,1,2,0,4,2,1.5,0,1,0,{intersect}")?;
        writeln!(f, "PEK,100.1,a,VEHICLE,CAR,AV,2,2,0,4,2,1.5,0,1,0,{intersect}")?;
        Ok(())
    }

    #[test]
    fn test_split_and_modality_from_table() {
        assert_eq!(split_from_table("ego-trajectories/train/data"), Some("train"));
        assert_eq!(split_from_table("x\\val\\data"), Some("val"));
        assert_eq!(split_from_table("ego-trajectories/data"), None);
        assert_eq!(
            modality_from_table("traffic-light/val/data", V2X_TRAJ_MODALITIES).map(|l| l.name),
            Some("traffic_light")
        );
        assert_eq!(
            modality_from_table("cooperative-trajectories/val/data", V2X_SEQ_MODALITIES).map(|l| l.name),
            Some("cooperative")
        );
        assert!(modality_from_table("other/train", V2X_TRAJ_MODALITIES).is_none());
    }

    #[test]
    fn test_discovery_groups_by_stem() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        write_traj(root, "ego-trajectories", "train", "10", "yizhuang#4-1")?;
        write_traj(root, "infrastructure-trajectories", "train", "10", "yizhuang#4-1")?;
        write_traj(root, "ego-trajectories", "train", "9", "yizhuang#2-1")?;
        write_traj(root, "ego-trajectories", "val", "abc", "yizhuang#4-1")?;
        // wrong kind in a trajectory tree is ignored
        let tl = root.join("vehicle-trajectories/train/data");
        fs::create_dir_all(&tl)?;
        fs::write(tl.join("10.csv"), "timestamp,lane_id,color_1,remain_1\n1.0,3,RED,2\n")?;

        let spec = DatasetSpec::new("v2x", Family::V2xTraj, root);
        let index = build_index(&spec, V2X_TRAJ_MODALITIES)?;

        let train = index.catalog.list_scenes("train", None, 10, 0);
        let ids: Vec<&str> = train.items.iter().map(|s| s.scene_id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10"]);
        let s10 = &train.items[1];
        assert_eq!(s10.group_label.as_deref(), Some("Intersection 04"));
        assert_eq!(s10.by_modality.len(), 2);
        assert_eq!(s10.by_modality["ego"].rows, 2);
        assert_eq!(s10.by_modality["ego"].unique_agents, Some(1));

        let files = index.files("train", "10").unwrap();
        assert!(files.contains_key("infra"));
        assert!(!files.contains_key("vehicle"));
        assert_eq!(index.catalog.list_scenes("val", None, 10, 0).total, 1);

        // rebuilding yields the same ids
        let again = build_index(&spec, V2X_TRAJ_MODALITIES)?;
        assert_eq!(again.catalog.list_scenes("train", None, 10, 0), train);
        Ok(())
    }

    #[test]
    fn test_repeated_discovery_is_deterministic() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        for id in ["10", "2", "33", "7", "abc", "1"] {
            write_traj(root, "ego-trajectories", "train", id, "yizhuang#4-1")?;
            write_traj(root, "vehicle-trajectories", "train", id, "yizhuang#4-1")?;
        }
        let spec = DatasetSpec::new("v2x", Family::V2xTraj, root);

        let first = build_index(&spec, V2X_TRAJ_MODALITIES)?.catalog.list_scenes("train", None, 100, 0);
        let ids: Vec<&str> = first.items.iter().map(|s| s.scene_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "7", "10", "33", "abc"]);
        for _ in 0..4 {
            let again = build_index(&spec, V2X_TRAJ_MODALITIES)?.catalog.list_scenes("train", None, 100, 0);
            assert_eq!(again, first);
        }
        Ok(())
    }

    #[test]
    fn test_scene_table_is_preferred() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        fs::write(
            root.join("scenes.csv"),
            "table,scene_id,rows,min_ts,max_ts,unique_ts,duration_s,unique_agents,intersect_id,city\n\
             ego-trajectories/train/data,7,12,1.0,2.0,11,1.0,3,yizhuang#4-1,PEK\n\
             traffic-light/train/data,7,4,1.0,2.0,4,1.0,,yizhuang#4-1,PEK\n\
             weird/train/data,7,1,,,,,,,\n\
             ego-trajectories/unknown/data,8,1,,,,,,,\n",
        )?;
        let spec = DatasetSpec::new("v2x", Family::V2xTraj, root);
        let index = build_index(&spec, V2X_TRAJ_MODALITIES)?;

        assert_eq!(index.catalog.total_scenes(), 1);
        let scene = index.catalog.get("train", "7").unwrap();
        assert_eq!(scene.by_modality["traffic_light"].unique_agents, None);
        assert_eq!(scene.by_modality["ego"].unique_agents, Some(3));
        assert_eq!(scene.city.as_deref(), Some("PEK"));
        let files = index.files("train", "7").unwrap();
        assert_eq!(files["ego"], root.join("ego-trajectories/train/data/7.csv"));
        Ok(())
    }

    #[test]
    fn test_empty_dataset_is_error() {
        let dir = tempdir().unwrap();
        let spec = DatasetSpec::new("v2x", Family::V2xTraj, dir.path());
        assert!(matches!(build_index(&spec, V2X_TRAJ_MODALITIES), Err(IndexError::NoScenes(_))));
    }

    #[test]
    fn test_index_row_paths() {
        let entry = TableEntry {
            modality: "ego",
            split: "train".into(),
            scene_id: "1".into(),
            path: PathBuf::from("/r/ego-trajectories/train/data/1.csv"),
            stats: ModalityStats::default(),
            city: None,
            group_id: Some("yizhuang#4-1".into()),
            group_variants: 1,
        };
        let row = entry.to_index_row(Path::new("/r"), &V2X_TRAJ_MODALITIES[0]);
        assert_eq!(row.table, "ego-trajectories/train/data");
        assert_eq!(row.file, "ego-trajectories/train/data/1.csv");
        assert_eq!(row.intersect_label.as_deref(), Some("Intersection 04"));
    }
}
