//! Adapter for roadside CPM object logs.
//!
//! Each log file (or each physical sensor inside a multiplexed log) is a
//! group; its scenes are gap-aware time windows found in one forward scan.
//! Coordinates are local to the sensor and there is no vector map.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use super::bundle::{ensure_extent, fill_frames, zero_stats, LOCAL_FALLBACK_EXTENT};
use super::{AdapterError, Result, SceneBundle};
use crate::config::{roles, DatasetSpec, WindowDefaults};
use crate::core::loaders::{ModalityStats, ModalityTable, ObjectRecord, Record, TickScale};
use crate::core::schema::decode_text;
use crate::indexing::catalog::ALL_SPLIT;
use crate::indexing::windowing::{parse_ms, read_window_bytes, scan_log, LogLayout, TimeWindow, WindowPolicy};
use crate::indexing::{dense_ids, GroupOrder, IndexError, SceneCatalog, SceneSummary};

/// File-name suffix of object logs.
pub const LOG_SUFFIX: &str = "cpm-objects.csv";

/// The single modality of an object log.
pub const MODALITY: &str = "infra";

/// Modalities other families carry, reported empty here.
const ABSENT_MODALITIES: [&str; 3] = ["ego", "vehicle", "traffic_light"];

const CLASSES: [(&str, &str); 22] = [
    ("VEHICLE", "UNKNOWN"),
    ("VEHICLE", "MOPED"),
    ("VEHICLE", "MOTORCYCLE"),
    ("VEHICLE", "CAR"),
    ("VEHICLE", "BUS"),
    ("VEHICLE", "LIGHT_TRUCK"),
    ("VEHICLE", "HEAVY_TRUCK"),
    ("VEHICLE", "TRAILER"),
    ("VEHICLE", "SPECIAL_VEHICLE"),
    ("VEHICLE", "TRAM"),
    ("VEHICLE", "EMERGENCY_VEHICLE"),
    ("VEHICLE", "AGRICULTURAL"),
    ("PEDESTRIAN", "PERSON_UNKNOWN"),
    ("PEDESTRIAN", "PEDESTRIAN"),
    ("PEDESTRIAN", "WHEELCHAIR"),
    ("BICYCLE", "CYCLIST"),
    ("PEDESTRIAN", "STROLLER"),
    ("PEDESTRIAN", "SKATES"),
    ("PEDESTRIAN", "PERSON_GROUP"),
    ("ANIMAL", "ANIMAL"),
    ("OTHER", "OTHER_UNKNOWN"),
    ("RSU", "ROADSIDE_UNIT"),
];

/// Coarse type and sub-type of a classification code.
pub fn decode_class(code: Option<i64>) -> (String, Option<String>) {
    match code.and_then(|c| usize::try_from(c).ok()).and_then(|c| CLASSES.get(c)) {
        Some((t, s)) => (t.to_string(), Some(s.to_string())),
        None => ("UNKNOWN".to_string(), None),
    }
}

/// Sensor id from a log path relative to the dataset root.
pub fn sensor_id_from_rel(rel: &Path) -> String {
    let s = rel.to_string_lossy().replace('\\', "/");
    let s = if s.to_ascii_lowercase().ends_with(".csv") {
        &s[..s.len() - 4]
    } else {
        s.as_str()
    };
    s.replace('/', "__")
}

fn thermal_stem() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})-.+$").unwrap())
}

/// Display label for a log from its relative path.
pub fn sensor_label_from_rel(rel: &Path) -> String {
    let s = rel.to_string_lossy().replace('\\', "/");
    let parts: Vec<&str> = s.split('/').collect();
    let stem = rel
        .file_stem()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_default();
    match parts.first().copied() {
        Some("lidar") => format!("LiDAR {}", parts.get(1).filter(|_| parts.len() > 2).unwrap_or(&"RSU")),
        Some("thermal_camera") => match thermal_stem().captures(&stem) {
            Some(c) => format!("Thermal camera ({}-{}-{})", &c[1], &c[2], &c[3]),
            None => "Thermal camera".to_string(),
        },
        _ => stem,
    }
}

fn clock_label(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|d| d.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "window".to_string())
}

/// `Scene N · HH:MM:SS–HH:MM:SS` in UTC.
pub fn scene_label(scene_id: &str, window: &TimeWindow) -> String {
    format!(
        "Scene {} · {}–{}",
        scene_id,
        clock_label(window.first_ms),
        clock_label(window.last_ms)
    )
}

/// Window policy from the dataset strategy, falling back to defaults.
pub fn policy_for(spec: &DatasetSpec, defaults: &WindowDefaults) -> WindowPolicy {
    let s = &spec.scene_strategy;
    WindowPolicy::from_seconds(
        s.window_s.unwrap_or(defaults.cpm_window_s),
        s.gap_s.unwrap_or(defaults.cpm_gap_s),
        s.bin_ms.unwrap_or(defaults.cpm_bin_ms),
    )
}

fn is_log(p: &Path) -> bool {
    p.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_ascii_lowercase().ends_with(LOG_SUFFIX))
}

fn walk_logs(dir: &Path, out: &mut Vec<PathBuf>) {
    out.extend(
        WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_log(p)),
    );
}

/// Object logs of the dataset: bound paths when given, else every
/// `*cpm-objects.csv` below the root.
pub fn discover_logs(spec: &DatasetSpec) -> Vec<PathBuf> {
    let mut out = Vec::new();
    match spec.binding(roles::CPM_LOGS) {
        Some(b) => {
            for p in b.path.iter().chain(&b.paths) {
                if p.is_dir() {
                    walk_logs(p, &mut out);
                } else if p.is_file() {
                    out.push(p.clone());
                }
            }
        }
        None => walk_logs(&spec.root, &mut out),
    }
    out.sort();
    out.dedup();
    out
}

/// One windowed sensor stream.
#[derive(Debug, Clone)]
struct SensorIndex {
    sensor_id: String,
    label: String,
    path: PathBuf,
    layout: LogLayout,
    /// Value of the sensor column for multiplexed logs
    sensor_value: Option<String>,
    windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Copy)]
struct SceneRef {
    sensor: usize,
    window: usize,
}

/// Object-log dataset.
pub struct CpmAdapter {
    spec: DatasetSpec,
    policy: WindowPolicy,
    sensors: Vec<SensorIndex>,
    scenes: HashMap<String, SceneRef>,
    catalog: SceneCatalog,
}

fn index_log(spec: &DatasetSpec, path: &Path, policy: WindowPolicy) -> crate::indexing::Result<Vec<SensorIndex>> {
    let overrides = spec
        .binding(roles::CPM_LOGS)
        .map(|b| b.column_map.clone())
        .unwrap_or_default();
    let layout = LogLayout::detect(path, &overrides)?;
    let scan = scan_log(path, &layout, policy)?;
    debug!(
        "{}: {} rows, {} streams, {} skipped",
        path.display(),
        scan.rows,
        scan.streams.len(),
        scan.skipped
    );

    let rel = path
        .strip_prefix(&spec.root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()));
    let base_id = sensor_id_from_rel(&rel);
    let base_label = sensor_label_from_rel(&rel);

    Ok(scan
        .streams
        .into_iter()
        .map(|stream| {
            let (sensor_id, label) = match &stream.sensor {
                Some(s) => (format!("{base_id}__{s}"), format!("{base_label} · {s}")),
                None => (base_id.clone(), base_label.clone()),
            };
            SensorIndex {
                sensor_id,
                label,
                path: path.to_path_buf(),
                layout: layout.clone(),
                sensor_value: stream.sensor,
                windows: stream.windows,
            }
        })
        .collect())
}

fn window_stats(w: &TimeWindow) -> ModalityStats {
    let min_ts = w.first_ms as f64 / 1000.0;
    let max_ts = w.last_ms as f64 / 1000.0;
    ModalityStats {
        rows: w.rows,
        min_ts: Some(min_ts),
        max_ts: Some(max_ts),
        unique_ts: w.frames,
        duration_s: Some((max_ts - min_ts).max(0.0)),
        unique_agents: None,
    }
}

impl CpmAdapter {
    /// Scans every log once and indexes its windows.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NoScenes`] when no log yields a window.
    pub fn build(spec: DatasetSpec, defaults: &WindowDefaults) -> Result<Self> {
        let started = Instant::now();
        let policy = policy_for(&spec, defaults);
        let logs = discover_logs(&spec);

        let mut sensors: Vec<SensorIndex> = logs
            .par_iter()
            .filter_map(|p| match index_log(&spec, p, policy) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("{}: skipping {}: {}", spec.id, p.display(), e);
                    None
                }
            })
            .flatten()
            .collect();
        sensors.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));

        let mut flat: Vec<(usize, i64, usize)> = sensors
            .iter()
            .enumerate()
            .flat_map(|(si, s)| s.windows.iter().enumerate().map(move |(wi, w)| (si, w.first_ms, wi)))
            .collect();
        flat.sort_unstable();

        let mut summaries = Vec::with_capacity(flat.len());
        let mut scenes = HashMap::with_capacity(flat.len());
        for ((si, _, wi), scene_id) in flat.into_iter().zip(dense_ids(usize::MAX)) {
            let sensor = &sensors[si];
            let window = &sensor.windows[wi];
            let mut by_modality = BTreeMap::new();
            by_modality.insert(MODALITY.to_string(), window_stats(window));
            summaries.push(SceneSummary {
                scene_label: Some(scene_label(&scene_id, window)),
                split: ALL_SPLIT.to_string(),
                city: None,
                group_id: Some(sensor.sensor_id.clone()),
                group_label: Some(sensor.label.clone()),
                by_modality,
                scene_id: scene_id.clone(),
            });
            scenes.insert(scene_id, SceneRef { sensor: si, window: wi });
        }

        if summaries.is_empty() {
            return Err(AdapterError::Index(IndexError::NoScenes(spec.root.clone())));
        }
        info!(
            "{}: indexed {} logs into {} sensors and {} scenes in {:.2?}",
            spec.id,
            logs.len(),
            sensors.len(),
            summaries.len(),
            started.elapsed()
        );
        Ok(Self {
            catalog: SceneCatalog::single(summaries, GroupOrder::CountThenLabel),
            spec,
            policy,
            sensors,
            scenes,
        })
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    pub fn catalog(&self) -> &SceneCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    fn parse_window(&self, sensor: &SensorIndex, bytes: &[u8]) -> ModalityTable {
        let layout = &sensor.layout;
        let mut text = layout
            .headers
            .iter()
            .map(|h| {
                if h.contains(layout.delimiter as char) || h.contains('"') {
                    format!("\"{}\"", h.replace('"', "\"\""))
                } else {
                    h.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(&(layout.delimiter as char).to_string());
        text.push('\n');
        text.push_str(&decode_text(bytes, layout.encoding));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(layout.delimiter)
            .from_reader(text.as_bytes());
        let fields = &layout.fields;

        let mut table = ModalityTable::new(true);
        for record in reader.records().flatten() {
            if let Some(want) = &sensor.sensor_value {
                if fields.value(&record, "sensorID") != Some(want.as_str()) {
                    continue;
                }
            }
            let Some(ts) = fields.value(&record, "generationTime_ms").and_then(parse_ms) else {
                continue;
            };
            let code = fields.int(&record, "classificationType");
            let (object_type, sub_type) = decode_class(code);
            // north/east offsets to x=east, y=north; yaw clockwise from north
            let rec = ObjectRecord {
                id: fields
                    .string(&record, "objectID")
                    .or_else(|| fields.string(&record, "trackID")),
                object_type: Some(object_type),
                sub_type,
                sub_type_code: code,
                tag: Some(sensor.sensor_id.clone()),
                x: fields.float(&record, "yDistance_m"),
                y: fields.float(&record, "xDistance_m"),
                z: None,
                length: fields.float(&record, "objLength_m"),
                width: fields.float(&record, "objWidth_m"),
                height: fields.float(&record, "objHeight_m"),
                theta: fields
                    .float(&record, "yawAngle_deg")
                    .map(|yaw| (90.0 - yaw).to_radians()),
                v_x: fields.float(&record, "ySpeed_mps"),
                v_y: fields.float(&record, "xSpeed_mps"),
            };
            table.push(self.policy.bucket(ts), Record::Object(rec));
        }
        table
    }

    /// Materializes one window, reading only its byte range.
    ///
    /// Logs have a single split, so `_split` is not consulted.
    pub fn load_scene_bundle(&self, _split: &str, scene_id: &str) -> Result<SceneBundle> {
        let r = self
            .scenes
            .get(scene_id)
            .copied()
            .ok_or_else(|| AdapterError::SceneNotFound(scene_id.to_string()))?;
        let sensor = &self.sensors[r.sensor];
        let window = &sensor.windows[r.window];

        let mut bundle = SceneBundle::new(&self.spec.id, ALL_SPLIT, scene_id);
        bundle.scene_label = Some(scene_label(scene_id, window));
        bundle.group_id = Some(sensor.sensor_id.clone());
        bundle.group_label = Some(sensor.label.clone());
        bundle
            .group_by_modality
            .insert(MODALITY.to_string(), Some(sensor.sensor_id.clone()));

        let table = match read_window_bytes(&sensor.path, window) {
            Ok(bytes) => self.parse_window(sensor, &bytes),
            Err(e) => {
                warn!("{}: window read failed for scene {}: {}", self.spec.id, scene_id, e);
                bundle.warnings.push(format!("window_read_failed: {e}"));
                ModalityTable::default()
            }
        };
        fill_frames(&mut bundle, &[(MODALITY, &table)], TickScale::Milliseconds);
        zero_stats(&mut bundle, &ABSENT_MODALITIES);
        ensure_extent(&mut bundle, LOCAL_FALLBACK_EXTENT);
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "generationTime_ms,trackID,objectID,xDistance_m,yDistance_m,xSpeed_mps,ySpeed_mps,yawAngle_deg,classificationType,objLength_m,objWidth_m,objHeight_m";

    fn write_log(path: &Path, times: &[i64]) -> std::io::Result<()> {
        fs::create_dir_all(path.parent().unwrap())?;
        let mut text = format!("{HEADER}\n");
        for (i, t) in times.iter().enumerate() {
            text.push_str(&format!("{t},{i},{i},10.0,2.0,1.0,0.0,90,3,4.5,1.8,1.5\n"));
        }
        fs::write(path, text)
    }

    #[test]
    fn test_labels_and_ids() {
        let rel = Path::new("lidar/RSU_2/2024-05-01_cpm-objects.csv");
        assert_eq!(sensor_id_from_rel(rel), "lidar__RSU_2__2024-05-01_cpm-objects");
        assert_eq!(sensor_label_from_rel(rel), "LiDAR RSU_2");
        assert_eq!(
            sensor_label_from_rel(Path::new("thermal_camera/20240501-cpm-objects.csv")),
            "Thermal camera (2024-05-01)"
        );
        assert_eq!(sensor_label_from_rel(Path::new("x_cpm-objects.csv")), "x_cpm-objects");

        assert_eq!(decode_class(Some(15)), ("BICYCLE".to_string(), Some("CYCLIST".to_string())));
        assert_eq!(decode_class(Some(21)).0, "RSU");
        assert_eq!(decode_class(Some(22)), ("UNKNOWN".to_string(), None));
        assert_eq!(decode_class(None).0, "UNKNOWN");

        let w = TimeWindow {
            start_ms: 0,
            end_ms: 0,
            first_ms: 3_600_000,
            last_ms: 3_661_000,
            offset_start: 0,
            offset_end: 0,
            rows: 0,
            frames: 0,
        };
        assert_eq!(scene_label("4", &w), "Scene 4 · 01:00:00–01:01:01");
    }

    #[test]
    fn test_windows_become_scenes() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_log(&root.join("lidar/RSU_1/a_cpm-objects.csv"), &[0, 100, 200, 50_000, 50_100]).unwrap();
        write_log(&root.join("lidar/RSU_2/b_cpm-objects.csv"), &[1_000]).unwrap();

        let mut spec = DatasetSpec::new("cpm", Family::CpmObjects, root);
        spec.scene_strategy.gap_s = Some(1.0);
        let adapter = CpmAdapter::build(spec, &WindowDefaults::default()).unwrap();

        let groups = adapter.catalog().list_groups("all");
        assert_eq!(groups[0].group_label.as_deref(), Some("LiDAR RSU_1"));
        assert_eq!(groups[0].count, 2);

        let bundle = adapter.load_scene_bundle("train", "2").unwrap();
        assert_eq!(bundle.split, "all");
        assert_eq!(bundle.frames.len(), 2);
        assert_eq!(bundle.timestamps, vec![50.0, 50.1]);
        let Record::Object(o) = &bundle.frames[0].modalities["infra"][0] else {
            panic!("expected object record");
        };
        assert_eq!((o.x, o.y), (Some(2.0), Some(10.0)));
        assert_eq!(o.theta, Some(0.0));
        assert_eq!(o.object_type.as_deref(), Some("VEHICLE"));
        assert_eq!(bundle.modality_stats["ego"].rows, 0);
        assert_eq!(bundle.modality_stats["infra"].unique_agents, Some(2));

        let first = adapter.load_scene_bundle("all", "1").unwrap();
        assert_eq!(first.frames.len(), 3);
        assert!(matches!(adapter.load_scene_bundle("all", "9"), Err(AdapterError::SceneNotFound(_))));
    }

    #[test]
    fn test_multiplexed_log_splits_by_sensor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site_cpm-objects.csv");
        fs::write(
            &path,
            format!(
                "{HEADER},sensorID\n\
                 0,1,1,1,1,0,0,0,3,4,2,1,A\n\
                 0,2,2,5,5,0,0,0,13,1,1,2,B\n\
                 100,1,1,1,2,0,0,0,3,4,2,1,A\n"
            ),
        )
        .unwrap();
        let spec = DatasetSpec::new("cpm", Family::CpmObjects, dir.path());
        let adapter = CpmAdapter::build(spec, &WindowDefaults::default()).unwrap();

        let groups = adapter.catalog().list_groups("all");
        assert_eq!(groups.len(), 2);
        let ids: Vec<&str> = groups.iter().map(|g| g.group_id.as_str()).collect();
        assert!(ids.contains(&"site_cpm-objects__A"));

        let a = adapter.load_scene_bundle("all", "1").unwrap();
        assert_eq!(a.group_id.as_deref(), Some("site_cpm-objects__A"));
        assert_eq!(a.record_count(), 2);
    }
}
