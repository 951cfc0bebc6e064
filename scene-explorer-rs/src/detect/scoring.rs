//! Confidence scores for candidate dataset layouts.
//!
//! Every scorer returns a value in `0..=100` together with the evidence it
//! was derived from. Scores combine required-column presence, the share of
//! sampled rows that parse, directory layout and volume.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use log::debug;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::core::schema::{
    normalize_column, read_header, sample_csv, FieldMap, TextEncoding, CPM_FIELDS, SCENE_INDEX_FIELDS,
    TRAFFIC_LIGHT_FIELDS, TRAJECTORY_FIELDS,
};
use crate::indexing::recording::discover_recordings;
use crate::indexing::scenario::{find_signal_table, is_scenario_dir, PEDESTRIAN_TRACKS, VEHICLE_TRACKS};

/// Parents searched above each selected path.
pub const ROOT_PARENT_DEPTH: usize = 4;

/// Root candidates searched per detection.
pub const MAX_ROOT_CANDIDATES: usize = 80;

/// Rows sampled from a scene-index table.
pub const SCENE_TABLE_SAMPLE_ROWS: usize = 300;

/// Below this a directory's layout quality does not count as a match.
pub const MIN_DIR_QUALITY: f64 = 50.0;

#[inline]
pub fn clamp_score(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn is_csv(p: &Path) -> bool {
    p.extension()
        .and_then(|x| x.to_str())
        .is_some_and(|x| x.eq_ignore_ascii_case("csv"))
}

fn is_hidden(p: &Path) -> bool {
    p.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// `p` followed by up to `depth` ancestors.
pub fn parent_chain(p: &Path, depth: usize) -> Vec<PathBuf> {
    p.ancestors().take(depth + 1).map(Path::to_path_buf).collect()
}

/// Deduplicated parent chains of `paths`, in search order, capped at `max`.
pub fn candidate_roots(paths: &[PathBuf], depth: usize, max: usize) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .flat_map(|p| parent_chain(p, depth))
        .filter(|p| seen.insert(p.clone()))
        .take(max)
        .collect()
}

/// Longest common directory of `paths` (files count by their parent).
pub fn common_root(paths: &[PathBuf]) -> Option<PathBuf> {
    let dir_of = |p: &PathBuf| -> PathBuf {
        if p.is_file() {
            p.parent().map(Path::to_path_buf).unwrap_or_else(|| p.clone())
        } else {
            p.clone()
        }
    };
    let mut iter = paths.iter().map(dir_of);
    let mut common = iter.next()?;
    for p in iter {
        while !p.starts_with(&common) {
            match common.parent() {
                Some(parent) => common = parent.to_path_buf(),
                None => break,
            }
        }
    }
    Some(common)
}

/// Up to `max` items spread evenly over `items`, first and last included.
pub fn uniform_sample<T: Clone>(items: &[T], max: usize) -> Vec<T> {
    if max == 0 || items.len() <= max {
        return items.to_vec();
    }
    if max == 1 {
        return items[..1].to_vec();
    }
    let last = items.len() - 1;
    let step = last as f64 / (max - 1) as f64;
    let mut used = BTreeSet::new();
    (0..max)
        .map(|i| ((i as f64 * step).round() as usize).min(last))
        .filter(|idx| used.insert(*idx))
        .map(|idx| items[idx].clone())
        .collect()
}

/// CSV files named or contained (recursively) by `paths`, sorted per
/// directory and capped at `max_files`.
pub fn collect_csv_files(paths: &[PathBuf], max_files: usize) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for p in paths {
        if out.len() >= max_files {
            break;
        }
        if p.is_file() {
            if is_csv(p) && seen.insert(p.clone()) {
                out.push(p.clone());
            }
            continue;
        }
        if !p.is_dir() {
            continue;
        }
        let walker = WalkDir::new(p)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(|e| e.ok());
        for entry in walker {
            if out.len() >= max_files {
                break;
            }
            if entry.file_type().is_file() && is_csv(entry.path()) && seen.insert(entry.path().to_path_buf()) {
                out.push(entry.into_path());
            }
        }
    }
    out
}

/// CPM log candidates: `lidar/` and `thermal_camera/` below a selected
/// directory are searched instead of the directory itself when present.
pub fn collect_cpm_logs(paths: &[PathBuf], max_files: usize) -> Vec<PathBuf> {
    let mut search = Vec::new();
    for p in paths {
        if p.is_dir() {
            let preferred: Vec<PathBuf> = ["lidar", "thermal_camera"]
                .iter()
                .map(|d| p.join(d))
                .filter(|d| d.is_dir())
                .collect();
            if preferred.is_empty() {
                search.push(p.clone());
            } else {
                search.extend(preferred);
            }
        } else {
            search.push(p.clone());
        }
    }
    collect_csv_files(&search, max_files)
}

/// First `.proto` file named by or found below `paths`.
pub fn find_proto_schema(paths: &[PathBuf]) -> Option<PathBuf> {
    let is_proto = |p: &Path| {
        p.extension()
            .and_then(|x| x.to_str())
            .is_some_and(|x| x.eq_ignore_ascii_case("proto"))
    };
    for p in paths {
        if p.is_file() && is_proto(p) {
            return Some(p.clone());
        }
        if p.is_dir() {
            let found = WalkDir::new(p)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .find(|e| e.file_type().is_file() && is_proto(e.path()));
            if let Some(e) = found {
                return Some(e.into_path());
            }
        }
    }
    None
}

/// Evidence that a CSV file is a roadside object log.
#[derive(Debug, Clone)]
pub struct LogScore {
    pub path: PathBuf,
    pub score: f64,
    pub delimiter: u8,
    pub encoding: TextEncoding,
    pub column_map: BTreeMap<String, String>,
    pub sampled_rows: usize,
    pub ts_ratio: f64,
    pub xy_ratio: f64,
}

impl LogScore {
    fn unreadable(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            score: 0.0,
            delimiter: b',',
            encoding: TextEncoding::Utf8,
            column_map: BTreeMap::new(),
            sampled_rows: 0,
            ts_ratio: 0.0,
            xy_ratio: 0.0,
        }
    }
}

/// Scores a CSV file as a CPM object log.
pub fn score_cpm_log(path: &Path, overrides: &BTreeMap<String, String>, sample_rows: usize) -> LogScore {
    let sample = match sample_csv(path, sample_rows) {
        Ok(s) => s,
        Err(e) => {
            debug!("{}: not scored: {}", path.display(), e);
            return LogScore::unreadable(path);
        }
    };
    let fields = FieldMap::resolve(&sample.headers, CPM_FIELDS, overrides);

    let mut score = 0.0;
    if fields.has("generationTime_ms") {
        score += 40.0;
    }
    if fields.has("xDistance_m") {
        score += 20.0;
    }
    if fields.has("yDistance_m") {
        score += 20.0;
    }
    if fields.has("objectID") || fields.has("trackID") {
        score += 5.0;
    }
    if fields.has("classificationType") {
        score += 5.0;
    }
    if fields.has_all(&["xSpeed_mps", "ySpeed_mps"]) {
        score += 5.0;
    }
    if fields.has("yawAngle_deg") {
        score += 3.0;
    }
    if ["objLength_m", "objWidth_m", "objHeight_m"].iter().any(|f| fields.has(f)) {
        score += 2.0;
    }

    let total = sample.rows.len();
    let (mut ts_ok, mut xy_ok) = (0usize, 0usize);
    for row in &sample.rows {
        if fields.float(row, "generationTime_ms").is_some() {
            ts_ok += 1;
        }
        if fields.float(row, "xDistance_m").is_some() && fields.float(row, "yDistance_m").is_some() {
            xy_ok += 1;
        }
    }
    let ratio = |n: usize| if total > 0 { n as f64 / total as f64 } else { 0.0 };
    let (ts_ratio, xy_ratio) = (ratio(ts_ok), ratio(xy_ok));
    if total > 0 {
        if ts_ratio >= 0.9 {
            score += 10.0;
        }
        if xy_ratio >= 0.8 {
            score += 10.0;
        }
        if ts_ratio.max(xy_ratio) < 0.3 {
            score -= 30.0;
        }
    }

    LogScore {
        path: path.to_path_buf(),
        score: clamp_score(score),
        delimiter: sample.delimiter,
        encoding: sample.encoding,
        column_map: fields.column_names(),
        sampled_rows: total,
        ts_ratio,
        xy_ratio,
    }
}

/// Scores a uniform sample of at most `max_scored` logs in parallel, best
/// first. Ties keep path order.
pub fn score_cpm_logs(
    logs: &[PathBuf],
    overrides: &BTreeMap<String, String>,
    sample_rows: usize,
    max_scored: usize,
) -> Vec<LogScore> {
    let mut scores: Vec<LogScore> = uniform_sample(logs, max_scored)
        .par_iter()
        .map(|p| score_cpm_log(p, overrides, sample_rows))
        .collect();
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}

/// Evidence that a CSV file is a precomputed scene-index table.
#[derive(Debug, Clone, Default)]
pub struct SceneTableScore {
    pub path: PathBuf,
    pub score: f64,
    pub rows: usize,
    /// Distinct `table` values seen in the sample
    pub tables: Vec<String>,
}

const V2X_TRAJECTORY_DIRS: [&str; 3] = [
    "ego-trajectories/",
    "infrastructure-trajectories/",
    "vehicle-trajectories/",
];

/// Scores a CSV file as a scene-index table.
pub fn score_scene_table(path: &Path) -> SceneTableScore {
    let sample = match sample_csv(path, SCENE_TABLE_SAMPLE_ROWS) {
        Ok(s) => s,
        Err(_) => {
            return SceneTableScore {
                path: path.to_path_buf(),
                ..Default::default()
            }
        }
    };
    let fields = FieldMap::from_headers(&sample.headers, SCENE_INDEX_FIELDS);

    let mut score = 0.0;
    if fields.has_all(&["table", "scene_id", "file"]) {
        score += 30.0;
    }
    if fields.has("intersect_id") {
        score += 10.0;
    }
    if fields.has("city") {
        score += 5.0;
    }

    let total = sample.rows.len();
    let mut row_ok = 0usize;
    let mut tables = BTreeSet::new();
    let (mut split_hits, mut modality_hits, mut light_hits) = (0usize, 0usize, 0usize);
    for row in &sample.rows {
        let table = fields.value(row, "table");
        if table.is_some() && fields.value(row, "scene_id").is_some() {
            row_ok += 1;
        }
        let Some(table) = table else { continue };
        let low = table.to_ascii_lowercase();
        if low.contains("/train/") || low.contains("/val/") {
            split_hits += 1;
        }
        if V2X_TRAJECTORY_DIRS.iter().any(|d| low.contains(d)) {
            modality_hits += 1;
        }
        if low.contains("traffic-light/") {
            light_hits += 1;
        }
        tables.insert(table.to_string());
    }

    if total > 0 {
        let ok_ratio = row_ok as f64 / total as f64;
        if ok_ratio >= 0.9 {
            score += 10.0;
        } else if ok_ratio < 0.5 {
            score -= 25.0;
        }
    }
    if split_hits > 0 {
        score += 10.0;
    }
    if modality_hits > 0 {
        score += 15.0;
    }
    if light_hits > 0 {
        score += 5.0;
    }

    SceneTableScore {
        path: path.to_path_buf(),
        score: clamp_score(score),
        rows: total,
        tables: tables.into_iter().take(200).collect(),
    }
}

/// Role directory prefixes implied by sampled scene-table entries, e.g.
/// `V2X-Traj/ego-trajectories` for `V2X-Traj/ego-trajectories/train/data/1.csv`.
pub fn role_prefixes(tables: &[String]) -> BTreeMap<&'static str, String> {
    use crate::config::roles;

    let mut out = BTreeMap::new();
    for t in tables {
        let low = t.to_ascii_lowercase();
        let cut = ["/train/", "/val/", "/test/"]
            .iter()
            .filter_map(|s| low.find(s))
            .find(|&i| i > 0);
        let prefix = cut.map_or(t.as_str(), |i| &t[..i]).trim().trim_matches('/');
        if prefix.is_empty() {
            continue;
        }
        let role = if low.contains("ego") && low.contains("traj") {
            roles::TRAJ_EGO
        } else if low.contains("infrastructure") && low.contains("traj") {
            roles::TRAJ_INFRA
        } else if low.contains("vehicle") && low.contains("traj") {
            roles::TRAJ_VEHICLE
        } else if low.contains("traffic-light") || low.contains("traffic_light") {
            roles::TRAFFIC_LIGHT
        } else {
            continue;
        };
        out.insert(role, prefix.to_string());
    }
    out
}

fn first_csv_below(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && is_csv(e.path()))
        .map(|e| e.into_path())
}

/// Layout quality of a trajectory directory, judged by its first CSV.
pub fn score_trajectory_dir(dir: &Path) -> f64 {
    let Some(csv) = first_csv_below(dir) else {
        return 0.0;
    };
    let fields = FieldMap::from_headers(&read_header(&csv), TRAJECTORY_FIELDS);
    if fields.has_all(&["timestamp", "x", "y"]) {
        100.0
    } else if fields.has("timestamp") && (fields.has("x") || fields.has("y")) {
        55.0
    } else {
        20.0
    }
}

/// Layout quality of a traffic-light directory, judged by its first CSV.
pub fn score_signal_dir(dir: &Path) -> f64 {
    let Some(csv) = first_csv_below(dir) else {
        return 0.0;
    };
    let fields = FieldMap::from_headers(&read_header(&csv), TRAFFIC_LIGHT_FIELDS);
    if fields.has_all(&["timestamp", "lane_id", "color_1", "remain_1"]) {
        100.0
    } else if fields.has("timestamp") && (fields.has("lane_id") || fields.has("color_1")) {
        55.0
    } else {
        20.0
    }
}

/// Best directory among `candidates` under `scorer`, with its quality.
fn pick_best(candidates: &[PathBuf], scorer: fn(&Path) -> f64) -> Option<(PathBuf, f64)> {
    let mut best: Option<(PathBuf, f64)> = None;
    for c in candidates.iter().filter(|c| c.is_dir()) {
        let q = scorer(c);
        if best.as_ref().map_or(true, |(_, b)| q > *b) {
            best = Some((c.clone(), q));
        }
    }
    best.filter(|(_, q)| *q >= MIN_DIR_QUALITY)
}

/// Role directories inferred for a sequence dataset.
#[derive(Debug, Clone, Default)]
pub struct SequenceInference {
    pub root: Option<PathBuf>,
    /// role → (directory, layout quality)
    pub bindings: BTreeMap<&'static str, (PathBuf, f64)>,
    pub score: f64,
}

impl SequenceInference {
    pub fn has_trajectories(&self) -> bool {
        use crate::config::roles;
        [roles::TRAJ_COOPERATIVE, roles::TRAJ_INFRA, roles::TRAJ_VEHICLE]
            .iter()
            .any(|r| self.bindings.contains_key(r))
    }
}

/// Infers sequence-dataset role directories from the selected paths and
/// their parents. Folder roles are confirmed by header checks, so copies
/// with swapped folder names still bind correctly.
pub fn infer_sequence_layout(paths: &[PathBuf]) -> SequenceInference {
    use crate::config::roles;

    let mut best = SequenceInference::default();
    let mut best_score = -1.0;
    for root in candidate_roots(paths, ROOT_PARENT_DEPTH, MAX_ROOT_CANDIDATES) {
        let coop = root.join("cooperative-vehicle-infrastructure");
        let coop_candidates = [
            coop.join("cooperative-trajectories"),
            coop.join("infrastructure-trajectories"),
            coop.join("vehicle-trajectories"),
            coop.join("traffic-light"),
        ];
        let infra_candidates = [root.join("single-infrastructure/trajectories")];
        let vehicle_candidates = [root.join("single-vehicle/trajectories")];
        let light_candidates = [root.join("single-infrastructure/traffic-light"), coop.join("traffic-light")];
        let maps = root.join("maps");

        let found = [
            (roles::TRAJ_COOPERATIVE, pick_best(&coop_candidates, score_trajectory_dir), 36.0, 0.16),
            (roles::TRAJ_INFRA, pick_best(&infra_candidates, score_trajectory_dir), 24.0, 0.10),
            (roles::TRAJ_VEHICLE, pick_best(&vehicle_candidates, score_trajectory_dir), 24.0, 0.10),
            (roles::TRAFFIC_LIGHT, pick_best(&light_candidates, score_signal_dir), 12.0, 0.08),
        ];

        let mut score = 0.0;
        let mut bindings = BTreeMap::new();
        for (role, hit, base, weight) in found {
            if let Some((dir, q)) = hit {
                score += base + q * weight;
                bindings.insert(role, (dir, q));
            }
        }
        if maps.is_dir() {
            score += 10.0;
            bindings.insert(roles::MAPS_DIR, (maps, 100.0));
        }
        let has_traj = [roles::TRAJ_COOPERATIVE, roles::TRAJ_INFRA, roles::TRAJ_VEHICLE]
            .iter()
            .any(|r| bindings.contains_key(r));
        if !has_traj {
            score *= 0.25;
        }

        if score > best_score {
            best_score = score;
            best = SequenceInference {
                root: Some(root),
                bindings,
                score: clamp_score(score),
            };
        }
    }
    best
}

/// Evidence that a directory holds drone recordings.
#[derive(Debug, Clone, Default)]
pub struct RecordingDirScore {
    pub data_dir: PathBuf,
    pub score: f64,
    pub recordings: usize,
    pub header_ok_ratio: f64,
    pub triplet_ratio: f64,
    pub background_ratio: f64,
}

const TRACK_COLUMNS: [&str; 4] = ["trackid", "frame", "xcenter", "ycenter"];
const TRACK_META_COLUMNS: [&str; 4] = ["trackid", "initialframe", "finalframe", "class"];
const RECORDING_META_COLUMNS: [&str; 3] = ["recordingid", "locationid", "framerate"];

/// Recordings whose headers are checked.
const HEADER_SAMPLE: usize = 8;

fn header_has(path: &Path, required: &[&str]) -> bool {
    let normalized: HashSet<String> = read_header(path).iter().map(|h| normalize_column(h)).collect();
    required.iter().all(|c| normalized.contains(*c))
}

/// Scores a directory of `<prefix>_tracks.csv` recording triplets.
pub fn score_recording_dir(data_dir: &Path) -> RecordingDirScore {
    let mut out = RecordingDirScore {
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    };
    let recordings = discover_recordings(data_dir);
    if recordings.is_empty() {
        return out;
    }

    let total = recordings.len();
    let (mut triplets, mut backgrounds, mut header_ok) = (0usize, 0usize, 0usize);
    for (i, (prefix, tracks)) in recordings.iter().enumerate() {
        let tracks_meta = data_dir.join(format!("{prefix}_tracksMeta.csv"));
        let recording_meta = data_dir.join(format!("{prefix}_recordingMeta.csv"));
        let complete = tracks_meta.is_file() && recording_meta.is_file();
        if complete {
            triplets += 1;
        }
        if data_dir.join(format!("{prefix}_background.png")).is_file() {
            backgrounds += 1;
        }
        if i < HEADER_SAMPLE
            && complete
            && header_has(tracks, &TRACK_COLUMNS)
            && header_has(&tracks_meta, &TRACK_META_COLUMNS)
            && header_has(&recording_meta, &RECORDING_META_COLUMNS)
        {
            header_ok += 1;
        }
    }

    out.recordings = total;
    out.triplet_ratio = triplets as f64 / total as f64;
    out.background_ratio = backgrounds as f64 / total as f64;
    out.header_ok_ratio = header_ok as f64 / total.min(HEADER_SAMPLE) as f64;
    out.score = clamp_score(
        45.0 * out.triplet_ratio
            + 25.0 * out.header_ok_ratio
            + 10.0 * out.background_ratio
            + (total as f64 * 0.8).min(20.0),
    );
    out
}

/// Best recording root among the selected paths and their parents.
#[derive(Debug, Clone, Default)]
pub struct RecordingInference {
    pub root: Option<PathBuf>,
    pub maps_dir: Option<PathBuf>,
    pub score: f64,
    pub details: RecordingDirScore,
}

pub fn infer_recording_layout(paths: &[PathBuf]) -> RecordingInference {
    let mut best = RecordingInference::default();
    let mut best_score = -1.0;
    for root in candidate_roots(paths, ROOT_PARENT_DEPTH, MAX_ROOT_CANDIDATES) {
        let data = root.join("data");
        let data_dir = if data.is_dir() { data } else { root.clone() };
        let details = score_recording_dir(&data_dir);
        let maps = root.join("maps");
        let maps_dir = maps.is_dir().then_some(maps);
        let score = clamp_score(details.score + if maps_dir.is_some() { 5.0 } else { 0.0 });
        if score > best_score {
            best_score = score;
            best = RecordingInference {
                root: Some(root),
                maps_dir,
                score,
                details,
            };
        }
    }
    best
}

/// Evidence that a directory holds scenario folders grouped by city.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRootScore {
    pub root: PathBuf,
    pub score: f64,
    pub city_count: usize,
    pub scenario_count: usize,
    pub vehicle_ratio: f64,
    pub pedestrian_ratio: f64,
    pub signal_ratio: f64,
    pub map_city_ratio: f64,
    pub background_city_ratio: f64,
    /// Set when any city carries a lanelet map
    pub maps_dir: Option<PathBuf>,
}

fn visible_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir() && !is_hidden(p))
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

fn has_file_with_extension(dir: &Path, ext: &str) -> bool {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok()).map(|e| e.path()).any(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| x.eq_ignore_ascii_case(ext))
            })
        })
        .unwrap_or(false)
}

/// Scores `root` as a scenario dataset: either a directory of city
/// directories, or a single city directory of scenarios.
pub fn score_scenario_root(root: &Path) -> ScenarioRootScore {
    let mut out = ScenarioRootScore {
        root: root.to_path_buf(),
        ..Default::default()
    };
    let first_level = visible_subdirs(root);
    let direct: Vec<PathBuf> = first_level.iter().filter(|p| is_scenario_dir(p)).cloned().collect();
    let cities: Vec<(PathBuf, Vec<PathBuf>)> = if !direct.is_empty() {
        vec![(root.to_path_buf(), direct)]
    } else {
        first_level
            .into_iter()
            .map(|city| {
                let scenarios: Vec<PathBuf> = visible_subdirs(&city).into_iter().filter(|p| is_scenario_dir(p)).collect();
                (city, scenarios)
            })
            .filter(|(_, s)| !s.is_empty())
            .collect()
    };
    if cities.is_empty() {
        return out;
    }

    let (mut vehicles, mut pedestrians, mut signals) = (0usize, 0usize, 0usize);
    let (mut with_map, mut with_background) = (0usize, 0usize);
    for (city, scenarios) in &cities {
        out.scenario_count += scenarios.len();
        if has_file_with_extension(city, "osm") {
            with_map += 1;
        }
        if has_file_with_extension(city, "png") {
            with_background += 1;
        }
        for s in scenarios {
            vehicles += usize::from(s.join(VEHICLE_TRACKS).is_file());
            pedestrians += usize::from(s.join(PEDESTRIAN_TRACKS).is_file());
            signals += usize::from(find_signal_table(s).is_some());
        }
    }

    let n = out.scenario_count as f64;
    let c = cities.len() as f64;
    out.city_count = cities.len();
    out.vehicle_ratio = vehicles as f64 / n;
    out.pedestrian_ratio = pedestrians as f64 / n;
    out.signal_ratio = signals as f64 / n;
    out.map_city_ratio = with_map as f64 / c;
    out.background_city_ratio = with_background as f64 / c;
    out.score = clamp_score(
        35.0 * (n / 16.0).min(1.0)
            + 25.0 * out.vehicle_ratio
            + 18.0 * out.pedestrian_ratio
            + 8.0 * out.signal_ratio
            + 9.0 * out.map_city_ratio
            + 5.0 * out.background_city_ratio,
    );
    // maps live inside the city directories
    out.maps_dir = (with_map > 0).then(|| root.to_path_buf());
    out
}

/// Best scenario root among the selected paths and their parents.
pub fn infer_scenario_root(paths: &[PathBuf]) -> Option<ScenarioRootScore> {
    let mut best: Option<ScenarioRootScore> = None;
    for root in candidate_roots(paths, ROOT_PARENT_DEPTH, MAX_ROOT_CANDIDATES) {
        let scored = score_scenario_root(&root);
        if best.as_ref().map_or(true, |b| scored.score > b.score) {
            best = Some(scored);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_uniform_sample_spreads_over_range() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(uniform_sample(&items, 4), vec![0, 3, 6, 9]);
        assert_eq!(uniform_sample(&items, 20).len(), 10);
        assert_eq!(uniform_sample(&items, 1), vec![0]);
    }

    #[test]
    fn test_parent_chain_and_common_root() {
        let chain = parent_chain(Path::new("/a/b/c/d/e/f"), 4);
        assert_eq!(chain.first(), Some(&PathBuf::from("/a/b/c/d/e/f")));
        assert_eq!(chain.last(), Some(&PathBuf::from("/a/b")));
        assert_eq!(chain.len(), 5);

        let root = common_root(&[PathBuf::from("/data/cpm/lidar/a"), PathBuf::from("/data/cpm/thermal/b")]);
        assert_eq!(root, Some(PathBuf::from("/data/cpm")));
        assert_eq!(common_root(&[]), None);
    }

    #[test]
    fn test_score_cpm_log() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let good = dir.path().join("rsu-cpm-objects.csv");
        let mut f = fs::File::create(&good)?;
        writeln!(
            f,
            "generationTime_ms;objectID;xDistance_m;yDistance_m;xSpeed_mps;ySpeed_mps;yawAngle_deg;classificationType;objLength_m"
        )?;
        for i in 0..20 {
            writeln!(f, "{};{};1.5;2.5;0.1;0.2;90;5;4.2", 1_700_000_000_000i64 + i * 100, i % 3)?;
        }
        let s = score_cpm_log(&good, &BTreeMap::new(), 200);
        assert_eq!(s.score, 100.0);
        assert_eq!(s.delimiter, b';');
        assert_eq!(s.column_map.get("xDistance_m").map(String::as_str), Some("xDistance_m"));

        let other = dir.path().join("weather.csv");
        fs::write(&other, "station,temp\nA,12\nB,13\n")?;
        assert_eq!(score_cpm_log(&other, &BTreeMap::new(), 200).score, 0.0);
        Ok(())
    }

    #[test]
    fn test_score_scene_table_and_prefixes() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scenes.csv");
        fs::write(
            &path,
            "table,scene_id,file,intersect_id,city\n\
             V2X-Traj/ego-trajectories/train/data,1,1.csv,yizhuang#4-1,PEK\n\
             V2X-Traj/traffic-light/train/data,1,1.csv,yizhuang#4-1,PEK\n",
        )?;
        let s = score_scene_table(&path);
        assert_eq!(s.score, 85.0);
        assert_eq!(s.rows, 2);

        let prefixes = role_prefixes(&s.tables);
        assert_eq!(
            prefixes.get(crate::config::roles::TRAJ_EGO).map(String::as_str),
            Some("V2X-Traj/ego-trajectories")
        );
        assert!(prefixes.contains_key(crate::config::roles::TRAFFIC_LIGHT));
        Ok(())
    }

    #[test]
    fn test_score_trajectory_and_signal_dirs() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let traj = dir.path().join("traj/train/data");
        fs::create_dir_all(&traj)?;
        fs::write(traj.join("1.csv"), "timestamp,id,x,y\n1.0,a,1,2\n")?;
        assert_eq!(score_trajectory_dir(&dir.path().join("traj")), 100.0);
        assert_eq!(score_signal_dir(&dir.path().join("traj")), 20.0);
        assert_eq!(score_trajectory_dir(&dir.path().join("missing")), 0.0);
        Ok(())
    }

    #[test]
    fn test_recording_dir_score() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir_all(&data)?;
        fs::write(data.join("00_tracks.csv"), "recordingId,trackId,frame,xCenter,yCenter\n")?;
        fs::write(data.join("00_tracksMeta.csv"), "recordingId,trackId,initialFrame,finalFrame,class\n")?;
        fs::write(data.join("00_recordingMeta.csv"), "recordingId,locationId,frameRate\n")?;
        fs::write(data.join("00_background.png"), [0u8; 4])?;

        let s = score_recording_dir(&data);
        assert_eq!(s.recordings, 1);
        assert_eq!(s.header_ok_ratio, 1.0);
        assert!((s.score - 80.8).abs() < 1e-9);

        let inferred = infer_recording_layout(&[dir.path().to_path_buf()]);
        assert_eq!(inferred.root.as_deref(), Some(dir.path()));
        assert_eq!(inferred.details.recordings, 1);
        Ok(())
    }

    #[test]
    fn test_scenario_root_layouts() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let city = dir.path().join("Tianjin");
        for name in ["8_02_1", "8_03_1"] {
            let s = city.join(name);
            fs::create_dir_all(&s)?;
            fs::write(s.join(VEHICLE_TRACKS), "track_id,x,y\n")?;
        }
        fs::write(city.join("map.osm"), "<osm/>")?;

        let full = score_scenario_root(dir.path());
        assert_eq!((full.city_count, full.scenario_count), (1, 2));
        assert_eq!(full.maps_dir.as_deref(), Some(dir.path()));

        let single = score_scenario_root(&city);
        assert_eq!(single.scenario_count, 2);
        assert!((single.score - full.score).abs() < 1e-9);

        let best = infer_scenario_root(&[city.join("8_02_1")]).map(|s| s.scenario_count);
        assert_eq!(best, Some(2));
        Ok(())
    }
}
