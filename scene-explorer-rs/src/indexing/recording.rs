//! Drone recordings sliced into fixed-duration scenes.
//!
//! A recording is three tables sharing a prefix: `<NN>_tracks.csv` with one
//! row per (agent, frame), `<NN>_tracksMeta.csv` with one row per agent and
//! its frame span, and `<NN>_recordingMeta.csv` with the frame rate,
//! location and geo-reference. Windows and their counts come from the
//! per-agent spans alone. The large track table is scanned once at build
//! time for per-track byte ranges; bundling reads only those ranges.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use super::catalog::{GroupOrder, SceneCatalog, SceneSummary};
use super::windowing::{field, fixed_windows, trim_eol};
use super::{dense_ids, IndexError, Result};
use crate::config::{roles, DatasetSpec};
use crate::core::geometry::Point;
use crate::core::loaders::{read_csv_text, ModalityStats};
use crate::core::schema::{
    sample_csv, FieldMap, IND_RECORDING_META_FIELDS, IND_RECORDING_META_REQUIRED, IND_TRACK_FIELDS,
    IND_TRACK_META_FIELDS, IND_TRACK_META_REQUIRED,
};

/// Window length bounds in seconds.
pub const MIN_WINDOW_S: f64 = 10.0;
pub const MAX_WINDOW_S: f64 = 600.0;

/// Modality of an agent class: vulnerable road users or vehicles.
pub fn modality_for_class(class: Option<&str>) -> &'static str {
    match class.map(str::to_ascii_lowercase).as_deref() {
        Some("pedestrian" | "bicycle" | "cyclist" | "bike") => "vru",
        _ => "vehicle",
    }
}

/// Recording-level metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingMeta {
    pub id: String,
    pub location: Option<u32>,
    pub frame_rate: f64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// UTM coordinates of the local frame origin
    pub utm_origin: Option<Point>,
}

/// Frame span of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSpan {
    pub track_id: String,
    pub initial: i64,
    pub last: i64,
    pub class: Option<String>,
    pub modality: &'static str,
}

impl TrackSpan {
    /// Frames of this track within `start..=end`.
    pub fn overlap(&self, start: i64, end: i64) -> Option<(i64, i64)> {
        let a = self.initial.max(start);
        let b = self.last.min(end);
        (a <= b).then_some((a, b))
    }
}

/// Byte ranges of each track's rows in the track table.
#[derive(Debug, Clone, Default)]
pub struct TrackOffsets {
    /// Raw header line
    pub header: Vec<u8>,
    pub ranges: HashMap<String, (u64, u64)>,
}

/// One indexed recording.
#[derive(Debug)]
pub struct Recording {
    pub meta: RecordingMeta,
    pub tracks_path: PathBuf,
    pub background: Option<PathBuf>,
    pub spans: Vec<TrackSpan>,
    pub windows: Vec<(i64, i64)>,
    pub offsets: TrackOffsets,
}

impl Recording {
    /// Tracks overlapping a frame range.
    pub fn overlapping(&self, start: i64, end: i64) -> impl Iterator<Item = &TrackSpan> {
        self.spans.iter().filter(move |s| s.overlap(start, end).is_some())
    }

    /// Header plus the rows of every track overlapping `start..=end`.
    ///
    /// Rows of those tracks outside the range are included; callers filter
    /// by frame.
    pub fn read_window(&self, start: i64, end: i64) -> Result<Vec<u8>> {
        let mut ranges: Vec<(u64, u64)> = self
            .overlapping(start, end)
            .filter_map(|s| self.offsets.ranges.get(&s.track_id).copied())
            .collect();
        ranges.sort_unstable();

        let mut out = self.offsets.header.clone();
        out.push(b'\n');
        let mut file = File::open(&self.tracks_path)?;
        for (a, b) in merge_ranges(ranges) {
            file.seek(SeekFrom::Start(a))?;
            (&mut file).take(b - a).read_to_end(&mut out)?;
            if out.last() != Some(&b'\n') {
                out.push(b'\n');
            }
        }
        Ok(out)
    }
}

fn merge_ranges(sorted: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    let mut out: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
    for (a, b) in sorted {
        match out.last_mut() {
            Some(last) if a <= last.1 => last.1 = last.1.max(b),
            _ => out.push((a, b)),
        }
    }
    out
}

/// Scans a track table once, recording the byte range of each track.
///
/// Tracks are normally stored contiguously; a track split across the file
/// gets the range spanning all its rows.
pub fn scan_track_offsets(path: &Path) -> Result<TrackOffsets> {
    let sample = sample_csv(path, 0)?;
    let fields = FieldMap::from_headers(&sample.headers, IND_TRACK_FIELDS);
    let id_idx = fields.get("trackId").ok_or_else(|| IndexError::MissingColumns {
        path: path.to_path_buf(),
        columns: "trackId".to_string(),
    })?;

    let mut reader = BufReader::new(File::open(path)?);
    let mut line: Vec<u8> = Vec::with_capacity(256);
    let mut pos = reader.read_until(b'\n', &mut line)? as u64;
    let header = trim_eol(&line).to_vec();

    let mut ranges: HashMap<String, (u64, u64)> = HashMap::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        let start = pos;
        pos += n as u64;
        let Some(id) = field(trim_eol(&line), sample.delimiter, id_idx) else {
            continue;
        };
        ranges
            .entry(id.to_string())
            .and_modify(|r| {
                r.0 = r.0.min(start);
                r.1 = r.1.max(pos);
            })
            .or_insert((start, pos));
    }
    Ok(TrackOffsets { header, ranges })
}

/// Reads the first row of a recording metadata table.
pub fn read_recording_meta(path: &Path) -> Result<RecordingMeta> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let headers = crate::core::schema::reader_headers(&mut reader)?;
    let fields = FieldMap::from_headers(&headers, IND_RECORDING_META_FIELDS);
    let missing = fields.missing(IND_RECORDING_META_REQUIRED);
    if !missing.is_empty() {
        return Err(IndexError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing.join(", "),
        });
    }

    let record = reader
        .records()
        .flatten()
        .next()
        .ok_or_else(|| IndexError::NoScenes(path.to_path_buf()))?;
    let utm_origin = match (fields.float(&record, "xUtmOrigin"), fields.float(&record, "yUtmOrigin")) {
        (Some(x), Some(y)) => Some([x, y]),
        _ => None,
    };
    Ok(RecordingMeta {
        id: fields.string(&record, "recordingId").unwrap_or_default(),
        location: fields.int(&record, "locationId").and_then(|v| u32::try_from(v).ok()),
        frame_rate: fields.float(&record, "frameRate").filter(|f| *f > 0.0).unwrap_or(25.0),
        lat: fields.float(&record, "latLocation"),
        lon: fields.float(&record, "lonLocation"),
        utm_origin,
    })
}

/// Reads the per-agent frame spans of a recording.
pub fn read_track_meta(path: &Path) -> Result<Vec<TrackSpan>> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let headers = crate::core::schema::reader_headers(&mut reader)?;
    let fields = FieldMap::from_headers(&headers, IND_TRACK_META_FIELDS);
    let missing = fields.missing(IND_TRACK_META_REQUIRED);
    if !missing.is_empty() {
        return Err(IndexError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing.join(", "),
        });
    }

    let mut spans = Vec::new();
    for record in reader.records().flatten() {
        let (Some(track_id), Some(initial), Some(last)) = (
            fields.string(&record, "trackId"),
            fields.int(&record, "initialFrame"),
            fields.int(&record, "finalFrame"),
        ) else {
            continue;
        };
        if last < initial {
            continue;
        }
        let class = fields.string(&record, "class");
        spans.push(TrackSpan {
            modality: modality_for_class(class.as_deref()),
            track_id,
            initial,
            last,
            class,
        });
    }
    Ok(spans)
}

/// Directory holding the recording tables.
pub fn data_dir(spec: &DatasetSpec) -> PathBuf {
    if let Some(p) = spec.binding_path(roles::DATA_DIR) {
        return p.to_path_buf();
    }
    let data = spec.root.join("data");
    if data.is_dir() {
        data
    } else {
        spec.root.clone()
    }
}

/// `(prefix, tracks file)` pairs found in `dir`, sorted by prefix.
pub fn discover_recordings(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut out: Vec<(String, PathBuf)> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter_map(|p| {
                    let name = p.file_name()?.to_str()?;
                    let prefix = name.strip_suffix("_tracks.csv")?.to_string();
                    Some((prefix, p))
                })
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

/// Clamps a requested window length into the supported range.
pub fn clamp_window_s(window_s: f64) -> f64 {
    if window_s.is_finite() {
        window_s.clamp(MIN_WINDOW_S, MAX_WINDOW_S)
    } else {
        MIN_WINDOW_S
    }
}

fn load_recording(dir: &Path, prefix: &str, tracks_path: PathBuf, window_s: f64) -> Result<Recording> {
    let meta = read_recording_meta(&dir.join(format!("{prefix}_recordingMeta.csv")))?;
    let spans = read_track_meta(&dir.join(format!("{prefix}_tracksMeta.csv")))?;
    let min_frame = spans.iter().map(|s| s.initial).min();
    let max_frame = spans.iter().map(|s| s.last).max();
    let windows = match (min_frame, max_frame) {
        (Some(a), Some(b)) => fixed_windows(a, b, meta.frame_rate, window_s),
        _ => Vec::new(),
    };
    let background = Some(dir.join(format!("{prefix}_background.png"))).filter(|p| p.is_file());
    let offsets = scan_track_offsets(&tracks_path)?;
    debug!("recording {}: offsets for {} tracks", meta.id, offsets.ranges.len());
    Ok(Recording {
        meta,
        tracks_path,
        background,
        spans,
        windows,
        offsets,
    })
}

fn fmt_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as i64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Per-modality counts of a window, from the agent spans only.
pub fn window_stats(recording: &Recording, start: i64, end: i64) -> BTreeMap<String, ModalityStats> {
    let fps = recording.meta.frame_rate;
    let mut acc: BTreeMap<&'static str, (usize, usize, i64, i64)> = Default::default();
    for span in &recording.spans {
        let Some((a, b)) = span.overlap(start, end) else {
            continue;
        };
        let e = acc.entry(span.modality).or_insert((0, 0, i64::MAX, i64::MIN));
        e.0 += (b - a + 1) as usize;
        e.1 += 1;
        e.2 = e.2.min(a);
        e.3 = e.3.max(b);
    }
    acc.into_iter()
        .map(|(m, (rows, agents, lo, hi))| {
            let min_ts = lo as f64 / fps;
            let max_ts = hi as f64 / fps;
            (
                m.to_string(),
                ModalityStats {
                    rows,
                    min_ts: Some(min_ts),
                    max_ts: Some(max_ts),
                    unique_ts: (hi - lo + 1) as usize,
                    duration_s: Some(max_ts - min_ts),
                    unique_agents: Some(agents),
                },
            )
        })
        .collect()
}

/// A scene: one window of one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneRef {
    pub recording: usize,
    pub start_frame: i64,
    pub end_frame: i64,
}

/// Index of a drone recording dataset.
#[derive(Debug, Default)]
pub struct RecordingIndex {
    pub catalog: SceneCatalog,
    pub recordings: Vec<Recording>,
    scenes: HashMap<String, SceneRef>,
}

impl RecordingIndex {
    pub fn scene(&self, scene_id: &str) -> Option<SceneRef> {
        self.scenes.get(scene_id).copied()
    }

    pub fn recording(&self, idx: usize) -> Option<&Recording> {
        self.recordings.get(idx)
    }
}

/// Builds the index for a drone recording dataset.
///
/// Recordings load in parallel, each with its track byte-offset table; a
/// recording whose tables are missing or malformed is skipped with a
/// warning. Scene ids are dense over
/// (recording, window start).
///
/// # Errors
///
/// Returns [`IndexError::NoScenes`] when no recording yields a window.
pub fn build_index(spec: &DatasetSpec, window_s: f64) -> Result<RecordingIndex> {
    let started = Instant::now();
    let dir = data_dir(spec);
    let window_s = clamp_window_s(window_s);

    let found = discover_recordings(&dir);
    let mut recordings: Vec<Recording> = found
        .into_par_iter()
        .filter_map(|(prefix, tracks)| match load_recording(&dir, &prefix, tracks, window_s) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("{}: skipping recording {}: {}", spec.id, prefix, e);
                None
            }
        })
        .collect();
    recordings.sort_by(|a, b| {
        let key = |r: &Recording| (r.meta.id.parse::<i64>().ok(), r.meta.id.clone());
        key(a).cmp(&key(b))
    });

    let mut summaries = Vec::new();
    let mut scenes = HashMap::new();
    let flat = recordings
        .iter()
        .enumerate()
        .flat_map(|(ri, r)| r.windows.iter().map(move |w| (ri, *w)));
    for (scene_id, (ri, (start, end))) in dense_ids(usize::MAX).zip(flat) {
        let rec = &recordings[ri];
        let fps = rec.meta.frame_rate;
        let group_id = rec.meta.location.map(|l| l.to_string());
        summaries.push(SceneSummary {
            scene_label: Some(format!(
                "Recording {} · {}–{}",
                rec.meta.id,
                fmt_clock(start as f64 / fps),
                fmt_clock((end + 1) as f64 / fps)
            )),
            split: super::catalog::ALL_SPLIT.to_string(),
            city: None,
            group_label: rec.meta.location.map(|l| format!("Location {l}")),
            group_id,
            by_modality: window_stats(rec, start, end),
            scene_id: scene_id.clone(),
        });
        scenes.insert(
            scene_id,
            SceneRef {
                recording: ri,
                start_frame: start,
                end_frame: end,
            },
        );
    }

    if summaries.is_empty() {
        return Err(IndexError::NoScenes(dir));
    }
    info!(
        "{}: indexed {} recordings into {} scenes ({} s windows) in {:.2?}",
        spec.id,
        recordings.len(),
        summaries.len(),
        window_s,
        started.elapsed()
    );
    Ok(RecordingIndex {
        catalog: SceneCatalog::single(summaries, GroupOrder::ByLabel),
        recordings,
        scenes,
    })
}
