//! Column schema resolution and tolerant value parsing.
//!
//! Datasets in the wild rename, re-case and re-punctuate columns. Every
//! logical field therefore carries a canonical name plus an alias list, and
//! headers are matched after normalization (lowercase, alphanumerics only).
//! This module also sniffs delimiters and text encodings and provides the
//! safe numeric parsers used by all loaders.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes read when sniffing a CSV file.
pub const SNIFF_BYTES: usize = 256 * 1024;

/// Errors that can occur during schema sniffing.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty or unreadable header: {0}")]
    EmptyHeader(PathBuf),
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Normalizes a column name: lowercase, ASCII alphanumerics only.
pub fn normalize_column(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A logical field with its accepted header spellings.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

const fn field(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases }
}

/// Trajectory tables (V2X-Traj / V2X-Seq object tracks).
pub const TRAJECTORY_FIELDS: &[FieldSpec] = &[
    field("timestamp", &["ts", "time", "time_s", "unix_time"]),
    field("id", &["track_id", "trackid", "object_id", "agent_id"]),
    field("type", &["object_type", "class"]),
    field("sub_type", &["subtype"]),
    field("tag", &[]),
    field("x", &["pos_x", "center_x", "x_m"]),
    field("y", &["pos_y", "center_y", "y_m"]),
    field("z", &["pos_z", "center_z", "z_m"]),
    field("length", &["length_m"]),
    field("width", &["width_m"]),
    field("height", &["height_m"]),
    field("theta", &["heading", "yaw"]),
    field("v_x", &["vx", "velocity_x"]),
    field("v_y", &["vy", "velocity_y"]),
    field("city", &["location"]),
    field("intersect_id", &["intersection_id", "intersection", "junction_id"]),
];

pub const TRAJECTORY_REQUIRED: &[&str] = &["timestamp", "x", "y"];

/// Traffic-light state tables.
pub const TRAFFIC_LIGHT_FIELDS: &[FieldSpec] = &[
    field("timestamp", &["ts", "time", "time_s", "unix_time"]),
    field("x", &["pos_x", "center_x", "x_m"]),
    field("y", &["pos_y", "center_y", "y_m"]),
    field("direction", &[]),
    field("lane_id", &["laneid", "lane"]),
    field("color_1", &["color1", "signal_1"]),
    field("remain_1", &["remain1", "remain_time_1", "time_left_1"]),
    field("color_2", &["color2", "signal_2"]),
    field("remain_2", &["remain2", "remain_time_2", "time_left_2"]),
    field("color_3", &["color3", "signal_3"]),
    field("remain_3", &["remain3", "remain_time_3", "time_left_3"]),
    field("city", &["location"]),
    field("intersect_id", &["intersection_id", "intersection", "junction_id"]),
];

pub const TRAFFIC_LIGHT_REQUIRED: &[&str] = &["timestamp", "lane_id", "color_1", "remain_1"];

/// Roadside CPM object logs.
pub const CPM_FIELDS: &[FieldSpec] = &[
    field(
        "generationTime_ms",
        &["generation_time_ms", "generationtime", "timestamp_ms", "gen_time_ms", "time_ms", "timeofmeasurement_ms"],
    ),
    field("trackID", &["track_id", "track"]),
    field("objectID", &["object_id", "track_id", "id"]),
    field("xDistance_m", &["x_distance_m", "x_distance", "xdist_m", "north_m"]),
    field("yDistance_m", &["y_distance_m", "y_distance", "ydist_m", "east_m"]),
    field("xSpeed_mps", &["x_speed_mps", "vx_mps", "speed_x_mps", "north_speed_mps"]),
    field("ySpeed_mps", &["y_speed_mps", "vy_mps", "speed_y_mps", "east_speed_mps"]),
    field("yawAngle_deg", &["yaw_angle_deg", "heading_deg", "yaw_deg"]),
    field("classificationType", &["classification_type", "class_id", "object_class"]),
    field("objLength_m", &["obj_length_m", "length_m"]),
    field("objWidth_m", &["obj_width_m", "width_m"]),
    field("objHeight_m", &["obj_height_m", "height_m"]),
    field("sensorID", &["sensor_id", "rsu_id", "rsu", "station_id", "stationid", "sensor"]),
];

pub const CPM_REQUIRED: &[&str] = &["generationTime_ms", "xDistance_m", "yDistance_m"];

/// Precomputed scene-index tables.
pub const SCENE_INDEX_FIELDS: &[FieldSpec] = &[
    field("table", &["table_name", "source_table", "source"]),
    field("scene_id", &["sceneid", "scene", "segment_id"]),
    field("file", &["filename", "file_name", "path"]),
    field("rows", &["row_count", "n_rows"]),
    field("min_ts", &["ts_min", "start_ts"]),
    field("max_ts", &["ts_max", "end_ts"]),
    field("unique_ts", &["n_ts", "frames"]),
    field("duration_s", &["duration"]),
    field("unique_agents", &["agents", "n_agents"]),
    field("intersect_id", &["intersection_id", "intersection", "junction_id"]),
    field("city", &["location"]),
];

pub const SCENE_INDEX_REQUIRED: &[&str] = &["table", "scene_id"];

/// inD per-row track table.
pub const IND_TRACK_FIELDS: &[FieldSpec] = &[
    field("trackId", &["track_id", "id"]),
    field("frame", &["frame_id"]),
    field("xCenter", &["x_center", "x"]),
    field("yCenter", &["y_center", "y"]),
    field("heading", &["yaw"]),
    field("width", &[]),
    field("length", &[]),
    field("xVelocity", &["x_velocity", "vx"]),
    field("yVelocity", &["y_velocity", "vy"]),
];

pub const IND_TRACK_REQUIRED: &[&str] = &["trackId", "frame", "xCenter", "yCenter"];

/// inD per-agent metadata table.
pub const IND_TRACK_META_FIELDS: &[FieldSpec] = &[
    field("trackId", &["track_id", "id"]),
    field("initialFrame", &["initial_frame", "first_frame"]),
    field("finalFrame", &["final_frame", "last_frame"]),
    field("class", &["type", "agent_type"]),
    field("width", &[]),
    field("length", &[]),
];

pub const IND_TRACK_META_REQUIRED: &[&str] = &["trackId", "initialFrame", "finalFrame", "class"];

/// inD per-recording metadata table.
pub const IND_RECORDING_META_FIELDS: &[FieldSpec] = &[
    field("recordingId", &["recording_id"]),
    field("locationId", &["location_id"]),
    field("frameRate", &["frame_rate", "fps"]),
    field("latLocation", &["lat_location", "lat"]),
    field("lonLocation", &["lon_location", "lon"]),
    field("xUtmOrigin", &["x_utm_origin"]),
    field("yUtmOrigin", &["y_utm_origin"]),
];

pub const IND_RECORDING_META_REQUIRED: &[&str] = &["recordingId", "locationId", "frameRate"];

/// SinD smoothed vehicle and pedestrian tracks.
pub const SIND_TRACK_FIELDS: &[FieldSpec] = &[
    field("track_id", &["trackid", "id"]),
    field("frame_id", &["frame", "frameid"]),
    field("timestamp_ms", &["timestamp", "time_ms"]),
    field("agent_type", &["type", "class"]),
    field("x", &["x_center"]),
    field("y", &["y_center"]),
    field("vx", &["v_x", "x_velocity"]),
    field("vy", &["v_y", "y_velocity"]),
    field("yaw_rad", &["yaw", "heading_rad", "heading"]),
    field("length", &[]),
    field("width", &[]),
];

pub const SIND_TRACK_REQUIRED: &[&str] = &["track_id", "x", "y"];

/// SinD traffic-light state tables.
pub const SIND_SIGNAL_FIELDS: &[FieldSpec] = &[
    field("timestamp_ms", &["timestamp", "time_ms", "raw_time"]),
    field("frame_id", &["frame", "raw_frame_id", "rid"]),
];

/// Resolved mapping from logical field name to column index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    columns: BTreeMap<&'static str, (usize, String)>,
}

impl FieldMap {
    /// Resolves `fields` against a header row.
    ///
    /// Each field tries, in order: an explicit override from `overrides`
    /// (matched exactly, then normalized), the canonical name, then each
    /// alias in listed order. Matching is case and punctuation insensitive.
    pub fn resolve(headers: &[String], fields: &[FieldSpec], overrides: &BTreeMap<String, String>) -> Self {
        let mut by_norm: HashMap<String, usize> = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            let n = normalize_column(h);
            if !n.is_empty() {
                by_norm.entry(n).or_insert(i);
            }
        }

        let mut columns = BTreeMap::new();
        for spec in fields {
            let explicit = overrides.get(spec.name).and_then(|wanted| {
                let wanted = wanted.trim();
                if wanted.is_empty() {
                    return None;
                }
                headers
                    .iter()
                    .position(|h| h.trim() == wanted)
                    .or_else(|| by_norm.get(&normalize_column(wanted)).copied())
            });

            let idx = explicit
                .or_else(|| by_norm.get(&normalize_column(spec.name)).copied())
                .or_else(|| {
                    spec.aliases
                        .iter()
                        .find_map(|a| by_norm.get(&normalize_column(a)).copied())
                });

            if let Some(i) = idx {
                columns.insert(spec.name, (i, headers[i].trim().to_string()));
            }
        }

        Self { columns }
    }

    /// Resolves without overrides.
    pub fn from_headers(headers: &[String], fields: &[FieldSpec]) -> Self {
        Self::resolve(headers, fields, &BTreeMap::new())
    }

    /// Column index for a logical field.
    #[inline]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.columns.get(name).map(|(i, _)| *i)
    }

    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn has_all(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.has(n))
    }

    /// Logical fields from `names` that did not resolve.
    pub fn missing<'a>(&self, names: &[&'a str]) -> Vec<&'a str> {
        names.iter().copied().filter(|n| !self.has(n)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Logical field to actual header name, for reporting.
    pub fn column_names(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|(k, (_, h))| (k.to_string(), h.clone()))
            .collect()
    }

    /// Trimmed, non-empty raw value of a field in `record`.
    #[inline]
    pub fn value<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        let idx = self.get(name)?;
        let v = record.get(idx)?.trim();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }

    /// Owned string value of a field.
    #[inline]
    pub fn string(&self, record: &StringRecord, name: &str) -> Option<String> {
        self.value(record, name).map(str::to_string)
    }

    /// Finite float value of a field.
    #[inline]
    pub fn float(&self, record: &StringRecord, name: &str) -> Option<f64> {
        self.value(record, name).and_then(safe_float)
    }

    /// Integer value of a field (floats are truncated).
    #[inline]
    pub fn int(&self, record: &StringRecord, name: &str) -> Option<i64> {
        self.value(record, name).and_then(parse_int)
    }
}

/// Kind of a trajectory-style table, decided from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    CpmObjects,
    TrafficLight,
    Trajectory,
}

/// Classifies a header by which required field set resolves fully.
///
/// CPM object logs are checked first, then traffic-light tables, then plain
/// trajectories; traffic-light tables also carry `timestamp` and often `x`
/// and `y`, so the more specific sets win.
pub fn classify_header(headers: &[String]) -> Option<TableKind> {
    if FieldMap::from_headers(headers, CPM_FIELDS).has_all(CPM_REQUIRED) {
        return Some(TableKind::CpmObjects);
    }
    if FieldMap::from_headers(headers, TRAFFIC_LIGHT_FIELDS).has_all(TRAFFIC_LIGHT_REQUIRED) {
        return Some(TableKind::TrafficLight);
    }
    if FieldMap::from_headers(headers, TRAJECTORY_FIELDS).has_all(TRAJECTORY_REQUIRED) {
        return Some(TableKind::Trajectory);
    }
    None
}

/// Parses a string as a finite float. Empty, NaN and infinite values are `None`.
pub fn safe_float(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses an integer, accepting float spellings such as `"3.0"`.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    safe_float(s).map(|v| v.trunc() as i64)
}

/// Parses an epoch-seconds timestamp into integer 100 ms ticks.
///
/// Plain decimal strings are scaled exactly (round half away from zero on
/// the hundredths digit) so that ticks from different files join reliably.
/// Exponent notation falls back to float arithmetic.
pub fn parse_ts_100ms(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains(['e', 'E']) {
        return safe_float(s).map(|v| (v * 10.0).round() as i64);
    }

    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut ticks: i64 = 0;
    for b in int_part.bytes() {
        ticks = ticks.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }
    let frac = frac_part.as_bytes();
    let tenths = frac.first().map_or(0, |b| i64::from(b - b'0'));
    ticks = ticks.checked_mul(10)?.checked_add(tenths)?;
    if frac.get(1).is_some_and(|b| *b >= b'5') {
        ticks = ticks.checked_add(1)?;
    }

    Some(if negative { -ticks } else { ticks })
}

/// Converts 100 ms ticks back to seconds.
#[inline]
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / 10.0
}

/// Text encodings recognized when sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[serde(rename = "utf-8-sig")]
    Utf8Sig,
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "latin-1")]
    Latin1,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Sig => "utf-8-sig",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// Parses an encoding label; unknown labels map to UTF-8.
    pub fn from_label(label: &str) -> Self {
        match normalize_column(label).as_str() {
            "utf8sig" => TextEncoding::Utf8Sig,
            "latin1" | "iso88591" | "cp1252" => TextEncoding::Latin1,
            _ => TextEncoding::Utf8,
        }
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Detects UTF-8 with BOM, UTF-8, or falls back to Latin-1.
///
/// A UTF-8 sequence cut off at the end of the sample does not disqualify UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(UTF8_BOM) {
        return TextEncoding::Utf8Sig;
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => TextEncoding::Utf8,
        Err(e) if e.error_len().is_none() => TextEncoding::Utf8,
        Err(_) => TextEncoding::Latin1,
    }
}

/// Decodes bytes with the given encoding (lossy for UTF-8).
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8Sig => String::from_utf8_lossy(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)).into_owned(),
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    }
}

const DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// Detects the field delimiter among `,`, `;` and tab.
///
/// A delimiter whose per-line count is non-zero and identical across the
/// sampled lines wins (highest count first). Otherwise the most frequent
/// candidate is used, with comma as the default.
pub fn sniff_delimiter(sample: &str) -> u8 {
    let lines: Vec<&str> = sample
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .take(20)
        .collect();
    if lines.is_empty() {
        return b',';
    }

    let count = |line: &str, d: u8| line.bytes().filter(|b| *b == d).count();

    let mut best: Option<(u8, usize)> = None;
    for d in DELIMITERS {
        let first = count(lines[0], d);
        if first == 0 || !lines.iter().all(|l| count(l, d) == first) {
            continue;
        }
        if best.map_or(true, |(_, c)| first > c) {
            best = Some((d, first));
        }
    }
    if let Some((d, _)) = best {
        return d;
    }

    let c_comma = count(sample, b',');
    let c_semi = count(sample, b';');
    let c_tab = count(sample, b'\t');
    if c_tab > c_comma && c_tab > c_semi {
        b'\t'
    } else if c_semi > c_comma {
        b';'
    } else {
        b','
    }
}

/// Reads at most `max_bytes` from the start of a file.
pub fn read_prefix(path: &Path, max_bytes: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
    file.take(max_bytes as u64 + 1).read_to_end(&mut buf)?;
    let truncated = buf.len() > max_bytes;
    buf.truncate(max_bytes);
    Ok((buf, truncated))
}

/// Header plus a handful of rows, with the dialect used to read them.
#[derive(Debug, Clone)]
pub struct CsvSample {
    pub delimiter: u8,
    pub encoding: TextEncoding,
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

impl CsvSample {
    /// Delimiter as a string (`","`, `";"` or `"\t"`).
    pub fn delimiter_str(&self) -> String {
        (self.delimiter as char).to_string()
    }
}

/// Sniffs a CSV file's dialect and reads its header and up to `max_rows` rows.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no header.
pub fn sample_csv(path: &Path, max_rows: usize) -> Result<CsvSample> {
    let (bytes, truncated) = read_prefix(path, SNIFF_BYTES)?;
    let encoding = detect_encoding(&bytes);
    let mut text = decode_text(&bytes, encoding);
    if truncated {
        // drop the partial final line
        if let Some(pos) = text.rfind('\n') {
            text.truncate(pos + 1);
        }
    }
    let delimiter = sniff_delimiter(&text);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(SchemaError::EmptyHeader(path.to_path_buf()));
    }

    let mut rows = Vec::new();
    for record in reader.records().take(max_rows) {
        match record {
            Ok(r) => rows.push(r),
            Err(_) => break,
        }
    }

    Ok(CsvSample {
        delimiter,
        encoding,
        headers,
        rows,
    })
}

/// Reads just the header row of a CSV file, empty on any failure.
pub fn read_header(path: &Path) -> Vec<String> {
    sample_csv(path, 0).map(|s| s.headers).unwrap_or_default()
}

/// Trimmed header row of an open reader, with any BOM removed.
pub fn reader_headers<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<String>> {
    Ok(reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn headers(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_column() {
        assert_eq!(normalize_column(" generationTime_ms "), "generationtimems");
        assert_eq!(normalize_column("X-Center"), "xcenter");
    }

    #[test]
    fn test_resolve_prefers_override_then_canonical_then_alias() {
        let h = headers(&["Time", "pos_x", "Y", "custom_ts"]);
        let map = FieldMap::from_headers(&h, TRAJECTORY_FIELDS);
        assert_eq!(map.get("timestamp"), Some(0));
        assert_eq!(map.get("x"), Some(1));
        assert_eq!(map.get("y"), Some(2));

        let mut overrides = BTreeMap::new();
        overrides.insert("timestamp".to_string(), "custom_ts".to_string());
        let map = FieldMap::resolve(&h, TRAJECTORY_FIELDS, &overrides);
        assert_eq!(map.get("timestamp"), Some(3));
        assert_eq!(map.column_names().get("timestamp").map(String::as_str), Some("custom_ts"));
    }

    #[test]
    fn test_classify_header() {
        let cpm = headers(&["generationTime_ms", "objectID", "xDistance_m", "yDistance_m"]);
        assert_eq!(classify_header(&cpm), Some(TableKind::CpmObjects));

        let tl = headers(&["timestamp", "x", "y", "lane_id", "color_1", "remain_1"]);
        assert_eq!(classify_header(&tl), Some(TableKind::TrafficLight));

        let traj = headers(&["city", "timestamp", "id", "x", "y", "theta"]);
        assert_eq!(classify_header(&traj), Some(TableKind::Trajectory));

        assert_eq!(classify_header(&headers(&["a", "b"])), None);
    }

    #[test]
    fn test_safe_float_rejects_non_finite() {
        assert_eq!(safe_float(" 1.5 "), Some(1.5));
        assert_eq!(safe_float(""), None);
        assert_eq!(safe_float("nan"), None);
        assert_eq!(safe_float("inf"), None);
        assert_eq!(safe_float("abc"), None);
    }

    #[test]
    fn test_parse_ts_100ms() {
        assert_eq!(parse_ts_100ms("1626164101.3"), Some(16261641013));
        assert_eq!(parse_ts_100ms("1626164101.349"), Some(16261641013));
        assert_eq!(parse_ts_100ms("1626164101.35"), Some(16261641014));
        assert_eq!(parse_ts_100ms("12"), Some(120));
        assert_eq!(parse_ts_100ms("-0.25"), Some(-3));
        assert_eq!(parse_ts_100ms("1.5e1"), Some(150));
        assert_eq!(parse_ts_100ms(""), None);
        assert_eq!(parse_ts_100ms("nan"), None);
        assert_eq!(parse_ts_100ms("."), None);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("3"), Some(3));
        assert_eq!(parse_int("3.0"), Some(3));
        assert_eq!(parse_int("x"), None);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter("a\tb\n1\t2\n"), b'\t');
        assert_eq!(sniff_delimiter("a,b\n1,2\n"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn test_detect_encoding() {
        assert_eq!(detect_encoding(b"\xEF\xBB\xBFa,b"), TextEncoding::Utf8Sig);
        assert_eq!(detect_encoding("a,ß".as_bytes()), TextEncoding::Utf8);
        assert_eq!(detect_encoding(b"a,\xDF,b"), TextEncoding::Latin1);
        assert_eq!(decode_text(b"\xDF", TextEncoding::Latin1), "ß");
    }

    #[test]
    fn test_sample_csv_semicolon_bom() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"\xEF\xBB\xBFtimestamp;x;y\n1.0;2.0;3.0\n1.1;2.5;3.5\n").unwrap();
        file.flush().unwrap();

        let sample = sample_csv(file.path(), 10)?;
        assert_eq!(sample.delimiter, b';');
        assert_eq!(sample.encoding, TextEncoding::Utf8Sig);
        assert_eq!(sample.headers, headers(&["timestamp", "x", "y"]));
        assert_eq!(sample.rows.len(), 2);
        Ok(())
    }
}
