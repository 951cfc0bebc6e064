//! Record loaders for per-modality scene tables.
//!
//! A scene table is a CSV file holding one row per (timestamp, object) or
//! (timestamp, signal head). Loaders turn it into a tick-keyed
//! [`ModalityTable`] together with its spatial extent and the first
//! non-empty city / intersection metadata seen.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::debug;
use serde::Serialize;
use thiserror::Error;

use super::geometry::BBox;
use super::schema::{
    decode_text, detect_encoding, normalize_column, parse_int, parse_ts_100ms, reader_headers, sniff_delimiter,
    FieldMap, SchemaError, TextEncoding, SIND_SIGNAL_FIELDS, SIND_TRACK_FIELDS, SIND_TRACK_REQUIRED, SNIFF_BYTES,
    TRAFFIC_LIGHT_FIELDS, TRAJECTORY_FIELDS, TRAJECTORY_REQUIRED,
};

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Missing required columns in {path}: {columns}")]
    MissingColumns { path: PathBuf, columns: String },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// One tracked object at one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectRecord {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub object_type: Option<String>,
    pub sub_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type_code: Option<i64>,
    pub tag: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub theta: Option<f64>,
    pub v_x: Option<f64>,
    pub v_y: Option<f64>,
}

/// One traffic-light head state at one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalRecord {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub direction: Option<String>,
    pub lane_id: Option<String>,
    pub color_1: Option<String>,
    pub remain_1: Option<f64>,
    pub color_2: Option<String>,
    pub remain_2: Option<f64>,
    pub color_3: Option<String>,
    pub remain_3: Option<f64>,
}

/// A record of either kind, serialized without a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Object(ObjectRecord),
    Signal(SignalRecord),
}

impl Record {
    pub fn position(&self) -> Option<(f64, f64)> {
        let (x, y) = match self {
            Record::Object(o) => (o.x, o.y),
            Record::Signal(s) => (s.x, s.y),
        };
        Some((x?, y?))
    }
}

/// How integer ticks map to seconds for a dataset family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickScale {
    /// 100 ms units.
    Deciseconds,
    /// Millisecond values (possibly bucketed).
    Milliseconds,
    /// Video frame numbers at the given rate.
    Frames(f64),
}

impl TickScale {
    #[inline]
    pub fn to_seconds(&self, tick: i64) -> f64 {
        match self {
            TickScale::Deciseconds => tick as f64 / 10.0,
            TickScale::Milliseconds => tick as f64 / 1000.0,
            TickScale::Frames(fps) if *fps > 0.0 => tick as f64 / fps,
            TickScale::Frames(_) => tick as f64,
        }
    }
}

/// Summary statistics of one modality within one scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModalityStats {
    pub rows: usize,
    pub min_ts: Option<f64>,
    pub max_ts: Option<f64>,
    pub unique_ts: usize,
    pub duration_s: Option<f64>,
    pub unique_agents: Option<usize>,
}

/// Tick-keyed records of one modality file.
#[derive(Debug, Clone, Default)]
pub struct ModalityTable {
    pub frames: BTreeMap<i64, Vec<Record>>,
    pub extent: BBox,
    pub city: Option<String>,
    pub group_id: Option<String>,
    pub rows: usize,
    agent_ids: Option<BTreeSet<String>>,
    group_ids: BTreeSet<String>,
}

impl ModalityTable {
    /// Creates an empty table; `track_agents` enables unique-agent counting.
    pub fn new(track_agents: bool) -> Self {
        Self {
            agent_ids: track_agents.then(BTreeSet::new),
            ..Default::default()
        }
    }

    /// Adds a record at `tick`, growing the extent by its position.
    pub fn push(&mut self, tick: i64, record: Record) {
        if let Some((x, y)) = record.position() {
            self.extent.extend(x, y);
        }
        if let (Some(ids), Record::Object(o)) = (self.agent_ids.as_mut(), &record) {
            if let Some(id) = &o.id {
                if !ids.contains(id) {
                    ids.insert(id.clone());
                }
            }
        }
        self.rows += 1;
        self.frames.entry(tick).or_default().push(record);
    }

    /// Keeps the first non-empty city and group seen.
    pub fn note_meta(&mut self, city: Option<&str>, group_id: Option<&str>) {
        if self.city.is_none() {
            self.city = city.map(str::to_string);
        }
        if let Some(g) = group_id {
            if self.group_id.is_none() {
                self.group_id = Some(g.to_string());
            }
            if !self.group_ids.contains(g) {
                self.group_ids.insert(g.to_string());
            }
        }
    }

    /// Number of distinct group ids seen across rows.
    pub fn group_variants(&self) -> usize {
        self.group_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn min_tick(&self) -> Option<i64> {
        self.frames.keys().next().copied()
    }

    pub fn max_tick(&self) -> Option<i64> {
        self.frames.keys().next_back().copied()
    }

    pub fn unique_agents(&self) -> Option<usize> {
        self.agent_ids.as_ref().map(BTreeSet::len)
    }

    /// Per-modality statistics in seconds.
    pub fn stats(&self, scale: TickScale) -> ModalityStats {
        let min_ts = self.min_tick().map(|t| scale.to_seconds(t));
        let max_ts = self.max_tick().map(|t| scale.to_seconds(t));
        ModalityStats {
            rows: self.rows,
            min_ts,
            max_ts,
            unique_ts: self.frames.len(),
            duration_s: match (min_ts, max_ts) {
                (Some(a), Some(b)) => Some((b - a).max(0.0)),
                _ => None,
            },
            unique_agents: self.unique_agents(),
        }
    }
}

/// Reads a whole CSV file, decoding it and sniffing its delimiter.
pub fn read_csv_text(path: &Path) -> Result<(String, u8)> {
    let bytes = fs::read(path)?;
    let encoding = detect_encoding(&bytes[..bytes.len().min(SNIFF_BYTES)]);
    // a Latin-1 byte past the sniff window still decodes lossily
    let text = decode_text(&bytes, encoding);
    let sample_end = text.char_indices().nth(SNIFF_BYTES).map_or(text.len(), |(i, _)| i);
    let delimiter = sniff_delimiter(&text[..sample_end]);
    Ok((text, delimiter))
}

/// Like [`read_csv_text`] with a caller-chosen encoding.
pub fn read_csv_text_as(path: &Path, encoding: TextEncoding) -> Result<(String, u8)> {
    let bytes = fs::read(path)?;
    let text = decode_text(&bytes, encoding);
    let sample_end = text.char_indices().nth(SNIFF_BYTES).map_or(text.len(), |(i, _)| i);
    let delimiter = sniff_delimiter(&text[..sample_end]);
    Ok((text, delimiter))
}

fn csv_reader(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes())
}

/// Load a trajectory table keyed by 100 ms ticks.
///
/// # Arguments
///
/// * `path` - Path to the per-scene trajectory CSV
/// * `overrides` - Explicit logical-field to header-name overrides
///
/// # Returns
///
/// A `ModalityTable` of [`ObjectRecord`]s. Rows whose timestamp cannot be
/// parsed are dropped; unparseable numerics become `None`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or lacks timestamp/x/y columns.
pub fn load_trajectory_table(path: &Path, overrides: &BTreeMap<String, String>) -> Result<ModalityTable> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv_reader(&text, delimiter);
    let headers = reader_headers(&mut reader)?;
    let fields = FieldMap::resolve(&headers, TRAJECTORY_FIELDS, overrides);

    let missing = fields.missing(TRAJECTORY_REQUIRED);
    if !missing.is_empty() {
        return Err(LoaderError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing.join(", "),
        });
    }

    let mut table = ModalityTable::new(true);
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let Some(tick) = fields.value(&record, "timestamp").and_then(parse_ts_100ms) else {
            skipped += 1;
            continue;
        };

        table.note_meta(fields.value(&record, "city"), fields.value(&record, "intersect_id"));

        let rec = ObjectRecord {
            id: fields.string(&record, "id"),
            object_type: fields.string(&record, "type"),
            sub_type: fields.string(&record, "sub_type"),
            sub_type_code: None,
            tag: fields.string(&record, "tag"),
            x: fields.float(&record, "x"),
            y: fields.float(&record, "y"),
            z: fields.float(&record, "z"),
            length: fields.float(&record, "length"),
            width: fields.float(&record, "width"),
            height: fields.float(&record, "height"),
            theta: fields.float(&record, "theta"),
            v_x: fields.float(&record, "v_x"),
            v_y: fields.float(&record, "v_y"),
        };
        table.push(tick, Record::Object(rec));
    }

    if skipped > 0 {
        debug!("{}: skipped {} rows without a usable timestamp", path.display(), skipped);
    }
    Ok(table)
}

/// Load a traffic-light table keyed by 100 ms ticks.
///
/// Only the timestamp column is required here; kind classification is
/// stricter and happens before a file is accepted as a traffic-light table.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no timestamp column.
pub fn load_traffic_light_table(path: &Path, overrides: &BTreeMap<String, String>) -> Result<ModalityTable> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv_reader(&text, delimiter);
    let headers = reader_headers(&mut reader)?;
    let fields = FieldMap::resolve(&headers, TRAFFIC_LIGHT_FIELDS, overrides);

    if !fields.has("timestamp") {
        return Err(LoaderError::MissingColumns {
            path: path.to_path_buf(),
            columns: "timestamp".to_string(),
        });
    }

    let mut table = ModalityTable::new(false);
    for record in reader.records().flatten() {
        let Some(tick) = fields.value(&record, "timestamp").and_then(parse_ts_100ms) else {
            continue;
        };
        table.note_meta(fields.value(&record, "city"), fields.value(&record, "intersect_id"));

        let rec = SignalRecord {
            x: fields.float(&record, "x"),
            y: fields.float(&record, "y"),
            direction: fields.string(&record, "direction"),
            lane_id: fields.string(&record, "lane_id"),
            color_1: fields.string(&record, "color_1"),
            remain_1: fields.float(&record, "remain_1"),
            color_2: fields.string(&record, "color_2"),
            remain_2: fields.float(&record, "remain_2"),
            color_3: fields.string(&record, "color_3"),
            remain_3: fields.float(&record, "remain_3"),
        };
        table.push(tick, Record::Signal(rec));
    }
    Ok(table)
}

/// Coarse object type and sub-type for a signalized-intersection agent class.
pub fn sind_object_type(agent_type: Option<&str>) -> (String, Option<String>) {
    let Some(raw) = agent_type.map(str::trim).filter(|s| !s.is_empty()) else {
        return ("UNKNOWN".to_string(), None);
    };
    let sub = raw.to_ascii_uppercase();
    let coarse = match sub.as_str() {
        "PEDESTRIAN" => "PEDESTRIAN",
        "BICYCLE" | "TRICYCLE" => "BICYCLE",
        _ => "VEHICLE",
    };
    (coarse.to_string(), Some(sub))
}

/// Tick of a signalized-intersection row: 100 ms units from the millisecond
/// timestamp, else the raw frame number.
fn sind_tick(fields: &FieldMap, record: &csv::StringRecord) -> Option<i64> {
    fields
        .float(record, "timestamp_ms")
        .map(|ms| (ms / 100.0).round() as i64)
        .or_else(|| fields.int(record, "frame_id"))
}

/// Load a smoothed vehicle or pedestrian track table.
///
/// # Errors
///
/// Returns an error if the file cannot be read or lacks track id/x/y columns.
pub fn load_sind_track_table(path: &Path) -> Result<ModalityTable> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv_reader(&text, delimiter);
    let headers = reader_headers(&mut reader)?;
    let fields = FieldMap::from_headers(&headers, SIND_TRACK_FIELDS);

    let mut missing = fields.missing(SIND_TRACK_REQUIRED);
    if !fields.has("timestamp_ms") && !fields.has("frame_id") {
        missing.push("timestamp_ms");
    }
    if !missing.is_empty() {
        return Err(LoaderError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing.join(", "),
        });
    }

    let mut table = ModalityTable::new(true);
    for record in reader.records().flatten() {
        let Some(tick) = sind_tick(&fields, &record) else {
            continue;
        };
        let (object_type, sub_type) = sind_object_type(fields.value(&record, "agent_type"));
        let rec = ObjectRecord {
            id: fields.string(&record, "track_id"),
            object_type: Some(object_type),
            sub_type,
            x: fields.float(&record, "x"),
            y: fields.float(&record, "y"),
            length: fields.float(&record, "length"),
            width: fields.float(&record, "width"),
            theta: fields.float(&record, "yaw_rad"),
            v_x: fields.float(&record, "vx"),
            v_y: fields.float(&record, "vy"),
            ..Default::default()
        };
        table.push(tick, Record::Object(rec));
    }
    Ok(table)
}

/// Color name of a signal state code.
pub fn signal_color(code: &str) -> String {
    match parse_int(code) {
        Some(0) => "RED".to_string(),
        Some(1) => "GREEN".to_string(),
        Some(3) => "YELLOW".to_string(),
        _ => code.trim().to_uppercase(),
    }
}

/// Signal head number of a `Traffic light N` column.
fn signal_head(header: &str) -> Option<String> {
    let norm = normalize_column(header);
    let rest = norm.strip_prefix("trafficlight")?;
    (!rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())).then(|| rest.to_string())
}

/// Load a signal state table with one `Traffic light N` column per head.
///
/// Each row becomes one [`SignalRecord`] per head, with the head number as
/// `lane_id` and the decoded state as `color_1`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no time column.
pub fn load_sind_signal_table(path: &Path) -> Result<ModalityTable> {
    let (text, delimiter) = read_csv_text(path)?;
    let mut reader = csv_reader(&text, delimiter);
    let headers = reader_headers(&mut reader)?;
    let fields = FieldMap::from_headers(&headers, SIND_SIGNAL_FIELDS);
    if !fields.has("timestamp_ms") && !fields.has("frame_id") {
        return Err(LoaderError::MissingColumns {
            path: path.to_path_buf(),
            columns: "timestamp_ms".to_string(),
        });
    }
    let heads: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| signal_head(h).map(|n| (i, n)))
        .collect();

    let mut table = ModalityTable::new(false);
    for record in reader.records().flatten() {
        let Some(tick) = sind_tick(&fields, &record) else {
            continue;
        };
        for (idx, head) in &heads {
            let Some(raw) = record.get(*idx).map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            let rec = SignalRecord {
                lane_id: Some(head.clone()),
                color_1: Some(signal_color(raw)),
                ..Default::default()
            };
            table.push(tick, Record::Signal(rec));
        }
    }
    Ok(table)
}

/// Groups records of several modality tables into one frame per tick.
///
/// Every modality appears in every frame (empty when it has no records at
/// that tick). Ticks are the sorted union over all tables.
pub fn union_frames<'a, I>(tables: I) -> BTreeMap<i64, HashMap<&'a str, Vec<Record>>>
where
    I: IntoIterator<Item = (&'a str, &'a ModalityTable)>,
{
    let tables: Vec<(&str, &ModalityTable)> = tables.into_iter().collect();
    let ticks: BTreeSet<i64> = tables.iter().flat_map(|(_, t)| t.frames.keys().copied()).collect();

    ticks
        .into_iter()
        .map(|tick| {
            let frame = tables
                .iter()
                .map(|(name, t)| (*name, t.frames.get(&tick).cloned().unwrap_or_default()))
                .collect();
            (tick, frame)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_trajectory_table() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "city,timestamp,id,type,sub_type,tag,x,y,z,length,width,height,theta,v_x,v_y,intersect_id").unwrap();
        writeln!(file, "PEK,1626164101.0,a,VEHICLE,CAR,AV,1.0,2.0,0,4.5,1.8,1.5,0.1,1,0,yizhuang#4-1").unwrap();
        writeln!(file, "PEK,1626164101.0,b,VEHICLE,CAR,,3.0,4.0,,abc,,,,,,yizhuang#4-1").unwrap();
        writeln!(file, "PEK,1626164101.1,a,VEHICLE,CAR,AV,1.5,2.5,0,4.5,1.8,1.5,0.1,1,0,yizhuang#4-1").unwrap();
        writeln!(file, "PEK,bad,a,VEHICLE,CAR,AV,9,9,0,4.5,1.8,1.5,0.1,1,0,yizhuang#4-1").unwrap();
        file.flush().unwrap();

        let table = load_trajectory_table(file.path(), &BTreeMap::new())?;
        assert_eq!(table.rows, 3);
        assert_eq!(table.frames.len(), 2);
        assert_eq!(table.min_tick(), Some(16261641010));
        assert_eq!(table.city.as_deref(), Some("PEK"));
        assert_eq!(table.group_id.as_deref(), Some("yizhuang#4-1"));
        assert_eq!(table.unique_agents(), Some(2));
        assert_eq!(table.group_variants(), 1);
        assert_eq!(table.extent, BBox::new(1.0, 2.0, 3.0, 4.0));

        let Record::Object(b) = &table.frames[&16261641010][1] else {
            panic!("expected object record");
        };
        assert_eq!(b.length, None);
        assert_eq!(b.z, None);
        assert_eq!(b.tag, None);

        let stats = table.stats(TickScale::Deciseconds);
        assert_eq!(stats.unique_ts, 2);
        assert!((stats.duration_s.unwrap() - 0.1).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_load_trajectory_requires_position() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,id").unwrap();
        writeln!(file, "1.0,a").unwrap();
        file.flush().unwrap();

        let err = load_trajectory_table(file.path(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, LoaderError::MissingColumns { .. }));
    }

    #[test]
    fn test_load_traffic_light_aliases() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Timestamp;X;Y;Direction;LaneID;Color1;Remain1").unwrap();
        writeln!(file, "10.0;5;6;N;12;GREEN;3.5").unwrap();
        writeln!(file, "10.1;5;6;N;12;YELLOW;").unwrap();
        file.flush().unwrap();

        let table = load_traffic_light_table(file.path(), &BTreeMap::new())?;
        assert_eq!(table.rows, 2);
        assert_eq!(table.unique_agents(), None);
        let Record::Signal(s) = &table.frames[&101][0] else {
            panic!("expected signal record");
        };
        assert_eq!(s.color_1.as_deref(), Some("YELLOW"));
        assert_eq!(s.remain_1, None);
        assert_eq!(s.lane_id.as_deref(), Some("12"));
        Ok(())
    }

    #[test]
    fn test_union_frames_fills_absent_modalities() {
        let mut a = ModalityTable::new(true);
        a.push(1, Record::Object(ObjectRecord::default()));
        a.push(3, Record::Object(ObjectRecord::default()));
        let mut b = ModalityTable::new(false);
        b.push(2, Record::Signal(SignalRecord::default()));

        let frames = union_frames([("ego", &a), ("traffic_light", &b)]);
        assert_eq!(frames.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(frames[&2]["ego"].is_empty());
        assert_eq!(frames[&2]["traffic_light"].len(), 1);
    }

    #[test]
    fn test_load_sind_tracks() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "track_id,frame_id,timestamp_ms,agent_type,x,y,vx,vy,yaw_rad,heading_rad,length,width").unwrap();
        writeln!(file, "1,1,100.0,car,1.0,2.0,0.5,0,0.1,0.1,4.6,1.9").unwrap();
        writeln!(file, "2,1,100.0,tricycle,3.0,4.0,0,0,0,0,2.0,1.0").unwrap();
        writeln!(file, "1,4,200.0,car,1.5,2.0,0.5,0,0.1,0.1,4.6,1.9").unwrap();
        file.flush().unwrap();

        let table = load_sind_track_table(file.path())?;
        assert_eq!(table.frames.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(table.unique_agents(), Some(2));
        let Record::Object(o) = &table.frames[&1][1] else {
            panic!("expected object record");
        };
        assert_eq!(o.object_type.as_deref(), Some("BICYCLE"));
        assert_eq!(o.sub_type.as_deref(), Some("TRICYCLE"));
        assert_eq!(o.theta, Some(0.0));
        Ok(())
    }

    #[test]
    fn test_load_sind_signals() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "RawFrameID,timestamp(ms),Traffic light 1,Traffic light 2").unwrap();
        writeln!(file, "0,0,0,1").unwrap();
        writeln!(file, "30,1001,3,").unwrap();
        file.flush().unwrap();

        let table = load_sind_signal_table(file.path())?;
        assert_eq!(table.rows, 3);
        let Record::Signal(s) = &table.frames[&10][0] else {
            panic!("expected signal record");
        };
        assert_eq!(s.lane_id.as_deref(), Some("1"));
        assert_eq!(s.color_1.as_deref(), Some("YELLOW"));
        assert_eq!(signal_color("1"), "GREEN");
        assert_eq!(signal_color("flash"), "FLASH");
        Ok(())
    }

    #[test]
    fn test_tick_scale() {
        assert_eq!(TickScale::Deciseconds.to_seconds(15), 1.5);
        assert_eq!(TickScale::Milliseconds.to_seconds(1500), 1.5);
        assert_eq!(TickScale::Frames(25.0).to_seconds(50), 2.0);
    }
}
