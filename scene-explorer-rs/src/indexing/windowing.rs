//! Time-window segmentation of unsegmented logs.
//!
//! Two strategies:
//!
//! * [`GapWindower`]: a single forward pass over a time-ordered log that
//!   starts a new window on a large gap between frames or when the current
//!   window reaches its duration cap, recording the byte range of each
//!   window so a scene can later be read without rescanning the file.
//! * [`fixed_windows`]: consecutive, non-overlapping frame ranges of fixed
//!   length for recordings with a known frame rate.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;
use serde::Serialize;

use super::{IndexError, Result};
use crate::core::schema::{safe_float, sample_csv, FieldMap, TextEncoding, CPM_FIELDS, CPM_REQUIRED};

/// Window segmentation parameters in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub window_ms: i64,
    pub gap_ms: i64,
    pub bin_ms: i64,
}

impl WindowPolicy {
    /// Builds a policy from seconds; the window is at least 1 s, the gap at
    /// least 0 s and the bin at least 1 ms.
    pub fn from_seconds(window_s: f64, gap_s: f64, bin_ms: i64) -> Self {
        let window_s = if window_s.is_finite() { window_s.max(1.0) } else { 1.0 };
        let gap_s = if gap_s.is_finite() { gap_s.max(0.0) } else { 0.0 };
        Self {
            window_ms: (window_s * 1000.0).round() as i64,
            gap_ms: (gap_s * 1000.0).round() as i64,
            bin_ms: bin_ms.max(1),
        }
    }

    /// Bucket a millisecond timestamp down to the bin grid.
    #[inline]
    pub fn bucket(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.bin_ms) * self.bin_ms
    }
}

/// One window of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    /// `min(last_ms, start_ms + window_ms)`
    pub end_ms: i64,
    pub first_ms: i64,
    pub last_ms: i64,
    /// Byte offset of the first row
    pub offset_start: u64,
    /// Byte offset just past the last row
    pub offset_end: u64,
    pub rows: usize,
    pub frames: usize,
}

/// Incremental gap-aware windowing over time-ordered rows.
#[derive(Debug)]
pub struct GapWindower {
    policy: WindowPolicy,
    windows: Vec<TimeWindow>,
    last_frame: Option<i64>,
}

impl GapWindower {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            windows: Vec::new(),
            last_frame: None,
        }
    }

    /// Feeds one row with timestamp `ts_ms` spanning bytes `offset..end`.
    ///
    /// A new window starts on the first row, or on a new frame whose gap to
    /// the previous frame exceeds `gap_ms`, or whose distance to the window's
    /// first frame reaches `window_ms`.
    pub fn push(&mut self, ts_ms: i64, offset: u64, end: u64) {
        let frame = self.policy.bucket(ts_ms);
        let is_new_frame = self.last_frame != Some(frame);

        let start_new = match (self.windows.last(), self.last_frame) {
            (None, _) => true,
            (Some(w), Some(last)) if is_new_frame => {
                frame - last > self.policy.gap_ms || frame - w.first_ms >= self.policy.window_ms
            }
            _ => false,
        };
        if start_new {
            self.windows.push(TimeWindow {
                start_ms: frame,
                end_ms: frame,
                first_ms: frame,
                last_ms: frame,
                offset_start: offset,
                offset_end: end,
                rows: 0,
                frames: 0,
            });
        }

        if let Some(w) = self.windows.last_mut() {
            w.rows += 1;
            if is_new_frame {
                w.frames += 1;
            }
            w.last_ms = frame;
            w.offset_end = end;
        }
        if is_new_frame {
            self.last_frame = Some(frame);
        }
    }

    /// Closes the scan and returns the windows in log order.
    pub fn finish(self) -> Vec<TimeWindow> {
        let window_ms = self.policy.window_ms;
        self.windows
            .into_iter()
            .map(|mut w| {
                w.start_ms = w.first_ms;
                w.end_ms = w.last_ms.min(w.first_ms + window_ms);
                w
            })
            .collect()
    }
}

/// Column layout of a CPM-style log, resolved from its header.
#[derive(Debug, Clone)]
pub struct LogLayout {
    pub delimiter: u8,
    pub encoding: TextEncoding,
    pub headers: Vec<String>,
    pub fields: FieldMap,
}

impl LogLayout {
    /// Sniffs delimiter and encoding and resolves the header.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingColumns`] when the time or position
    /// columns cannot be resolved.
    pub fn detect(path: &Path, overrides: &BTreeMap<String, String>) -> Result<Self> {
        let sample = sample_csv(path, 0)?;
        let fields = FieldMap::resolve(&sample.headers, CPM_FIELDS, overrides);
        let missing = fields.missing(CPM_REQUIRED);
        if !missing.is_empty() {
            return Err(IndexError::MissingColumns {
                path: path.to_path_buf(),
                columns: missing.join(", "),
            });
        }
        Ok(Self {
            delimiter: sample.delimiter,
            encoding: sample.encoding,
            headers: sample.headers,
            fields,
        })
    }

    /// True when rows of several physical sensors share the log.
    pub fn is_multiplexed(&self) -> bool {
        self.fields.has("sensorID")
    }
}

/// Windows of one physical sensor stream within a log.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorStream {
    /// Sensor value for multiplexed logs, `None` otherwise
    pub sensor: Option<String>,
    pub windows: Vec<TimeWindow>,
}

/// Result of scanning one log.
#[derive(Debug, Clone)]
pub struct LogScan {
    /// Raw header line, without the line terminator
    pub header: String,
    pub streams: Vec<SensorStream>,
    pub rows: usize,
    pub skipped: usize,
}

pub(crate) fn field<'a>(line: &'a [u8], delimiter: u8, idx: usize) -> Option<&'a str> {
    let raw = line.split(|b| *b == delimiter).nth(idx)?;
    let s = std::str::from_utf8(raw).ok()?.trim();
    let s = s.trim_matches('"').trim();
    (!s.is_empty()).then_some(s)
}

pub(crate) fn parse_ms(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| safe_float(s).map(|v| v.round() as i64))
}

pub(crate) fn trim_eol(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Scans a log once, windowing each sensor stream independently.
///
/// Rows whose timestamp does not parse are skipped. Byte offsets refer to
/// the raw file, so a window can be re-read with [`read_window_bytes`].
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn scan_log(path: &Path, layout: &LogLayout, policy: WindowPolicy) -> Result<LogScan> {
    let ts_idx = layout.fields.get("generationTime_ms").ok_or_else(|| IndexError::MissingColumns {
        path: path.to_path_buf(),
        columns: "generationTime_ms".to_string(),
    })?;
    let sensor_idx = layout.fields.get("sensorID");

    let mut reader = BufReader::new(File::open(path)?);
    let mut line: Vec<u8> = Vec::with_capacity(256);

    let mut pos = reader.read_until(b'\n', &mut line)? as u64;
    let header = String::from_utf8_lossy(trim_eol(&line))
        .trim_start_matches('\u{feff}')
        .to_string();

    let mut windowers: BTreeMap<Option<String>, GapWindower> = BTreeMap::new();
    let mut rows = 0usize;
    let mut skipped = 0usize;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        let start = pos;
        pos += n as u64;

        let body = trim_eol(&line);
        if body.is_empty() {
            continue;
        }
        let Some(ts) = field(body, layout.delimiter, ts_idx).and_then(parse_ms) else {
            skipped += 1;
            continue;
        };
        let sensor = sensor_idx.and_then(|i| field(body, layout.delimiter, i)).map(str::to_string);
        windowers
            .entry(sensor)
            .or_insert_with(|| GapWindower::new(policy))
            .push(ts, start, pos);
        rows += 1;
    }

    if skipped > 0 {
        debug!("{}: skipped {} rows without a usable timestamp", path.display(), skipped);
    }

    let streams: Vec<SensorStream> = windowers
        .into_iter()
        .map(|(sensor, w)| SensorStream {
            sensor,
            windows: w.finish(),
        })
        .collect();

    Ok(LogScan {
        header,
        streams,
        rows,
        skipped,
    })
}

/// Reads the raw bytes of a window.
pub fn read_window_bytes(path: &Path, window: &TimeWindow) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(window.offset_start))?;
    let len = window.offset_end.saturating_sub(window.offset_start);
    let mut buf = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Consecutive non-overlapping frame windows covering `min_frame..=max_frame`.
///
/// Each window spans `round(window_s * frame_rate)` frames (at least one);
/// the last window ends at `max_frame`.
pub fn fixed_windows(min_frame: i64, max_frame: i64, frame_rate: f64, window_s: f64) -> Vec<(i64, i64)> {
    if max_frame < min_frame {
        return Vec::new();
    }
    let len = if frame_rate.is_finite() && window_s.is_finite() {
        ((window_s * frame_rate).round() as i64).max(1)
    } else {
        1
    };
    let mut out = Vec::new();
    let mut start = min_frame;
    while start <= max_frame {
        let end = (start + len - 1).min(max_frame);
        out.push((start, end));
        start = end + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn windows_of(ts: &[i64], policy: WindowPolicy) -> Vec<TimeWindow> {
        let mut w = GapWindower::new(policy);
        for (i, t) in ts.iter().enumerate() {
            w.push(*t, i as u64 * 10, i as u64 * 10 + 10);
        }
        w.finish()
    }

    #[test]
    fn test_gap_splits_windows() {
        let policy = WindowPolicy::from_seconds(300.0, 1.0, 1);
        let windows = windows_of(&[0, 100, 200, 50000, 50100], policy);
        assert_eq!(windows.len(), 2);
        assert_eq!((windows[0].first_ms, windows[0].last_ms, windows[0].frames), (0, 200, 3));
        assert_eq!((windows[1].first_ms, windows[1].last_ms, windows[1].frames), (50000, 50100, 2));
        assert_eq!((windows[1].offset_start, windows[1].offset_end), (30, 50));
    }

    #[test]
    fn test_duration_cap_splits_windows() {
        let policy = WindowPolicy::from_seconds(1.0, 10.0, 1);
        let windows = windows_of(&[0, 400, 800, 1000, 1200], policy);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].last_ms, 800);
        assert_eq!(windows[1].first_ms, 1000);
    }

    #[test]
    fn test_rows_in_same_bin_share_a_frame() {
        let policy = WindowPolicy::from_seconds(300.0, 120.0, 100);
        let windows = windows_of(&[1000, 1020, 1090, 1100], policy);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].rows, 4);
        assert_eq!(windows[0].frames, 2);
        assert_eq!(windows[0].end_ms, 1100);
    }

    #[test]
    fn test_policy_clamps() {
        let p = WindowPolicy::from_seconds(0.0, -5.0, 0);
        assert_eq!((p.window_ms, p.gap_ms, p.bin_ms), (1000, 0, 1));
        assert_eq!(p.bucket(-3), -3);
        let p = WindowPolicy::from_seconds(1.0, 0.0, 100);
        assert_eq!(p.bucket(-1), -100);
    }

    #[test]
    fn test_fixed_windows() {
        assert_eq!(fixed_windows(0, 2499, 25.0, 60.0), vec![(0, 1499), (1500, 2499)]);
        assert_eq!(fixed_windows(0, 9, 25.0, 60.0), vec![(0, 9)]);
        assert!(fixed_windows(5, 4, 25.0, 60.0).is_empty());
    }

    #[test]
    fn test_scan_log_offsets_and_sensors() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "generationTime_ms,rsu_id,objectID,xDistance_m,yDistance_m")?;
        writeln!(file, "1000,a,1,1,1")?;
        writeln!(file, "1000,b,2,1,1")?;
        writeln!(file, "bad,a,1,1,1")?;
        writeln!(file, "1100,a,1,1,1")?;
        writeln!(file, "900000,a,1,1,1")?;
        file.flush()?;

        let layout = LogLayout::detect(file.path(), &BTreeMap::new())?;
        assert!(layout.is_multiplexed());
        let scan = scan_log(file.path(), &layout, WindowPolicy::from_seconds(300.0, 120.0, 100))?;
        assert_eq!(scan.rows, 4);
        assert_eq!(scan.skipped, 1);
        assert!(scan.header.starts_with("generationTime_ms"));

        let a = &scan.streams[0];
        assert_eq!(a.sensor.as_deref(), Some("a"));
        assert_eq!(a.windows.len(), 2);
        assert_eq!(a.windows[0].rows, 2);

        let bytes = read_window_bytes(file.path(), &a.windows[1])?;
        assert_eq!(bytes, b"900000,a,1,1,1\n");
        let b = &scan.streams[1];
        assert_eq!(b.windows.len(), 1);
        let bytes = read_window_bytes(file.path(), &b.windows[0])?;
        assert_eq!(bytes, b"1000,b,2,1,1\n");
        Ok(())
    }
}
