//! Per-intersection HD-map JSON.
//!
//! Files are named `*hdmap<N>.json` and hold four top-level objects keyed by
//! feature id: `LANE`, `STOPLINE`, `CROSSWALK` and `JUNCTION`. Points are
//! stored either as `"(x, y)"` strings or as `[x, y]` arrays.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde_json::{Map, Value};

use super::{AreaFeature, Lane, LineFeature, MapError, ParsedMap, Result};
use crate::core::geometry::{downsample_with, reconstruct_lane, BBox, Point};
use crate::core::schema::safe_float;

fn map_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(\d+)").unwrap())
}

/// Extracts the numeric map id from an intersection id such as `yizhuang#4-1_po`.
pub fn map_id_from_group(group_id: &str) -> Option<u32> {
    map_id_regex()
        .captures(group_id)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Display label for an intersection id: `Intersection NN` when a map id is
/// embedded, otherwise the id itself.
pub fn intersection_label(group_id: &str) -> String {
    match map_id_from_group(group_id) {
        Some(n) => format!("Intersection {n:02}"),
        None => group_id.to_string(),
    }
}

/// Parses a point stored as `"(x, y)"`, `"x, y"` or `[x, y, ...]`.
pub fn parse_point_xy(value: &Value) -> Option<Point> {
    let num = |v: &Value| match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => safe_float(s),
        _ => None,
    };
    match value {
        Value::Array(a) if a.len() >= 2 => Some([num(&a[0])?, num(&a[1])?]),
        Value::String(s) => {
            let s = s.trim();
            let s = s
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .unwrap_or(s);
            let mut parts = s.split(',');
            let x = safe_float(parts.next()?)?;
            let y = safe_float(parts.next()?)?;
            Some([x, y])
        }
        _ => None,
    }
}

/// Finds `*hdmap<map_id>.json` in `maps_dir`, first match by name.
pub fn find_map_file(maps_dir: &Path, map_id: u32) -> Result<PathBuf> {
    let suffix = format!("hdmap{map_id}.json");
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(maps_dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&suffix))
                })
                .collect()
        })
        .unwrap_or_default();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| MapError::NotFound {
        what: format!("map_id={map_id}"),
        dir: maps_dir.display().to_string(),
    })
}

fn polyline(value: Option<&Value>, step: usize) -> Vec<Point> {
    match value {
        Some(Value::Array(items)) => downsample_with(items, step, parse_point_xy),
        _ => Vec::new(),
    }
}

fn opt_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn opt_bool(v: Option<&Value>) -> Option<bool> {
    match v? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn section<'a>(data: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    data.get(key).and_then(Value::as_object)
}

/// Parses an HD-map JSON document, downsampling every polyline by `step`.
pub fn parse_hdmap_value(data: &Value, step: usize) -> ParsedMap {
    let mut map = ParsedMap::default();
    for key in ["LANE", "STOPLINE", "CROSSWALK", "JUNCTION"] {
        map.counts.insert(key.to_string(), section(data, key).map_or(0, Map::len));
    }

    for (id, lane) in section(data, "LANE").into_iter().flatten() {
        if !lane.is_object() {
            continue;
        }
        let mut centerline = polyline(lane.get("centerline"), step);
        let left = polyline(lane.get("left_boundary"), step);
        let right = polyline(lane.get("right_boundary"), step);
        let geometry = reconstruct_lane(&left, &right);
        if centerline.is_empty() {
            centerline = geometry.centerline;
        }
        if centerline.is_empty() {
            continue;
        }
        let mut bbox = BBox::from_points(&centerline);
        bbox.merge(&BBox::from_points(&geometry.polygon));
        map.lanes.push(Lane {
            id: id.clone(),
            lane_type: opt_string(lane.get("lane_type")),
            turn_direction: opt_string(lane.get("turn_direction")),
            is_intersection: opt_bool(lane.get("is_intersection")),
            has_traffic_control: opt_bool(lane.get("has_traffic_control")),
            centerline,
            polygon: geometry.polygon,
            bbox,
        });
    }

    for (id, obj) in section(data, "STOPLINE").into_iter().flatten() {
        let cl = polyline(obj.get("centerline"), step);
        if !cl.is_empty() {
            map.stoplines.push(LineFeature::new(id.clone(), cl));
        }
    }
    for (key, out) in [("CROSSWALK", &mut map.crosswalks), ("JUNCTION", &mut map.junctions)] {
        for (id, obj) in section(data, key).into_iter().flatten() {
            let poly = polyline(obj.get("polygon"), step);
            if !poly.is_empty() {
                out.push(AreaFeature::new(id.clone(), poly));
            }
        }
    }

    map.finish()
}

/// Locates and parses the map for `map_id` below `maps_dir`.
///
/// # Errors
///
/// Returns [`MapError::NotFound`] when no `*hdmap<map_id>.json` exists, or an
/// I/O / JSON error when the file cannot be read.
pub fn load_hdmap(maps_dir: &Path, map_id: u32, step: usize) -> Result<ParsedMap> {
    let path = find_map_file(maps_dir, map_id)?;
    debug!("parsing HD map {} (step {})", path.display(), step);
    let data: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let mut map = parse_hdmap_value(&data, step);
    map.map_id = Some(map_id);
    map.map_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_map_id_and_label() {
        assert_eq!(map_id_from_group("yizhuang#4-1_po"), Some(4));
        assert_eq!(map_id_from_group("yizhuang"), None);
        assert_eq!(intersection_label("yizhuang#4-1_po"), "Intersection 04");
        assert_eq!(intersection_label("plain"), "plain");
    }

    #[test]
    fn test_parse_point_xy_forms() {
        assert_eq!(parse_point_xy(&json!("(1.5, -2)")), Some([1.5, -2.0]));
        assert_eq!(parse_point_xy(&json!("3,4")), Some([3.0, 4.0]));
        assert_eq!(parse_point_xy(&json!([5, "6"])), Some([5.0, 6.0]));
        assert_eq!(parse_point_xy(&json!("(nan, 1)")), None);
        assert_eq!(parse_point_xy(&json!([1])), None);
    }

    #[test]
    fn test_parse_hdmap_value() {
        let data = json!({
            "LANE": {
                "l1": {"centerline": ["(0, 0)", "(10, 0)"], "lane_type": "CITY_DRIVING",
                       "is_intersection": "True", "has_traffic_control": false},
                "empty": {"centerline": []}
            },
            "STOPLINE": {"s1": {"centerline": [[1, 1], [2, 1]]}},
            "CROSSWALK": {"c1": {"polygon": ["(0,5)", "(1,5)", "(1,6)"]}},
            "JUNCTION": {}
        });
        let map = parse_hdmap_value(&data, 5);
        assert_eq!(map.counts["LANE"], 2);
        assert_eq!(map.lanes.len(), 1);
        assert_eq!(map.lanes[0].is_intersection, Some(true));
        assert_eq!(map.lanes[0].has_traffic_control, Some(false));
        assert_eq!(map.stoplines.len(), 1);
        assert_eq!(map.crosswalks.len(), 1);
        assert_eq!(map.bbox, Some(BBox::new(0.0, 0.0, 10.0, 6.0)));
    }

    #[test]
    fn test_load_hdmap_finds_by_suffix() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("yizhuang_hdmap4.json"),
            json!({"LANE": {"a": {"centerline": ["(0,0)", "(1,1)"]}}}).to_string(),
        )
        .unwrap();

        let map = load_hdmap(dir.path(), 4, 5).unwrap();
        assert_eq!(map.map_id, Some(4));
        assert_eq!(map.map_file, "yizhuang_hdmap4.json");
        assert!(matches!(load_hdmap(dir.path(), 14, 5), Err(MapError::NotFound { .. })));
    }
}
