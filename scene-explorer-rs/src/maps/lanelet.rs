//! Lanelet2 OSM-XML maps.
//!
//! Nodes carry WGS84 `lat`/`lon` attributes and may also carry `local_x` /
//! `local_y` tags; ways list node refs; relations tie ways together. The
//! feature classes extracted are:
//!
//! * `type=lanelet` relations: left/right member ways become a lane polygon
//!   and centerline (subtype `crosswalk` goes to crosswalks instead)
//! * `type=stop_line` ways: stoplines
//! * `type=multipolygon` / `type=area` relations: junction areas from their
//!   outer ways

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use walkdir::WalkDir;

use super::{AreaFeature, Lane, LineFeature, MapError, ParsedMap, Result};
use crate::core::geometry::{close_ring, downsample_polyline, reconstruct_lane, BBox, Point};
use crate::core::projection::Projection;
use crate::core::schema::safe_float;

#[derive(Debug, Default)]
struct RawNode {
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    local_x: Option<f64>,
    local_y: Option<f64>,
}

#[derive(Debug, Default)]
struct RawWay {
    id: i64,
    refs: Vec<i64>,
    tags: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct RawRelation {
    id: i64,
    /// (member type, role, ref)
    members: Vec<(String, String, i64)>,
    tags: HashMap<String, String>,
}

enum Open {
    Node(RawNode),
    Way(RawWay),
    Relation(RawRelation),
}

#[derive(Default)]
struct RawOsm {
    nodes: Vec<RawNode>,
    ways: Vec<RawWay>,
    relations: Vec<RawRelation>,
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn attr_i64(e: &BytesStart, name: &[u8]) -> Option<i64> {
    attr(e, name).and_then(|v| v.trim().parse().ok())
}

fn attr_f64(e: &BytesStart, name: &[u8]) -> Option<f64> {
    attr(e, name).and_then(|v| safe_float(&v))
}

fn close(open: Open, raw: &mut RawOsm) {
    match open {
        Open::Node(n) => raw.nodes.push(n),
        Open::Way(w) => raw.ways.push(w),
        Open::Relation(r) => raw.relations.push(r),
    }
}

fn read_osm(text: &str) -> Result<RawOsm> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut raw = RawOsm::default();
    let mut open: Option<Open> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| MapError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.name().as_ref() {
                    b"node" => {
                        let node = RawNode {
                            id: attr_i64(e, b"id").unwrap_or_default(),
                            lat: attr_f64(e, b"lat"),
                            lon: attr_f64(e, b"lon"),
                            ..Default::default()
                        };
                        open = Some(Open::Node(node));
                    }
                    b"way" => {
                        open = Some(Open::Way(RawWay {
                            id: attr_i64(e, b"id").unwrap_or_default(),
                            ..Default::default()
                        }));
                    }
                    b"relation" => {
                        open = Some(Open::Relation(RawRelation {
                            id: attr_i64(e, b"id").unwrap_or_default(),
                            ..Default::default()
                        }));
                    }
                    b"tag" => {
                        if let (Some(k), Some(v)) = (attr(e, b"k"), attr(e, b"v")) {
                            match open.as_mut() {
                                Some(Open::Node(n)) => match k.as_str() {
                                    "local_x" => n.local_x = safe_float(&v),
                                    "local_y" => n.local_y = safe_float(&v),
                                    _ => {}
                                },
                                Some(Open::Way(w)) => {
                                    w.tags.insert(k, v);
                                }
                                Some(Open::Relation(r)) => {
                                    r.tags.insert(k, v);
                                }
                                None => {}
                            }
                        }
                    }
                    b"nd" => {
                        if let (Some(Open::Way(w)), Some(r)) = (open.as_mut(), attr_i64(e, b"ref")) {
                            w.refs.push(r);
                        }
                    }
                    b"member" => {
                        if let (Some(Open::Relation(rel)), Some(r)) = (open.as_mut(), attr_i64(e, b"ref")) {
                            rel.members.push((
                                attr(e, b"type").unwrap_or_default(),
                                attr(e, b"role").unwrap_or_default(),
                                r,
                            ));
                        }
                    }
                    _ => {}
                }
                let is_element = matches!(e.name().as_ref(), b"node" | b"way" | b"relation");
                if is_empty && is_element {
                    if let Some(o) = open.take() {
                        close(o, &mut raw);
                    }
                }
            }
            Event::End(ref e) => {
                if matches!(e.name().as_ref(), b"node" | b"way" | b"relation") {
                    if let Some(o) = open.take() {
                        close(o, &mut raw);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(raw)
}

/// Parses Lanelet2 OSM-XML text into the local frame.
///
/// Node positions come from `local_x`/`local_y` tags when both are present,
/// otherwise from `lat`/`lon` through `projection`. Nodes with neither are
/// dropped, as are ways that lose all their nodes.
pub fn parse_lanelet_str(text: &str, projection: Option<&Projection>, step: usize) -> Result<ParsedMap> {
    let raw = read_osm(text)?;

    let mut nodes: HashMap<i64, Point> = HashMap::with_capacity(raw.nodes.len());
    let mut unplaced = 0usize;
    for n in &raw.nodes {
        let p = match (n.local_x, n.local_y, n.lat, n.lon, projection) {
            (Some(x), Some(y), ..) => Some([x, y]),
            (_, _, Some(lat), Some(lon), Some(proj)) => Some(proj.project(lat, lon)?),
            _ => None,
        };
        match p {
            Some(p) => {
                nodes.insert(n.id, p);
            }
            None => unplaced += 1,
        }
    }
    if unplaced > 0 {
        debug!("{} lanelet nodes had no usable position", unplaced);
    }

    let ways: HashMap<i64, &RawWay> = raw.ways.iter().map(|w| (w.id, w)).collect();
    let way_points = |id: i64| -> Vec<Point> {
        ways.get(&id)
            .map(|w| w.refs.iter().filter_map(|r| nodes.get(r).copied()).collect())
            .unwrap_or_default()
    };

    let mut map = ParsedMap::default();
    let mut lanelet_count = 0usize;
    let mut multipolygon_count = 0usize;

    for rel in &raw.relations {
        let rel_type = rel.tags.get("type").map(String::as_str);
        match rel_type {
            Some("lanelet") => {
                lanelet_count += 1;
                let member = |role: &str| {
                    rel.members
                        .iter()
                        .find(|(t, r, _)| t == "way" && r == role)
                        .map(|(_, _, id)| downsample_polyline(&way_points(*id), step))
                        .unwrap_or_default()
                };
                let geometry = reconstruct_lane(&member("left"), &member("right"));
                let subtype = rel.tags.get("subtype").cloned();
                if subtype.as_deref() == Some("crosswalk") {
                    if !geometry.polygon.is_empty() {
                        map.crosswalks.push(AreaFeature::new(rel.id.to_string(), geometry.polygon));
                    }
                    continue;
                }
                if geometry.centerline.is_empty() {
                    continue;
                }
                let mut bbox = BBox::from_points(&geometry.centerline);
                bbox.merge(&BBox::from_points(&geometry.polygon));
                map.lanes.push(Lane {
                    id: rel.id.to_string(),
                    lane_type: subtype,
                    turn_direction: rel.tags.get("turn_direction").cloned(),
                    is_intersection: None,
                    has_traffic_control: None,
                    centerline: geometry.centerline,
                    polygon: geometry.polygon,
                    bbox,
                });
            }
            Some("multipolygon") | Some("area") => {
                multipolygon_count += 1;
                let mut ring: Vec<Point> = Vec::new();
                for (t, role, id) in &rel.members {
                    if t != "way" || !(role == "outer" || role.is_empty()) {
                        continue;
                    }
                    for p in way_points(*id) {
                        if ring.last() != Some(&p) {
                            ring.push(p);
                        }
                    }
                }
                let ring = downsample_polyline(&ring, step);
                if ring.len() >= 3 {
                    map.junctions.push(AreaFeature::new(rel.id.to_string(), close_ring(ring)));
                }
            }
            _ => {}
        }
    }

    let mut stopline_count = 0usize;
    for w in &raw.ways {
        if w.tags.get("type").map(String::as_str) == Some("stop_line") {
            stopline_count += 1;
            let pts = downsample_polyline(&way_points(w.id), step);
            if pts.len() >= 2 {
                map.stoplines.push(LineFeature::new(w.id.to_string(), pts));
            }
        }
    }

    map.counts.insert("LANE".into(), lanelet_count.saturating_sub(map.crosswalks.len()));
    map.counts.insert("STOPLINE".into(), stopline_count);
    map.counts.insert("CROSSWALK".into(), map.crosswalks.len());
    map.counts.insert("JUNCTION".into(), multipolygon_count);
    Ok(map.finish())
}

/// Reads and parses a Lanelet2 OSM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not well-formed XML, or a
/// node cannot be projected.
pub fn load_lanelet(path: &Path, projection: Option<&Projection>, step: usize) -> Result<ParsedMap> {
    debug!("parsing lanelet map {} (step {})", path.display(), step);
    let text = std::fs::read_to_string(path)?;
    let mut map = parse_lanelet_str(&text, projection, step)?;
    map.map_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if map.bbox.is_none() {
        warn!("lanelet map {} produced no geometry", path.display());
    }
    Ok(map)
}

fn stem_names_location(stem: &str, location: u32) -> bool {
    let stem = stem.to_ascii_lowercase();
    let key = format!("location{location}");
    stem.match_indices(&key).any(|(i, _)| {
        !stem[i + key.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    })
}

/// Finds the lanelet map for a recording location below `maps_dir`.
///
/// An `*.osm` file matches when its stem contains `location<N>` or one of
/// its parent directories (below `maps_dir`) starts with `<NN>_`.
pub fn find_location_map(maps_dir: &Path, location: u32) -> Option<PathBuf> {
    let dir_prefix = format!("{location:02}_");
    let mut found: Vec<PathBuf> = WalkDir::new(maps_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("osm"))
        .filter(|p| {
            let by_stem = p
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| stem_names_location(s, location));
            let by_dir = p
                .strip_prefix(maps_dir)
                .ok()
                .and_then(Path::parent)
                .is_some_and(|rel| {
                    rel.components()
                        .any(|c| c.as_os_str().to_string_lossy().starts_with(&dir_prefix))
                });
            by_stem || by_dir
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::Equirectangular;
    use std::fs;
    use tempfile::tempdir;

    const OSM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="0" lon="0"><tag k="local_x" v="0"/><tag k="local_y" v="0"/></node>
  <node id="2" lat="0" lon="0"><tag k="local_x" v="10"/><tag k="local_y" v="0"/></node>
  <node id="3" lat="0" lon="0"><tag k="local_x" v="0"/><tag k="local_y" v="4"/></node>
  <node id="4" lat="0" lon="0"><tag k="local_x" v="10"/><tag k="local_y" v="4"/></node>
  <node id="5" lat="0" lon="0"/>
  <way id="10"><nd ref="1"/><nd ref="2"/></way>
  <way id="11"><nd ref="3"/><nd ref="4"/></way>
  <way id="12"><nd ref="2"/><nd ref="4"/><tag k="type" v="stop_line"/></way>
  <way id="13"><nd ref="1"/><nd ref="2"/><nd ref="4"/><nd ref="3"/></way>
  <relation id="100">
    <member type="way" role="left" ref="11"/>
    <member type="way" role="right" ref="10"/>
    <tag k="type" v="lanelet"/><tag k="subtype" v="road"/>
  </relation>
  <relation id="101">
    <member type="way" role="left" ref="11"/>
    <member type="way" role="right" ref="10"/>
    <tag k="type" v="lanelet"/><tag k="subtype" v="crosswalk"/>
  </relation>
  <relation id="102">
    <member type="way" role="outer" ref="13"/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>"#;

    #[test]
    fn test_parse_lanelet_features() {
        let map = parse_lanelet_str(OSM, None, 5).unwrap();
        assert_eq!(map.lanes.len(), 1);
        let lane = &map.lanes[0];
        assert_eq!(lane.lane_type.as_deref(), Some("road"));
        assert_eq!(lane.centerline.first(), Some(&[0.0, 2.0]));
        assert_eq!(lane.centerline.last(), Some(&[10.0, 2.0]));
        assert_eq!(lane.polygon.first(), lane.polygon.last());

        assert_eq!(map.crosswalks.len(), 1);
        assert_eq!(map.stoplines.len(), 1);
        assert_eq!(map.junctions.len(), 1);
        assert_eq!(map.junctions[0].polygon.len(), 5);
        assert_eq!(map.counts["LANE"], 1);
        assert_eq!(map.bbox, Some(BBox::new(0.0, 0.0, 10.0, 4.0)));
    }

    #[test]
    fn test_parse_lanelet_projects_lat_lon() {
        let osm = r#"<osm>
  <node id="1" lat="49.0" lon="8.0"/>
  <node id="2" lat="49.0" lon="8.001"/>
  <way id="7"><nd ref="1"/><nd ref="2"/><tag k="type" v="stop_line"/></way>
</osm>"#;
        let proj = Projection::Equirectangular(Equirectangular::new(49.0, 8.0).unwrap());
        let map = parse_lanelet_str(osm, Some(&proj), 1).unwrap();
        let line = &map.stoplines[0].centerline;
        assert!(line[0][0].abs() < 1e-9);
        assert!(line[1][0] > 70.0 && line[1][0] < 75.0);

        // Without a projection the lat/lon-only nodes are dropped.
        let map = parse_lanelet_str(osm, None, 1).unwrap();
        assert!(map.stoplines.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(matches!(parse_lanelet_str("<osm><node></way></osm>", None, 1), Err(MapError::Xml(_))));
    }

    #[test]
    fn test_find_location_map() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("lanelets").join("01_bendplatz");
        fs::create_dir_all(&a).unwrap();
        fs::write(a.join("bendplatz.osm"), OSM).unwrap();
        fs::write(dir.path().join("location12.osm"), OSM).unwrap();

        let found = find_location_map(dir.path(), 1).unwrap();
        assert!(found.ends_with("01_bendplatz/bendplatz.osm"));
        assert!(find_location_map(dir.path(), 12).unwrap().ends_with("location12.osm"));
        assert!(find_location_map(dir.path(), 2).is_none());
    }
}
