//! Map clipping and scene/map consistency checks.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{AreaFeature, Lane, LineFeature, ParsedMap};
use crate::config::{BundleOptions, MapClip};
use crate::core::geometry::{dist2, BBox, Point};

/// The map view attached to a scene bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClippedMap {
    pub map_id: Option<u32>,
    pub map_file: String,
    pub lanes_truncated: bool,
    pub lanes: Vec<Lane>,
    pub stoplines: Vec<LineFeature>,
    pub crosswalks: Vec<AreaFeature>,
    pub junctions: Vec<AreaFeature>,
    pub clip_mode: MapClip,
    pub clip_extent: BBox,
    pub points_step: usize,
    pub bbox: Option<BBox>,
    pub counts: BTreeMap<String, usize>,
}

/// Clips `map` to `extent`.
///
/// Features whose bbox intersects `extent` are kept. When more than
/// `max_lanes` lanes remain (and `max_lanes > 0`), only the lanes whose bbox
/// center is nearest to `focus` (default: extent center) are kept and
/// `lanes_truncated` is set.
pub fn clip_map(map: &ParsedMap, extent: &BBox, max_lanes: usize, focus: Option<Point>) -> ClippedMap {
    let mut lanes: Vec<&Lane> = map.lanes.iter().filter(|l| l.bbox.intersects(extent)).collect();

    let mut lanes_truncated = false;
    if max_lanes > 0 && lanes.len() > max_lanes {
        let focus = focus.or_else(|| extent.center()).unwrap_or([0.0, 0.0]);
        let key = |l: &Lane| l.bbox.center().map_or(f64::INFINITY, |c| dist2(c, focus));
        lanes.sort_by(|a, b| key(a).total_cmp(&key(b)));
        lanes.truncate(max_lanes);
        lanes_truncated = true;
    }

    ClippedMap {
        map_id: map.map_id,
        map_file: map.map_file.clone(),
        lanes_truncated,
        lanes: lanes.into_iter().cloned().collect(),
        stoplines: map.stoplines.iter().filter(|f| f.bbox.intersects(extent)).cloned().collect(),
        crosswalks: map.crosswalks.iter().filter(|f| f.bbox.intersects(extent)).cloned().collect(),
        junctions: map.junctions.iter().filter(|f| f.bbox.intersects(extent)).cloned().collect(),
        clip_mode: MapClip::Intersection,
        clip_extent: *extent,
        points_step: 0,
        bbox: map.bbox,
        counts: map.counts.clone(),
    }
}

/// Clips `map` for a scene according to the bundle options.
///
/// `scene` clips to the padded scene extent; `intersection` clips to the
/// padded map bbox (or the padded scene extent when the map is empty). The
/// focus is the scene center.
pub fn clip_for_scene(map: &ParsedMap, scene_extent: &BBox, options: &BundleOptions) -> ClippedMap {
    let clip_extent = match (options.map_clip, map.bbox) {
        (MapClip::Intersection, Some(b)) => b.padded(options.map_padding),
        _ => scene_extent.padded(options.map_padding),
    };
    let mut clipped = clip_map(map, &clip_extent, options.max_lanes, scene_extent.center());
    clipped.clip_mode = options.map_clip;
    clipped.points_step = options.map_points_step;
    clipped
}

/// Warnings for a scene whose extent does not sit on its map.
pub fn map_consistency_warnings(map_bbox: Option<&BBox>, scene_extent: &BBox) -> Vec<String> {
    let mut out = Vec::new();
    let Some(mb) = map_bbox.filter(|b| b.is_valid()) else {
        return out;
    };
    if !mb.intersects(scene_extent) {
        out.push("scene_outside_map_bbox".to_string());
    }
    if let Some(c) = scene_extent.center() {
        if !mb.contains(c) {
            out.push("scene_center_outside_map_bbox".to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane_at(id: &str, x: f64) -> Lane {
        let centerline = vec![[x - 0.5, 0.0], [x + 0.5, 0.0]];
        Lane {
            id: id.to_string(),
            lane_type: None,
            turn_direction: None,
            is_intersection: None,
            has_traffic_control: None,
            bbox: BBox::from_points(&centerline),
            centerline,
            polygon: Vec::new(),
        }
    }

    fn sample_map() -> ParsedMap {
        ParsedMap {
            lanes: vec![lane_at("far", 9.0), lane_at("near", 1.0), lane_at("mid", 5.0), lane_at("out", 500.0)],
            stoplines: vec![LineFeature::new("s".into(), vec![[0.0, 1.0], [1.0, 1.0]])],
            ..Default::default()
        }
        .finish()
    }

    #[test]
    fn test_clip_truncates_to_nearest_lanes() {
        let map = sample_map();
        let extent = BBox::new(-20.0, -20.0, 20.0, 20.0);
        let clipped = clip_map(&map, &extent, 2, Some([0.0, 0.0]));

        assert!(clipped.lanes_truncated);
        let ids: Vec<&str> = clipped.lanes.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(clipped.stoplines.len(), 1);
    }

    #[test]
    fn test_clip_unlimited_lanes() {
        let map = sample_map();
        let extent = BBox::new(-20.0, -20.0, 20.0, 20.0);
        let clipped = clip_map(&map, &extent, 0, None);
        assert!(!clipped.lanes_truncated);
        assert_eq!(clipped.lanes.len(), 3);
    }

    #[test]
    fn test_clip_for_scene_modes() {
        let map = sample_map();
        let scene = BBox::new(0.0, -1.0, 2.0, 1.0);
        let mut options = BundleOptions {
            map_padding: 1.0,
            ..Default::default()
        };

        let clipped = clip_for_scene(&map, &scene, &options);
        assert_eq!(clipped.lanes.len(), 4);
        assert_eq!(clipped.clip_mode, MapClip::Intersection);

        options.map_clip = MapClip::Scene;
        let clipped = clip_for_scene(&map, &scene, &options);
        let ids: Vec<&str> = clipped.lanes.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["near"]);
        assert_eq!(clipped.clip_extent, BBox::new(-1.0, -2.0, 3.0, 2.0));
        assert_eq!(clipped.points_step, 5);
    }

    #[test]
    fn test_consistency_warnings() {
        let mb = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(map_consistency_warnings(Some(&mb), &BBox::new(1.0, 1.0, 2.0, 2.0)).is_empty());
        assert_eq!(
            map_consistency_warnings(Some(&mb), &BBox::new(8.0, 8.0, 20.0, 20.0)),
            vec!["scene_center_outside_map_bbox"]
        );
        assert_eq!(
            map_consistency_warnings(Some(&mb), &BBox::new(50.0, 50.0, 60.0, 60.0)),
            vec!["scene_outside_map_bbox", "scene_center_outside_map_bbox"]
        );
        assert!(map_consistency_warnings(None, &BBox::new(50.0, 50.0, 60.0, 60.0)).is_empty());
    }
}
