//! Vector map parsing and clipping.
//!
//! Two on-disk formats are supported: the per-intersection HD-map JSON used by
//! the cooperative trajectory datasets ([`hdmap`]) and Lanelet2 OSM-XML used by
//! the drone and signalized-intersection recordings ([`lanelet`]). Both parse
//! into a [`ParsedMap`] in the dataset's local metric frame, which [`clip`]
//! then reduces to the view shipped with a scene bundle.

pub mod clip;
pub mod hdmap;
pub mod lanelet;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::geometry::{BBox, Point};

pub use clip::{clip_for_scene, clip_map, map_consistency_warnings, ClippedMap};

/// Errors raised while locating or parsing a map.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("map file for {what} not found in {dir}")]
    NotFound { what: String, dir: String },

    #[error("I/O error reading map: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid map XML: {0}")]
    Xml(String),

    #[error("projection failed: {0}")]
    Projection(#[from] crate::core::projection::ProjectionError),
}

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, MapError>;

/// A drivable lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lane {
    pub id: String,
    pub lane_type: Option<String>,
    pub turn_direction: Option<String>,
    pub is_intersection: Option<bool>,
    pub has_traffic_control: Option<bool>,
    pub centerline: Vec<Point>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub polygon: Vec<Point>,
    #[serde(skip)]
    pub bbox: BBox,
}

/// A polyline feature such as a stop line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineFeature {
    pub id: String,
    pub centerline: Vec<Point>,
    #[serde(skip)]
    pub bbox: BBox,
}

/// A polygon feature such as a crosswalk or junction area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaFeature {
    pub id: String,
    pub polygon: Vec<Point>,
    #[serde(skip)]
    pub bbox: BBox,
}

impl LineFeature {
    pub fn new(id: String, centerline: Vec<Point>) -> Self {
        let bbox = BBox::from_points(&centerline);
        Self { id, centerline, bbox }
    }
}

impl AreaFeature {
    pub fn new(id: String, polygon: Vec<Point>) -> Self {
        let bbox = BBox::from_points(&polygon);
        Self { id, polygon, bbox }
    }
}

/// A fully parsed map in the local metric frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMap {
    pub map_id: Option<u32>,
    pub map_file: String,
    /// Raw feature counts in the source file, keyed by feature class
    pub counts: BTreeMap<String, usize>,
    pub lanes: Vec<Lane>,
    pub stoplines: Vec<LineFeature>,
    pub crosswalks: Vec<AreaFeature>,
    pub junctions: Vec<AreaFeature>,
    /// Union of all feature bboxes, `None` when the map has no geometry
    pub bbox: Option<BBox>,
}

impl ParsedMap {
    /// Recomputes the overall bbox from the parsed features.
    pub fn finish(mut self) -> Self {
        let mut b = BBox::empty();
        for lane in &self.lanes {
            b.merge(&lane.bbox);
        }
        for f in &self.stoplines {
            b.merge(&f.bbox);
        }
        for f in self.crosswalks.iter().chain(&self.junctions) {
            b.merge(&f.bbox);
        }
        self.bbox = b.valid();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_unions_feature_bboxes() {
        let map = ParsedMap {
            stoplines: vec![LineFeature::new("s".into(), vec![[0.0, 0.0], [1.0, 1.0]])],
            crosswalks: vec![AreaFeature::new("c".into(), vec![[5.0, -2.0], [6.0, 0.0], [5.0, 0.0]])],
            ..Default::default()
        }
        .finish();
        assert_eq!(map.bbox, Some(BBox::new(0.0, -2.0, 6.0, 1.0)));

        assert_eq!(ParsedMap::default().finish().bbox, None);
    }
}
