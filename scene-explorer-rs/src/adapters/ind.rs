//! Adapter for drone recordings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};

use super::bundle::{attach_map, ensure_extent, fill_frames, map_failed, LOCAL_FALLBACK_EXTENT};
use super::{AdapterError, Result, SceneBundle};
use crate::config::{roles, BundleOptions, DatasetSpec, ExplorerConfig};
use crate::core::cache::LruStore;
use crate::core::loaders::{sind_object_type, ModalityTable, ObjectRecord, Record, TickScale};
use crate::core::projection::{Projection, UtmProjection};
use crate::core::schema::{sniff_delimiter, FieldMap, IND_TRACK_FIELDS, IND_TRACK_REQUIRED};
use crate::indexing::recording::{build_index, Recording, RecordingIndex, SceneRef};
use crate::indexing::catalog::ALL_SPLIT;
use crate::indexing::SceneCatalog;
use crate::maps::lanelet::{find_location_map, load_lanelet};
use crate::maps::{MapError, ParsedMap};

/// Modality names in bundle order.
pub const MODALITIES: [&str; 2] = ["vehicle", "vru"];

/// Drone recording dataset sliced into fixed windows.
pub struct IndAdapter {
    spec: DatasetSpec,
    window_s: f64,
    index: RecordingIndex,
    maps: LruStore<MapKey, ParsedMap>,
}

/// Parsed maps are shared by recordings of one location with the same UTM
/// origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MapKey {
    location: u32,
    origin: Option<(u64, u64)>,
    step: usize,
}

/// Local UTM frame of a recording, when it is geo-referenced.
pub fn recording_projection(recording: &Recording) -> Option<Projection> {
    let meta = &recording.meta;
    let (lat, lon, origin) = (meta.lat?, meta.lon?, meta.utm_origin?);
    match UtmProjection::new(lat, lon, origin) {
        Ok(p) => Some(Projection::Utm(p)),
        Err(e) => {
            debug!("recording {}: no projection: {}", meta.id, e);
            None
        }
    }
}

/// Parses the rows of a window read, keeping frames inside `start..=end`.
pub fn parse_window(recording: &Recording, bytes: &[u8], start: i64, end: i64) -> HashMap<&'static str, ModalityTable> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut tables: HashMap<&'static str, ModalityTable> =
        MODALITIES.iter().map(|m| (*m, ModalityTable::new(true))).collect();
    let headers = match crate::core::schema::reader_headers(&mut reader) {
        Ok(h) => h,
        Err(e) => {
            debug!("recording {}: unreadable window header: {}", recording.meta.id, e);
            return tables;
        }
    };
    let fields = FieldMap::from_headers(&headers, IND_TRACK_FIELDS);
    if !fields.has_all(IND_TRACK_REQUIRED) {
        debug!(
            "recording {}: track table lacks {}",
            recording.meta.id,
            fields.missing(IND_TRACK_REQUIRED).join(", ")
        );
        return tables;
    }

    let spans: HashMap<&str, _> = recording.spans.iter().map(|s| (s.track_id.as_str(), s)).collect();
    for record in reader.records().flatten() {
        let Some(frame) = fields.int(&record, "frame").filter(|f| (start..=end).contains(f)) else {
            continue;
        };
        let Some(track_id) = fields.string(&record, "trackId") else {
            continue;
        };
        let span = spans.get(track_id.as_str());
        let modality = span.map_or("vehicle", |s| s.modality);
        let (object_type, sub_type) = sind_object_type(span.and_then(|s| s.class.as_deref()));
        let rec = ObjectRecord {
            id: Some(track_id),
            object_type: Some(object_type),
            sub_type,
            tag: Some(modality.to_string()),
            x: fields.float(&record, "xCenter"),
            y: fields.float(&record, "yCenter"),
            length: fields.float(&record, "length"),
            width: fields.float(&record, "width"),
            theta: fields.float(&record, "heading").map(f64::to_radians),
            v_x: fields.float(&record, "xVelocity"),
            v_y: fields.float(&record, "yVelocity"),
            ..Default::default()
        };
        if let Some(t) = tables.get_mut(modality) {
            t.push(frame, Record::Object(rec));
        }
    }
    tables
}

impl IndAdapter {
    /// Indexes every recording into fixed windows.
    ///
    /// The window length comes from the dataset strategy, else the
    /// configured default, and is clamped to 10–600 s.
    pub fn build(spec: DatasetSpec, config: &ExplorerConfig) -> Result<Self> {
        let window_s = spec.scene_strategy.window_s.unwrap_or(config.windows.ind_window_s);
        let index = build_index(&spec, window_s)?;
        Ok(Self {
            spec,
            window_s,
            index,
            maps: LruStore::new(config.cache.map_capacity),
        })
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    pub fn catalog(&self) -> &SceneCatalog {
        &self.index.catalog
    }

    pub fn window_s(&self) -> f64 {
        self.window_s
    }

    pub fn index(&self) -> &RecordingIndex {
        &self.index
    }

    fn scene(&self, scene_id: &str) -> Result<(SceneRef, &Recording)> {
        self.index
            .scene(scene_id)
            .and_then(|r| self.index.recording(r.recording).map(|rec| (r, rec)))
            .ok_or_else(|| AdapterError::SceneNotFound(scene_id.to_string()))
    }

    /// Background image of the recording a scene belongs to.
    pub fn scene_background(&self, scene_id: &str) -> Option<PathBuf> {
        let (_, rec) = self.scene(scene_id).ok()?;
        rec.background.clone()
    }

    fn load_map(&self, recording: &Recording, step: usize) -> crate::maps::Result<Arc<ParsedMap>> {
        let maps_dir = self.spec.dir_or(roles::MAPS_DIR, "maps");
        let location = recording.meta.location.ok_or_else(|| MapError::NotFound {
            what: format!("recording {}", recording.meta.id),
            dir: maps_dir.display().to_string(),
        })?;
        let key = MapKey {
            location,
            origin: recording.meta.utm_origin.map(|[x, y]| (x.to_bits(), y.to_bits())),
            step,
        };
        if let Some(hit) = self.maps.get(&key) {
            return Ok(hit);
        }
        let path = find_location_map(&maps_dir, location).ok_or_else(|| MapError::NotFound {
            what: format!("location {location}"),
            dir: maps_dir.display().to_string(),
        })?;
        let projection = recording_projection(recording);
        let map = Arc::new(load_lanelet(&path, projection.as_ref(), step)?);
        self.maps.put(key, Arc::clone(&map));
        Ok(map)
    }

    /// Materializes one window from the tracks overlapping it.
    pub fn load_scene_bundle(&self, _split: &str, scene_id: &str, options: &BundleOptions) -> Result<SceneBundle> {
        let (scene, recording) = self.scene(scene_id)?;
        let summary = self.index.catalog.get(ALL_SPLIT, scene_id);

        let mut bundle = SceneBundle::new(&self.spec.id, ALL_SPLIT, scene_id);
        bundle.scene_label = summary.and_then(|s| s.scene_label.clone());
        bundle.group_id = summary.and_then(|s| s.group_id.clone());
        bundle.group_label = summary.and_then(|s| s.group_label.clone());
        bundle.map_id = recording.meta.location;
        for m in MODALITIES {
            bundle.group_by_modality.insert(m.to_string(), bundle.group_id.clone());
        }

        let tables = match recording.read_window(scene.start_frame, scene.end_frame) {
            Ok(bytes) => parse_window(recording, &bytes, scene.start_frame, scene.end_frame),
            Err(e) => {
                warn!("{}: window read failed for scene {}: {}", self.spec.id, scene_id, e);
                bundle.warnings.push(format!("window_read_failed: {e}"));
                HashMap::new()
            }
        };
        let empty = ModalityTable::default();
        let views: Vec<(&str, &ModalityTable)> = MODALITIES
            .iter()
            .map(|m| (*m, tables.get(m).unwrap_or(&empty)))
            .collect();
        fill_frames(&mut bundle, &views, TickScale::Frames(recording.meta.frame_rate));
        ensure_extent(&mut bundle, LOCAL_FALLBACK_EXTENT);

        if options.include_map {
            match self.load_map(recording, options.map_points_step) {
                Ok(map) => attach_map(&mut bundle, &map, options),
                Err(MapError::NotFound { .. }) => bundle.warnings.push("map_missing".to_string()),
                Err(e) => map_failed(&mut bundle, e),
            }
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    const OSM: &str = r#"<osm>
  <node id="1"><tag k="local_x" v="0"/><tag k="local_y" v="0"/></node>
  <node id="2"><tag k="local_x" v="10"/><tag k="local_y" v="0"/></node>
  <node id="3"><tag k="local_x" v="0"/><tag k="local_y" v="4"/></node>
  <node id="4"><tag k="local_x" v="10"/><tag k="local_y" v="4"/></node>
  <way id="10"><nd ref="1"/><nd ref="2"/></way>
  <way id="11"><nd ref="3"/><nd ref="4"/></way>
  <relation id="100">
    <member type="way" role="left" ref="11"/>
    <member type="way" role="right" ref="10"/>
    <tag k="type" v="lanelet"/><tag k="subtype" v="road"/>
  </relation>
</osm>"#;

    fn write_recording(dir: &Path) -> std::io::Result<()> {
        write_recording_as(dir, "00")
    }

    fn write_recording_as(dir: &Path, prefix: &str) -> std::io::Result<()> {
        let mut meta = fs::File::create(dir.join(format!("{prefix}_recordingMeta.csv")))?;
        writeln!(meta, "recordingId,locationId,frameRate,latLocation,lonLocation,xUtmOrigin,yUtmOrigin")?;
        writeln!(meta, "{},4,25,50.78,6.07,293487.5,5629711.8", prefix.parse::<u32>().unwrap_or(0))?;

        let mut tm = fs::File::create(dir.join(format!("{prefix}_tracksMeta.csv")))?;
        writeln!(tm, "trackId,initialFrame,finalFrame,class")?;
        writeln!(tm, "0,0,1,car")?;
        writeln!(tm, "1,1,1600,pedestrian")?;

        let mut tracks = fs::File::create(dir.join(format!("{prefix}_tracks.csv")))?;
        writeln!(tracks, "trackId,frame,xCenter,yCenter,heading,width,length,xVelocity,yVelocity")?;
        writeln!(tracks, "0,0,1.0,2.0,90,1.8,4.5,1,0")?;
        writeln!(tracks, "0,1,1.5,2.0,90,1.8,4.5,1,0")?;
        writeln!(tracks, "1,1,5.0,1.0,0,0.5,0.5,0,1")?;
        writeln!(tracks, "1,1600,6.0,1.0,0,0.5,0.5,0,1")?;
        fs::write(dir.join(format!("{prefix}_background.png")), [0u8; 8])?;
        Ok(())
    }

    #[test]
    fn test_bundle_filters_to_window() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_recording(dir.path())?;
        fs::create_dir_all(dir.path().join("maps"))?;
        fs::write(dir.path().join("maps/location4.osm"), OSM)?;

        let spec = DatasetSpec::new("ind", Family::Ind, dir.path());
        let adapter = IndAdapter::build(spec, &ExplorerConfig::default())?;
        assert_eq!(adapter.catalog().total_scenes(), 2);

        let bundle = adapter.load_scene_bundle("train", "1", &BundleOptions::default())?;
        assert_eq!(bundle.split, "all");
        assert_eq!(bundle.timestamps, vec![0.0, 0.04]);
        assert_eq!(bundle.frames[1].modalities["vehicle"].len(), 1);
        assert_eq!(bundle.frames[1].modalities["vru"].len(), 1);
        assert_eq!(bundle.modality_stats["vru"].rows, 1);
        let Record::Object(car) = &bundle.frames[0].modalities["vehicle"][0] else {
            panic!("expected object record");
        };
        assert_eq!(car.object_type.as_deref(), Some("VEHICLE"));
        assert!((car.theta.unwrap() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(bundle.map.as_ref().map(|m| m.lanes.len()), Some(1));
        assert_eq!(bundle.map_id, Some(4));

        let later = adapter.load_scene_bundle("all", "2", &BundleOptions::default())?;
        assert_eq!(later.record_count(), 1);
        assert!(adapter.scene_background("2").is_some());
        Ok(())
    }

    #[test]
    fn test_recordings_of_one_location_share_map() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_recording_as(dir.path(), "00")?;
        write_recording_as(dir.path(), "01")?;
        fs::create_dir_all(dir.path().join("maps"))?;
        fs::write(dir.path().join("maps/location4.osm"), OSM)?;

        let spec = DatasetSpec::new("ind", Family::Ind, dir.path());
        let adapter = IndAdapter::build(spec, &ExplorerConfig::default())?;
        assert_eq!(adapter.catalog().total_scenes(), 4);

        // scenes 1-2 come from recording 0, scenes 3-4 from recording 1
        let first = adapter.load_scene_bundle("all", "1", &BundleOptions::default())?;
        let other = adapter.load_scene_bundle("all", "3", &BundleOptions::default())?;
        assert!(first.map.is_some() && other.map.is_some());
        assert_eq!(adapter.maps.len(), 1);

        let coarse = BundleOptions {
            map_points_step: 2,
            ..BundleOptions::default()
        };
        adapter.load_scene_bundle("all", "3", &coarse)?;
        assert_eq!(adapter.maps.len(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_map_and_unknown_scene() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_recording(dir.path())?;
        let spec = DatasetSpec::new("ind", Family::Ind, dir.path());
        let adapter = IndAdapter::build(spec, &ExplorerConfig::default())?;

        let bundle = adapter.load_scene_bundle("all", "1", &BundleOptions::default())?;
        assert!(bundle.map.is_none());
        assert!(bundle.warnings.contains(&"map_missing".to_string()));
        assert!(matches!(
            adapter.load_scene_bundle("all", "99", &BundleOptions::default()),
            Err(AdapterError::SceneNotFound(_))
        ));
        Ok(())
    }
}
