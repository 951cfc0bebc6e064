//! Adapter for signalized-intersection scenario folders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use super::bundle::{attach_map, ensure_extent, fill_frames, map_failed, LOCAL_FALLBACK_EXTENT};
use super::{AdapterError, Result, SceneBundle};
use crate::config::{BundleOptions, CacheConfig, DatasetSpec};
use crate::core::cache::LruStore;
use crate::core::loaders::{load_sind_signal_table, load_sind_track_table, ModalityTable, TickScale};
use crate::core::projection::{Equirectangular, Projection};
use crate::indexing::catalog::ALL_SPLIT;
use crate::indexing::scenario::{build_index, ScenarioIndex, MODALITIES};
use crate::indexing::SceneCatalog;
use crate::maps::lanelet::load_lanelet;
use crate::maps::ParsedMap;

/// Scenario-folder dataset grouped by city.
pub struct SindAdapter {
    spec: DatasetSpec,
    index: ScenarioIndex,
    tables: LruStore<PathBuf, ModalityTable>,
    maps: LruStore<(String, usize), ParsedMap>,
}

impl SindAdapter {
    pub fn build(spec: DatasetSpec, cache: &CacheConfig) -> Result<Self> {
        let index = build_index(&spec)?;
        Ok(Self {
            spec,
            index,
            tables: LruStore::new(cache.table_capacity),
            maps: LruStore::new(cache.map_capacity),
        })
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    pub fn catalog(&self) -> &SceneCatalog {
        &self.index.catalog
    }

    pub fn index(&self) -> &ScenarioIndex {
        &self.index
    }

    /// Background image of the scenario's city.
    pub fn scene_background(&self, scene_id: &str) -> Option<PathBuf> {
        let scenario = self.index.scenario(scene_id)?;
        self.index.city(&scenario.city)?.background.clone()
    }

    /// Projection for lat/lon-only map nodes: equirectangular about the
    /// city's geo origin, if one is configured.
    pub fn city_projection(&self, city: &str) -> Option<Projection> {
        let origin = self.spec.origin_for(Some(city))?;
        match Equirectangular::new(origin.lat, origin.lon) {
            Ok(p) => Some(Projection::Equirectangular(p)),
            Err(e) => {
                debug!("{}: bad geo origin for {}: {}", self.spec.id, city, e);
                None
            }
        }
    }

    fn load_table(&self, modality: &str, path: &Path) -> crate::core::loaders::Result<Arc<ModalityTable>> {
        let key = path.to_path_buf();
        if let Some(hit) = self.tables.get(&key) {
            return Ok(hit);
        }
        let table = if modality == "traffic_light" {
            load_sind_signal_table(path)?
        } else {
            load_sind_track_table(path)?
        };
        let table = Arc::new(table);
        self.tables.put(key, Arc::clone(&table));
        Ok(table)
    }

    fn load_map(&self, city: &str, path: &Path, step: usize) -> crate::maps::Result<Arc<ParsedMap>> {
        let key = (city.to_string(), step);
        if let Some(hit) = self.maps.get(&key) {
            return Ok(hit);
        }
        let projection = self.city_projection(city);
        let map = Arc::new(load_lanelet(path, projection.as_ref(), step)?);
        self.maps.put(key, Arc::clone(&map));
        Ok(map)
    }

    /// Materializes one scenario folder.
    pub fn load_scene_bundle(&self, _split: &str, scene_id: &str, options: &BundleOptions) -> Result<SceneBundle> {
        let scenario = self
            .index
            .scenario(scene_id)
            .ok_or_else(|| AdapterError::SceneNotFound(scene_id.to_string()))?;

        let mut bundle = SceneBundle::new(&self.spec.id, ALL_SPLIT, scene_id);
        bundle.scene_label = Some(format!("{} · {}", scenario.city, scenario.name));
        bundle.city = Some(scenario.city.clone());
        bundle.group_id = Some(scenario.city.clone());
        bundle.group_label = Some(scenario.city.clone());

        let empty = Arc::new(ModalityTable::default());
        let mut loaded: Vec<(&str, Arc<ModalityTable>)> = Vec::with_capacity(MODALITIES.len());
        for m in MODALITIES {
            bundle.group_by_modality.insert(m.to_string(), Some(scenario.city.clone()));
            let table = match scenario.file(m) {
                None => {
                    bundle.warnings.push(format!("{m}_missing_file"));
                    Arc::clone(&empty)
                }
                Some(path) => match self.load_table(m, path) {
                    Ok(t) => {
                        if t.is_empty() {
                            bundle.warnings.push(format!("{m}_empty"));
                        }
                        t
                    }
                    Err(e) => {
                        debug!("{}: {} unreadable: {}", self.spec.id, path.display(), e);
                        bundle.warnings.push(format!("{m}_load_failed: {e}"));
                        Arc::clone(&empty)
                    }
                },
            };
            loaded.push((m, table));
        }

        let views: Vec<(&str, &ModalityTable)> = loaded.iter().map(|(n, t)| (*n, t.as_ref())).collect();
        fill_frames(&mut bundle, &views, TickScale::Deciseconds);
        ensure_extent(&mut bundle, LOCAL_FALLBACK_EXTENT);

        if options.include_map {
            match self.index.city(&scenario.city).and_then(|c| c.map.as_deref()) {
                Some(path) => match self.load_map(&scenario.city, path, options.map_points_step) {
                    Ok(map) => attach_map(&mut bundle, &map, options),
                    Err(e) => map_failed(&mut bundle, e),
                },
                None => bundle.warnings.push("map_missing".to_string()),
            }
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Family, GeoOrigin};
    use crate::core::loaders::Record;
    use std::fs;
    use tempfile::tempdir;

    const OSM: &str = r#"<osm>
  <node id="1" lat="39.0" lon="117.0"/>
  <node id="2" lat="39.0" lon="117.0002"/>
  <way id="7"><nd ref="1"/><nd ref="2"/><tag k="type" v="stop_line"/></way>
</osm>"#;

    fn write_city(root: &Path) -> std::io::Result<()> {
        let scenario = root.join("Tianjin/8_02_1");
        fs::create_dir_all(&scenario)?;
        fs::write(
            scenario.join("Veh_smoothed_tracks.csv"),
            "track_id,frame_id,timestamp_ms,agent_type,x,y,vx,vy,yaw_rad,length,width\n\
             1,1,100,car,1,2,1,0,0.5,4.5,1.8\n\
             1,2,200,car,2,2,1,0,0.5,4.5,1.8\n",
        )?;
        fs::write(
            scenario.join("TrafficLight_8_02_1.csv"),
            "RawFrameID,timestamp(ms),Traffic light 1,Traffic light 2\n0,300,1,0\n",
        )?;
        fs::write(root.join("Tianjin/map.osm"), OSM)?;
        fs::write(root.join("Tianjin/bg.png"), [0u8; 4])?;
        Ok(())
    }

    #[test]
    fn test_bundle_scenario() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_city(dir.path())?;
        let mut spec = DatasetSpec::new("sind", Family::Sind, dir.path());
        spec.geo_origin = Some(GeoOrigin { lat: 39.0, lon: 117.0 });
        let adapter = SindAdapter::build(spec, &CacheConfig::default())?;

        let bundle = adapter.load_scene_bundle("val", "1", &BundleOptions::default())?;
        assert_eq!(bundle.split, "all");
        assert_eq!(bundle.city.as_deref(), Some("Tianjin"));
        assert_eq!(bundle.timestamps, vec![0.1, 0.2, 0.3]);
        assert!(bundle.warnings.contains(&"pedestrian_missing_file".to_string()));
        assert_eq!(bundle.frames[2].modalities["traffic_light"].len(), 2);
        let Record::Object(car) = &bundle.frames[0].modalities["vehicle"][0] else {
            panic!("expected object record");
        };
        assert_eq!(car.sub_type.as_deref(), Some("CAR"));
        let map = bundle.map.as_ref().expect("map attached");
        assert_eq!(map.stoplines.len(), 1);

        assert!(adapter.scene_background("1").is_some());
        assert!(matches!(
            adapter.load_scene_bundle("all", "7", &BundleOptions::default()),
            Err(AdapterError::SceneNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_without_origin_lat_lon_nodes_are_dropped() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_city(dir.path())?;
        let spec = DatasetSpec::new("sind", Family::Sind, dir.path());
        let adapter = SindAdapter::build(spec, &CacheConfig::default())?;
        assert!(adapter.city_projection("Tianjin").is_none());

        let bundle = adapter.load_scene_bundle("all", "1", &BundleOptions::default())?;
        assert!(bundle.map.as_ref().is_some_and(|m| m.stoplines.is_empty()));
        Ok(())
    }
}
