//! Adapter for the cooperative trajectory families.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use super::bundle::{
    attach_map, ensure_extent, fill_frames, first_meta, map_failed, signal_offset_warnings, GLOBAL_FALLBACK_EXTENT,
};
use super::{AdapterError, Result, SceneBundle};
use crate::config::{roles, BundleOptions, CacheConfig, DatasetSpec, Family};
use crate::core::cache::LruStore;
use crate::core::loaders::{ModalityTable, TickScale};
use crate::indexing::trajectory::{
    build_index, load_modality, modality_dir, ModalityLayout, TrajectoryIndex, V2X_SEQ_MODALITIES,
    V2X_TRAJ_MODALITIES,
};
use crate::indexing::SceneCatalog;
use crate::maps::hdmap::{intersection_label, load_hdmap, map_id_from_group};
use crate::maps::ParsedMap;

/// Modality layouts of a trajectory family.
pub fn layouts_for(family: Family) -> &'static [ModalityLayout] {
    match family {
        Family::V2xSeq => V2X_SEQ_MODALITIES,
        _ => V2X_TRAJ_MODALITIES,
    }
}

/// Modalities tried, in order, as the time reference for signal offsets.
pub fn reference_priority(family: Family) -> &'static [&'static str] {
    match family {
        Family::V2xSeq => &["cooperative", "vehicle", "infra"],
        _ => &["ego", "vehicle", "infra"],
    }
}

/// Intersection-indexed trajectory dataset.
pub struct TrajectoryAdapter {
    spec: DatasetSpec,
    family: Family,
    layouts: &'static [ModalityLayout],
    index: TrajectoryIndex,
    tables: LruStore<PathBuf, ModalityTable>,
    maps: LruStore<(u32, usize), ParsedMap>,
}

impl TrajectoryAdapter {
    /// Indexes the dataset.
    ///
    /// # Errors
    ///
    /// Returns the index error when no scene is found.
    pub fn build(spec: DatasetSpec, family: Family, cache: &CacheConfig) -> Result<Self> {
        let layouts = layouts_for(family);
        let index = build_index(&spec, layouts)?;
        Ok(Self {
            spec,
            family,
            layouts,
            index,
            tables: LruStore::new(cache.table_capacity),
            maps: LruStore::new(cache.map_capacity),
        })
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn catalog(&self) -> &SceneCatalog {
        &self.index.catalog
    }

    pub fn index(&self) -> &TrajectoryIndex {
        &self.index
    }

    fn scene_file(&self, layout: &ModalityLayout, split: &str, scene_id: &str) -> PathBuf {
        self.index
            .files(split, scene_id)
            .and_then(|f| f.get(layout.name))
            .cloned()
            .unwrap_or_else(|| {
                modality_dir(&self.spec, layout)
                    .join(split)
                    .join("data")
                    .join(format!("{scene_id}.csv"))
            })
    }

    fn load_table(&self, layout: &ModalityLayout, path: &Path) -> crate::core::loaders::Result<Arc<ModalityTable>> {
        let key = path.to_path_buf();
        if let Some(hit) = self.tables.get(&key) {
            return Ok(hit);
        }
        let table = Arc::new(load_modality(&self.spec, layout, path)?);
        self.tables.put(key, Arc::clone(&table));
        Ok(table)
    }

    fn load_map(&self, map_id: u32, step: usize) -> crate::maps::Result<Arc<ParsedMap>> {
        let key = (map_id, step);
        if let Some(hit) = self.maps.get(&key) {
            return Ok(hit);
        }
        let maps_dir = self.spec.dir_or(roles::MAPS_DIR, "maps");
        let map = Arc::new(load_hdmap(&maps_dir, map_id, step)?);
        self.maps.put(key, Arc::clone(&map));
        Ok(map)
    }

    /// Materializes one scene from its per-modality files.
    pub fn load_scene_bundle(&self, split: &str, scene_id: &str, options: &BundleOptions) -> Result<SceneBundle> {
        let summary = self
            .index
            .catalog
            .get(split, scene_id)
            .ok_or_else(|| AdapterError::SceneNotFound(scene_id.to_string()))?;

        let mut bundle = SceneBundle::new(&self.spec.id, split, scene_id);
        let empty = Arc::new(ModalityTable::default());
        let mut loaded: Vec<(&'static str, Arc<ModalityTable>)> = Vec::with_capacity(self.layouts.len());

        for layout in self.layouts {
            let path = self.scene_file(layout, split, scene_id);
            let table = if !path.is_file() {
                bundle.warnings.push(format!("{}_missing_file", layout.name));
                Arc::clone(&empty)
            } else {
                match self.load_table(layout, &path) {
                    Ok(t) => {
                        if t.is_empty() {
                            bundle.warnings.push(format!("{}_empty", layout.name));
                        }
                        t
                    }
                    Err(e) => {
                        debug!("{}: {} unreadable: {}", self.spec.id, path.display(), e);
                        bundle.warnings.push(format!("{}_load_failed: {}", layout.name, e));
                        Arc::clone(&empty)
                    }
                }
            };
            loaded.push((layout.name, table));
        }

        bundle.city = first_meta(loaded.iter().map(|(_, t)| t.city.as_deref())).or_else(|| summary.city.clone());
        bundle.group_id =
            first_meta(loaded.iter().map(|(_, t)| t.group_id.as_deref())).or_else(|| summary.group_id.clone());
        bundle.group_label = bundle.group_id.as_deref().map(intersection_label);
        for (name, t) in &loaded {
            bundle.group_by_modality.insert(name.to_string(), t.group_id.clone());
        }
        let mut distinct: Vec<&str> = loaded.iter().filter_map(|(_, t)| t.group_id.as_deref()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() > 1 {
            bundle
                .warnings
                .push("intersect_id_mismatch_across_modalities".to_string());
        }
        bundle.map_id = bundle.group_id.as_deref().and_then(map_id_from_group);

        let views: Vec<(&str, &ModalityTable)> = loaded.iter().map(|(n, t)| (*n, t.as_ref())).collect();
        fill_frames(&mut bundle, &views, TickScale::Deciseconds);
        ensure_extent(&mut bundle, GLOBAL_FALLBACK_EXTENT);
        let offsets = signal_offset_warnings(&bundle.modality_stats, reference_priority(self.family));
        bundle.warnings.extend(offsets);

        if options.include_map {
            match bundle.map_id {
                Some(map_id) => match self.load_map(map_id, options.map_points_step) {
                    Ok(map) => attach_map(&mut bundle, &map, options),
                    Err(e) => map_failed(&mut bundle, e),
                },
                None => bundle.warnings.push("map_missing".to_string()),
            }
        }
        Ok(bundle)
    }
}
