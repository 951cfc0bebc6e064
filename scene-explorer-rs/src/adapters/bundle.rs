//! Frame assembly shared by every adapter.

use std::collections::BTreeMap;

use log::warn;

use super::{Frame, SceneBundle};
use crate::config::BundleOptions;
use crate::core::geometry::BBox;
use crate::core::loaders::{union_frames, ModalityStats, ModalityTable, TickScale};
use crate::maps::{clip_for_scene, map_consistency_warnings, ParsedMap};

/// Fallback extent for datasets in a global metric frame.
pub const GLOBAL_FALLBACK_EXTENT: BBox = BBox::new(0.0, 0.0, 1.0, 1.0);

/// Fallback extent for datasets in a sensor- or site-local frame.
pub const LOCAL_FALLBACK_EXTENT: BBox = BBox::new(-10.0, -10.0, 10.0, 10.0);

/// Fills frames, timestamps, per-modality stats and the extent of `bundle`.
///
/// Every modality in `tables` appears in every frame; ticks are the sorted
/// union over all tables. Missing modalities should be passed as empty
/// tables so they still show up.
pub fn fill_frames(bundle: &mut SceneBundle, tables: &[(&str, &ModalityTable)], scale: TickScale) {
    let mut extent = BBox::empty();
    for (name, table) in tables {
        extent.merge(&table.extent);
        bundle.modality_stats.insert(name.to_string(), table.stats(scale));
    }
    bundle.extent = extent;

    let unioned = union_frames(tables.iter().map(|(n, t)| (*n, *t)));
    bundle.timestamps = unioned.keys().map(|t| scale.to_seconds(*t)).collect();
    bundle.t0 = bundle.timestamps.first().copied();
    bundle.frames = unioned
        .into_iter()
        .map(|(tick, by_modality)| Frame {
            tick,
            modalities: by_modality.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        })
        .collect();

    if bundle.frames.is_empty() {
        bundle
            .warnings
            .push("no_timestamps: scene appears empty across all modalities".to_string());
    }
}

/// Replaces an unrecoverable extent with `fallback` and notes it.
pub fn ensure_extent(bundle: &mut SceneBundle, fallback: BBox) {
    if !bundle.extent.is_valid() {
        bundle.extent = fallback;
        bundle
            .warnings
            .push("extent_missing: could not compute extent from scene files".to_string());
    }
}

/// Empty statistics for modalities a family never carries.
pub fn zero_stats(bundle: &mut SceneBundle, names: &[&str]) {
    for name in names {
        bundle
            .modality_stats
            .entry(name.to_string())
            .or_insert_with(ModalityStats::default);
    }
}

/// Clips `map` for the scene and records consistency warnings.
pub fn attach_map(bundle: &mut SceneBundle, map: &ParsedMap, options: &BundleOptions) {
    let clipped = clip_for_scene(map, &bundle.extent, options);
    bundle
        .warnings
        .extend(map_consistency_warnings(map.bbox.as_ref(), &bundle.extent));
    bundle.map = Some(clipped);
}

/// Records a map failure as a warning.
pub fn map_failed(bundle: &mut SceneBundle, err: impl std::fmt::Display) {
    warn!("{}/{}: map load failed: {}", bundle.dataset_id, bundle.scene_id, err);
    bundle.warnings.push(format!("map_load_failed: {err}"));
}

/// First non-empty value in modality order.
pub fn first_meta<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    values.into_iter().flatten().next().map(str::to_string)
}

/// Rounds to millisecond precision for warning text.
pub fn round_ms(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Offsets of the traffic-light time range against a reference modality.
///
/// The reference is the first of `priority` with timestamps. Offsets of at
/// least 50 ms become warnings.
pub fn signal_offset_warnings(stats: &BTreeMap<String, ModalityStats>, priority: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let Some((reference, ref_stats)) = priority
        .iter()
        .find_map(|m| stats.get(*m).filter(|s| s.min_ts.is_some()).map(|s| (*m, s)))
    else {
        return out;
    };
    let Some(tl) = stats.get("traffic_light") else {
        return out;
    };
    for (label, a, b) in [
        ("min", ref_stats.min_ts, tl.min_ts),
        ("max", ref_stats.max_ts, tl.max_ts),
    ] {
        if let (Some(a), Some(b)) = (a, b) {
            let d = round_ms(b - a);
            if d.abs() >= 0.05 {
                out.push(format!("traffic_light_{label}_ts_offset_vs_{reference}:{d}s"));
            }
        }
    }
    out
}
