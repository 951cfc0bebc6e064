//! Map alignment sweep.
//!
//! Samples scenes per group and loads their bundles with a map clip, flagging
//! scenes whose extent misses the map or whose modalities disagree on the
//! intersection.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::Serialize;

use super::Adapter;
use crate::config::BundleOptions;

/// Whether a bundle warning means the scene is not aligned with its map.
pub fn is_alignment_warning(warning: &str) -> bool {
    warning.starts_with("map_load_failed")
        || matches!(
            warning,
            "scene_outside_map_bbox" | "scene_center_outside_map_bbox" | "intersect_id_mismatch_across_modalities"
        )
}

/// A scene that failed the sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MisalignedScene {
    pub split: String,
    pub scene_id: String,
    pub group_id: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitTally {
    pub checked: usize,
    pub bad: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlignmentReport {
    pub splits: BTreeMap<String, SplitTally>,
    pub failures: Vec<MisalignedScene>,
}

impl AlignmentReport {
    pub fn checked(&self) -> usize {
        self.splits.values().map(|t| t.checked).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Loads up to `per_group` scenes from each of the first `groups` groups of
/// every split and collects the misaligned ones.
///
/// A scene that cannot be loaded at all counts as misaligned.
pub fn check_alignment(
    adapter: &Adapter,
    splits: &[&str],
    groups: usize,
    per_group: usize,
    options: &BundleOptions,
) -> AlignmentReport {
    let mut report = AlignmentReport::default();
    for split in splits {
        let tally = report.splits.entry(split.to_string()).or_default();
        for group in adapter.list_intersections(split).into_iter().take(groups) {
            let page = adapter.list_scenes(split, Some(&group.group_id), per_group.max(1), 0);
            for item in page.items {
                tally.checked += 1;
                let warnings = match adapter.load_scene_bundle(split, &item.scene_id, options) {
                    Ok(bundle) => bundle
                        .warnings
                        .into_iter()
                        .filter(|w| is_alignment_warning(w))
                        .collect(),
                    Err(e) => vec![e.to_string()],
                };
                if warnings.is_empty() {
                    debug!("{}/{}: aligned", split, item.scene_id);
                    continue;
                }
                warn!("{}/{} ({}): {}", split, item.scene_id, group.group_id, warnings.join(", "));
                tally.bad += 1;
                report.failures.push(MisalignedScene {
                    split: split.to_string(),
                    scene_id: item.scene_id,
                    group_id: Some(group.group_id.clone()),
                    warnings,
                });
            }
        }
    }
    report
}
