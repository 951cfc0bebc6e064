//! Ordered scene catalogs with group and position lookups.
//!
//! Every family ends up with the same shape: per split, an ordered list of
//! scene summaries, a group tally, and positional indices for jump-to-scene.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::core::loaders::ModalityStats;

/// Summary of one scene as listed to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneSummary {
    pub scene_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_label: Option<String>,
    pub split: String,
    pub city: Option<String>,
    pub group_id: Option<String>,
    pub group_label: Option<String>,
    pub by_modality: BTreeMap<String, ModalityStats>,
}

/// One group (intersection, sensor, location or city) with its scene count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group_id: String,
    pub group_label: Option<String>,
    pub count: usize,
}

/// A page of scenes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneList {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub items: Vec<SceneSummary>,
    /// Scenes in the filtered set carrying rows for each modality
    pub availability: BTreeMap<String, usize>,
}

/// Position of a scene within its split and group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneLocation {
    pub split: String,
    pub scene_id: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_all: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_all: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_in_group: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_in_group: Option<usize>,
}

impl SceneLocation {
    fn not_found(split: &str, scene_id: &str) -> Self {
        Self {
            split: split.to_string(),
            scene_id: scene_id.to_string(),
            found: false,
            city: None,
            group_id: None,
            group_label: None,
            index_all: None,
            total_all: None,
            index_in_group: None,
            total_in_group: None,
        }
    }
}

/// Ordering applied to group listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOrder {
    /// Count descending, ties by group id
    MostCommon,
    /// Count descending, ties by label
    CountThenLabel,
    /// Label ascending
    ByLabel,
}

/// Scene ordering: numeric ids ascending, then the rest lexicographically.
///
/// Digit-only ids compare by significant length, then digits, so ids of
/// any size order numerically.
pub fn scene_sort_key(scene_id: &str) -> (bool, usize, &str, &str) {
    let trimmed = scene_id.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let digits = trimmed.trim_start_matches('0');
        (false, digits.len(), digits, scene_id)
    } else {
        (true, 0, "", scene_id)
    }
}

/// Scenes of one split, ordered, with lookup tables.
#[derive(Debug, Clone, Default)]
pub struct SplitCatalog {
    split: String,
    scenes: Vec<SceneSummary>,
    position: HashMap<String, usize>,
    by_group: HashMap<String, Vec<usize>>,
    groups: Vec<GroupSummary>,
}

impl SplitCatalog {
    /// Builds the catalog. Duplicate scene ids keep the first occurrence.
    pub fn new(split: &str, mut scenes: Vec<SceneSummary>, order: GroupOrder) -> Self {
        scenes.sort_by(|a, b| scene_sort_key(&a.scene_id).cmp(&scene_sort_key(&b.scene_id)));
        scenes.dedup_by(|b, a| a.scene_id == b.scene_id);

        let position: HashMap<String, usize> = scenes
            .iter()
            .enumerate()
            .map(|(i, s)| (s.scene_id.clone(), i))
            .collect();

        let mut by_group: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, s) in scenes.iter().enumerate() {
            if let Some(g) = &s.group_id {
                by_group.entry(g.clone()).or_default().push(i);
            }
        }

        let mut groups: Vec<GroupSummary> = by_group
            .iter()
            .map(|(g, idxs)| GroupSummary {
                group_id: g.clone(),
                group_label: idxs.first().and_then(|&i| scenes[i].group_label.clone()),
                count: idxs.len(),
            })
            .collect();
        let label = |g: &GroupSummary| g.group_label.clone().unwrap_or_else(|| g.group_id.clone());
        match order {
            GroupOrder::MostCommon => {
                groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.group_id.cmp(&b.group_id)))
            }
            GroupOrder::CountThenLabel => groups.sort_by(|a, b| {
                b.count
                    .cmp(&a.count)
                    .then_with(|| label(a).cmp(&label(b)))
                    .then_with(|| a.group_id.cmp(&b.group_id))
            }),
            GroupOrder::ByLabel => {
                groups.sort_by(|a, b| label(a).cmp(&label(b)).then_with(|| a.group_id.cmp(&b.group_id)))
            }
        }

        Self {
            split: split.to_string(),
            scenes,
            position,
            by_group,
            groups,
        }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[SceneSummary] {
        &self.scenes
    }

    pub fn get(&self, scene_id: &str) -> Option<&SceneSummary> {
        self.position.get(scene_id).map(|&i| &self.scenes[i])
    }

    pub fn groups(&self) -> &[GroupSummary] {
        &self.groups
    }

    /// One page of scenes, optionally restricted to a group.
    pub fn list(&self, group_id: Option<&str>, limit: usize, offset: usize) -> SceneList {
        let filtered: Vec<&SceneSummary> = match group_id.filter(|g| !g.is_empty()) {
            Some(g) => self
                .by_group
                .get(g)
                .map(|idxs| idxs.iter().map(|&i| &self.scenes[i]).collect())
                .unwrap_or_default(),
            None => self.scenes.iter().collect(),
        };

        let mut availability: BTreeMap<String, usize> = BTreeMap::new();
        for s in &filtered {
            for (m, stats) in &s.by_modality {
                let slot = availability.entry(m.clone()).or_default();
                if stats.rows > 0 {
                    *slot += 1;
                }
            }
        }

        SceneList {
            total: filtered.len(),
            limit,
            offset,
            items: filtered.into_iter().skip(offset).take(limit).cloned().collect(),
            availability,
        }
    }

    /// Position of a scene in the split and in its group.
    pub fn locate(&self, scene_id: &str) -> SceneLocation {
        let Some(&idx) = self.position.get(scene_id) else {
            return SceneLocation::not_found(&self.split, scene_id);
        };
        let s = &self.scenes[idx];
        let group = s.group_id.as_ref().and_then(|g| self.by_group.get(g));
        SceneLocation {
            split: self.split.clone(),
            scene_id: scene_id.to_string(),
            found: true,
            city: s.city.clone(),
            group_id: s.group_id.clone(),
            group_label: s.group_label.clone(),
            index_all: Some(idx),
            total_all: Some(self.scenes.len()),
            index_in_group: group.and_then(|g| g.iter().position(|&i| i == idx)),
            total_in_group: group.map(Vec::len),
        }
    }
}

/// All splits of a dataset.
///
/// Single-split catalogs map any requested split name onto their one split.
#[derive(Debug, Clone, Default)]
pub struct SceneCatalog {
    splits: BTreeMap<String, SplitCatalog>,
    fixed: Option<String>,
}

pub const ALL_SPLIT: &str = "all";

impl SceneCatalog {
    /// A catalog with the single split `all`.
    pub fn single(scenes: Vec<SceneSummary>, order: GroupOrder) -> Self {
        let mut splits = BTreeMap::new();
        splits.insert(ALL_SPLIT.to_string(), SplitCatalog::new(ALL_SPLIT, scenes, order));
        Self {
            splits,
            fixed: Some(ALL_SPLIT.to_string()),
        }
    }

    /// A catalog keyed by split; `always` splits exist even when empty.
    pub fn by_split(scenes: Vec<SceneSummary>, always: &[&str], order: GroupOrder) -> Self {
        let mut grouped: BTreeMap<String, Vec<SceneSummary>> =
            always.iter().map(|s| (s.to_string(), Vec::new())).collect();
        for s in scenes {
            grouped.entry(s.split.clone()).or_default().push(s);
        }
        Self {
            splits: grouped
                .into_iter()
                .map(|(k, v)| {
                    let cat = SplitCatalog::new(&k, v, order);
                    (k, cat)
                })
                .collect(),
            fixed: None,
        }
    }

    /// Split name a request actually addresses.
    pub fn resolve_split<'a>(&'a self, requested: &'a str) -> &'a str {
        self.fixed.as_deref().unwrap_or(requested)
    }

    pub fn split(&self, requested: &str) -> Option<&SplitCatalog> {
        self.splits.get(self.resolve_split(requested))
    }

    pub fn split_names(&self) -> Vec<String> {
        self.splits.keys().cloned().collect()
    }

    pub fn total_scenes(&self) -> usize {
        self.splits.values().map(SplitCatalog::len).sum()
    }

    pub fn list_groups(&self, split: &str) -> Vec<GroupSummary> {
        self.split(split).map(|c| c.groups().to_vec()).unwrap_or_default()
    }

    pub fn list_scenes(&self, split: &str, group_id: Option<&str>, limit: usize, offset: usize) -> SceneList {
        match self.split(split) {
            Some(c) => c.list(group_id, limit, offset),
            None => SceneList {
                total: 0,
                limit,
                offset,
                items: Vec::new(),
                availability: BTreeMap::new(),
            },
        }
    }

    pub fn locate(&self, split: &str, scene_id: &str) -> SceneLocation {
        let resolved = self.resolve_split(split);
        match self.splits.get(resolved) {
            Some(c) => c.locate(scene_id),
            None => SceneLocation::not_found(resolved, scene_id),
        }
    }

    pub fn get(&self, split: &str, scene_id: &str) -> Option<&SceneSummary> {
        self.split(split).and_then(|c| c.get(scene_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str, group: Option<&str>) -> SceneSummary {
        let mut by_modality = BTreeMap::new();
        by_modality.insert(
            "ego".to_string(),
            ModalityStats {
                rows: if id == "b" { 0 } else { 5 },
                ..Default::default()
            },
        );
        SceneSummary {
            scene_id: id.to_string(),
            split: "train".to_string(),
            group_id: group.map(str::to_string),
            group_label: group.map(|g| format!("L-{g}")),
            by_modality,
            ..Default::default()
        }
    }

    #[test]
    fn test_scene_sort_key_numeric_first() {
        let mut ids = vec!["10", "b", "9", "a", "100"];
        ids.sort_by(|a, b| scene_sort_key(a).cmp(&scene_sort_key(b)));
        assert_eq!(ids, vec!["9", "10", "100", "a", "b"]);

        let mut big = vec!["z", "99999999999999999999", "123456789012345678901", "5", "0"];
        big.sort_by(|a, b| scene_sort_key(a).cmp(&scene_sort_key(b)));
        assert_eq!(big, vec!["0", "5", "99999999999999999999", "123456789012345678901", "z"]);
    }

    #[test]
    fn test_repeated_builds_order_identically() {
        let ids = ["10", "2", "33", "7", "abc", "1"];
        let build = |rev: bool| {
            let mut scenes: Vec<SceneSummary> = ids.iter().map(|id| scene(id, Some("g"))).collect();
            if rev {
                scenes.reverse();
            }
            let cat = SceneCatalog::by_split(scenes, &["train"], GroupOrder::MostCommon);
            cat.list_scenes("train", None, 100, 0)
                .items
                .into_iter()
                .map(|s| s.scene_id)
                .collect::<Vec<_>>()
        };
        let first = build(false);
        assert_eq!(first, vec!["1", "2", "7", "10", "33", "abc"]);
        assert_eq!(build(true), first);
    }

    #[test]
    fn test_group_orders() {
        let scenes = vec![
            scene("1", Some("z")),
            scene("2", Some("a")),
            scene("3", Some("z")),
            scene("4", Some("m")),
            scene("5", None),
        ];
        let cat = SplitCatalog::new("train", scenes.clone(), GroupOrder::MostCommon);
        let ids: Vec<&str> = cat.groups().iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
        assert_eq!(cat.groups()[0].group_label.as_deref(), Some("L-z"));

        let cat = SplitCatalog::new("train", scenes, GroupOrder::ByLabel);
        let ids: Vec<&str> = cat.groups().iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_list_and_locate() {
        let scenes = vec![
            scene("3", Some("z")),
            scene("1", Some("z")),
            scene("b", Some("m")),
            scene("2", None),
        ];
        let cat = SceneCatalog::by_split(scenes, &["train", "val"], GroupOrder::MostCommon);
        assert_eq!(cat.split_names(), vec!["train", "val"]);

        let page = cat.list_scenes("train", None, 2, 1);
        assert_eq!(page.total, 4);
        let ids: Vec<&str> = page.items.iter().map(|s| s.scene_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(page.availability["ego"], 3);

        let page = cat.list_scenes("train", Some("z"), 10, 0);
        assert_eq!(page.total, 2);

        let loc = cat.locate("train", "3");
        assert!(loc.found);
        assert_eq!(loc.index_all, Some(2));
        assert_eq!(loc.total_all, Some(4));
        assert_eq!(loc.index_in_group, Some(1));
        assert_eq!(loc.total_in_group, Some(2));

        let loc = cat.locate("train", "2");
        assert_eq!(loc.index_in_group, None);
        assert!(!cat.locate("train", "nope").found);
        assert!(!cat.locate("test", "1").found);
        assert_eq!(cat.list_scenes("val", None, 10, 0).total, 0);
    }

    #[test]
    fn test_single_split_maps_any_name() {
        let cat = SceneCatalog::single(vec![scene("1", Some("s"))], GroupOrder::CountThenLabel);
        assert_eq!(cat.list_scenes("train", None, 10, 0).total, 1);
        assert_eq!(cat.locate("whatever", "1").split, "all");
        assert_eq!(cat.list_groups("val").len(), 1);
    }
}
