//! Dataset registry loading.
//!
//! The registry lives at `<repo>/dataset/registry.json`; an optional
//! `registry.local.json` next to it overrides entries key-by-key by id and may
//! append new entries.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde_json::{Map, Value};

use super::dataset::{roles, Binding, BindingKind, DatasetSpec, GeoOrigin, SceneStrategy};
use super::{ConfigError, Result};

pub const REGISTRY_FILE: &str = "dataset/registry.json";
pub const LOCAL_REGISTRY_FILE: &str = "dataset/registry.local.json";

/// Resolves a registry path: `~` expands to `$HOME`, relative paths are
/// joined to `repo_root`, existing paths are canonicalized.
pub fn resolve_path(repo_root: &Path, raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let expanded = match raw.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    };
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        repo_root.join(expanded)
    };
    Some(std::fs::canonicalize(&joined).unwrap_or(joined))
}

/// Merges `local` into `base`: entries sharing an id are updated key-by-key,
/// new ids are appended. Entries without an id are dropped.
pub fn merge_registry(base: &Value, local: &Value) -> Vec<Map<String, Value>> {
    let items = |v: &Value| -> Vec<Map<String, Value>> {
        v.get("datasets")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|it| it.as_object().cloned())
                    .filter(|m| m.contains_key("id"))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut ordered: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Map<String, Value>> = HashMap::new();
    for (is_local, entry) in items(base)
        .into_iter()
        .map(|e| (false, e))
        .chain(items(local).into_iter().map(|e| (true, e)))
    {
        let id = value_string(entry.get("id")).unwrap_or_default();
        match by_id.get_mut(&id) {
            Some(existing) if is_local => existing.extend(entry),
            Some(existing) => *existing = entry,
            None => {
                ordered.push(id.clone());
                by_id.insert(id, entry);
            }
        }
    }
    ordered.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

fn value_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Builds a [`DatasetSpec`] from one merged registry entry.
pub fn parse_entry(repo_root: &Path, entry: &Map<String, Value>) -> Result<DatasetSpec> {
    let id = value_string(entry.get("id")).ok_or_else(|| ConfigError::InvalidEntry {
        id: String::new(),
        reason: "missing id".into(),
    })?;
    let invalid = |reason: &str| ConfigError::InvalidEntry {
        id: id.clone(),
        reason: reason.to_string(),
    };

    let root = value_string(entry.get("root"))
        .and_then(|r| resolve_path(repo_root, &r))
        .ok_or_else(|| invalid("missing root"))?;

    let mut bindings: BTreeMap<String, Binding> = BTreeMap::new();
    if let Some(raw) = entry.get("bindings") {
        let obj = raw.as_object().ok_or_else(|| invalid("bindings must be an object"))?;
        for (role, value) in obj {
            match Binding::from_value(value) {
                Some(b) => {
                    bindings.insert(role.clone(), resolve_binding(repo_root, b));
                }
                None => debug!("registry '{}': ignoring unparseable binding '{}'", id, role),
            }
        }
    }
    // Legacy top-level keys.
    if let Some(scenes) = value_string(entry.get("scenes")).and_then(|s| resolve_path(repo_root, &s)) {
        bindings
            .entry(roles::SCENES_INDEX.to_string())
            .or_insert_with(|| Binding::file(scenes, false));
    }
    if let Some(profile) = value_string(entry.get("profile")).and_then(|s| resolve_path(repo_root, &s)) {
        bindings
            .entry(roles::PROFILE_FILE.to_string())
            .or_insert_with(|| Binding::file(profile, false));
    }

    let scene_strategy = match entry.get("scene_strategy") {
        Some(v @ Value::Object(_)) => serde_json::from_value::<SceneStrategy>(v.clone())
            .map_err(|e| invalid(&format!("scene_strategy: {e}")))?,
        _ => SceneStrategy::default(),
    };

    let basemap = entry.get("basemap").and_then(Value::as_object);
    let geo_origin = basemap.and_then(|b| b.get("origin")).and_then(GeoOrigin::from_value);
    let geo_origin_by_group = basemap
        .and_then(|b| b.get("origin_by_intersect"))
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| GeoOrigin::from_value(v).map(|o| (k.clone(), o)))
                .collect()
        })
        .unwrap_or_default();

    Ok(DatasetSpec {
        title: value_string(entry.get("title")).unwrap_or_else(|| id.clone()),
        family_name: value_string(entry.get("family")).unwrap_or_else(|| "generic".into()),
        root,
        bindings,
        scene_strategy,
        geo_origin,
        geo_origin_by_group,
        basemap_tile_url: basemap.and_then(|b| value_string(b.get("tile_url"))),
        basemap_attribution: basemap.and_then(|b| value_string(b.get("attribution"))),
        id,
    })
}

fn resolve_binding(repo_root: &Path, mut b: Binding) -> Binding {
    let fix = |p: &Path| resolve_path(repo_root, &p.to_string_lossy()).unwrap_or_else(|| p.to_path_buf());
    b.path = b.path.as_deref().map(fix);
    b.paths = b.paths.iter().map(|p| fix(p)).collect();
    if b.kind == BindingKind::File && b.path.is_none() && !b.paths.is_empty() {
        b.kind = BindingKind::FileList;
    }
    b
}

/// Loads the merged registry below `repo_root`.
///
/// A missing `registry.json` yields an empty list; an unreadable local
/// override is ignored. Invalid entries are skipped with a warning.
///
/// # Errors
///
/// Returns an error if `registry.json` exists but cannot be read or parsed.
pub fn load_registry(repo_root: &Path) -> Result<Vec<DatasetSpec>> {
    let base_path = repo_root.join(REGISTRY_FILE);
    if !base_path.exists() {
        debug!("no registry at {}", base_path.display());
        return Ok(Vec::new());
    }
    let base: Value = serde_json::from_str(&std::fs::read_to_string(&base_path)?)?;

    let local_path = repo_root.join(LOCAL_REGISTRY_FILE);
    let local: Value = if local_path.exists() {
        std::fs::read_to_string(&local_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| {
                warn!("ignoring unreadable {}", local_path.display());
                Value::Null
            })
    } else {
        Value::Null
    };

    let mut specs = Vec::new();
    for entry in merge_registry(&base, &local) {
        match parse_entry(repo_root, &entry) {
            Ok(spec) => specs.push(spec),
            Err(e) => warn!("skipping registry entry: {}", e),
        }
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_merge_registry_overrides_by_id() {
        let base = json!({"datasets": [
            {"id": "a", "title": "A", "root": "x"},
            {"id": "b", "root": "y"},
            {"title": "no id"}
        ]});
        let local = json!({"datasets": [
            {"id": "a", "root": "/private/a"},
            {"id": "c", "root": "z"}
        ]});
        let merged = merge_registry(&base, &local);
        let ids: Vec<&str> = merged.iter().map(|m| m["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[0]["title"], "A");
        assert_eq!(merged[0]["root"], "/private/a");
    }

    #[test]
    fn test_load_registry_resolves_paths_and_basemap() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("dataset"))?;
        fs::create_dir_all(dir.path().join("data/cpm"))?;
        fs::write(
            dir.path().join(REGISTRY_FILE),
            json!({"datasets": [
                {"id": "cpm", "family": "cpm-objects", "root": "data/cpm",
                 "scene_strategy": {"mode": "time_window", "window_s": 60},
                 "basemap": {"origin": {"lat": 48.0, "lon": 11.0},
                             "origin_by_intersect": {"lidar_1": [48.1, 11.1], "bad": [99, 0]},
                             "attribution": "OSM"}},
                {"id": "broken", "family": "ind"}
            ]})
            .to_string(),
        )?;

        let specs = load_registry(dir.path())?;
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.title, "cpm");
        assert!(spec.root.ends_with("data/cpm"));
        assert!(spec.root.is_absolute());
        assert_eq!(spec.scene_strategy.window_s, Some(60.0));
        assert_eq!(spec.geo_origin, Some(GeoOrigin { lat: 48.0, lon: 11.0 }));
        assert_eq!(spec.geo_origin_by_group.len(), 1);
        assert_eq!(spec.basemap_attribution.as_deref(), Some("OSM"));
        assert_eq!(spec.basemap_tile_url, None);
        Ok(())
    }

    #[test]
    fn test_missing_registry_is_empty() -> Result<()> {
        let dir = tempdir()?;
        assert!(load_registry(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_legacy_scenes_key_becomes_binding() -> Result<()> {
        let dir = tempdir()?;
        let entry = json!({"id": "v", "family": "v2x-traj", "root": "r", "scenes": "r/scenes.csv"});
        let spec = parse_entry(dir.path(), entry.as_object().unwrap())?;
        assert!(spec.binding_path(roles::SCENES_INDEX).unwrap().ends_with("r/scenes.csv"));
        Ok(())
    }
}
