//! Scene-index table writer.
//!
//! Produces the per-(table, scene) summary CSV that the intersection-indexed
//! scene builder loads on startup instead of scanning every scene file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Column order of the scene-index table.
pub const SCENE_INDEX_COLUMNS: [&str; 13] = [
    "table",
    "scene_id",
    "file",
    "rows",
    "min_ts",
    "max_ts",
    "unique_ts",
    "duration_s",
    "unique_agents",
    "intersect_id",
    "intersect_label",
    "intersect_id_variants",
    "city",
];

/// One (table, scene) row of the scene-index table.
///
/// `table` is the modality directory relative to the dataset root, e.g.
/// `ego-trajectories/train/data`; split and modality are derived from it on
/// load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneIndexRow {
    pub table: String,
    pub scene_id: String,
    pub file: String,
    pub rows: usize,
    pub min_ts: Option<f64>,
    pub max_ts: Option<f64>,
    pub unique_ts: usize,
    pub duration_s: Option<f64>,
    pub unique_agents: Option<usize>,
    pub intersect_id: Option<String>,
    pub intersect_label: Option<String>,
    pub intersect_id_variants: usize,
    pub city: Option<String>,
}

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Write the scene-index table as CSV.
///
/// Rows are ordered by scene id (shorter ids first, then lexicographic), and
/// within one scene by the order in which tables appear in `rows`. Missing
/// optional values are written as empty fields.
///
/// # Arguments
///
/// * `rows` - One row per (table, scene)
/// * `path` - Output file path (parent directories are created if needed)
///
/// # Returns
///
/// The number of rows written.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_scene_index_csv<P: AsRef<Path>>(rows: &[SceneIndexRow], path: P) -> Result<usize> {
    let path = path.as_ref();
    ensure_parent_dirs(path)?;

    let mut table_order: Vec<&str> = Vec::new();
    for r in rows {
        if !table_order.contains(&r.table.as_str()) {
            table_order.push(r.table.as_str());
        }
    }
    let table_rank = |t: &str| table_order.iter().position(|x| *x == t).unwrap_or(usize::MAX);

    let mut ordered: Vec<&SceneIndexRow> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        (a.scene_id.len(), a.scene_id.as_str(), table_rank(&a.table))
            .cmp(&(b.scene_id.len(), b.scene_id.as_str(), table_rank(&b.table)))
    });

    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path.display().to_string(),
        source: e,
    };

    let writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(SCENE_INDEX_COLUMNS).map_err(csv_err)?;
    for row in &ordered {
        csv_writer.serialize(row).map_err(csv_err)?;
    }

    let mut inner = csv_writer.into_inner().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e.into_error(),
    })?;
    inner.flush().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(ordered.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(table: &str, scene: &str) -> SceneIndexRow {
        SceneIndexRow {
            table: table.to_string(),
            scene_id: scene.to_string(),
            file: format!("{table}/{scene}.csv"),
            rows: 3,
            min_ts: Some(1.0),
            max_ts: Some(2.0),
            unique_ts: 2,
            duration_s: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_write_scene_index_orders_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("scenes.csv");
        let rows = vec![
            row("ego-trajectories/train/data", "10"),
            row("traffic-light/train/data", "10"),
            row("ego-trajectories/train/data", "9"),
            row("traffic-light/train/data", "9"),
        ];

        let n = write_scene_index_csv(&rows, &path).unwrap();
        assert_eq!(n, 4);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], SCENE_INDEX_COLUMNS.join(","));
        assert!(lines[1].starts_with("ego-trajectories/train/data,9,"));
        assert!(lines[2].starts_with("traffic-light/train/data,9,"));
        assert!(lines[3].starts_with("ego-trajectories/train/data,10,"));
        // empty optional fields
        assert!(lines[1].ends_with(",,,0,"));
    }
}
