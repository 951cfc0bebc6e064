//! Command-line interface for the scene explorer.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::adapters::trajectory::layouts_for;
use crate::adapters::{check_alignment, Adapter};
use crate::config::{load_registry, BundleOptions, DatasetSpec, ExplorerConfig, Family, MapClip};
use crate::core::writers::write_scene_index_csv;
use crate::detect::{detect_profile, validate_profile, DatasetProfile};
use crate::indexing::trajectory::discover_tables;
use crate::store::DatasetStore;

#[derive(Parser)]
#[command(name = "scene-explorer")]
#[command(about = "Traffic-scene dataset indexing and scene bundles", version)]
pub struct Cli {
    /// Repository root that registry and relative dataset paths resolve against
    #[arg(long, default_value = ".", global = true)]
    repo_root: PathBuf,

    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra dataset profile (JSON) to serve alongside the registry
    #[arg(short, long, global = true)]
    profile: Vec<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured datasets
    Datasets,

    /// List the groups (intersections, locations, sensors) of a split
    Groups {
        dataset: String,
        #[arg(short, long, default_value = "train")]
        split: String,
    },

    /// List a page of scenes
    Scenes {
        dataset: String,
        #[arg(short, long, default_value = "train")]
        split: String,
        /// Only scenes of this group
        #[arg(short, long)]
        group: Option<String>,
        #[arg(long, default_value_t = 200)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show where a scene sits within its split and group
    Locate {
        dataset: String,
        scene: String,
        #[arg(short, long, default_value = "train")]
        split: String,
    },

    /// Materialize a scene bundle as JSON
    Bundle {
        dataset: String,
        scene: String,
        #[arg(short, long, default_value = "train")]
        split: String,
        /// Skip the map clip
        #[arg(long)]
        no_map: bool,
        /// Clip padding in meters
        #[arg(long)]
        map_padding: Option<f64>,
        /// Keep every n-th map vertex
        #[arg(long)]
        map_points_step: Option<usize>,
        /// Lane cap per clip (0 = unlimited)
        #[arg(long)]
        max_lanes: Option<usize>,
        /// Clip region: scene or intersection
        #[arg(long)]
        map_clip: Option<String>,
        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the background image path of a scene
    Background {
        dataset: String,
        scene: String,
        #[arg(short, long, default_value = "all")]
        split: String,
    },

    /// Detect the dataset family of local folders and propose a profile
    Detect {
        /// Folders or files to inspect
        #[arg(required = true)]
        paths: Vec<String>,
        /// Restrict detection to one dataset type
        #[arg(long = "type")]
        type_hint: Option<String>,
        /// Display name of the proposed profile
        #[arg(long)]
        name: Option<String>,
        /// Write the proposed profile to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a dataset profile
    Validate {
        /// Profile JSON file
        profile_json: PathBuf,
        /// Write the normalized profile back to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sweep sampled scenes for map misalignment
    Check {
        #[arg(default_value = "v2x-traj")]
        dataset: String,
        /// train, val or both
        #[arg(short, long, default_value = "both")]
        split: String,
        /// Groups sampled per split
        #[arg(long, default_value_t = 5)]
        intersections: usize,
        /// Scenes sampled per group
        #[arg(long, default_value_t = 5)]
        scenes_per_intersection: usize,
        #[arg(long, default_value = "scene")]
        map_clip: String,
        #[arg(long, default_value_t = 120.0)]
        map_padding: f64,
        #[arg(long, default_value_t = 3)]
        map_points_step: usize,
        #[arg(long, default_value_t = 5000)]
        max_lanes: usize,
    },

    /// Write the scene-index table of a trajectory dataset
    Index {
        dataset: String,
        /// Output CSV (defaults to <dataset root>/scenes.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║ {:<62} ║", title);
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        eprintln!("║ {:<20}: {:<39} ║", key, display_value);
    }
    eprintln!("╚══════════════════════════════════════════════════════════════╝");
    eprintln!();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<ExplorerConfig> {
    match path {
        Some(p) => {
            info!("Loading config from {:?}", p);
            ExplorerConfig::from_yaml(p).with_context(|| format!("Failed to load config {}", p.display()))
        }
        None => Ok(ExplorerConfig::default()),
    }
}

/// Registry datasets plus the datasets of any `--profile` files.
fn open_store(cli: &Cli, config: ExplorerConfig) -> Result<DatasetStore> {
    let mut specs = load_registry(&cli.repo_root).context("Failed to load dataset registry")?;
    for path in &cli.profile {
        let profile = DatasetProfile::from_json(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        let validated = validate_profile(&cli.repo_root, &profile, &config.detection);
        if !validated.validation.status.is_usable() {
            warn!(
                "Profile {} is not usable ({:?}); skipping",
                path.display(),
                validated.validation.status
            );
            continue;
        }
        match DatasetSpec::from_profile(&validated.profile) {
            Some(spec) => specs.push(spec),
            None => warn!("Profile {} has no dataset root; skipping", path.display()),
        }
    }
    Ok(DatasetStore::new(specs, config))
}

fn adapter(store: &DatasetStore, dataset: &str) -> Result<std::sync::Arc<Adapter>> {
    let spinner = create_spinner(&format!("Indexing {}...", dataset));
    let result = store.get_adapter(dataset);
    spinner.finish_and_clear();
    Ok(result?)
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    if let Err(e) = dispatch(&cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Datasets => {
            let store = open_store(cli, config)?;
            print_json(&store.list_datasets())
        }

        Commands::Groups { dataset, split } => {
            let store = open_store(cli, config)?;
            let adapter = adapter(&store, dataset)?;
            print_json(&adapter.list_intersections(split))
        }

        Commands::Scenes {
            dataset,
            split,
            group,
            limit,
            offset,
        } => {
            let store = open_store(cli, config)?;
            let adapter = adapter(&store, dataset)?;
            print_json(&adapter.list_scenes(split, group.as_deref(), *limit, *offset))
        }

        Commands::Locate { dataset, scene, split } => {
            let store = open_store(cli, config)?;
            let adapter = adapter(&store, dataset)?;
            print_json(&adapter.locate_scene(split, scene))
        }

        Commands::Bundle {
            dataset,
            scene,
            split,
            no_map,
            map_padding,
            map_points_step,
            max_lanes,
            map_clip,
            output,
        } => {
            let mut options: BundleOptions = config.bundle.clone();
            if *no_map {
                options.include_map = false;
            }
            if let Some(v) = map_padding {
                options.map_padding = *v;
            }
            if let Some(v) = map_points_step {
                options.map_points_step = (*v).max(1);
            }
            if let Some(v) = max_lanes {
                options.max_lanes = *v;
            }
            if let Some(v) = map_clip {
                options.map_clip = MapClip::parse(v);
            }

            let store = open_store(cli, config)?;
            let adapter = adapter(&store, dataset)?;
            let start = Instant::now();
            let bundle = adapter
                .load_scene_bundle(split, scene, &options)
                .with_context(|| format!("Failed to load scene {} of {}", scene, dataset))?;
            for w in &bundle.warnings {
                warn!("{}", w);
            }

            match output {
                Some(path) => {
                    write_json(&bundle, path)?;
                    print_summary(
                        "Scene Bundle",
                        &[
                            ("Dataset", bundle.dataset_id.clone()),
                            ("Scene", bundle.scene_id.clone()),
                            ("Split", bundle.split.clone()),
                            ("Frames", bundle.frames.len().to_string()),
                            ("Records", bundle.record_count().to_string()),
                            ("Map lanes", bundle.map.as_ref().map_or(0, |m| m.lanes.len()).to_string()),
                            ("Warnings", bundle.warnings.len().to_string()),
                            ("Output", path.display().to_string()),
                            ("Time", format!("{:.2?}", start.elapsed())),
                        ],
                    );
                    Ok(())
                }
                None => print_json(&bundle),
            }
        }

        Commands::Background { dataset, scene, split } => {
            let store = open_store(cli, config)?;
            let adapter = adapter(&store, dataset)?;
            match adapter.get_scene_background(split, scene) {
                Some(path) => {
                    println!("{}", path.display());
                    Ok(())
                }
                None => bail!("No background image for scene {} of {}", scene, dataset),
            }
        }

        Commands::Detect {
            paths,
            type_hint,
            name,
            output,
        } => {
            let spinner = create_spinner("Detecting dataset layout...");
            let report = detect_profile(
                &cli.repo_root,
                paths.as_slice(),
                type_hint.as_deref(),
                name.as_deref(),
                &config.detection,
            );
            spinner.finish_and_clear();

            if let (Some(path), Some(profile)) = (output, report.profile.as_ref()) {
                profile
                    .to_json(path)
                    .with_context(|| format!("Failed to write profile {}", path.display()))?;
                print_summary(
                    "Dataset Detection",
                    &[
                        ("Type", profile.dataset_type.clone()),
                        ("Score", format!("{:.1}", report.score)),
                        ("Margin", format!("{:.1}", report.margin)),
                        ("Decision", format!("{:?}", report.decision_mode)),
                        ("Status", format!("{:?}", report.validation.status)),
                        ("Profile", path.display().to_string()),
                    ],
                );
            }
            print_json(&report)?;
            if !report.ok {
                bail!(report.error.unwrap_or_else(|| "Detection failed".to_string()));
            }
            Ok(())
        }

        Commands::Validate { profile_json, output } => {
            let profile = DatasetProfile::from_json(profile_json)
                .with_context(|| format!("Failed to read profile {}", profile_json.display()))?;
            let validated = validate_profile(&cli.repo_root, &profile, &config.detection);
            if let Some(path) = output {
                validated
                    .profile
                    .to_json(path)
                    .with_context(|| format!("Failed to write profile {}", path.display()))?;
            }
            print_json(&validated)?;
            if !validated.validation.status.is_usable() {
                bail!("Profile is not usable: {:?}", validated.validation.status);
            }
            Ok(())
        }

        Commands::Check {
            dataset,
            split,
            intersections,
            scenes_per_intersection,
            map_clip,
            map_padding,
            map_points_step,
            max_lanes,
        } => {
            let splits: Vec<&str> = match split.as_str() {
                "both" => vec!["train", "val"],
                "train" | "val" => vec![split.as_str()],
                other => bail!("Unknown split {:?} (expected train, val or both)", other),
            };
            let options = BundleOptions {
                include_map: true,
                map_padding: *map_padding,
                map_points_step: (*map_points_step).max(1),
                max_lanes: *max_lanes,
                map_clip: MapClip::parse(map_clip),
            };

            let store = open_store(cli, config)?;
            let adapter = adapter(&store, dataset)?;
            let start = Instant::now();
            let report = check_alignment(&adapter, &splits, *intersections, *scenes_per_intersection, &options);

            let mut items: Vec<(&str, String)> = vec![("Dataset", dataset.clone())];
            for (name, tally) in &report.splits {
                items.push((name.as_str(), format!("{} checked, {} bad", tally.checked, tally.bad)));
            }
            items.push(("Time", format!("{:.2?}", start.elapsed())));
            print_summary("Map Alignment", &items);

            if !report.is_clean() {
                bail!(
                    "{} of {} sampled scenes are misaligned",
                    report.failures.len(),
                    report.checked()
                );
            }
            Ok(())
        }

        Commands::Index { dataset, output } => {
            let store = open_store(cli, config)?;
            let spec = store
                .spec(dataset)
                .with_context(|| format!("Unknown dataset: {}", dataset))?;
            let Some(family) = spec
                .family()
                .filter(|f| matches!(f, Family::V2xTraj | Family::V2xSeq)) else {
                bail!("Dataset {} ({}) has no scene-index table", dataset, spec.family_name);
            };

            let layouts = layouts_for(family);
            let start = Instant::now();
            let spinner = create_spinner("Scanning scene tables...");
            let entries = discover_tables(spec, layouts);
            spinner.finish_and_clear();

            let rows: Vec<_> = entries
                .iter()
                .filter_map(|e| {
                    let layout = layouts.iter().find(|l| l.name == e.modality)?;
                    Some(e.to_index_row(&spec.root, layout))
                })
                .collect();
            if rows.is_empty() {
                bail!("No scene tables found below {}", spec.root.display());
            }

            let path = output.clone().unwrap_or_else(|| spec.root.join("scenes.csv"));
            let written = write_scene_index_csv(&rows, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} rows to {:?}", written, path);

            print_summary(
                "Scene Index",
                &[
                    ("Dataset", dataset.clone()),
                    ("Tables", written.to_string()),
                    ("Output", path.display().to_string()),
                    ("Time", format!("{:.2?}", start.elapsed())),
                ],
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_bundle() {
        let cli = Cli::try_parse_from([
            "scene-explorer",
            "--repo-root",
            "/data",
            "bundle",
            "v2x-traj",
            "12",
            "--split",
            "val",
            "--no-map",
            "--map-clip",
            "scene",
        ])
        .unwrap();
        assert_eq!(cli.repo_root, PathBuf::from("/data"));
        match cli.command {
            Commands::Bundle {
                dataset,
                scene,
                split,
                no_map,
                map_clip,
                ..
            } => {
                assert_eq!(dataset, "v2x-traj");
                assert_eq!(scene, "12");
                assert_eq!(split, "val");
                assert!(no_map);
                assert_eq!(map_clip.as_deref(), Some("scene"));
            }
            _ => panic!("expected bundle"),
        }
    }

    #[test]
    fn test_cli_parses_detect() {
        let cli = Cli::try_parse_from(["scene-explorer", "-vv", "detect", "a", "b", "--type", "ind"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Detect { paths, type_hint, .. } => {
                assert_eq!(paths, vec!["a", "b"]);
                assert_eq!(type_hint.as_deref(), Some("ind"));
            }
            _ => panic!("expected detect"),
        }
        assert!(Cli::try_parse_from(["scene-explorer", "detect"]).is_err());
    }

    #[test]
    fn test_cli_parses_check_defaults() {
        let cli = Cli::try_parse_from(["scene-explorer", "check"]).unwrap();
        match cli.command {
            Commands::Check {
                dataset,
                split,
                intersections,
                map_clip,
                map_padding,
                max_lanes,
                ..
            } => {
                assert_eq!(dataset, "v2x-traj");
                assert_eq!(split, "both");
                assert_eq!(intersections, 5);
                assert_eq!(map_clip, "scene");
                assert_eq!(map_padding, 120.0);
                assert_eq!(max_lanes, 5000);
            }
            _ => panic!("expected check"),
        }
    }
}
