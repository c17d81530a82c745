use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::CliOptions;
use crate::config::HostConfig;
use crate::logging::init_logging;
use crate::world::World;

const DEFAULT_CONFIG_PATH: &str = "config/host.json";

pub fn run() -> Result<()> {
    run_with_options(CliOptions::default())
}

/// Headless run: load the scene, hold the given keys for `frames` fixed steps, then write the
/// resulting scene as JSON to `--output` or stdout.
pub fn run_with_options(options: CliOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };
    let overrides = options.config_overrides();
    config.apply_overrides(&overrides);
    init_logging(config.logging.filter.as_deref());
    if !overrides.is_empty() {
        log::info!("Applied CLI overrides: {}", overrides.applied_fields().join(", "));
    }

    let mut world = World::new(config);
    world.set_debug_keys(false);
    match &options.scene {
        Some(path) => world.load_scene(path)?,
        None => log::info!("No scene given, running against the empty scene"),
    }
    for err in world.load_errors() {
        log::warn!("{err}");
    }

    let dt = Duration::try_from_secs_f64(options.dt).with_context(|| format!("Invalid time step {}", options.dt))?;
    for _ in 0..options.frames {
        world.input_mut().set_held(options.hold.iter().map(String::as_str));
        let report = world.update_with_dt(dt);
        if !report.faults.is_empty() {
            log::warn!("Frame {}: {} script(s) faulted", report.frame, report.faults.len());
        }
    }

    let json = serde_json::to_string_pretty(&world.scene().to_value())?;
    match &options.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Creating output directory {}", parent.display()))?;
                }
            }
            fs::write(path, json.as_bytes()).with_context(|| format!("Writing scene to {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
