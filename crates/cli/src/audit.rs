//! `plotcheck run` / `plotcheck validate`: load the config, resolve and read
//! the three inputs, run the engine, emit reports.

use std::path::{Path, PathBuf};

use plotcheck_audit::config::OverlapStrategy;
use plotcheck_audit::{load_input, AuditConfig};
use tracing::{debug, info};

use crate::exit_codes::EXIT_FINDINGS;
use crate::report;
use crate::{CliError, InputArgs};

pub struct RunOptions {
    pub json: bool,
    pub output: Option<PathBuf>,
    pub deviation_threshold: Option<f64>,
    pub overlap_threshold: Option<f64>,
    pub strategy: Option<OverlapStrategy>,
    pub sequential: bool,
    pub fail_on_findings: bool,
}

/// Resolved dataset paths of one run.
#[derive(Debug, PartialEq)]
struct InputPaths {
    producers: PathBuf,
    plantations: PathBuf,
    parcels: PathBuf,
}

pub fn cmd_run(config_path: PathBuf, inputs: InputArgs, opts: RunOptions) -> Result<(), CliError> {
    let mut config = load_config(&config_path)?;
    if let Some(deviation) = opts.deviation_threshold {
        config.thresholds.deviation = deviation;
    }
    if let Some(overlap) = opts.overlap_threshold {
        config.thresholds.overlap = overlap;
    }
    if let Some(strategy) = opts.strategy {
        config.overlap.strategy = strategy;
    }
    if opts.sequential {
        config.overlap.parallel = false;
    }
    config.validate()?;

    let paths = resolve_inputs(&config_path, &config, &inputs)?;
    let producers = read_input(&paths.producers, "producers")?;
    let plantations = read_input(&paths.plantations, "plantations")?;
    let parcels = read_input(&paths.parcels, "parcels")?;
    let input = load_input(&producers, &plantations, &parcels)?;

    let result = plotcheck_audit::run(&config, &input)?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| CliError::output(format!("JSON serialization error: {e}")))?;

    if let Some(ref dir) = opts.output {
        let written = report::write_reports(dir, &result, &json_str)?;
        for path in &written {
            debug!(path = %path.display(), "report written");
        }
        eprintln!("wrote {} reports to {}", written.len(), dir.display());
    }

    if opts.json {
        println!("{json_str}");
    }

    // Human summary to stderr
    let s = &result.summary;
    eprintln!(
        "audit '{}': {} producers, {} plantations, {}/{} parcels kept (EPSG:{})",
        result.meta.config_name, s.producers, s.plantations, s.parcels_kept, s.parcels_loaded, s.projection_epsg,
    );
    eprintln!(
        "{} anomalies, {} joined plantations ({} area anomalies, {:.1}%), {} overlaps, {} warnings",
        s.total_anomalies, s.joined_plantations, s.area_anomalies, s.area_anomaly_rate, s.overlaps, s.warnings,
    );
    for warning in &result.warnings {
        eprintln!("warning: [{}] {}", warning.stage, warning.message);
    }

    if opts.fail_on_findings && result.has_findings() {
        return Err(CliError {
            code: EXIT_FINDINGS,
            message: format!("{} anomalies and {} overlaps found", s.total_anomalies, s.overlaps),
            hint: None,
        });
    }
    Ok(())
}

pub fn cmd_validate(config_path: PathBuf, inputs: InputArgs) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    config.validate()?;
    let paths = resolve_inputs(&config_path, &config, &inputs)?;

    for (dataset, path) in [
        ("producers", &paths.producers),
        ("plantations", &paths.plantations),
        ("parcels", &paths.parcels),
    ] {
        if !path.is_file() {
            return Err(CliError::input(format!("{dataset}: {} not found", path.display())));
        }
    }

    eprintln!(
        "config '{}' ok: {} producer ranges, {} plantation ranges, deviation {}, overlap {} ({})",
        config.name,
        config.ranges.producers.len(),
        config.ranges.plantations.len(),
        config.thresholds.deviation,
        config.thresholds.overlap,
        config.overlap.strategy,
    );
    Ok(())
}

fn load_config(path: &Path) -> Result<AuditConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::config(format!("cannot read config {}: {e}", path.display())))?;
    let config = AuditConfig::from_toml(&text)?;
    info!(name = %config.name, path = %path.display(), "config loaded");
    Ok(config)
}

/// Command-line paths win; `[inputs]` paths are relative to the config file.
fn resolve_inputs(config_path: &Path, config: &AuditConfig, args: &InputArgs) -> Result<InputPaths, CliError> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let configured = config.inputs.as_ref();

    let resolve = |flag: &Option<PathBuf>, configured: Option<PathBuf>, dataset: &str| {
        flag.clone().or(configured).ok_or_else(|| {
            CliError::usage(format!("no {dataset} input"))
                .with_hint(format!("add an [inputs] table to the config or pass --{dataset}"))
        })
    };

    Ok(InputPaths {
        producers: resolve(&args.producers, configured.map(|i| base_dir.join(&i.producers)), "producers")?,
        plantations: resolve(&args.plantations, configured.map(|i| base_dir.join(&i.plantations)), "plantations")?,
        parcels: resolve(&args.parcels, configured.map(|i| base_dir.join(&i.parcels)), "parcels")?,
    })
}

fn read_input(path: &Path, dataset: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::input(format!("{dataset}: cannot read {}: {e}", path.display())))
}
