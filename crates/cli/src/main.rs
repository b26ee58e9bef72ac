// plotcheck CLI - producer / plantation / parcel audit from a TOML config

mod audit;
mod exit_codes;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exit_codes::{audit_exit_code, EXIT_CONFIG, EXIT_INPUT, EXIT_OUTPUT, EXIT_SUCCESS, EXIT_USAGE};
use plotcheck_audit::config::OverlapStrategy;
use plotcheck_audit::AuditError;

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  plotcheck-audit ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

#[derive(Parser)]
#[command(name = "plotcheck")]
#[command(about = "Data-quality and geometric audit of producer, plantation and parcel datasets")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Log more to stderr (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the audit described by a TOML config
    #[command(after_help = "\
Findings (anomalies, overlaps) are reported but exit 0 unless --fail-on-findings is set.

Examples:
  plotcheck run audit.toml
  plotcheck run audit.toml --json | jq .summary
  plotcheck run audit.toml --output reports/
  plotcheck run audit.toml --overlap-threshold 0.25 --strategy exhaustive
  plotcheck run audit.toml --parcels parcelles_2024.geojson --fail-on-findings")]
    Run {
        /// Path to the audit .toml config
        config: PathBuf,

        #[command(flatten)]
        inputs: InputArgs,

        /// Print the full result as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Directory for the JSON, CSV and GeoJSON reports
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Relative deviation above which areas and totals are flagged (0-1]
        #[arg(long)]
        deviation_threshold: Option<f64>,

        /// Overlap ratio above which a parcel pair is reported (0-1]
        #[arg(long)]
        overlap_threshold: Option<f64>,

        /// Overlap search strategy
        #[arg(long)]
        strategy: Option<StrategyArg>,

        /// Evaluate overlap pairs on a single thread
        #[arg(long)]
        sequential: bool,

        /// Exit 1 when any anomaly or overlap is found
        #[arg(long)]
        fail_on_findings: bool,
    },

    /// Check a config and its input paths without running
    #[command(after_help = "\
Examples:
  plotcheck validate audit.toml
  plotcheck validate audit.toml --producers producteurs.csv")]
    Validate {
        /// Path to the audit .toml config
        config: PathBuf,

        #[command(flatten)]
        inputs: InputArgs,
    },
}

/// Input paths overriding the config's `[inputs]` table. Used as given,
/// not relative to the config file.
#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// Producer CSV
    #[arg(long, env = "PLOTCHECK_PRODUCERS")]
    pub producers: Option<PathBuf>,

    /// Plantation CSV
    #[arg(long, env = "PLOTCHECK_PLANTATIONS")]
    pub plantations: Option<PathBuf>,

    /// Parcel GeoJSON FeatureCollection
    #[arg(long, env = "PLOTCHECK_PARCELS")]
    pub parcels: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    /// R-tree bounding-box pre-filter
    Indexed,
    /// Every pair
    Exhaustive,
}

impl From<StrategyArg> for OverlapStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Indexed => OverlapStrategy::Indexed,
            StrategyArg::Exhaustive => OverlapStrategy::Exhaustive,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            inputs,
            json,
            output,
            deviation_threshold,
            overlap_threshold,
            strategy,
            sequential,
            fail_on_findings,
        } => audit::cmd_run(
            config,
            inputs,
            audit::RunOptions {
                json,
                output,
                deviation_threshold,
                overlap_threshold,
                strategy: strategy.map(OverlapStrategy::from),
                sequential,
                fail_on_findings,
            },
        ),
        Commands::Validate { config, inputs } => audit::cmd_validate(config, inputs),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self { code: EXIT_INPUT, message: msg.into(), hint: None }
    }

    pub fn output(msg: impl Into<String>) -> Self {
        Self { code: EXIT_OUTPUT, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<AuditError> for CliError {
    fn from(err: AuditError) -> Self {
        let hint = match &err {
            AuditError::MissingColumn { column, .. } => Some(format!("the header row must contain '{column}'")),
            AuditError::UnsupportedCrs(_) => {
                Some("use CRS84 / EPSG:4326 or a projected EPSG:326xx / 327xx / 3857 code".to_string())
            }
            _ => None,
        };
        Self { code: audit_exit_code(&err), message: err.to_string(), hint }
    }
}
