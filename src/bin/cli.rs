//! seriation-map CLI
//!
//! Usage:
//!   seriation-map features <trajectories> <regions> [--labels <file>] [--radius <km>] [--scale <kind>]
//!   seriation-map order <trajectories> <regions> [--method <name>] [--radius <km>]
//!   seriation-map methods
//!
//! Feature tables and orderings are written as CSV to stdout; progress is
//! logged to stderr (set `RUST_LOG=debug` for per-stage timings).

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use seriation_map::{
    ColumnScaling, InputFiles, OrderingRegistry, RegionOrder, Result, Smap, SmapConfig,
    SmapError, DEFAULT_METHOD,
};

#[derive(Parser)]
#[command(name = "seriation-map")]
#[command(about = "Per-region trajectory features and region seriation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Trajectory CSV file
    trajectories: PathBuf,

    /// Base region partition (GeoJSON)
    regions: PathBuf,

    /// Labelled regions (GeoJSON with a `label` property)
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Smoothing radius in kilometres (overrides the config file)
    #[arg(short, long)]
    radius: Option<f64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-feature cache directory (overrides the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Do not read or write the pre-feature cache
    #[arg(long)]
    no_cache: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scale {
    None,
    Minmax,
    Quantile,
}

impl From<Scale> for ColumnScaling {
    fn from(scale: Scale) -> Self {
        match scale {
            Scale::None => ColumnScaling::None,
            Scale::Minmax => ColumnScaling::MinMax,
            Scale::Quantile => ColumnScaling::Quantile,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the smoothed per-region feature table
    Features {
        #[command(flatten)]
        input: InputArgs,

        /// Rescale every column onto [0, 1] before printing
        #[arg(short, long, value_enum, default_value_t = Scale::None)]
        scale: Scale,
    },

    /// Print the position (or cluster label) of every region
    Order {
        #[command(flatten)]
        input: InputArgs,

        /// Ordering method, as listed by `methods`
        #[arg(short, long, default_value = DEFAULT_METHOD)]
        method: String,
    },

    /// List the available ordering methods
    Methods,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Features { input, scale } => run_features(&input, scale.into()),
        Commands::Order { input, method } => run_order(&input, &method),
        Commands::Methods => run_methods(),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Build the engine from command line arguments.
fn open_engine(input: &InputArgs) -> Result<Smap> {
    let mut config = match &input.config {
        Some(path) => SmapConfig::from_json_file(path)?,
        None => SmapConfig::default(),
    };
    if let Some(radius) = input.radius {
        config.radius_km = radius;
    }
    if let Some(dir) = &input.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if input.no_cache {
        config.cache_dir = None;
    }

    let mut files = InputFiles::new(&input.trajectories, &input.regions);
    if let Some(labels) = &input.labels {
        files = files.with_labels(labels);
    }
    Smap::new(files, config)
}

fn run_features(input: &InputArgs, scaling: ColumnScaling) -> Result<()> {
    let mut smap = open_engine(input)?;
    let table = smap.feature_table()?;
    match scaling {
        ColumnScaling::None => table.write_csv(io::stdout().lock()),
        _ => table.scaled(scaling).write_csv(io::stdout().lock()),
    }
}

fn run_order(input: &InputArgs, method: &str) -> Result<()> {
    let mut smap = open_engine(input)?;
    let order = smap.get_order(method)?;
    let table = smap.feature_table()?;

    let column = match &order {
        RegionOrder::Permutation(_) => "position",
        RegionOrder::Clusters(_) => "cluster",
    };
    let values = order.ranks();

    let mut out = io::stdout().lock();
    let mut write = || -> io::Result<()> {
        writeln!(out, "region_id,{}", column)?;
        for (row, region_id) in table.region_ids().iter().enumerate() {
            writeln!(out, "{},{}", region_id, values[row])?;
        }
        out.flush()
    };
    write().map_err(|source| SmapError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    })
}

fn run_methods() -> Result<()> {
    let registry = OrderingRegistry::with_defaults(&SmapConfig::default());
    for name in registry.names() {
        let kind = if registry.get(name)?.is_clustering() {
            "clusters"
        } else {
            "permutation"
        };
        println!("{:<36} {}", name, kind);
    }
    Ok(())
}
