use clap::{Args, Parser, Subcommand};
use dkm_core::data::{gaussian_blobs, Blob};
use dkm_core::{
    handle_request, run, Dataset, DkmError, OptimizationMode, PhaseRequest, RunConfig, RunContext,
    SiteContext, TracingSink,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

mod logging;
mod simulate;
mod store;

use store::{read_dataset, FileConfigStore, FileDatasetSource};

#[derive(Parser, Debug)]
#[command(name = "dkm")]
#[command(about = "Decentralized k-means with single-shot centroid merging")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all sites in process and print the merged result
    Run(RunArgs),
    /// Answer one phase request read from stdin, as a single site
    Local(LocalArgs),
    /// Run the message protocol with one task per site
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    /// JSON file holding an array of points (ndarray matrices)
    #[arg(long, conflicts_with = "synthetic")]
    data: Option<PathBuf>,

    /// Generate this many points from Gaussian blobs instead of reading a file
    #[arg(long)]
    synthetic: Option<usize>,

    /// Blob means for synthetic data, one blob per value
    #[arg(long, value_delimiter = ',', default_value = "-1,1", allow_hyphen_values = true)]
    blob_means: Vec<f64>,

    /// Standard deviation of every synthetic blob
    #[arg(long, default_value = "0.1")]
    blob_sigma: f64,

    /// Point shape for synthetic data, as ROWSxCOLS
    #[arg(long, default_value = "1x2", value_parser = parse_shape)]
    shape: (usize, usize),
}

#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// JSON run config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    k: Option<usize>,

    /// Number of sites
    #[arg(short, long)]
    sites: Option<usize>,

    /// lloyd or gradient
    #[arg(long)]
    optimization: Option<OptimizationMode>,

    #[arg(long)]
    epsilon: Option<f64>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    max_rounds: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Split the dataset in input order
    #[arg(long)]
    no_shuffle: bool,

    /// Skip recomputing sites that already converged
    #[arg(long)]
    freeze_converged: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    config: ConfigArgs,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LocalArgs {
    /// Directory that data references are resolved against
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    config: ConfigArgs,

    /// Directory for per-site data and configs
    #[arg(long, default_value = "dkm-sim")]
    workdir: PathBuf,

    /// Abort if a round takes longer than this many milliseconds
    #[arg(long, default_value = "30000")]
    round_timeout_ms: u64,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_shape(s: &str) -> Result<(usize, usize), String> {
    let (rows, cols) = s
        .split_once('x')
        .ok_or_else(|| format!("expected ROWSxCOLS, got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid dimension '{}': {}", v, e))
    };
    Ok((parse(rows)?, parse(cols)?))
}

impl ConfigArgs {
    fn resolve(&self) -> dkm_core::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => RunConfig::default(),
        };
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(sites) = self.sites {
            config.sites = sites;
        }
        if let Some(optimization) = self.optimization {
            config.optimization = optimization;
        }
        if let Some(epsilon) = self.epsilon {
            config.epsilon = epsilon;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.no_shuffle {
            config.shuffle = false;
        }
        if self.freeze_converged {
            config.freeze_converged = true;
        }
        config.validate()?;
        Ok(config)
    }
}

impl DataArgs {
    fn load(&self, seed: Option<u64>) -> dkm_core::Result<Dataset> {
        match (&self.data, self.synthetic) {
            (Some(path), _) => read_dataset(path),
            (None, Some(n)) => {
                let blobs: Vec<Blob> = self
                    .blob_means
                    .iter()
                    .map(|&mean| Blob::new(mean, self.blob_sigma))
                    .collect();
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                gaussian_blobs(n, &blobs, self.shape.0, self.shape.1, &mut rng)
            }
            (None, None) => Err(DkmError::Configuration(
                "either --data or --synthetic is required".into(),
            )),
        }
    }
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> dkm_core::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, json)?;
            info!("wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_command(args: RunArgs) -> dkm_core::Result<()> {
    let config = args.config.resolve()?;
    let dataset = args.data.load(config.seed)?;
    let output = run(&dataset, &config, &RunContext::default())?;
    info!(
        "{}: {} rounds, {} global centroids",
        output.name,
        output.round_count,
        output.global_centroids.len()
    );
    emit(&output, args.output.as_deref())
}

fn local_command(args: LocalArgs) -> dkm_core::Result<()> {
    let mut text = String::new();
    io::stdin().read_to_string(&mut text)?;
    let request: PhaseRequest = serde_json::from_str(&text)?;

    let state = request.state.clone();
    let mut store = FileConfigStore;
    let data = FileDatasetSource::new(args.data_dir);
    let sink = TracingSink;
    let mut ctx = SiteContext {
        state: &state,
        store: &mut store,
        data: &data,
        sink: &sink,
    };
    let response = handle_request(request, &mut ctx)?;
    emit(&response, None)
}

async fn simulate_command(args: SimulateArgs) -> dkm_core::Result<()> {
    let config = args.config.resolve()?;
    let dataset = args.data.load(config.seed)?;
    let outcome = simulate::simulate(
        &dataset,
        config,
        &args.workdir,
        Duration::from_millis(args.round_timeout_ms),
        &RunContext::default(),
    )
    .await?;
    info!(
        "protocol converged after {} rounds, {} global centroids",
        outcome.round_count,
        outcome.global_centroids.len()
    );
    emit(&outcome, args.output.as_deref())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_with_filter(&cli.log_level);

    match cli.command {
        Command::Run(args) => run_command(args)?,
        Command::Local(args) => local_command(args)?,
        Command::Simulate(args) => simulate_command(args).await?,
    }
    Ok(())
}
