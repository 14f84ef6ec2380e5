//! CLI interface for the image retrieval engine

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use vocabtree::{Cbir, CbirConfig, DirectoryFeatureProvider, FeatureProvider, QueryMode, RouteMode};

#[derive(Parser)]
#[command(name = "vocabtree")]
#[command(about = "Content-based image retrieval with a vocabulary tree", long_about = None)]
struct Cli {
    /// Directory of descriptor files, one comma-separated feature per line
    #[arg(long)]
    data_dir: PathBuf,

    /// JSON config file. Flags given on the command line override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of children per internal node
    #[arg(long)]
    branches: Option<usize>,

    /// Maximum tree depth
    #[arg(long)]
    depth: Option<usize>,

    /// Seed for k-means initialisation
    #[arg(long)]
    seed: Option<u64>,

    /// Multiply visit counts by node weights when encoding
    #[arg(long)]
    weighted: bool,

    /// How descriptors record visits while descending
    #[arg(long, value_enum)]
    route: Option<RouteArg>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy)]
enum RouteArg {
    Path,
    Inspected,
}

impl From<RouteArg> for RouteMode {
    fn from(arg: RouteArg) -> Self {
        match arg {
            RouteArg::Path => RouteMode::Path,
            RouteArg::Inspected => RouteMode::Inspected,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build and index the corpus, then print tree statistics
    Stats,
    /// Rank the corpus against a query image
    Query {
        /// Descriptor file of the query, relative to the data directory or absolute
        image: String,
        /// Number of results to return
        #[arg(short, long, default_value = "4")]
        n: usize,
        /// Merge the query into the index before scoring
        #[arg(long)]
        add: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Score two corpus images against each other
    Score {
        first: String,
        second: String,
    },
}

fn load_config(cli: &Cli) -> Result<CbirConfig> {
    let mut config = match &cli.config {
        Some(path) => CbirConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CbirConfig::default(),
    };
    if let Some(branches) = cli.branches {
        config.tree.n_branches = branches;
    }
    if let Some(depth) = cli.depth {
        config.tree.depth = depth;
    }
    if let Some(seed) = cli.seed {
        config.kmeans.seed = Some(seed);
    }
    if let Some(route) = cli.route {
        config.route_mode = route.into();
    }
    if cli.weighted {
        config.apply_weights = true;
    }
    config.validate()?;
    Ok(config)
}

fn resolve(provider: &DirectoryFeatureProvider, image: &str) -> PathBuf {
    let path = PathBuf::from(image);
    if path.is_absolute() || path.exists() {
        path
    } else {
        provider.image_path(image)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(&cli)?;
    if let Commands::Query { add: true, .. } = cli.command {
        config.query_mode = QueryMode::AddToCorpus;
    }

    let provider = DirectoryFeatureProvider::open(&cli.data_dir)
        .with_context(|| format!("opening {}", cli.data_dir.display()))?;
    if provider.all_images().is_empty() {
        bail!("No descriptor files in {}", cli.data_dir.display());
    }

    let (mut cbir, report) = Cbir::initialise(provider, config)?;
    for failure in &report.failures {
        eprintln!("Skipped {}: {}", failure.image.display(), failure.error);
    }

    match cli.command {
        Commands::Stats => {
            let tree = cbir.tree()?;
            println!("Nodes:          {}", tree.len());
            println!("Leaves:         {}", tree.leaves().count());
            println!("Branching:      {}", tree.n_branches());
            println!("Max depth:      {}", tree.max_depth());
            println!("Dimension:      {}", tree.dimension());
            println!("Indexed images: {}", tree.indexed_image_count());
            println!("Failed images:  {}", report.failures.len());
        }
        Commands::Query { image, n, json, .. } => {
            let query = resolve(cbir.provider(), &image);
            let results = cbir.retrieve(&query, Some(n))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results found (corpus is empty)");
            } else {
                println!("Top {} results:", results.len());
                for (i, result) in results.iter().enumerate() {
                    println!("{}. {} (score: {:.4})", i + 1, result.image_id, result.score);
                }
            }
        }
        Commands::Score { first, second } => {
            let a = resolve(cbir.provider(), &first);
            let b = resolve(cbir.provider(), &second);
            let score = cbir.score(&a, &b)?;
            println!("{:.6}", score);
        }
    }
    Ok(())
}
