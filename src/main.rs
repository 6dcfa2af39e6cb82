//! Cartograph CLI — trains adaptive self-organizing semantic maps.

use clap::{Parser, Subcommand};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use log::{error, warn};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use cartograph::{
    derived_update_exponent, unix_time, CartographError, Codebook, ConvergenceLog,
    GlobalTopology, LocalTopology, Neighbourhood, Result, SemanticMap, SparseCorpus,
    TrainingConfig, VERSION,
};

#[derive(Parser)]
#[command(name = "cartograph")]
#[command(version)]
#[command(about = "Adaptive self-organizing semantic maps over sparse text corpora")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Print author information
    #[arg(long)]
    author: bool,

    /// Verbose output (debug logs and per-epoch preliminary artifacts)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a semantic map from a corpus file
    Create {
        /// Corpus file (sparse binary snippet matrix)
        corpus: PathBuf,

        /// Map width in cells
        width: u16,

        /// Map height in cells
        height: u16,

        /// Base directory holding the named map directories
        #[arg(long)]
        directory: PathBuf,

        /// Name of the map; artifacts land in <directory>/<name>/
        #[arg(long)]
        name: String,

        /// Warm-start from the codebook of a previously trained map
        #[arg(long)]
        prior_name: Option<String>,

        /// Initial neighbourhood radius (default: (width + height) / 2)
        #[arg(long)]
        initial_radius: Option<u32>,

        /// Radius shrink exponent in (0, 1] (default: chosen so the radius
        /// ends at 1.5 after the last epoch)
        #[arg(long)]
        update_exponent: Option<f32>,

        /// Number of training epochs (at least 2)
        #[arg(long, default_value_t = 2)]
        epochs: u32,

        /// Global map shape: 0 = torus, 1 = moebius, 2 = tube, 4 = plane
        #[arg(long, default_value_t = 0)]
        global_topology: u8,

        /// Local neighbour shape: 8 = rectangular, 6 = hexagonal, 4 = circular
        #[arg(long, default_value_t = 4)]
        local_topology: u8,

        /// Disable the discontinuity-derived lower bound on cell radii
        #[arg(long)]
        non_adaptive: bool,

        /// Ignore vocabulary indices at or above this value while training
        #[arg(long, default_value_t = 0)]
        train_vocab_cutoff: u32,

        /// Reassign dead cells every nth epoch (0 disables)
        #[arg(long, default_value_t = 0)]
        dead_cell_update_strides: u32,

        /// Base seed for codebook initialization (default: wall clock)
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() {
    // All artifact formats are little endian.
    if cfg!(target_endian = "big") {
        eprintln!("Sorry, cartograph does not work on big-endian systems");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.author {
        println!("Created by the cartograph contributors");
        return;
    }

    let result = match cli.command {
        Some(Commands::Create {
            corpus,
            width,
            height,
            directory,
            name,
            prior_name,
            initial_radius,
            update_exponent,
            epochs,
            global_topology,
            local_topology,
            non_adaptive,
            train_vocab_cutoff,
            dead_cell_update_strides,
            seed,
        }) => create_semantic_map(CreateArgs {
            corpus,
            width,
            height,
            directory,
            name,
            prior_name,
            initial_radius,
            update_exponent,
            epochs,
            global_topology,
            local_topology,
            non_adaptive,
            train_vocab_cutoff,
            dead_cell_update_strides,
            seed,
            verbose: cli.verbose,
        }),
        None => Err(CartographError::InvalidArgument(
            "no command given; try --help".to_string(),
        )),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

struct CreateArgs {
    corpus: PathBuf,
    width: u16,
    height: u16,
    directory: PathBuf,
    name: String,
    prior_name: Option<String>,
    initial_radius: Option<u32>,
    update_exponent: Option<f32>,
    epochs: u32,
    global_topology: u8,
    local_topology: u8,
    non_adaptive: bool,
    train_vocab_cutoff: u32,
    dead_cell_update_strides: u32,
    seed: Option<u64>,
    verbose: bool,
}

fn create_semantic_map(args: CreateArgs) -> Result<()> {
    let start_time = Instant::now();
    let start_unix_time = unix_time();

    if args.name.is_empty() {
        return Err(CartographError::InvalidArgument(
            "please provide a map name with --name".to_string(),
        ));
    }

    let initial_radius = args
        .initial_radius
        .unwrap_or((u32::from(args.width) + u32::from(args.height)) / 2);
    let update_exponent = args
        .update_exponent
        .unwrap_or_else(|| derived_update_exponent(initial_radius, args.epochs));

    let config = TrainingConfig {
        width: args.width,
        height: args.height,
        initial_radius,
        update_exponent,
        epochs: args.epochs,
        global_topology: GlobalTopology::try_from(args.global_topology)?,
        local_topology: LocalTopology::try_from(args.local_topology)?,
        respect_lower_bound: !args.non_adaptive,
        train_vocab_cutoff: args.train_vocab_cutoff,
        dead_cell_update_strides: args.dead_cell_update_strides,
        seed: args.seed,
    };
    config.validate()?;
    let topology = config.topology()?;

    let run_dir = args.directory.join(&args.name);
    fs::create_dir_all(&run_dir)?;

    println!("Creating semantic map '{}'", args.name);
    print_settings(&config);

    let mut readme = File::create(run_dir.join("README.md"))?;
    write_readme_header(&mut readme, &args, &config)?;

    // Load the corpus behind a spinner; large corpora take a while to map
    // and verify.
    let spinner_style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap();
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style);
    pb.set_message("Loading corpus...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let data = SparseCorpus::load(&args.corpus)?;
    pb.finish_and_clear();

    let min_cutoff = data.min_cutoff_to_avoid_empty_rows();
    println!("Number of snippets:     {}", data.num_rows());
    println!("Vocabulary size:        {}", data.num_cols());
    println!("Longest leading zeros:  {}", min_cutoff);
    println!("Total number of tokens: {}", data.num_non_zero());

    write_dataset_section(&mut readme, &data, min_cutoff)?;

    if config.train_vocab_cutoff > 0 && min_cutoff > config.train_vocab_cutoff {
        warn!("some training snippets are empty under the vocabulary cutoff");
    }
    if config.train_vocab_cutoff > data.num_cols() {
        return Err(CartographError::InvalidArgument(
            "the vocabulary is smaller than the training vocabulary cutoff".to_string(),
        ));
    }

    let mut codebook = match &args.prior_name {
        Some(prior) => {
            let prior_path = args.directory.join(prior).join("codebook.bin");
            let codebook =
                Codebook::load(&prior_path, config.global_topology, config.local_topology)?;
            if (codebook.height(), codebook.width()) != (config.height, config.width) {
                return Err(CartographError::InvalidArgument(format!(
                    "prior codebook is {}x{} but the requested map is {}x{}",
                    codebook.width(),
                    codebook.height(),
                    config.width,
                    config.height
                )));
            }
            codebook
        }
        None => {
            let mut codebook =
                Codebook::new(config.height, config.width, data.num_cols(), topology);
            codebook.init_random(config.seed.unwrap_or_else(unix_time));
            codebook
        }
    };

    let mut neighbourhood = Neighbourhood::new(
        config.height,
        config.width,
        topology,
        config.update_exponent,
        config.initial_radius,
    );

    let mut convergence_log = ConvergenceLog::create(run_dir.join("convergence.tsv"))?;
    let preliminary_dir = args.verbose.then_some(run_dir.as_path());

    cartograph::train(
        &mut codebook,
        &mut neighbourhood,
        &data,
        &config,
        &mut convergence_log,
        preliminary_dir,
    )?;

    neighbourhood.save(run_dir.join("neighbourhood.bin"))?;

    let map = SemanticMap::build(&data, &codebook, config.train_vocab_cutoff)?;
    codebook.save(run_dir.join("codebook.bin"))?;
    map.save_best_matching_units(run_dir.join("bmus.bin"))?;
    if map.has_counts() {
        map.save_counts(run_dir.join("counts.bin"))?;
    }

    let elapsed = start_time.elapsed();
    println!("Creating the semantic map took {}", HumanDuration(elapsed));

    writeln!(readme, "## Timing")?;
    writeln!(readme, "Creation started at UnixTime:   {}", start_unix_time)?;
    writeln!(readme, "Creation ended at UnixTime:     {}", unix_time())?;
    writeln!(
        readme,
        "Creating the semantic map took: {}",
        HumanDuration(elapsed)
    )?;

    Ok(())
}

fn print_settings(config: &TrainingConfig) {
    println!("Dimensions:            {} x {}", config.width, config.height);
    println!("Initial update radius: {}", config.initial_radius);
    println!("Update exponent:       {}", config.update_exponent);
    println!("Respect lower bound:   {}", config.respect_lower_bound);
    println!(
        "Local topology:        {}",
        config.local_topology.describe()
    );
    println!(
        "Global topology:       {}",
        config.global_topology.describe()
    );
    println!("Training vocab cutoff: {}", config.train_vocab_cutoff);
    println!("Number of epochs:      {}", config.epochs);
    println!(
        "Dead cell updates:     {}",
        config.dead_cell_update_strides
    );
    println!();
}

fn write_readme_header(
    readme: &mut File,
    args: &CreateArgs,
    config: &TrainingConfig,
) -> Result<()> {
    writeln!(readme, "# Semantic Map {}", args.name)?;
    writeln!(readme)?;
    writeln!(readme, "Cartograph version:    {}", VERSION)?;
    writeln!(readme, "Verbose:               {}", args.verbose)?;
    writeln!(
        readme,
        "Prior map:             {}",
        args.prior_name.as_deref().unwrap_or("")
    )?;
    writeln!(readme)?;
    writeln!(readme, "## Hyperparameters")?;
    writeln!(readme, "Dimensions:            {} x {}", config.width, config.height)?;
    writeln!(readme, "Initial update radius: {}", config.initial_radius)?;
    writeln!(readme, "Update exponent:       {}", config.update_exponent)?;
    writeln!(readme, "Respect lower bound:   {}", config.respect_lower_bound)?;
    writeln!(
        readme,
        "Local topology:        {}",
        config.local_topology.describe()
    )?;
    writeln!(
        readme,
        "Global topology:       {}",
        config.global_topology.describe()
    )?;
    writeln!(readme, "Training vocab cutoff: {}", config.train_vocab_cutoff)?;
    writeln!(readme, "Number of epochs:      {}", config.epochs)?;
    writeln!(
        readme,
        "Dead cell updates:     {}",
        config.dead_cell_update_strides
    )?;
    writeln!(readme)?;
    writeln!(readme, "## Machine")?;
    writeln!(
        readme,
        "Max. parallel threads: {}",
        rayon::current_num_threads()
    )?;
    writeln!(readme)?;
    Ok(())
}

fn write_dataset_section(readme: &mut File, data: &SparseCorpus, min_cutoff: u32) -> Result<()> {
    writeln!(readme, "## Dataset")?;
    writeln!(readme, "Number of snippets:     {}", data.num_rows())?;
    writeln!(readme, "Vocabulary size:        {}", data.num_cols())?;
    writeln!(readme, "Longest leading zeros:  {}", min_cutoff)?;
    writeln!(readme, "Total number of tokens: {}", data.num_non_zero())?;
    writeln!(readme)?;
    Ok(())
}
