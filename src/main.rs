use anyhow::{Context, Result};
use clap::Parser;
use ptvprep::config;
use ptvprep::pipeline::{self, PipelineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "ptvprep")]
#[command(about = "Consolidate a nested GTFS distribution into deduplicated CSV tables")]
struct Cli {
    /// Path to the input GTFS distribution (.zip)
    input: PathBuf,

    /// Transient directory the distribution is unpacked into
    #[arg(long, default_value = config::DEFAULT_EXTRACT_DIR)]
    extract_dir: PathBuf,

    /// Directory the consolidated tables are written to
    #[arg(short, long, default_value = config::DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Regex matched against file names to find inner archives to unpack
    #[arg(long, default_value = config::DEFAULT_INNER_ARCHIVE_PATTERN)]
    inner_archive: String,

    /// Maximum number of nested archive levels
    #[arg(long, default_value_t = config::MAX_NESTING_DEPTH)]
    max_nesting: usize,

    /// Number of producer threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Records buffered between producers and the merger (0 = unbuffered)
    #[arg(long, default_value_t = config::DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// Leave the tables as plain files instead of bundling them into a zip
    #[arg(long)]
    no_bundle: bool,

    /// Keep the extraction and output directories after a successful run
    #[arg(long)]
    keep_temp: bool,

    /// Show a progress spinner while merging
    #[arg(long)]
    progress: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::new(&cli.input);
    config.extract_dir = cli.extract_dir;
    config.output_dir = cli.output_dir;
    config.inner_archive_pattern = cli.inner_archive;
    config.max_nesting = cli.max_nesting;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.channel_capacity = cli.channel_capacity;
    config.bundle = !cli.no_bundle;
    config.keep_temp = cli.keep_temp;
    config.progress = cli.progress;

    let summary = pipeline::run(&config)
        .with_context(|| format!("Failed to consolidate {}", cli.input.display()))?;

    println!();
    println!("=== Summary ===");
    println!(
        "Extraction time:     {:.2}s",
        summary.extraction_time.as_secs_f64()
    );
    println!(
        "Consolidation time:  {:.2}s",
        summary.consolidation_time.as_secs_f64()
    );
    println!("Write time:          {:.2}s", summary.write_time.as_secs_f64());
    println!();
    println!("Archives extracted:  {}", summary.archives_extracted);
    println!("Files extracted:     {}", summary.entries_extracted);
    println!("Entity files read:   {}", summary.files_matched);
    println!("Records read:        {}", summary.records_read);
    println!("Duplicates dropped:  {}", summary.duplicates_dropped);
    println!();
    for (entity, rows) in &summary.rows {
        println!("{:<20} {}", format!("{entity}:"), rows);
    }
    println!();
    match &summary.bundle {
        Some(bundle) => println!("Output bundle:       {}", bundle.display()),
        None => println!("Output directory:    {}", config.output_dir.display()),
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    match run(cli) {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
