use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kirinuki::{
    cache::CacheStore, config::ConfigManager, models::format_hms, utils, AnalyserConfig,
    HighlightFilter, IntegrityStatus, NdjsonCollector, StreamAnalyser, StreamAnalysis,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kirinuki")]
#[command(about = "Find highlights in recorded stream chat", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the XDG config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache root (overrides the config file)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a stream and print its highlights
    Analyse(AnalyseArgs),
    /// Find chat messages containing a phrase
    Find(FindArgs),
    /// Inspect or clean the chat cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args)]
struct SourceArgs {
    stream_id: String,

    /// NDJSON chat dump for this stream
    #[arg(long, conflicts_with = "dump_dir")]
    dump: Option<PathBuf>,

    /// Directory holding `<stream_id>.ndjson` dumps
    #[arg(long, default_value = ".")]
    dump_dir: PathBuf,
}

#[derive(Args)]
struct AnalyseArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Only the top N highlights
    #[arg(long)]
    top: Option<usize>,

    /// Only highlights with one of these contexts
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Drop highlights with one of these contexts
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Drop highlights with these intensity levels
    #[arg(long, value_delimiter = ',')]
    skip_intensity: Vec<String>,

    /// Print timestamped links instead of summaries
    #[arg(long)]
    urls: bool,

    /// Also print the most used phrase
    #[arg(long)]
    phrase: bool,
}

#[derive(Args)]
struct FindArgs {
    #[command(flatten)]
    source: SourceArgs,

    phrase: String,

    /// Message text must equal the phrase
    #[arg(long)]
    exact: bool,

    #[arg(long)]
    case_sensitive: bool,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List cached streams
    List,
    /// Delete one cached stream
    Reset { stream_id: String },
    /// Check (and repair) cached streams
    Check {
        stream_id: Option<String>,
        /// Delete entries that cannot be repaired
        #[arg(long)]
        fix: bool,
    },
    /// Delete every cached stream
    Clear,
}

fn load_config(cli: &Cli) -> Result<AnalyserConfig> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.load_config()?;
    if let Some(dir) = &cli.cache_dir {
        config.cache.root = Some(dir.clone());
    }
    Ok(config)
}

fn analyse(config: AnalyserConfig, cache: Arc<CacheStore>, source: &SourceArgs) -> Result<StreamAnalysis> {
    let collector = match &source.dump {
        Some(file) => NdjsonCollector::from_file(file),
        None => NdjsonCollector::new(&source.dump_dir),
    };
    let analyser = StreamAnalyser::new(config, cache, Arc::new(collector))?;
    analyser
        .analyse(&source.stream_id)
        .with_context(|| format!("Failed to analyse '{}'", source.stream_id))
}

fn print_highlights(analysis: &StreamAnalysis, args: &AnalyseArgs) {
    let filter = HighlightFilter {
        include: args.include.clone(),
        exclude: args.exclude.clone(),
        skip_intensities: args.skip_intensity.clone(),
        top: args.top,
    };
    let highlights = analysis.highlights(&filter);

    println!(
        "{} ({} messages, {} highlights)",
        analysis.stream_id(),
        analysis.messages().len(),
        analysis.all_highlights().len()
    );
    if highlights.is_empty() {
        println!("No highlights found.");
    }
    for highlight in highlights {
        if args.urls {
            println!(
                "{} -> {}",
                format_hms(highlight.start),
                highlight.url(analysis.stream_id())
            );
        } else {
            println!("{}", highlight);
        }
    }

    if args.phrase {
        match analysis.most_used_phrase(&[]) {
            Some((phrase, count)) => println!("Most used phrase: {} ({} messages)", phrase, count),
            None => println!("Most used phrase: -"),
        }
    }
}

fn run_cache_command(cache: &CacheStore, command: &CacheCommand) -> Result<()> {
    match command {
        CacheCommand::List => {
            let entries = cache.entries()?;
            if entries.is_empty() {
                println!("Cache is empty ({})", cache.root().display());
            }
            for entry in entries {
                println!(
                    "{}\t{} messages\t{} bytes\t{}\tlast used {}",
                    entry.stream_id,
                    entry.message_count,
                    entry.size,
                    if entry.is_complete { "complete" } else { "partial" },
                    entry.last_access_time.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        CacheCommand::Reset { stream_id } => {
            if cache.reset(stream_id)? {
                println!("Removed {}", stream_id);
            } else {
                println!("{} is not cached", stream_id);
            }
        }
        CacheCommand::Check { stream_id, fix } => {
            let results = match stream_id {
                Some(id) => vec![(id.clone(), cache.check(id)?)],
                None => cache.check_all()?,
            };
            for (id, status) in &results {
                match status {
                    IntegrityStatus::Healthy => println!("{}\thealthy", id),
                    IntegrityStatus::Repaired(repairs) => println!("{}\trepaired {:?}", id, repairs),
                    IntegrityStatus::Corrupt(reason) => println!("{}\tcorrupt: {}", id, reason),
                }
            }
            if *fix {
                for id in cache.enforce_integrity()? {
                    println!("Removed corrupt entry {}", id);
                }
            }
        }
        CacheCommand::Clear => {
            let removed = cache.clear()?;
            println!("Removed {} entries", removed);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    utils::init_logging(&level)?;

    let cache = Arc::new(CacheStore::new(&config.cache).context("Failed to open the cache")?);
    let evicted = cache.enforce_limit()?;
    if !evicted.is_empty() {
        tracing::info!("Evicted {} entries over the cache limit", evicted.len());
    }

    match &cli.command {
        Commands::Analyse(args) => {
            let analysis = analyse(config, cache, &args.source)?;
            print_highlights(&analysis, args);
        }
        Commands::Find(args) => {
            let analysis = analyse(config, cache, &args.source)?;
            for message in analysis.find_messages(&args.phrase, args.exact, !args.case_sensitive) {
                println!("{}", message);
            }
        }
        Commands::Cache(command) => run_cache_command(&cache, command)?,
    }

    Ok(())
}
