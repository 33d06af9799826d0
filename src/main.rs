use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wikigraph::analyze::{LinkGraph, Query};
use wikigraph::checkpoint::Stage;
use wikigraph::config::{DEFAULT_THREADS, PAGERANK_RESULTS, STORE_DIR, TITLE_LOG_FILE};
use wikigraph::content::LinkFilter;
use wikigraph::graph::{read_pairs, GraphReader};
use wikigraph::identity::{self, IdentityStore, CATEGORY_MAP, PAGE_MAP, REDIRECT_MAP};
use wikigraph::models::title_to_hash_id;
use wikigraph::pipeline::{Pipeline, PipelineConfig};
use wikigraph::stats::PipelineStats;
use wikigraph::{corpus, titles};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikigraph")]
#[command(about = "Extract page-link and category graphs from Wikipedia dumps")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage in order
    Run(PipelineArgs),
    /// Assign page ids and record redirects
    Stage1(PipelineArgs),
    /// Collapse redirect chains in the store
    Stage2(PipelineArgs),
    /// Write page and category graphs
    Stage3(PipelineArgs),
    /// Regroup category membership by category id
    Transpose(PipelineArgs),
    /// Print the records of a graph or pair file
    PrintGraph(PrintGraphArgs),
    /// Show the stored identity of a title
    Lookup(LookupArgs),
    /// Answer a whole-graph query over a graph file as JSON
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Identity store directory (default: <output>/store.sled)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep the identity store in memory (only useful with `run`)
    #[arg(long, conflicts_with = "store")]
    in_memory: bool,
}

#[derive(Args)]
struct PipelineArgs {
    /// Corpus files or directories (.xml, .xml.bz2)
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output directory for graph files, title log and summary
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    store: StoreArgs,

    /// Additional namespace whose links are dropped (repeatable)
    #[arg(long = "ignore-namespace")]
    ignore_namespaces: Vec<String>,

    /// Skip stages already completed for unchanged inputs
    #[arg(long)]
    resume: bool,

    /// Worker threads for per-file stages (0 = one per core)
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: usize,
}

#[derive(Args)]
struct PrintGraphArgs {
    /// Graph file to decode
    file: PathBuf,

    /// Decode as a (category, page) pair stream
    #[arg(long)]
    pairs: bool,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct LookupArgs {
    /// Page or category title, exactly as stored
    title: String,

    /// Output directory of a previous run
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Graph file to load
    file: PathBuf,

    #[command(subcommand)]
    query: QueryCommand,
}

#[derive(Subcommand)]
enum QueryCommand {
    /// Count nodes at each BFS distance from a node
    Distances { node: u32 },
    /// Histogram of strongly connected component sizes
    Components,
    /// In- and out-degree of a node
    Degree { node: u32 },
    /// Highest PageRank scores
    Rank {
        #[arg(long, default_value_t = PAGERANK_RESULTS)]
        top: usize,
    },
}

fn open_store(args: &StoreArgs, output: &Path) -> Result<(IdentityStore, String)> {
    if args.in_memory {
        return Ok((IdentityStore::in_memory(), "memory".to_string()));
    }
    let path = args
        .store
        .clone()
        .unwrap_or_else(|| output.join(STORE_DIR));
    let store = IdentityStore::open_sled(&path)?;
    Ok((store, format!("sled:{}", path.display())))
}

fn run_pipeline(args: PipelineArgs, stage: Option<Stage>) -> Result<()> {
    if stage.is_some() && args.store.in_memory {
        warn!("In-memory store does not outlive this process; later stages will not see it");
    }

    let inputs = corpus::discover(&args.input)?;
    info!(files = inputs.len(), "Discovered corpus files");
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {:?}", args.output))?;
    let (store, store_label) = open_store(&args.store, &args.output)?;

    let config = PipelineConfig {
        inputs,
        output_dir: args.output,
        filter: LinkFilter::default().with_ignored_namespaces(&args.ignore_namespaces),
        resume: args.resume,
        threads: args.threads,
        store_label,
    };

    let start = Instant::now();
    let mut pipeline = Pipeline::new(&config, &store)?;
    match stage {
        Some(stage) => pipeline.run_stage(stage)?,
        None => pipeline.run_all()?,
    }

    print_summary(pipeline.stats(), start.elapsed().as_secs_f64());
    Ok(())
}

fn print_summary(stats: &PipelineStats, seconds: f64) {
    println!();
    println!("=== Summary ===");
    println!("Total time:           {:.2}s", seconds);
    println!();
    println!("Pages:                {}", stats.pages());
    println!("Redirects:            {}", stats.redirects());
    println!("Duplicate titles:     {}", stats.duplicate_titles());
    println!("Redirects resolved:   {}", stats.redirects_resolved());
    println!("Unresolved redirects: {}", stats.unresolved_redirects());
    println!("Redirect loops:       {}", stats.redirect_loops());
    println!("Page links:           {}", stats.page_links());
    println!("Red links:            {}", stats.red_links());
    println!("Categories:           {}", stats.categories());
    println!("Category links:       {}", stats.category_links());
}

fn print_graph(args: PrintGraphArgs) -> Result<()> {
    let limit = args.limit.unwrap_or(usize::MAX);
    if args.pairs {
        for (category, page) in read_pairs(&args.file)?.into_iter().take(limit) {
            println!("{category}\t{page}");
        }
        return Ok(());
    }
    for record in GraphReader::open(&args.file)?.take(limit) {
        let record = record.with_context(|| format!("Corrupt graph file: {:?}", args.file))?;
        let targets: Vec<String> = record.targets.iter().map(u32::to_string).collect();
        println!("{}\t{}\t{}", record.node, record.targets.len(), targets.join(" "));
    }
    Ok(())
}

fn lookup(args: LookupArgs) -> Result<()> {
    let (store, _) = open_store(&args.store, &args.output)?;
    let hash = title_to_hash_id(&args.title);
    let (page_key, field) = identity::shard_key(PAGE_MAP, &hash);
    let (redirect_key, _) = identity::shard_key(REDIRECT_MAP, &hash);
    let (category_key, _) = identity::shard_key(CATEGORY_MAP, &hash);

    println!("Title:       {}", args.title);
    println!("Hash:        {}", hash);
    println!("Shards:      {page_key} / {redirect_key} / {category_key}, field {field}");
    match store.get_page_id(&hash)? {
        Some(id) => println!("Page id:     {id}"),
        None => println!("Page id:     (none)"),
    }
    match store.get_redirect(&hash)? {
        Some(target) => println!("Redirect:    unresolved, target {target}"),
        None => println!("Redirect:    (none)"),
    }
    if let Some(id) = store.get_category_id(&hash)? {
        println!("Category id: {id}");
    }

    let log = args.output.join(TITLE_LOG_FILE);
    if log.exists() {
        for logged in titles::lookup(&log, &hash)? {
            println!("Logged as:   {logged}");
        }
    }
    Ok(())
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let query = match args.query {
        QueryCommand::Distances { node } => Query::Distances(node),
        QueryCommand::Components => Query::Components,
        QueryCommand::Degree { node } => Query::Degree(node),
        QueryCommand::Rank { top } => Query::Rank(top),
    };
    let graph = LinkGraph::load(&args.file)?;
    let start = Instant::now();
    let answer = graph.answer(query)?;
    info!(
        query = ?query,
        duration_secs = start.elapsed().as_secs_f64(),
        "Query answered"
    );
    println!("{answer}");
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

    let result = match cli.command {
        Commands::Run(args) => run_pipeline(args, None),
        Commands::Stage1(args) => run_pipeline(args, Some(Stage::Identities)),
        Commands::Stage2(args) => run_pipeline(args, Some(Stage::Redirects)),
        Commands::Stage3(args) => run_pipeline(args, Some(Stage::Links)),
        Commands::Transpose(args) => run_pipeline(args, Some(Stage::Transpose)),
        Commands::PrintGraph(args) => print_graph(args),
        Commands::Lookup(args) => lookup(args),
        Commands::Analyze(args) => analyze(args),
    };

    match result {
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
