mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "memstore")]
#[command(about = "Persistent memory store with keyword and semantic search", long_about = None)]
#[command(version)]
struct Cli {
    /// Memory root (overrides MEMORY_DIR)
    #[arg(long, global = true)]
    dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new record
    Add {
        title: String,
        #[arg(long, help = "Record content (reads stdin when omitted)")]
        content: Option<String>,
        #[arg(long, short, default_value = "note", help = "conversation | knowledge | note")]
        kind: String,
        #[arg(long, short, value_delimiter = ',', help = "Comma-separated tags")]
        tags: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List records, newest first
    List {
        #[arg(long, short, help = "Only this kind")]
        kind: Option<String>,
        #[arg(long, short, value_delimiter = ',', help = "Records carrying any of these tags")]
        tags: Vec<String>,
        #[arg(long, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "Include archived records")]
        archived: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Keyword search, or semantic search with --semantic
    Search {
        query: String,
        #[arg(long, short, help = "Rank by embedding similarity")]
        semantic: bool,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Generate missing embeddings
    Index {
        #[arg(long, help = "Show index status only")]
        status: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Archive records older than N days
    Archive {
        #[arg(long, help = "Age threshold in days (default from config)")]
        days: Option<u32>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Re-index documents missing from the index
    Reconcile {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Store statistics
    Stats {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memstore=info")))
        .init();

    let cli = Cli::parse();
    let store = commands::open_store(cli.dir)?;

    match cli.command {
        Commands::Add {
            title,
            content,
            kind,
            tags,
            json,
        } => commands::add::run(&store, title, content, &kind, tags, json),
        Commands::List {
            kind,
            tags,
            limit,
            archived,
            json,
        } => commands::list::run(&store, kind.as_deref(), tags, limit, archived, json),
        Commands::Search {
            query,
            semantic,
            limit,
            json,
        } => commands::search::run(&store, &query, semantic, limit, json),
        Commands::Index { status, json } => commands::index::run(&store, status, json),
        Commands::Archive { days, json } => commands::archive::run(&store, days, json),
        Commands::Reconcile { json } => commands::reconcile::run(&store, json),
        Commands::Stats { json } => commands::stats::run(&store, json),
    }
}
