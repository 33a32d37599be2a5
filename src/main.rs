//! # Reddit Index CLI (`rdx`)
//!
//! ## Usage
//!
//! ```bash
//! rdx --config ./config/rdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rdx sync "<query>"` | Fetch posts for a query and index them |
//! | `rdx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Index the top 20 matches in r/rust, comments included
//! rdx sync "error handling" --subreddit rust --limit 20
//!
//! # Posts only, local embeddings, separate collection
//! rdx sync "tokio" --no-comments --embed-model local:bge-small-en-v1.5 --collection reddit_bge
//!
//! # Show what would be indexed without writing anything
//! rdx sync "serde" --dry-run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use reddit_index::{config, ingest, server};

/// Reddit Index CLI — fetch Reddit content and index it into a vector store
/// and a lexical store.
#[derive(Parser)]
#[command(
    name = "rdx",
    about = "Reddit Index — index Reddit posts and comments into Qdrant and Meilisearch",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rdx.toml`. A missing file means built-in
    /// defaults plus environment overrides.
    #[arg(long, global = true, default_value = "./config/rdx.toml")]
    config: PathBuf,

    /// Log at debug level (ignored when `RUST_LOG` is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch posts matching a query and index them.
    ///
    /// Posts (and their comments) go to the vector store first; a failure
    /// there aborts the run. The lexical store is updated on a best-effort
    /// basis.
    Sync {
        /// Search query.
        query: String,

        /// Restrict the search to one subreddit.
        #[arg(long)]
        subreddit: Option<String>,

        /// Maximum number of posts.
        #[arg(long)]
        limit: Option<usize>,

        /// Target collection / index name.
        #[arg(long)]
        collection: Option<String>,

        /// Index posts only.
        #[arg(long)]
        no_comments: bool,

        /// Maximum number of comments kept per post.
        #[arg(long)]
        comments_limit: Option<usize>,

        /// Comment sort (`confidence`, `top`, `new`, `controversial`, `old`, `qa`).
        #[arg(long)]
        comment_sort: Option<String>,

        /// How many "more comments" placeholders to expand per post: a number, `all` or `none`.
        #[arg(long, value_parser = ingest::parse_expansion)]
        expand_more: Option<reddit_index_core::thread::PlaceholderExpansion>,

        /// Embedding model id or reference (`text-embedding-3-large`,
        /// `BAAI/bge-small-en-v1.5`, `local:…`, `ollama:…`, `mock`).
        #[arg(long)]
        embed_model: Option<String>,

        /// Fetch and map, print counts, write nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.log.level, cli.verbose);

    match cli.command {
        Commands::Sync {
            query,
            subreddit,
            limit,
            collection,
            no_comments,
            comments_limit,
            comment_sort,
            expand_more,
            embed_model,
            dry_run,
        } => {
            let args = ingest::SyncArgs {
                query,
                subreddit,
                limit,
                collection,
                no_comments,
                comments_limit,
                comment_sort,
                expand_more,
                embed_model,
                dry_run,
            };
            ingest::run_sync(&cfg, &args).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
