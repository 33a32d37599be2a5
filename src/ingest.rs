//! Sync orchestration for the CLI and the HTTP server.
//!
//! Wires configuration to the collaborators (Reddit connector, Qdrant sink,
//! Meilisearch sink) and runs the [`IndexSynchronizer`]. Command-line
//! overrides are carried in [`SyncArgs`] and layered over the `[index]`
//! section of the config.

use anyhow::{Context, Result};
use std::sync::Arc;

use reddit_index_core::sink::memory::{InMemoryLexicalSink, InMemoryVectorSink};
use reddit_index_core::sink::{CommentOptions, LexicalSink, PostSource, SearchRequest};
use reddit_index_core::sync::{IndexSynchronizer, LexicalOutcome, SyncOutcome};
use reddit_index_core::thread::PlaceholderExpansion;

use crate::config::Config;
use crate::connector_reddit::RedditConnector;
use crate::embedding::resolve_model_ref;
use crate::store_meili::MeiliSink;
use crate::store_qdrant::QdrantSink;

/// Per-run overrides for a sync.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub query: String,
    pub subreddit: Option<String>,
    pub limit: Option<usize>,
    pub collection: Option<String>,
    pub no_comments: bool,
    pub comments_limit: Option<usize>,
    pub comment_sort: Option<String>,
    pub expand_more: Option<PlaceholderExpansion>,
    pub embed_model: Option<String>,
    pub dry_run: bool,
}

/// Parse `--expand-more`: a count, `all` or `none`.
pub fn parse_expansion(s: &str) -> Result<PlaceholderExpansion, String> {
    match s.trim().to_lowercase().as_str() {
        "all" | "unlimited" => Ok(PlaceholderExpansion::Unlimited),
        "none" | "skip" => Ok(PlaceholderExpansion::Skip),
        n => n
            .parse::<usize>()
            .map(|n| PlaceholderExpansion::from_limit(Some(n)))
            .map_err(|_| format!("invalid value '{}': expected a number, 'all' or 'none'", s)),
    }
}

/// Build the fetch request from config defaults and overrides.
pub fn search_request(config: &Config, args: &SyncArgs) -> SearchRequest {
    let comments = if args.no_comments {
        CommentOptions::none()
    } else {
        let mut options = config.index.comment_options();
        if !options.include {
            options
        } else {
            if args.comments_limit.is_some() {
                options.comments_limit = args.comments_limit;
            }
            if args.comment_sort.is_some() {
                options.comment_sort = args.comment_sort.clone();
            }
            if let Some(expansion) = args.expand_more {
                options.expansion = expansion;
            }
            options
        }
    };

    let mut request = SearchRequest::new(args.query.clone())
        .with_limit(args.limit.unwrap_or(config.index.limit))
        .with_comments(comments);
    if let Some(sub) = &args.subreddit {
        request = request.with_subreddit(sub.clone());
    }
    request
}

/// Lexical sink from config, or `None` when disabled or not constructible.
fn lexical_sink(config: &Config) -> Option<Arc<dyn LexicalSink>> {
    if !config.meili.enabled {
        return None;
    }
    match MeiliSink::new(&config.meili) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            tracing::warn!(error = %e, "lexical store unavailable");
            None
        }
    }
}

/// Assemble a synchronizer over the configured backends.
///
/// # Errors
///
/// Fails when the Reddit connector cannot be built (missing credentials)
/// or the Qdrant client cannot be constructed.
pub fn build_synchronizer(
    config: &Config,
    collection: &str,
    embed_model: &str,
) -> Result<IndexSynchronizer> {
    let source = Arc::new(RedditConnector::new(&config.reddit)?);
    build_synchronizer_with_source(config, source, collection, embed_model)
}

/// Like [`build_synchronizer`], with a caller-supplied post source.
pub fn build_synchronizer_with_source(
    config: &Config,
    source: Arc<dyn PostSource>,
    collection: &str,
    embed_model: &str,
) -> Result<IndexSynchronizer> {
    let vectors = Arc::new(
        QdrantSink::new(&config.qdrant, &config.embedding).context("Failed to build Qdrant client")?,
    );
    let mut sync = IndexSynchronizer::new(source, vectors, collection, embed_model)
        .wait_for_lexical(config.index.wait_for_lexical);
    if let Some(lexical) = lexical_sink(config) {
        sync = sync.with_lexical(lexical);
    }
    Ok(sync)
}

/// A synchronizer that fetches for real but writes into in-memory sinks.
///
/// Used by `--dry-run`: the whole fetch and mapping path runs, neither
/// backing store is contacted.
pub fn dry_run_synchronizer(
    source: Arc<dyn PostSource>,
    collection: &str,
    embed_model: &str,
) -> IndexSynchronizer {
    IndexSynchronizer::new(source, Arc::new(InMemoryVectorSink::new()), collection, embed_model)
        .with_lexical(Arc::new(InMemoryLexicalSink::new()))
}

/// Run one sync from the CLI and print a summary.
pub async fn run_sync(config: &Config, args: &SyncArgs) -> Result<()> {
    let collection = args
        .collection
        .clone()
        .unwrap_or_else(|| config.index.collection.clone());
    let embed_model = resolve_model_ref(
        args.embed_model
            .as_deref()
            .unwrap_or(config.embedding.model.as_str()),
    );
    let request = search_request(config, args);

    if args.dry_run {
        let source = Arc::new(RedditConnector::new(&config.reddit)?);
        let synchronizer = dry_run_synchronizer(source, &collection, &embed_model);
        let outcome = synchronizer.sync(&request).await?;
        println!("sync \"{}\" (dry-run)", request.query);
        println!("  posts found: {}", outcome.posts.len());
        println!("  comments: {}", comment_count(&outcome.posts));
        println!("  embedding documents: {}", outcome.vector_documents);
        println!("  lexical documents: {}", lexical_documents(&outcome.lexical));
        return Ok(());
    }

    let synchronizer = build_synchronizer(config, &collection, &embed_model)?;
    let outcome = synchronizer.sync(&request).await?;
    print_summary(&request.query, &synchronizer, &outcome);
    Ok(())
}

fn lexical_documents(outcome: &LexicalOutcome) -> usize {
    match outcome {
        LexicalOutcome::Indexed { documents, .. } => *documents,
        _ => 0,
    }
}

fn comment_count(posts: &[reddit_index_core::models::Post]) -> usize {
    posts.iter().map(|p| p.comments.len()).sum()
}

fn print_summary(query: &str, synchronizer: &IndexSynchronizer, outcome: &SyncOutcome) {
    println!("sync \"{}\" → {}", query, synchronizer.collection());
    println!("  embedding model: {}", synchronizer.embed_model());
    println!("  posts fetched: {}", outcome.posts.len());
    println!("  comments: {}", comment_count(&outcome.posts));
    println!("  vector documents: {}", outcome.vector_documents);
    println!("  lexical: {}", describe_lexical(&outcome.lexical));
    println!("ok");
}

/// One-line description of a lexical outcome.
pub fn describe_lexical(outcome: &LexicalOutcome) -> String {
    match outcome {
        LexicalOutcome::Skipped => "skipped".to_string(),
        LexicalOutcome::Unavailable => "unavailable".to_string(),
        LexicalOutcome::Indexed {
            documents,
            task,
            acknowledged,
        } => {
            let mut s = format!("{} documents", documents);
            if let Some(task) = task {
                s.push_str(&format!(" (task {}", task));
                s.push_str(if *acknowledged { ", acknowledged)" } else { ")" });
            }
            s
        }
        LexicalOutcome::Failed { stage, message } => {
            format!("failed at {:?}: {}", stage, message)
        }
    }
}
