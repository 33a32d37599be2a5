//! # Reddit Index
//!
//! Fetches Reddit posts and comments for a search query and keeps two
//! indices in step: a vector store (Qdrant) for semantic retrieval and a
//! lexical store (Meilisearch) for BM25 retrieval.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Reddit    │──▶│  Flatten +   │──▶│ Qdrant       │ (fatal on error)
//! │  OAuth API  │   │  Map fields  │──▶│ Meilisearch  │ (best effort)
//! └─────────────┘   └──────────────┘   └──────────────┘
//!                          ▲
//!            ┌─────────────┴─────────────┐
//!       ┌──────────┐               ┌──────────┐
//!       │   CLI    │               │   HTTP   │
//!       │  (rdx)   │               │  server  │
//!       └──────────┘               └──────────┘
//! ```
//!
//! The pipeline logic (models, flattening, mapping, synchronizer) lives in
//! the `reddit-index-core` crate; this crate supplies the HTTP backends.
//!
//! ## Quick Start
//!
//! ```bash
//! export REDDIT_CLIENT_ID=… REDDIT_CLIENT_SECRET=…
//! rdx sync "async rust" --subreddit rust --limit 20
//! rdx sync "tokio" --embed-model BAAI/bge-small-en-v1.5 --collection reddit_bge
//! rdx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`connector_reddit`] | Reddit search and comment threads |
//! | [`embedding`] | Embedding providers and model references |
//! | [`store_qdrant`] | Vector sink |
//! | [`store_meili`] | Lexical sink |
//! | [`ingest`] | Sync wiring for CLI and server |
//! | [`server`] | HTTP server |

pub mod config;
pub mod connector_reddit;
pub mod embedding;
pub mod ingest;
pub mod server;
pub mod store_meili;
pub mod store_qdrant;
