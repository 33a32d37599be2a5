//! Collaborator interfaces for the synchronizer.
//!
//! The synchronizer talks to three external systems, each behind a narrow
//! async trait so backends are pluggable and tests can count calls:
//!
//! | Trait | Role | Failure policy |
//! |-------|------|----------------|
//! | [`PostSource`] | fetch posts (and comments) for a query | fatal |
//! | [`VectorSink`] | embed + upsert [`EmbeddingDocument`]s | fatal |
//! | [`LexicalSink`] | add [`LexicalDocument`]s, await the task | absorbed |
//!
//! Implementations must be `Send + Sync`; handles are long-lived and shared
//! across invocations.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{EmbeddingDocument, LexicalDocument, Post};
use crate::thread::PlaceholderExpansion;

/// Identifier of an asynchronous lexical-store task.
pub type TaskUid = u64;

/// Which comments to attach to fetched posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentOptions {
    pub include: bool,
    /// Keep at most this many comments per post, after flattening.
    pub comments_limit: Option<usize>,
    /// Reddit comment sort (`confidence`, `top`, `new`, …).
    pub comment_sort: Option<String>,
    pub expansion: PlaceholderExpansion,
}

impl CommentOptions {
    /// No comments at all.
    pub fn none() -> Self {
        Self {
            include: false,
            comments_limit: None,
            comment_sort: None,
            expansion: PlaceholderExpansion::Skip,
        }
    }
}

impl Default for CommentOptions {
    fn default() -> Self {
        Self {
            include: true,
            comments_limit: Some(50),
            comment_sort: None,
            expansion: PlaceholderExpansion::Unlimited,
        }
    }
}

/// One fetch: the query, its scope and the comment policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub subreddit: Option<String>,
    /// Maximum number of posts.
    pub limit: usize,
    pub comments: CommentOptions,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            subreddit: None,
            limit: 10,
            comments: CommentOptions::default(),
        }
    }

    pub fn with_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = Some(subreddit.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_comments(mut self, comments: CommentOptions) -> Self {
        self.comments = comments;
        self
    }

    /// True when the query is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.query.trim().is_empty()
    }
}

/// Upstream forum search.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Fetch posts for the request. Must return `[]` for a blank query
    /// without contacting the upstream.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Post>>;
}

/// Vector store with server- or client-side embedding.
#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Embed and upsert documents into `collection`, keyed by document id.
    ///
    /// `embed_model` is an opaque model reference resolved by the backend.
    /// Errors (including embedding-dimension mismatches) are fatal.
    async fn upsert(
        &self,
        collection: &str,
        documents: &[EmbeddingDocument],
        embed_model: &str,
    ) -> Result<()>;
}

/// Lexical (BM25) store.
#[async_trait]
pub trait LexicalSink: Send + Sync {
    /// Add or replace documents in `collection`.
    ///
    /// Returns the task uid when the backend reports one.
    async fn add_documents(
        &self,
        collection: &str,
        documents: &[LexicalDocument],
        primary_key: &str,
    ) -> Result<Option<TaskUid>>;

    /// Block until the task has been applied.
    async fn wait_for_task(&self, task: TaskUid) -> Result<()>;
}

/// Serializable summary of one indexed post, for reports and HTTP replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPost {
    pub id: String,
    pub title: String,
    pub subreddit: Option<String>,
    pub comments: usize,
}

impl From<&Post> for IndexedPost {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            subreddit: post.subreddit.clone(),
            comments: post.comments.len(),
        }
    }
}
