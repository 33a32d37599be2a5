//! Index synchronization: fetch → map → vector upsert → lexical upsert.
//!
//! [`IndexSynchronizer::sync`] runs one independent transaction per call:
//!
//! 1. A blank query returns immediately; nothing is fetched or written.
//! 2. Posts are fetched from the [`PostSource`]. No posts, no writes.
//! 3. Embedding documents go to the [`VectorSink`]. Any error here is fatal
//!    and returned as [`SyncError::VectorStore`].
//! 4. Lexical documents go to the [`LexicalSink`] under the same collection
//!    name, primary key `id`. Every failure on this path is absorbed and
//!    reported through [`LexicalOutcome`] instead.
//! 5. The fetched posts are returned unchanged.
//!
//! The synchronizer holds no mutable state; the collaborator handles are
//! shared and reused across calls.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::mapper::{map_posts_to_embedding_documents, map_posts_to_lexical_documents};
use crate::models::Post;
use crate::sink::{LexicalSink, PostSource, SearchRequest, TaskUid, VectorSink};

/// Primary key declared to the lexical store.
pub const PRIMARY_KEY: &str = "id";

/// Failures visible to the caller.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The upstream fetch failed.
    #[error("fetch failed: {0:#}")]
    Fetch(#[source] anyhow::Error),

    /// The vector-store upsert failed (connectivity, dimension mismatch, …).
    #[error("vector store upsert into '{collection}' failed: {source:#}")]
    VectorStore {
        collection: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Stage of the lexical path at which an absorbed failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LexicalStage {
    AddDocuments,
    WaitForTask,
}

/// What happened on the lexical path. Never an error for the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LexicalOutcome {
    /// Nothing was attempted (blank query or no posts).
    Skipped,
    /// No lexical store is configured or it could not be constructed.
    Unavailable,
    /// Documents were handed over.
    Indexed {
        documents: usize,
        task: Option<TaskUid>,
        /// True when the task was awaited and reported success.
        acknowledged: bool,
    },
    /// The lexical store failed; the vector write stands.
    Failed { stage: LexicalStage, message: String },
}

impl LexicalOutcome {
    pub fn is_indexed(&self) -> bool {
        matches!(self, LexicalOutcome::Indexed { .. })
    }
}

/// Result of one synchronization.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The posts exactly as fetched.
    pub posts: Vec<Post>,
    /// Number of documents sent to the vector store.
    pub vector_documents: usize,
    pub lexical: LexicalOutcome,
}

impl SyncOutcome {
    fn empty() -> Self {
        Self {
            posts: Vec::new(),
            vector_documents: 0,
            lexical: LexicalOutcome::Skipped,
        }
    }

    pub fn into_posts(self) -> Vec<Post> {
        self.posts
    }
}

/// Fetches posts and keeps the vector and lexical indices in step.
pub struct IndexSynchronizer {
    source: Arc<dyn PostSource>,
    vectors: Arc<dyn VectorSink>,
    lexical: Option<Arc<dyn LexicalSink>>,
    collection: String,
    embed_model: String,
    wait_for_lexical: bool,
}

impl IndexSynchronizer {
    /// Create a synchronizer writing into `collection` with `embed_model`.
    ///
    /// No lexical sink is attached; see [`with_lexical`](Self::with_lexical).
    pub fn new(
        source: Arc<dyn PostSource>,
        vectors: Arc<dyn VectorSink>,
        collection: impl Into<String>,
        embed_model: impl Into<String>,
    ) -> Self {
        Self {
            source,
            vectors,
            lexical: None,
            collection: collection.into(),
            embed_model: embed_model.into(),
            wait_for_lexical: true,
        }
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalSink>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    /// Whether to await the lexical task before returning. Defaults to true.
    pub fn wait_for_lexical(mut self, wait: bool) -> Self {
        self.wait_for_lexical = wait;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Fetch posts for `request` and index them into both stores.
    pub async fn sync(&self, request: &SearchRequest) -> Result<SyncOutcome, SyncError> {
        if request.is_blank() {
            return Ok(SyncOutcome::empty());
        }

        let posts = self.source.search(request).await.map_err(SyncError::Fetch)?;
        if posts.is_empty() {
            tracing::debug!(query = %request.query, "no posts found");
            return Ok(SyncOutcome::empty());
        }

        let embedding_docs = map_posts_to_embedding_documents(&posts, &request.query);
        self.vectors
            .upsert(&self.collection, &embedding_docs, &self.embed_model)
            .await
            .map_err(|source| SyncError::VectorStore {
                collection: self.collection.clone(),
                source,
            })?;
        tracing::info!(
            collection = %self.collection,
            documents = embedding_docs.len(),
            "vector store upserted"
        );

        let lexical = self.index_lexical(&posts, &request.query).await;

        Ok(SyncOutcome {
            posts,
            vector_documents: embedding_docs.len(),
            lexical,
        })
    }

    async fn index_lexical(&self, posts: &[Post], query: &str) -> LexicalOutcome {
        let Some(lexical) = &self.lexical else {
            return LexicalOutcome::Unavailable;
        };

        let documents = map_posts_to_lexical_documents(posts, query);
        let task = match lexical
            .add_documents(&self.collection, &documents, PRIMARY_KEY)
            .await
        {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(collection = %self.collection, error = %e, "lexical indexing failed");
                return LexicalOutcome::Failed {
                    stage: LexicalStage::AddDocuments,
                    message: e.to_string(),
                };
            }
        };

        let mut acknowledged = false;
        if let (true, Some(uid)) = (self.wait_for_lexical, task) {
            match lexical.wait_for_task(uid).await {
                Ok(()) => acknowledged = true,
                Err(e) => {
                    tracing::warn!(task = uid, error = %e, "lexical task did not complete");
                    return LexicalOutcome::Failed {
                        stage: LexicalStage::WaitForTask,
                        message: e.to_string(),
                    };
                }
            }
        }

        LexicalOutcome::Indexed {
            documents: documents.len(),
            task,
            acknowledged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, EmbeddingDocument, LexicalDocument};
    use crate::sink::memory::{FixedPostSource, InMemoryLexicalSink, InMemoryVectorSink};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingVectorSink;

    #[async_trait]
    impl VectorSink for FailingVectorSink {
        async fn upsert(&self, _: &str, _: &[EmbeddingDocument], _: &str) -> Result<()> {
            Err(anyhow!("expected dimension 384, got 1536"))
        }
    }

    #[derive(Default)]
    struct FailingLexicalSink {
        fail_on_wait: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LexicalSink for FailingLexicalSink {
        async fn add_documents(
            &self,
            _: &str,
            _: &[LexicalDocument],
            _: &str,
        ) -> Result<Option<TaskUid>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_wait {
                Ok(Some(9))
            } else {
                Err(anyhow!("connection refused"))
            }
        }

        async fn wait_for_task(&self, _: TaskUid) -> Result<()> {
            Err(anyhow!("task 9 failed"))
        }
    }

    struct NoHandleLexicalSink;

    #[async_trait]
    impl LexicalSink for NoHandleLexicalSink {
        async fn add_documents(
            &self,
            _: &str,
            _: &[LexicalDocument],
            _: &str,
        ) -> Result<Option<TaskUid>> {
            Ok(None)
        }

        async fn wait_for_task(&self, _: TaskUid) -> Result<()> {
            panic!("must not wait without a task handle");
        }
    }

    fn posts() -> Vec<Post> {
        vec![Post {
            id: "abc".to_string(),
            title: "T".to_string(),
            score: 1,
            subreddit: Some("s".to_string()),
            comments: vec![
                Comment {
                    id: "c1".to_string(),
                    body: Some("first".to_string()),
                    link_id: Some("t3_abc".to_string()),
                    ..Default::default()
                },
                Comment {
                    id: "c2".to_string(),
                    body: None,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }]
    }

    #[tokio::test]
    async fn test_blank_query_touches_nothing() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let lexical = Arc::new(InMemoryLexicalSink::new());
        let sync = IndexSynchronizer::new(source.clone(), vectors.clone(), "col", "mock")
            .with_lexical(lexical.clone());

        for q in ["", "   ", "\t\n"] {
            let out = sync.sync(&SearchRequest::new(q)).await.unwrap();
            assert!(out.posts.is_empty());
            assert_eq!(out.lexical, LexicalOutcome::Skipped);
        }
        assert_eq!(source.calls(), 0);
        assert_eq!(vectors.calls(), 0);
        assert_eq!(lexical.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_posts_means_no_writes() {
        let source = Arc::new(FixedPostSource::new(Vec::new()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let lexical = Arc::new(InMemoryLexicalSink::new());
        let sync = IndexSynchronizer::new(source.clone(), vectors.clone(), "col", "mock")
            .with_lexical(lexical.clone());

        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert!(out.posts.is_empty());
        assert_eq!(source.calls(), 1);
        assert_eq!(vectors.calls(), 0);
        assert_eq!(lexical.calls(), 0);
    }

    #[tokio::test]
    async fn test_indexes_both_stores() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let lexical = Arc::new(InMemoryLexicalSink::new());
        let sync = IndexSynchronizer::new(source, vectors.clone(), "col", "mock")
            .with_lexical(lexical.clone());

        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert_eq!(out.posts, posts());
        // post + one real comment; the bodyless one is skipped
        assert_eq!(out.vector_documents, 2);
        assert_eq!(vectors.len("col"), 2);
        assert_eq!(lexical.len("col"), 2);
        assert_eq!(
            out.lexical,
            LexicalOutcome::Indexed {
                documents: 2,
                task: Some(0),
                acknowledged: true
            }
        );
        assert_eq!(lexical.waited_tasks(), vec![0]);
        assert_eq!(vectors.model_for("col").as_deref(), Some("mock"));

        let doc = lexical.get("col", "c1").unwrap();
        assert_eq!(doc.get("query"), Some(serde_json::json!("rust")));
        assert_eq!(doc.get("submission_id"), Some(serde_json::json!("abc")));
    }

    #[tokio::test]
    async fn test_resync_overwrites() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let lexical = Arc::new(InMemoryLexicalSink::new());
        let sync = IndexSynchronizer::new(source, vectors.clone(), "col", "mock")
            .with_lexical(lexical.clone());

        sync.sync(&SearchRequest::new("first")).await.unwrap();
        sync.sync(&SearchRequest::new("second")).await.unwrap();
        assert_eq!(vectors.len("col"), 2);
        assert_eq!(lexical.len("col"), 2);
        let doc = lexical.get("col", "abc").unwrap();
        assert_eq!(doc.get("query"), Some(serde_json::json!("second")));
    }

    #[tokio::test]
    async fn test_lexical_failure_is_absorbed() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let lexical = Arc::new(FailingLexicalSink::default());
        let sync = IndexSynchronizer::new(source, vectors.clone(), "col", "mock")
            .with_lexical(lexical.clone());

        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert_eq!(out.posts, posts());
        assert_eq!(vectors.len("col"), 2);
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 1);
        match out.lexical {
            LexicalOutcome::Failed { stage, message } => {
                assert_eq!(stage, LexicalStage::AddDocuments);
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lexical_wait_failure_is_absorbed() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let lexical = Arc::new(FailingLexicalSink {
            fail_on_wait: true,
            ..Default::default()
        });
        let sync = IndexSynchronizer::new(source, vectors, "col", "mock").with_lexical(lexical);

        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert_eq!(out.posts.len(), 1);
        assert!(matches!(
            out.lexical,
            LexicalOutcome::Failed {
                stage: LexicalStage::WaitForTask,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_task_handle_skips_wait() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let vectors = Arc::new(InMemoryVectorSink::new());
        let sync = IndexSynchronizer::new(source, vectors, "col", "mock")
            .with_lexical(Arc::new(NoHandleLexicalSink));

        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert_eq!(
            out.lexical,
            LexicalOutcome::Indexed {
                documents: 2,
                task: None,
                acknowledged: false
            }
        );
    }

    #[tokio::test]
    async fn test_no_wait_when_disabled() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let lexical = Arc::new(InMemoryLexicalSink::new());
        let sync = IndexSynchronizer::new(source, Arc::new(InMemoryVectorSink::new()), "col", "mock")
            .with_lexical(lexical.clone())
            .wait_for_lexical(false);

        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert!(out.lexical.is_indexed());
        assert!(lexical.waited_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_vector_failure_propagates_and_skips_lexical() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let lexical = Arc::new(InMemoryLexicalSink::new());
        let sync = IndexSynchronizer::new(source, Arc::new(FailingVectorSink), "col", "mock")
            .with_lexical(lexical.clone());

        let err = sync.sync(&SearchRequest::new("rust")).await.unwrap_err();
        assert!(matches!(err, SyncError::VectorStore { .. }));
        assert!(err.to_string().contains("dimension"));
        assert_eq!(lexical.calls(), 0);
    }

    #[tokio::test]
    async fn test_without_lexical_sink() {
        let source = Arc::new(FixedPostSource::new(posts()));
        let sync = IndexSynchronizer::new(source, Arc::new(InMemoryVectorSink::new()), "col", "mock");
        let out = sync.sync(&SearchRequest::new("rust")).await.unwrap();
        assert_eq!(out.lexical, LexicalOutcome::Unavailable);
        assert_eq!(out.into_posts().len(), 1);
    }
}
