//! In-memory collaborators for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Both sinks upsert by document
//! id, so indexing the same id twice replaces the earlier document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{EmbeddingDocument, LexicalDocument, Post};

use super::{LexicalSink, PostSource, SearchRequest, TaskUid, VectorSink};

type Collection<T> = HashMap<String, T>;

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// In-memory vector sink. Stores documents without embedding them.
#[derive(Default)]
pub struct InMemoryVectorSink {
    collections: RwLock<HashMap<String, Collection<EmbeddingDocument>>>,
    models: RwLock<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl InMemoryVectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of documents stored in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<EmbeddingDocument> {
        let collections = self.collections.read().ok()?;
        collections.get(collection)?.get(id).cloned()
    }

    /// Model reference used for the last upsert into `collection`.
    pub fn model_for(&self, collection: &str) -> Option<String> {
        self.models.read().ok()?.get(collection).cloned()
    }
}

#[async_trait]
impl VectorSink for InMemoryVectorSink {
    async fn upsert(
        &self,
        collection: &str,
        documents: &[EmbeddingDocument],
        embed_model: &str,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut models = self.models.write().map_err(poisoned)?;
            if let Some(existing) = models.get(collection) {
                if existing != embed_model {
                    bail!(
                        "collection '{}' was built with model '{}', refusing '{}'",
                        collection,
                        existing,
                        embed_model
                    );
                }
            }
            models.insert(collection.to_string(), embed_model.to_string());
        }
        let mut collections = self.collections.write().map_err(poisoned)?;
        let stored = collections.entry(collection.to_string()).or_default();
        for doc in documents {
            stored.insert(doc.id.clone(), doc.clone());
        }
        Ok(())
    }
}

/// In-memory lexical sink. Tasks complete immediately.
#[derive(Default)]
pub struct InMemoryLexicalSink {
    collections: RwLock<HashMap<String, Collection<LexicalDocument>>>,
    next_task: AtomicU64,
    add_calls: AtomicUsize,
    waited: RwLock<Vec<TaskUid>>,
}

impl InMemoryLexicalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `add_documents` calls received.
    pub fn calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<LexicalDocument> {
        let collections = self.collections.read().ok()?;
        collections.get(collection)?.get(id).cloned()
    }

    /// Task uids passed to `wait_for_task`, in call order.
    pub fn waited_tasks(&self) -> Vec<TaskUid> {
        self.waited.read().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LexicalSink for InMemoryLexicalSink {
    async fn add_documents(
        &self,
        collection: &str,
        documents: &[LexicalDocument],
        primary_key: &str,
    ) -> Result<Option<TaskUid>> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if primary_key != "id" {
            bail!("in-memory lexical sink only supports primary key 'id'");
        }
        let mut collections = self.collections.write().map_err(poisoned)?;
        let stored = collections.entry(collection.to_string()).or_default();
        for doc in documents {
            stored.insert(doc.id.clone(), doc.clone());
        }
        Ok(Some(self.next_task.fetch_add(1, Ordering::SeqCst)))
    }

    async fn wait_for_task(&self, task: TaskUid) -> Result<()> {
        if task >= self.next_task.load(Ordering::SeqCst) {
            bail!("unknown task {}", task);
        }
        self.waited.write().map_err(poisoned)?.push(task);
        Ok(())
    }
}

/// A post source that returns a fixed set of posts for any non-blank query.
#[derive(Default)]
pub struct FixedPostSource {
    posts: Vec<Post>,
    calls: AtomicUsize,
}

impl FixedPostSource {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `search` calls received, blank queries included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostSource for FixedPostSource {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Post>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.is_blank() {
            return Ok(Vec::new());
        }
        let mut posts: Vec<Post> = self
            .posts
            .iter()
            .filter(|p| match &request.subreddit {
                Some(sub) => p.subreddit.as_deref() == Some(sub.as_str()),
                None => true,
            })
            .take(request.limit)
            .cloned()
            .collect();
        if !request.comments.include {
            for post in &mut posts {
                post.comments.clear();
            }
        } else if let Some(limit) = request.comments.comments_limit {
            for post in &mut posts {
                post.comments.truncate(limit);
            }
        }
        Ok(posts)
    }
}
