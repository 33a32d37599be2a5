//! Meilisearch lexical sink.
//!
//! Documents are added with `POST /indexes/{index}/documents?primaryKey=…`;
//! Meilisearch creates the index on first use and replaces documents that
//! share a primary key. The response is an enqueued task whose uid is read
//! from `taskUid` (or `uid` on older servers). [`MeiliSink::wait_for_task`]
//! polls `GET /tasks/{uid}` until the task succeeds, fails, or the configured
//! wait timeout elapses.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

use reddit_index_core::models::LexicalDocument;
use reddit_index_core::sink::{LexicalSink, TaskUid};

use crate::config::MeiliConfig;

/// Read the task uid from an enqueue response.
pub fn task_uid_from(response: &Value) -> Option<TaskUid> {
    response
        .get("taskUid")
        .and_then(Value::as_u64)
        .or_else(|| response.get("uid").and_then(Value::as_u64))
}

/// Meilisearch REST client implementing [`LexicalSink`].
pub struct MeiliSink {
    client: reqwest::Client,
    url: String,
    master_key: Option<String>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl MeiliSink {
    pub fn new(config: &MeiliConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            master_key: config.master_key.clone(),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.master_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl LexicalSink for MeiliSink {
    async fn add_documents(
        &self,
        collection: &str,
        documents: &[LexicalDocument],
        primary_key: &str,
    ) -> Result<Option<TaskUid>> {
        let body: Vec<Value> = documents.iter().map(LexicalDocument::to_value).collect();
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/indexes/{}/documents?primaryKey={}", collection, primary_key),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Meilisearch unreachable at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Meilisearch add documents to '{}' failed ({}): {}", collection, status, body);
        }

        let enqueued: Value = response.json().await.unwrap_or(Value::Null);
        let task = task_uid_from(&enqueued);
        tracing::debug!(index = collection, documents = documents.len(), ?task, "meilisearch documents enqueued");
        Ok(task)
    }

    async fn wait_for_task(&self, task: TaskUid) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        let path = format!("/tasks/{}", task);

        loop {
            let response = self.request(reqwest::Method::GET, &path).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Meilisearch task {} lookup failed ({}): {}", task, status, body);
            }

            let info: Value = response.json().await?;
            match info.get("status").and_then(Value::as_str) {
                Some("succeeded") => return Ok(()),
                Some(state @ ("failed" | "canceled")) => {
                    let message = info
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no error message");
                    bail!("Meilisearch task {} {}: {}", task, state, message);
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                bail!(
                    "Meilisearch task {} timed out after {}ms",
                    task,
                    self.wait_timeout.as_millis()
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
