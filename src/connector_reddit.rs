//! Reddit connector.
//!
//! Fetches submissions matching a search query and, optionally, their
//! comment threads, using Reddit's OAuth API with an application-only
//! (`client_credentials`) token.
//!
//! # Requests
//!
//! | Purpose | Request |
//! |---------|---------|
//! | token | `POST {auth_url}` (basic auth, `grant_type=client_credentials`) |
//! | search | `GET {api_url}/r/{subreddit or all}/search?q=…&limit=…&restrict_sr=…` |
//! | thread | `GET {api_url}/comments/{post_id}?sort=…` |
//! | placeholders | `GET {api_url}/api/morechildren?link_id=…&children=…` |
//!
//! All requests carry `raw_json=1` so text fields arrive unescaped.
//!
//! # Comments
//!
//! A thread arrives as a tree containing "more comments" placeholders. The
//! connector expands placeholders one at a time, in thread order, until the
//! request's [`PlaceholderExpansion`] budget is spent, then flattens the tree
//! depth-first and truncates to `comments_limit`. Unexpanded placeholders are
//! dropped. Placeholders without children ("continue this thread" links)
//! are dropped at parse time.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use reddit_index_core::models::{Comment, CommentNode, MoreComments, Post};
use reddit_index_core::sink::{CommentOptions, PostSource, SearchRequest};
use reddit_index_core::thread::{build_threads, CommentForest, PlaceholderExpansion};

use crate::config::RedditConfig;

/// Reddit returns at most this many items per listing page.
const PAGE_SIZE: usize = 100;
/// `morechildren` accepts at most this many ids per call.
const MORE_CHILDREN_BATCH: usize = 100;
/// Refresh the token this long before Reddit says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Reddit API client implementing [`PostSource`].
pub struct RedditConnector {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: String,
    api_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl RedditConnector {
    /// Build a connector from configuration.
    ///
    /// # Errors
    ///
    /// Fails when `client_id` or `client_secret` is missing.
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let (client_id, client_secret) = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                (id.clone(), secret.clone())
            }
            _ => bail!(
                "Reddit credentials are required: set REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET"
            ),
        };

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            client_id,
            client_secret,
            auth_url: config.auth_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    /// Return a valid bearer token, requesting a new one when needed.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(&self.auth_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Reddit token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Reddit token request failed ({}): {}", status, body);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Invalid Reddit token response")?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        tracing::debug!(expires_in = token.expires_in, "obtained Reddit access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = Url::parse_with_params(&format!("{}{}", self.api_url, path), params)
            .with_context(|| format!("Invalid Reddit URL for {}", path))?;
        let token = self.access_token().await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Reddit request failed: {}", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Reddit API error {} for {}: {}", status, path, body);
        }
        Ok(response.json().await?)
    }

    /// Search submissions, following `after` cursors until `limit` posts
    /// have been collected or the listing ends. Comments are not attached.
    pub async fn search_posts(&self, request: &SearchRequest) -> Result<Vec<Post>> {
        if request.is_blank() || request.limit == 0 {
            return Ok(Vec::new());
        }

        let subreddit = request
            .subreddit
            .as_deref()
            .map(|s| s.trim().trim_start_matches("r/"))
            .filter(|s| !s.is_empty());
        let path = format!("/r/{}/search", subreddit.unwrap_or("all"));

        let mut posts = Vec::new();
        let mut after: Option<String> = None;

        while posts.len() < request.limit {
            let page = (request.limit - posts.len()).min(PAGE_SIZE);
            let mut params = vec![
                ("q", request.query.clone()),
                ("limit", page.to_string()),
                ("restrict_sr", subreddit.is_some().to_string()),
                ("type", "link".to_string()),
                ("raw_json", "1".to_string()),
            ];
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }

            let listing = self.get_json(&path, &params).await?;
            let (page_posts, next) = parse_post_listing(&listing)?;
            let received = page_posts.len();
            posts.extend(page_posts);

            match next {
                Some(cursor) if received > 0 => after = Some(cursor),
                _ => break,
            }
        }

        posts.truncate(request.limit);
        tracing::debug!(query = %request.query, posts = posts.len(), "reddit search complete");
        Ok(posts)
    }

    /// Fetch, expand and flatten the comment thread of `post`.
    pub async fn fetch_comments(&self, post: &Post, options: &CommentOptions) -> Result<Vec<Comment>> {
        let mut params = vec![("raw_json", "1".to_string())];
        if let Some(sort) = &options.comment_sort {
            params.push(("sort", sort.clone()));
        }

        let thread = self
            .get_json(&format!("/comments/{}", post.id), &params)
            .await?;
        let listing = thread
            .as_array()
            .and_then(|parts| parts.get(1))
            .ok_or_else(|| anyhow!("Unexpected comments response for post {}", post.id))?;

        let mut forest = CommentForest::new(parse_comment_listing(listing)?);
        self.expand_placeholders(&post.fullname(), &mut forest, options)
            .await?;
        Ok(forest.flatten_limited(options.comments_limit))
    }

    async fn expand_placeholders(
        &self,
        link_fullname: &str,
        forest: &mut CommentForest,
        options: &CommentOptions,
    ) -> Result<()> {
        let mut attempted: HashSet<String> = HashSet::new();

        while options.expansion.allows(attempted.len()) {
            let Some(next) = forest
                .placeholders()
                .into_iter()
                .find(|m| !attempted.contains(&m.id))
            else {
                break;
            };
            attempted.insert(next.id.clone());

            let nodes = self
                .more_children(link_fullname, &next, options.comment_sort.as_deref())
                .await?;
            forest.replace_placeholder(&next.id, nodes);
        }

        if options.expansion != PlaceholderExpansion::Skip {
            tracing::debug!(link = link_fullname, expanded = attempted.len(), "expanded placeholders");
        }
        forest.strip_placeholders();
        Ok(())
    }

    /// Resolve one placeholder into thread nodes via `/api/morechildren`.
    async fn more_children(
        &self,
        link_fullname: &str,
        more: &MoreComments,
        sort: Option<&str>,
    ) -> Result<Vec<CommentNode>> {
        let mut flat = Vec::new();
        for batch in more.children.chunks(MORE_CHILDREN_BATCH) {
            let mut params = vec![
                ("api_type", "json".to_string()),
                ("link_id", link_fullname.to_string()),
                ("children", batch.join(",")),
                ("raw_json", "1".to_string()),
            ];
            if let Some(sort) = sort {
                params.push(("sort", sort.to_string()));
            }
            let response = self.get_json("/api/morechildren", &params).await?;
            let things = response
                .pointer("/json/data/things")
                .and_then(|t| t.as_array())
                .ok_or_else(|| anyhow!("Unexpected morechildren response"))?;
            for thing in things {
                if let Some(node) = parse_thing(thing)? {
                    flat.push(node);
                }
            }
        }
        Ok(build_threads(flat))
    }
}

#[async_trait]
impl PostSource for RedditConnector {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Post>> {
        let mut posts = self.search_posts(request).await?;
        if request.comments.include {
            for post in &mut posts {
                post.comments = self.fetch_comments(post, &request.comments).await?;
            }
        }
        Ok(posts)
    }
}

/// Parse a submission listing into posts and the `after` cursor.
pub fn parse_post_listing(listing: &Value) -> Result<(Vec<Post>, Option<String>)> {
    let data = listing
        .get("data")
        .ok_or_else(|| anyhow!("Invalid listing: missing data"))?;
    let children = data
        .get("children")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid listing: missing children"))?;

    let mut posts = Vec::with_capacity(children.len());
    for child in children {
        if child.get("kind").and_then(|k| k.as_str()) != Some("t3") {
            continue;
        }
        let data = child
            .get("data")
            .cloned()
            .ok_or_else(|| anyhow!("Invalid listing: child without data"))?;
        posts.push(serde_json::from_value::<Post>(data).context("Invalid submission")?);
    }

    let after = data
        .get("after")
        .and_then(|a| a.as_str())
        .map(str::to_string);
    Ok((posts, after))
}

/// Parse a comment listing into thread nodes, recursing into `replies`.
pub fn parse_comment_listing(listing: &Value) -> Result<Vec<CommentNode>> {
    let children = match listing.pointer("/data/children").and_then(|c| c.as_array()) {
        Some(children) => children,
        None => return Ok(Vec::new()),
    };
    let mut nodes = Vec::with_capacity(children.len());
    for child in children {
        if let Some(node) = parse_thing(child)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

/// Parse one `t1` or `more` thing. Other kinds yield `None`.
fn parse_thing(thing: &Value) -> Result<Option<CommentNode>> {
    let kind = thing.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
    let Some(data) = thing.get("data") else {
        return Ok(None);
    };

    match kind {
        "t1" => {
            let comment: Comment =
                serde_json::from_value(data.clone()).context("Invalid comment")?;
            // `replies` is "" when empty, a listing otherwise.
            let replies = match data.get("replies") {
                Some(r) if r.is_object() => parse_comment_listing(r)?,
                _ => Vec::new(),
            };
            Ok(Some(CommentNode::with_replies(comment, replies)))
        }
        "more" => {
            let more: MoreComments =
                serde_json::from_value(data.clone()).context("Invalid placeholder")?;
            if more.children.is_empty() {
                Ok(None)
            } else {
                Ok(Some(CommentNode::More(more)))
            }
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> RedditConfig {
        RedditConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            auth_url: format!("{}/api/v1/access_token", server.uri()),
            api_url: server.uri(),
            ..Default::default()
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn t1(id: &str, parent: &str, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "body": format!("body {}", id),
                "parent_id": parent,
                "link_id": "t3_p1",
                "replies": replies
            }
        })
    }

    fn listing(children: Vec<Value>) -> Value {
        json!({ "kind": "Listing", "data": { "children": children, "after": null } })
    }

    #[test]
    fn test_missing_credentials() {
        let err = match RedditConnector::new(&RedditConfig::default()) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("REDDIT_CLIENT_ID"));

        let config = RedditConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(RedditConnector::new(&config).is_err());
    }

    #[test]
    fn test_parse_comment_listing_nested() {
        let value = listing(vec![
            t1("c1", "t3_p1", listing(vec![t1("c2", "t1_c1", json!(""))])),
            json!({ "kind": "more", "data": { "id": "m0", "parent_id": "t3_p1", "count": 0, "children": [] } }),
            t1("c3", "t3_p1", json!("")),
        ]);
        let forest = CommentForest::new(parse_comment_listing(&value).unwrap());
        let ids: Vec<String> = forest.flatten().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(forest.placeholders().is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_makes_no_requests() {
        let server = MockServer::start().await;
        let connector = RedditConnector::new(&config_for(&server)).unwrap();
        let posts = connector.search(&SearchRequest::new("  ")).await.unwrap();
        assert!(posts.is_empty());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_search_with_comments_and_placeholders() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path("/r/rust/search"))
            .and(query_param("q", "async traits"))
            .and(query_param("restrict_sr", "true"))
            .and(query_param("limit", "5"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![json!({
                "kind": "t3",
                "data": {
                    "id": "p1",
                    "title": "Async traits",
                    "selftext": "",
                    "subreddit": "rust",
                    "score": 42,
                    "edited": false,
                    "over_18": null
                }
            })])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/comments/p1"))
            .and(query_param("sort", "top"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                listing(vec![]),
                listing(vec![
                    t1("c1", "t3_p1", listing(vec![
                        t1("c2", "t1_c1", json!("")),
                        json!({ "kind": "more", "data": {
                            "id": "m1", "parent_id": "t1_c1", "count": 1, "depth": 1, "children": ["c4"]
                        }}),
                    ])),
                    t1("c3", "t3_p1", json!("")),
                ]),
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/morechildren"))
            .and(query_param("link_id", "t3_p1"))
            .and(query_param("children", "c4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "json": { "errors": [], "data": { "things": [ t1("c4", "t1_c1", json!("")) ] } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connector = RedditConnector::new(&config_for(&server)).unwrap();
        let request = SearchRequest::new("async traits")
            .with_subreddit("rust")
            .with_limit(5)
            .with_comments(CommentOptions {
                comment_sort: Some("top".to_string()),
                ..Default::default()
            });

        let posts = connector.search(&request).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Async traits");
        assert!(!posts[0].over_18);
        assert_eq!(posts[0].edited_ts, None);
        let ids: Vec<&str> = posts[0].comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c4", "c3"]);
    }

    #[tokio::test]
    async fn test_skip_expansion_and_truncate() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path("/r/all/search"))
            .and(query_param("restrict_sr", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![json!({
                "kind": "t3", "data": { "id": "p1", "title": "T" }
            })])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/comments/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                listing(vec![]),
                listing(vec![
                    t1("c1", "t3_p1", json!("")),
                    json!({ "kind": "more", "data": { "id": "m1", "parent_id": "t3_p1", "count": 3, "children": ["a", "b", "c"] } }),
                    t1("c2", "t3_p1", json!("")),
                    t1("c3", "t3_p1", json!("")),
                ]),
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/morechildren"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let connector = RedditConnector::new(&config_for(&server)).unwrap();
        let request = SearchRequest::new("q").with_comments(CommentOptions {
            include: true,
            comments_limit: Some(2),
            comment_sort: None,
            expansion: PlaceholderExpansion::Skip,
        });
        let posts = connector.search(&request).await.unwrap();
        let ids: Vec<&str> = posts[0].comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/r/all/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let connector = RedditConnector::new(&config_for(&server)).unwrap();
        let err = connector
            .search(&SearchRequest::new("q"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/r/all/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![])))
            .expect(2)
            .mount(&server)
            .await;

        let connector = RedditConnector::new(&config_for(&server)).unwrap();
        let request = SearchRequest::new("q").with_comments(CommentOptions::none());
        connector.search(&request).await.unwrap();
        connector.search(&request).await.unwrap();
    }
}
