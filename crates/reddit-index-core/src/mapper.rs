//! Document mapping: source records → embedding and lexical documents.
//!
//! Both projections are driven by one field table per record kind
//! ([`POST_FIELDS`], [`COMMENT_FIELDS`]). The embedding document carries the
//! table's output as `metadata`; the lexical document carries the same
//! entries flattened beside `id`. Adding a field to a table therefore adds it
//! to both indices.
//!
//! | Projection | `id` | text | fields |
//! |------------|------|------|--------|
//! | [`EmbeddingDocument`] | source id | post `selftext` / comment `body` | `metadata` |
//! | [`LexicalDocument`] | source id | — | flattened |
//!
//! Every declared field is always present. Missing values map to `null`,
//! flags to `false`; a key is never omitted.
//!
//! Output order: each post's document, then the documents of its attached
//! comments, then the next post.

use serde_json::{json, Map, Value};

use crate::models::{Comment, EmbeddingDocument, LexicalDocument, Post, SOURCE_TAG};

/// One entry of a field table.
pub struct Field<T> {
    pub name: &'static str,
    extract: fn(&T) -> Value,
}

impl<T> Field<T> {
    pub fn value(&self, record: &T) -> Value {
        (self.extract)(record)
    }
}

/// Fields recorded for every post, in addition to `id`, `query` and `source`.
pub static POST_FIELDS: &[Field<Post>] = &[
    Field { name: "kind", extract: |_| json!("post") },
    Field { name: "title", extract: |p| json!(p.title) },
    Field { name: "selftext", extract: |p| json!(p.selftext) },
    Field { name: "url", extract: |p| json!(p.url) },
    Field { name: "permalink", extract: |p| json!(p.permalink) },
    Field { name: "domain", extract: |p| json!(p.domain) },
    Field { name: "fullname", extract: |p| json!(p.fullname()) },
    Field { name: "subreddit", extract: |p| json!(p.subreddit) },
    Field { name: "subreddit_id", extract: |p| json!(p.subreddit_id) },
    Field { name: "author", extract: |p| json!(p.author) },
    Field { name: "author_fullname", extract: |p| json!(p.author_fullname) },
    Field { name: "score", extract: |p| json!(p.score) },
    Field { name: "num_comments", extract: |p| json!(p.num_comments) },
    Field { name: "num_crossposts", extract: |p| json!(p.num_crossposts) },
    Field { name: "gilded", extract: |p| json!(p.gilded) },
    Field { name: "upvote_ratio", extract: |p| json!(p.upvote_ratio) },
    Field { name: "created_utc", extract: |p| json!(p.created_utc) },
    Field { name: "created", extract: |p| json!(p.created) },
    Field { name: "edited_ts", extract: |p| json!(p.edited_ts) },
    Field { name: "is_self", extract: |p| json!(p.is_self) },
    Field { name: "over_18", extract: |p| json!(p.over_18) },
    Field { name: "stickied", extract: |p| json!(p.stickied) },
    Field { name: "locked", extract: |p| json!(p.locked) },
    Field { name: "spoiler", extract: |p| json!(p.spoiler) },
    Field { name: "link_flair_text", extract: |p| json!(p.link_flair_text) },
    Field { name: "link_flair_template_id", extract: |p| json!(p.link_flair_template_id) },
    Field { name: "thumbnail", extract: |p| json!(p.thumbnail) },
];

/// Fields recorded for every comment, in addition to `id`, `query` and `source`.
pub static COMMENT_FIELDS: &[Field<Comment>] = &[
    Field { name: "kind", extract: |_| json!("comment") },
    Field { name: "body", extract: |c| json!(c.body) },
    Field { name: "parent_id", extract: |c| json!(c.parent_id) },
    Field { name: "link_id", extract: |c| json!(c.link_id) },
    Field {
        name: "submission_id",
        extract: |c| json!(c.link_id.as_deref().and_then(submission_id_from_link_id)),
    },
    Field { name: "author", extract: |c| json!(c.author) },
    Field { name: "score", extract: |c| json!(c.score) },
    Field { name: "created_utc", extract: |c| json!(c.created_utc) },
    Field { name: "is_submitter", extract: |c| json!(c.is_submitter) },
    Field { name: "depth", extract: |c| json!(c.depth) },
    Field { name: "controversiality", extract: |c| json!(c.controversiality) },
    Field { name: "stickied", extract: |c| json!(c.stickied) },
    Field { name: "locked", extract: |c| json!(c.locked) },
    Field { name: "distinguished", extract: |c| json!(c.distinguished) },
    Field { name: "subreddit", extract: |c| json!(c.subreddit) },
    Field { name: "subreddit_id", extract: |c| json!(c.subreddit_id) },
];

/// Strip the type prefix from a `link_id` such as `t3_abc123`.
///
/// Returns `None` when there is no `_` separator or nothing follows it.
pub fn submission_id_from_link_id(link_id: &str) -> Option<String> {
    match link_id.split_once('_') {
        Some((_, rest)) if !rest.is_empty() => Some(rest.to_string()),
        _ => None,
    }
}

fn record_fields<T>(table: &[Field<T>], record: &T, query: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    for field in table {
        fields.insert(field.name.to_string(), field.value(record));
    }
    fields.insert("query".to_string(), json!(query));
    fields.insert("source".to_string(), json!(SOURCE_TAG));
    fields
}

fn post_embedding(post: &Post, query: &str) -> EmbeddingDocument {
    EmbeddingDocument {
        id: post.id.clone(),
        text: post.selftext.clone().unwrap_or_default(),
        metadata: record_fields(POST_FIELDS, post, query),
    }
}

fn post_lexical(post: &Post, query: &str) -> LexicalDocument {
    LexicalDocument {
        id: post.id.clone(),
        fields: record_fields(POST_FIELDS, post, query),
    }
}

/// Map posts, and the comments attached to them, to embedding documents.
pub fn map_posts_to_embedding_documents(posts: &[Post], query: &str) -> Vec<EmbeddingDocument> {
    let mut docs = Vec::new();
    for post in posts {
        docs.push(post_embedding(post, query));
        docs.extend(map_comments_to_embedding_documents(&post.comments, query));
    }
    docs
}

/// Map posts, and the comments attached to them, to lexical documents.
pub fn map_posts_to_lexical_documents(posts: &[Post], query: &str) -> Vec<LexicalDocument> {
    let mut docs = Vec::new();
    for post in posts {
        docs.push(post_lexical(post, query));
        docs.extend(map_comments_to_lexical_documents(&post.comments, query));
    }
    docs
}

/// Map comments to embedding documents. Comments without a body are skipped.
pub fn map_comments_to_embedding_documents(
    comments: &[Comment],
    query: &str,
) -> Vec<EmbeddingDocument> {
    comments
        .iter()
        .filter_map(|c| {
            let body = c.body.as_ref()?;
            Some(EmbeddingDocument {
                id: c.id.clone(),
                text: body.clone(),
                metadata: record_fields(COMMENT_FIELDS, c, query),
            })
        })
        .collect()
}

/// Map comments to lexical documents. Comments without a body are skipped.
pub fn map_comments_to_lexical_documents(comments: &[Comment], query: &str) -> Vec<LexicalDocument> {
    comments
        .iter()
        .filter(|c| c.body.is_some())
        .map(|c| LexicalDocument {
            id: c.id.clone(),
            fields: record_fields(COMMENT_FIELDS, c, query),
        })
        .collect()
}
