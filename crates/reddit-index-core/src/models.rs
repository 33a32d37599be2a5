//! Source records and derived documents.
//!
//! [`Post`] and [`Comment`] are the typed shapes of the records the Reddit
//! connector fetches. They deserialize straight from the `data` object of a
//! Reddit "thing", and every source quirk (missing flags, `edited: false`,
//! explicit `null` counters) is resolved here, once, so the mapper never has
//! to guess.
//!
//! [`EmbeddingDocument`] and [`LexicalDocument`] are the two projections
//! produced by [`crate::mapper`]; both are keyed by the source `id`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Provenance tag stamped on every produced document.
pub const SOURCE_TAG: &str = "reddit";

/// Type prefix for submission fullnames.
pub const POST_PREFIX: &str = "t3_";

/// Type prefix for comment fullnames.
pub const COMMENT_PREFIX: &str = "t1_";

/// A Reddit submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// Self-post body. `None` for link posts that carry no body at all.
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub subreddit_id: Option<String>,
    /// Author display name.
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_fullname: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub score: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub num_comments: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub num_crossposts: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gilded: u64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub created_utc: f64,
    #[serde(default)]
    pub created: Option<f64>,
    /// Last edit time. Reddit reports `edited: false` for untouched posts.
    #[serde(default, rename = "edited", deserialize_with = "edited_timestamp")]
    pub edited_ts: Option<f64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub over_18: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stickied: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub locked: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spoiler: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_self: bool,

    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub link_flair_template_id: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,

    /// Flattened comments, attached only when the fetch asked for them.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    /// Type-prefixed identifier, e.g. `t3_abc123`.
    pub fn fullname(&self) -> String {
        format!("{}{}", POST_PREFIX, self.id)
    }
}

/// A Reddit comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// Comment text. A record without one is not a real comment.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub score: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_utc: f64,
    /// Fullname of the immediate parent (`t3_…` or `t1_…`).
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Fullname of the owning submission (`t3_…`).
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_submitter: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stickied: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub locked: bool,
    /// Nesting level; 0 is a direct reply to the post.
    #[serde(default)]
    pub depth: Option<i64>,
    #[serde(default)]
    pub controversiality: Option<i64>,
    #[serde(default)]
    pub distinguished: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub subreddit_id: Option<String>,
}

impl Comment {
    /// Type-prefixed identifier, e.g. `t1_def456`.
    pub fn fullname(&self) -> String {
        format!("{}{}", COMMENT_PREFIX, self.id)
    }
}

/// Pagination placeholder standing in for replies that were not fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoreComments {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub count: u64,
    #[serde(default)]
    pub depth: Option<i64>,
    /// Ids (without prefix) of the hidden comments.
    #[serde(default)]
    pub children: Vec<String>,
}

/// A comment together with its direct replies.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadedComment {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

/// One node of a comment thread.
#[derive(Debug, Clone, PartialEq)]
pub enum CommentNode {
    Comment(ThreadedComment),
    More(MoreComments),
}

impl CommentNode {
    /// A comment node without replies.
    pub fn leaf(comment: Comment) -> Self {
        CommentNode::Comment(ThreadedComment {
            comment,
            replies: Vec::new(),
        })
    }

    /// A comment node with the given replies.
    pub fn with_replies(comment: Comment, replies: Vec<CommentNode>) -> Self {
        CommentNode::Comment(ThreadedComment { comment, replies })
    }

    /// Fullname of the node's parent, as reported by the source.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            CommentNode::Comment(t) => t.comment.parent_id.as_deref(),
            CommentNode::More(m) => m.parent_id.as_deref(),
        }
    }
}

/// Document handed to the vector store: text to embed plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDocument {
    pub id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Flat document handed to the lexical store, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalDocument {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LexicalDocument {
    /// Look up a field by name, including `id`.
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.fields.get(key).cloned()
    }

    /// All field names, `id` first, the rest sorted.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = vec!["id"];
        names.extend(self.fields.keys().map(String::as_str));
        names
    }

    /// The document as one JSON object, ready for ingestion.
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(obj)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn edited_timestamp<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Edited {
        Flag(#[allow(dead_code)] bool),
        At(f64),
    }

    Ok(match Option::<Edited>::deserialize(deserializer)? {
        Some(Edited::At(ts)) => Some(ts),
        Some(Edited::Flag(_)) | None => None,
    })
}
