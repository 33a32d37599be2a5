//! Comment thread handling: placeholder bookkeeping and flattening.
//!
//! A fetched thread is a forest of [`CommentNode`]s that may still contain
//! [`MoreComments`] placeholders. The connector expands some or all of them
//! (see [`PlaceholderExpansion`]) with [`CommentForest::placeholders`] and
//! [`CommentForest::replace_placeholder`], then calls
//! [`CommentForest::flatten_limited`] to obtain the ordered comment list that
//! gets attached to a post. Flattening never yields a placeholder.
//!
//! # Ordering
//!
//! Flattening is a depth-first pre-order walk: a comment is always followed by
//! its own replies before its next sibling.
//!
//! ```text
//! C1            ──▶  [C1, C2, C3]
//! └─ C2
//! C3
//! ```

use std::collections::HashMap;

use crate::models::{Comment, CommentNode, MoreComments, ThreadedComment};

/// How many placeholders the connector may expand before flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderExpansion {
    /// Do not expand; placeholders are dropped.
    Skip,
    /// Expand at most this many placeholders. `UpTo(0)` behaves as `Skip`.
    UpTo(usize),
    /// Expand until none remain.
    #[default]
    Unlimited,
}

impl PlaceholderExpansion {
    /// Build from an optional limit, where `None` means no limit.
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            None => PlaceholderExpansion::Unlimited,
            Some(0) => PlaceholderExpansion::Skip,
            Some(n) => PlaceholderExpansion::UpTo(n),
        }
    }

    /// Whether another expansion is allowed after `done` have been performed.
    pub fn allows(&self, done: usize) -> bool {
        match self {
            PlaceholderExpansion::Skip => false,
            PlaceholderExpansion::UpTo(n) => done < *n,
            PlaceholderExpansion::Unlimited => true,
        }
    }
}

/// The top-level nodes of one submission's comment thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentForest {
    pub nodes: Vec<CommentNode>,
}

impl CommentForest {
    pub fn new(nodes: Vec<CommentNode>) -> Self {
        Self { nodes }
    }

    /// Flatten the thread in depth-first pre-order, dropping placeholders.
    ///
    /// Pure: repeated calls on the same forest return the same sequence.
    pub fn flatten(&self) -> Vec<Comment> {
        let mut out = Vec::new();
        flatten_into(&self.nodes, &mut out);
        out
    }

    /// Flatten, then keep only the first `comments_limit` comments.
    pub fn flatten_limited(&self, comments_limit: Option<usize>) -> Vec<Comment> {
        let mut flat = self.flatten();
        if let Some(limit) = comments_limit {
            flat.truncate(limit);
        }
        flat
    }

    /// All placeholders, in thread order.
    pub fn placeholders(&self) -> Vec<MoreComments> {
        let mut out = Vec::new();
        collect_placeholders(&self.nodes, &mut out);
        out
    }

    /// Replace the placeholder with the given id by `replacement`.
    ///
    /// Returns `false` when no such placeholder exists.
    pub fn replace_placeholder(&mut self, placeholder_id: &str, replacement: Vec<CommentNode>) -> bool {
        let mut replacement = Some(replacement);
        replace_in(&mut self.nodes, placeholder_id, &mut replacement)
    }

    /// Remove every placeholder from the thread.
    pub fn strip_placeholders(&mut self) {
        strip_in(&mut self.nodes);
    }
}

fn flatten_into(nodes: &[CommentNode], out: &mut Vec<Comment>) {
    for node in nodes {
        if let CommentNode::Comment(ThreadedComment { comment, replies }) = node {
            out.push(comment.clone());
            flatten_into(replies, out);
        }
    }
}

fn collect_placeholders(nodes: &[CommentNode], out: &mut Vec<MoreComments>) {
    for node in nodes {
        match node {
            CommentNode::Comment(t) => collect_placeholders(&t.replies, out),
            CommentNode::More(m) => out.push(m.clone()),
        }
    }
}

fn replace_in(
    nodes: &mut Vec<CommentNode>,
    placeholder_id: &str,
    replacement: &mut Option<Vec<CommentNode>>,
) -> bool {
    let position = nodes
        .iter()
        .position(|n| matches!(n, CommentNode::More(m) if m.id == placeholder_id));

    if let Some(pos) = position {
        let new_nodes = replacement.take().unwrap_or_default();
        nodes.splice(pos..=pos, new_nodes);
        return true;
    }

    for node in nodes.iter_mut() {
        if let CommentNode::Comment(t) = node {
            if replace_in(&mut t.replies, placeholder_id, replacement) {
                return true;
            }
        }
    }
    false
}

fn strip_in(nodes: &mut Vec<CommentNode>) {
    nodes.retain(|n| matches!(n, CommentNode::Comment(_)));
    for node in nodes.iter_mut() {
        if let CommentNode::Comment(t) = node {
            strip_in(&mut t.replies);
        }
    }
}

/// Assemble a flat list of parent-linked nodes into threads.
///
/// This is the shape returned by Reddit's `morechildren` endpoint: every
/// node carries its parent's fullname and parents precede children. Nodes
/// whose parent is not in the list become roots. Input order is preserved
/// among siblings.
pub fn build_threads(nodes: Vec<CommentNode>) -> Vec<CommentNode> {
    // Index of each comment's fullname within `nodes`.
    let mut index_of: HashMap<String, usize> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if let CommentNode::Comment(t) = node {
            index_of.insert(t.comment.fullname(), i);
        }
    }

    let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let parent = node
            .parent_id()
            .and_then(|p| index_of.get(p).copied())
            .filter(|&p| p != i);
        parent_of.push(parent);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();
    for (i, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let mut slots: Vec<Option<CommentNode>> = nodes.into_iter().map(Some).collect();
    roots
        .into_iter()
        .filter_map(|i| assemble(i, &children, &mut slots))
        .collect()
}

fn assemble(
    i: usize,
    children: &[Vec<usize>],
    slots: &mut [Option<CommentNode>],
) -> Option<CommentNode> {
    let mut node = slots[i].take()?;
    if let CommentNode::Comment(t) = &mut node {
        for &c in &children[i] {
            if let Some(child) = assemble(c, children, slots) {
                t.replies.push(child);
            }
        }
    }
    Some(node)
}
