//! # Reddit Index Core
//!
//! Transport-free logic for indexing Reddit content: data models, comment
//! thread flattening, document mapping, collaborator traits and the index
//! synchronizer.
//!
//! This crate performs no network or filesystem I/O. HTTP backends for the
//! collaborator traits live in the `reddit-index` application crate.

pub mod mapper;
pub mod models;
pub mod sink;
pub mod sync;
pub mod thread;
