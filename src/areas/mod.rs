//! Aggregate building blocks:
//!
//! - `object_store`: content-addressed blob/tree storage with pluggable
//!   backends (in-memory and zlib-compressed on-disk)
//! - `repository`: per-project aggregate wiring the store, commit graph,
//!   branches, merge engine, pull requests and tags together

pub mod object_store;
pub mod repository;
