//! Version-control core for engineering-project collaboration.
//!
//! The crate implements the collaboration engine behind an engineering
//! platform: content-addressed blob/tree storage, an append-only commit DAG,
//! branches with protection rules, three-way merges with explicit conflict
//! resolution, pull requests with review gating, and immutable tags.
//!
//! Presentation (HTTP/CLI), authentication, durable storage and notification
//! delivery are external collaborators behind traits; see [`api`] and
//! [`events`].

pub mod api;
pub mod areas;
pub mod artifacts;
pub mod errors;
pub mod events;
pub mod logging;

pub use areas::repository::{Repository, Vault};
pub use errors::{ConflictError, CoreError, Result};
