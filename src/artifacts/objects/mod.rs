//! Content-addressed object types.
//!
//! Everything the store holds is identified by a SHA-1 over
//! `<type> <size>\0<content>`:
//!
//! - **Blob**: raw file payload
//! - **Tree**: full path -> entry mapping at one commit (a snapshot, not a
//!   nested directory structure)
//! - **Commit**: snapshot plus metadata and parent links

pub mod blob;
pub mod commit;
pub mod file_kind;
pub mod object_id;
pub mod tree;

/// Length of a SHA-1 hash in hexadecimal format
pub const OBJECT_ID_LENGTH: usize = 40;
