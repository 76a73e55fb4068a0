//! Resource storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where containers,
//! blobs and their lease records live.  Implementations include a
//! volatile in-memory store and a single-file SQLite store.

pub mod backend;
pub mod memory;
pub mod sqlite;
