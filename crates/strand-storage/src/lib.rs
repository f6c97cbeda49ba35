//! # Strand Storage
//!
//! Durable state for a storage node, in two halves:
//!
//! - `kv` - RocksDB-backed key/value store with one column family per
//!   bucket (`fpccs`, `echo_seen`, `ready_seen`, `meta`) and a
//!   write-coalescing batcher for gossip evidence
//! - `fragments` - write-once fragment files, made atomic with a
//!   temp-file-then-rename protocol
//!
//! ## Storage Layout
//!
//! - `<db>/` - RocksDB column families
//! - `<datadir>/<object_id>/<index>.bin` - fragment bodies

pub mod batcher;
pub mod fragments;
pub mod kv;

pub use batcher::{BatchPut, Batcher};
pub use fragments::FragmentStore;
pub use kv::{KvStore, ObjectMeta, CF_ECHO_SEEN, CF_FPCCS, CF_META, CF_READY_SEEN};
