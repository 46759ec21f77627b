//! # galena: an embedded, log-structured key-value store
//!
//! Galena follows the Bitcask design: every mutation is appended to an
//! immutable-once-rotated log, and an in-memory key directory maps each
//! live key to the position of its most recent record, so any read costs
//! one positional file read. Atomic write batches, offline merge
//! reclamation and a crash-recovering startup replay round out the
//! engine.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                   Database                    │
//! │  put/get/delete · batches · merge · iterate   │
//! └──────┬──────────────────┬─────────────────────┘
//!        │                  │
//! ┌──────┴───────┐   ┌──────┴───────┐
//! │ galena-index │   │  data files  │
//! │ BTree / ART  │   │ record codec │
//! │ / B+ tree    │   └──────┬───────┘
//! └──────────────┘   ┌──────┴───────┐
//!                    │  galena-io   │
//!                    │ file / mmap  │
//!                    └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use galena::{Database, Options};
//!
//! fn main() -> galena::Result<()> {
//!     let mut options = Options::default();
//!     options.dir_path = "/tmp/galena-example".into();
//!     let db = Database::open(options)?;
//!
//!     db.put(Bytes::from("key"), Bytes::from("value"))?;
//!     assert_eq!(db.get(Bytes::from("key"))?, "value");
//!     db.delete(Bytes::from("key"))?;
//!
//!     db.close()
//! }
//! ```
//!
//! A database directory is owned by one process at a time, enforced by
//! an advisory lock; within the process a [`Database`] handle is safe to
//! share across threads.

mod batch;
mod data_file;
mod db;
mod errors;
mod iterator;
mod merge;
mod options;
mod record;
#[cfg(test)]
mod test_util;
mod util;

pub use batch::WriteBatch;
pub use db::{Database, Stat};
pub use errors::{Error, Result};
pub use iterator::Iter;
pub use options::{IndexKind, IteratorOptions, Options, WriteBatchOptions};
