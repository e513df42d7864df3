//! kbforge store: SQLite dedup ledger and the atomic JSON knowledge base.

pub mod knowledge;
pub mod schema;
pub mod tracker;
pub mod types;

pub use knowledge::{merge, validate_consistency, KnowledgeStore};
pub use tracker::{hash_file, short_hash, DuplicateTracker};
pub use types::*;
