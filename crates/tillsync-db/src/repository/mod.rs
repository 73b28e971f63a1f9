//! # Repository Module
//!
//! Statement-level access to the cache table.
//!
//! ## Available Repositories
//!
//! - [`TransactionRepository`] - Snapshot, upsert, touch, miss and delete

pub mod transaction;

pub use transaction::TransactionRepository;
