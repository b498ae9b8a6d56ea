//! Storage backends implementing Beacon's [`Storage`] contract: an
//! in-memory map for tests and local development, a JSON file for
//! single-instance deployments, embedded SQLite, and server-grade
//! PostgreSQL.
//!
//! [`Storage`]: beacon_core::storage::Storage

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

pub mod json_file;
pub mod memory;
pub mod observed;
pub mod postgres;
pub mod sqlite;
