//! Hosts the domain model, version algebra, storage contract and error
//! taxonomy for the Beacon update service.
//!
//! Beacon is a software update metadata service queried by desktop clients
//! to discover whether a newer build of a named application exists for
//! their platform and architecture. It stores release metadata but never
//! hosts artifacts; the download URL always points to externally hosted
//! storage.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

/// Implements the error type ([`error::CoreError`]) carried through the
/// resolver, storage and pipeline layers.
pub mod error;

/// Domain types: [`model::Application`], [`model::Release`], [`model::ApiKey`]
/// and the permission hierarchy.
pub mod model;

/// Contains [`storage::Storage`], the backend-agnostic contract every
/// storage implementation of Beacon must satisfy.
pub mod storage;

/// A conformance test suite any [`storage::Storage`] backend can opt into
/// via `define_storage_tests!`.
pub mod storage_tests;

/// SemVer 2.0 parsing and precedence.
pub mod version;
