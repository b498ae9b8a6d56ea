//! Authentication, permission gating and rate limiting for the Beacon
//! update service: bearer-token verification against a hashed key store
//! (§4.4) and two-tier token-bucket rate limiting (§4.5).

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

pub mod pipeline;
pub mod rate_limit;
