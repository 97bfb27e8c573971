//! # strand-core
//!
//! Foundation types shared across the Strand toolkit crates:
//!
//! - **Branded IDs**: `SessionId`, `RequestId` as newtypes for type safety
//! - **ID generation**: the [`IdGenerator`] seam with UUID v7 and sequence
//!   implementations
//! - **Correlation context**: per-message metadata (request id, bearer token)
//!   propagated from a session to its consumer

#![deny(unsafe_code)]

pub mod context;
pub mod ids;

pub use context::CorrelationContext;
pub use ids::{IdGenerator, RequestId, SequenceIds, SessionId, UuidIds};
