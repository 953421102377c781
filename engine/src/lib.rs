//! Directory-tree synchronization between pluggable endpoints.
//!
//! The engine transfers one-way (source to destination) between any two
//! [`endpoint::Endpoint`] implementations, picking a transfer strategy
//! from their capabilities. Modules:
//!
//! - `endpoint`: the endpoint abstraction and the local filesystem
//!   implementation
//! - `error`: engine error type and endpoint error classification
//! - `filter`: glob and regex filter compilation
//! - `model`: options, counters, path conventions, permission policy
//! - `retry`: retry combinator for transient directory races
//! - `strategy`: capability-based transfer strategy
//! - `sync`: batch orchestration and the descent that drives transfers
//! - `walk`: depth-first traversal primitive

pub mod endpoint;
pub mod error;
pub mod filter;
pub mod model;
pub mod retry;
pub mod strategy;
pub mod sync;
pub mod walk;

pub use endpoint::{rstat, Capabilities, Endpoint, LocalEndpoint, Resolved};
pub use error::{EndpointErrorKind, SyncError};
pub use filter::FilterSpec;
pub use model::{
    parse_mode, PathConvention, SyncJob, SyncOptions, SyncOverrides, SyncState,
};
pub use strategy::TransferStrategy;
pub use sync::{remove_tree, sync, sync_with_state};
