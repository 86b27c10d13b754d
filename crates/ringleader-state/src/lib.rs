//! ringleader-state — embedded state store for Ringleader.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for devices, rings, deployments, and gating factors.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{deployment_id}:{ring_id}`) enable prefix scans for
//! related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is owned by a single process; every other component reaches persisted
//! state through it rather than holding a database handle of its own.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
