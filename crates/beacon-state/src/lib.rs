//! beacon-state — the registry store for Beacon.
//!
//! Backed by [redb](https://docs.rs/redb), holds one row per registered
//! service keyed by name. Every mutation (register, heartbeat, staleness
//! sweep, eviction) runs in its own write transaction, so operations on the
//! same record are linearizable and version bumps are never lost.
//!
//! # Architecture
//!
//! `ServiceRecord`s are JSON-serialized into redb's `&[u8]` value column.
//! Timestamps come from an injectable [`Clock`], which lets tests drive
//! staleness without sleeping.
//!
//! The `RegistryStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is handed to both the API layer and the heartbeat monitor.

pub mod clock;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StateError, StateResult};
pub use store::RegistryStore;
pub use types::*;
