//! fleetgrid-state — embedded fleet record store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds the authoritative records
//! the live-migration scheduler reads and mutates: agent services (with
//! their heartbeats and compute capacity), instances, and volumes.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Services use the composite key `{topic}/{host}` so that all services of
//! a topic can be found with a prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Multi-record mutations such as
//! [`StateStore::transition_instance`] run in a single write transaction.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
