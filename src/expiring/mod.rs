//! Expiring Callback Storage
//!
//! - `map`: Sharded [`ExpiringMap`] with lazy and active expiry
//! - `sweeper`: Background [`ExpirySweeper`] that evicts and reports expired entries

pub mod map;
pub mod sweeper;

pub use map::ExpiringMap;
pub use sweeper::{ExpirySweeper, SweepConfig};
