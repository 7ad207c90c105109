//! Connection Module
//!
//! One TCP connection to one memcached server, in two flavours:
//!
//! - [`PipelinedConnection`]: many requests in flight, answered in order by
//!   a single event-loop task that owns the socket
//! - [`BlockingConnection`]: one request in flight, served by a worker task
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 callers: send(command, timeout)             │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ CommandBuffer + RequestCallback
//!                        ▼
//!           ┌────────────────────────┐
//!           │     request queue      │
//!           └────────────┬───────────┘
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 event loop / worker task                    │
//! │                                                             │
//! │  ┌───────────────┐    ┌─────────────┐    ┌───────────────┐  │
//! │  │ RequestWriter │───>│   socket    │───>│ResponseReader │  │
//! │  └───────────────┘    └─────────────┘    └───────┬───────┘  │
//! │                                                  │          │
//! │                                                  ▼          │
//! │                                   oldest in-flight callback │
//! └─────────────────────────────────────────────────────────────┘
//!                        │ unexpected failure
//!                        ▼
//!               ConnectionCoordinator::disconnect(host)
//! ```
//!
//! ## Modules
//!
//! - `config`: `ConnectionConfig`, `MemcachedHost`, `Authentication`
//! - `error`: `ConnectionError`
//! - `buffer`: `CommandBuffer`, `MissingLink`
//! - `callback`: `RequestCallback`, `PendingResponse`
//! - `writer`: Flow-controlled `RequestWriter`
//! - `keepalive`: Idle tick counting for no-op probes
//! - `state`: `ConnectionState` and its atomic cell
//! - `stats`: `ConnectionStats`
//! - `coordinator`: `ConnectionCoordinator` trait
//! - `pipelined`, `blocking`: the two connection types

pub mod blocking;
pub mod buffer;
pub mod callback;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod keepalive;
pub mod pipelined;
pub mod state;
pub mod stats;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_server;

// Re-export commonly used types
pub use blocking::BlockingConnection;
pub use buffer::{CommandBuffer, MissingLink};
pub use callback::{PendingResponse, RequestCallback, ResponseResult};
pub use config::{Authentication, ConnectionConfig, MemcachedHost};
pub use coordinator::{ConnectionCoordinator, NoopCoordinator};
pub use error::ConnectionError;
pub use pipelined::PipelinedConnection;
pub use state::ConnectionState;
pub use stats::{ConnectionStats, StatsSnapshot};
pub use writer::{NonBlockingWrite, RequestWriter};
