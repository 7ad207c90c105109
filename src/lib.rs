//! # memlink - A Pipelined Memcached Connection Layer
//!
//! memlink owns a single TCP connection to a memcached server. It transports
//! already-encoded commands, parses the streaming text-plus-binary response
//! protocol incrementally, and hands every response back to the caller that
//! issued the matching request.
//!
//! ## Features
//!
//! - **Pipelining**: any number of concurrent `send()` calls share one socket
//! - **Resumable Parsing**: responses may arrive split at any byte
//! - **Flow Control**: a fixed-size writer sized to the socket send buffer
//! - **Keepalive**: idle connections are probed with the meta no-op `mn`
//! - **Failure Reporting**: a coordinator hears about every unexpected drop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              memlink                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────────────┐    ┌─────────────────────┐  │
//! │  │  Command    │───>│  PipelinedConnection │───>│   RequestWriter     │  │
//! │  │ (construct) │    │  / BlockingConnection│    │   (send buffer)     │  │
//! │  └─────────────┘    └──────────┬──────────┘    └──────────┬──────────┘  │
//! │                                │                          │ TCP         │
//! │                                ▼                          ▼             │
//! │                     ┌─────────────────────┐    ┌─────────────────────┐  │
//! │                     │  RequestCallback    │<───│   ResponseReader    │  │
//! │                     │  (oneshot handoff)  │    │   (state machine)   │  │
//! │                     └─────────────────────┘    └─────────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  ExpiringMap + ExpirySweeper (blocking mode callback expiry)    │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use memlink::commands::RawCommand;
//! use memlink::connection::{ConnectionConfig, MemcachedHost, PipelinedConnection};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = MemcachedHost::new("cache-1", "127.0.0.1:11211".parse()?);
//!     let coordinator = Arc::new(|host: &MemcachedHost| eprintln!("lost {}", host));
//!
//!     let connection = PipelinedConnection::new(host, ConnectionConfig::default(), coordinator);
//!     connection.start().await?;
//!
//!     let response = connection
//!         .send(&RawCommand::new("set greeting 0 0 5\r\nhello\r\n"), Some(Duration::from_secs(1)))
//!         .await?;
//!     println!("{}", response);
//!
//!     connection.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Response types, header parser and the resumable reader
//! - [`commands`]: The `Command` seam and the few commands the connection issues itself
//! - [`connection`]: Pipelined and blocking connections and their parts
//! - [`expiring`]: Sharded map with per-entry expiry and its sweeper
//!
//! ## Design Highlights
//!
//! ### Order Is the Correlation
//!
//! Memcached answers pipelined requests in the order it received them, so the
//! pipelined connection matches each response to the oldest request in
//! flight. A response with nothing in flight tears the connection down.
//!
//! ### Single Owner
//!
//! Only the event-loop task touches the socket, the reader and the writer.
//! Callers share nothing with it but the request queue.

pub mod commands;
pub mod connection;
pub mod expiring;
pub mod protocol;

// Re-export commonly used types for convenience
pub use commands::{Command, KeyTranslator, RawCommand};
pub use connection::{
    BlockingConnection, ConnectionConfig, ConnectionCoordinator, ConnectionError, MemcachedHost,
    PipelinedConnection,
};
pub use protocol::{ParseError, Response, ResponseCode, ResponseReader};

/// The port memcached listens on by default
pub const DEFAULT_PORT: u16 = 11211;

/// The host the CLI connects to by default
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of memlink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
