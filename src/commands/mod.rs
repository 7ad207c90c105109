//! Command Module
//!
//! This module is where outgoing requests meet the connection layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Command impl   │  (outside this crate: get/set/delete encoders)
//! └────────┬────────┘
//!          │ construct(translator)
//!          ▼
//! ┌─────────────────┐
//! │  CommandBuffer  │  (connection module: sequence + wire bytes)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  RequestWriter  │
//! └─────────────────┘
//! ```
//!
//! The connection only ever calls [`Command::construct`]. It never looks at
//! what the bytes mean.

pub mod command;

pub use command::{
    AuthenticationCommand, Command, CommandError, DefaultKeyTranslator, KeyTranslator,
    NoopCommand, RawCommand, MAX_KEY_LENGTH,
};
