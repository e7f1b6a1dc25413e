//! # stompwire
//!
//! Transport-independent STOMP 1.0/1.1/1.2 frame engine.
//!
//! The crate provides two symmetrical endpoints - [`ClientEngine`] and
//! [`ServerEngine`] - that operate as pure frame machines: they consume an
//! opaque byte stream supplied by an embedding connection (WebSocket, TCP,
//! a test harness) and emit an opaque byte stream through the embedder's
//! sink. The engines never open sockets, never poll and never block;
//! heart-beat timers run on an injectable [`scheduler::Scheduler`].
//!
//! ## Architecture
//!
//! - **Wire layer** ([`protocol`]): frame values, commands, versions, and
//!   the incremental parser that reassembles frames across arbitrary byte
//!   boundaries
//! - **Engines** ([`client`], [`server`]): version negotiation, command
//!   dispatch, subscription/ack/transaction bookkeeping, receipt
//!   correlation, error emission
//! - **Embedder seams** ([`host`], [`scheduler`]): byte sink, lifecycle
//!   callbacks, timer capability
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//! use stompwire::client::{ClientEngine, ClientConfig, ConnectOptions};
//! use stompwire::codec::Payload;
//! use stompwire::host::ClientHost;
//! use stompwire::protocol::Frame;
//! use stompwire::scheduler::ManualScheduler;
//!
//! struct Stdout;
//! impl ClientHost for Stdout {
//!     fn send_bytes(&self, bytes: &[u8]) { /* write to the transport */ }
//!     fn on_connected(&self, frame: &Frame) {}
//!     fn on_message(&self, frame: &Frame, destination: &str,
//!                   ack_id: Option<&str>, payload: Payload) {}
//!     fn on_receipt(&self, receipt_id: &str, frame: &Frame) {}
//!     fn on_error(&self, frame: &Frame) {}
//! }
//!
//! let scheduler = ManualScheduler::new();
//! let mut client = ClientEngine::new(
//!     Rc::new(Stdout),
//!     Rc::new(scheduler.clone()),
//!     ClientConfig::default(),
//! );
//! client.connect(ConnectOptions::default()).unwrap();
//! // bytes from the transport go into client.feed(..)
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod heartbeat;
pub mod host;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod subscription;

pub use client::{ClientConfig, ClientEngine};
pub use error::{ErrorKind, Result, StompError};
pub use protocol::{Command, Frame, Parser, Version};
pub use server::{ServerConfig, ServerEngine};
pub use subscription::{AckMode, Subscription};
