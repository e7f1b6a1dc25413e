//! Protocol module - commands, versions, frames and the incremental parser.
//!
//! This module implements the STOMP wire vocabulary:
//! - typed commands and protocol versions
//! - the in-memory [`Frame`] value and its serialization
//! - the incremental byte-stream [`Parser`]

mod command;
mod frame;
mod parser;
mod version;

pub use command::Command;
pub use frame::{Frame, CONTENT_LENGTH, CONTENT_TYPE, DEFAULT_CONTENT_TYPE};
pub use parser::Parser;
pub use version::{Version, SUPPORTED_VERSIONS};
