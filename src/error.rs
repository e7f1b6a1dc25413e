//! Error types for stompwire.

use thiserror::Error;

use crate::protocol::Frame;

/// Coarse classification used by the engines to pick an emission strategy.
///
/// `Protocol` and `Application` errors are reported to the peer as ERROR
/// frames echoing the offending frame; everything else is `Internal` and
/// produces a generic ERROR frame on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Violation of the STOMP protocol itself.
    Protocol,
    /// Violation of a rule imposed by the engine's bookkeeping.
    Application,
    /// Any other failure raised inside the engine.
    Internal,
}

/// Main error type for all stompwire operations.
#[derive(Debug, Error)]
pub enum StompError {
    /// STOMP violation (missing required header, unknown command, duplicate
    /// CONNECT, invalid ack value, incompatible version).
    ///
    /// `headers` are surfaced on the ERROR reply (e.g. `version` on an
    /// incompatible negotiation).
    #[error("{message}")]
    Protocol {
        /// Human-readable violation description.
        message: String,
        /// The frame that triggered the violation, when there is one.
        frame: Option<Frame>,
        /// Extra headers to attach to the ERROR reply.
        headers: Vec<(String, String)>,
    },

    /// A rule imposed by the embedding application (unknown subscription,
    /// duplicate ack id, unknown transaction, unknown receipt).
    #[error("{message}")]
    Application {
        /// Human-readable violation description.
        message: String,
        /// The frame that triggered the violation, when there is one.
        frame: Option<Frame>,
    },

    /// JSON body encode/decode error (only with the `auto_json` option).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected internal failure.
    #[error("{0}")]
    Internal(String),
}

impl StompError {
    /// Protocol violation without an offending frame.
    pub fn protocol(message: impl Into<String>) -> Self {
        StompError::Protocol {
            message: message.into(),
            frame: None,
            headers: Vec::new(),
        }
    }

    /// Protocol violation carrying the offending frame.
    pub fn protocol_for(message: impl Into<String>, frame: &Frame) -> Self {
        StompError::Protocol {
            message: message.into(),
            frame: Some(frame.clone()),
            headers: Vec::new(),
        }
    }

    /// Protocol violation with extra headers for the ERROR reply.
    pub fn protocol_with_headers(
        message: impl Into<String>,
        frame: Option<&Frame>,
        headers: Vec<(String, String)>,
    ) -> Self {
        StompError::Protocol {
            message: message.into(),
            frame: frame.cloned(),
            headers,
        }
    }

    /// Application violation without an offending frame.
    pub fn application(message: impl Into<String>) -> Self {
        StompError::Application {
            message: message.into(),
            frame: None,
        }
    }

    /// Application violation carrying the offending frame.
    pub fn application_for(message: impl Into<String>, frame: &Frame) -> Self {
        StompError::Application {
            message: message.into(),
            frame: Some(frame.clone()),
        }
    }

    /// Classify this error for emission purposes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StompError::Protocol { .. } => ErrorKind::Protocol,
            StompError::Application { .. } => ErrorKind::Application,
            _ => ErrorKind::Internal,
        }
    }

    /// The frame that triggered this error, if any was recorded.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            StompError::Protocol { frame, .. } => frame.as_ref(),
            StompError::Application { frame, .. } => frame.as_ref(),
            _ => None,
        }
    }

    /// Extra headers to surface on an ERROR reply.
    pub fn extra_headers(&self) -> &[(String, String)] {
        match self {
            StompError::Protocol { headers, .. } => headers,
            _ => &[],
        }
    }
}

/// Result type alias using StompError.
pub type Result<T> = std::result::Result<T, StompError>;
