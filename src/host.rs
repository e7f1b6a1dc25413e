//! Interfaces the engines require from their embedder.
//!
//! An engine never opens sockets and never decides policy: the embedding
//! connection supplies a byte sink plus lifecycle hooks as a capability
//! object at construction time. Hooks are invoked synchronously, in wire
//! order, and run to completion before the engine touches the next frame.

use bytes::Bytes;

use crate::codec::Payload;
use crate::error::StompError;
use crate::protocol::Frame;
use crate::subscription::AckMode;

/// Reply from [`ServerHost::on_connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Login {
    /// Refuse the session; the client gets `ERROR` with "Invalid login".
    Reject,
    /// Accept; the generated session id is echoed in CONNECTED.
    Accept,
    /// Accept and override the `session` header value.
    Session(String),
}

/// Callbacks supplied by a client-side embedder.
pub trait ClientHost {
    /// Write bytes to the transport. Synchronous and infallible; called for
    /// every serialized frame and heart-beat.
    fn send_bytes(&self, bytes: &[u8]);

    /// CONNECTED arrived and the session is established. Negotiated values
    /// are readable from the engine.
    fn on_connected(&self, frame: &Frame);

    /// A MESSAGE was delivered on a known subscription. `ack_id` is present
    /// when the subscription's ack mode needs an explicit ACK/NACK.
    fn on_message(&self, frame: &Frame, destination: &str, ack_id: Option<&str>, payload: Payload);

    /// A RECEIPT matched a frame previously sent with a `receipt` header.
    fn on_receipt(&self, receipt_id: &str, frame: &Frame);

    /// An ERROR frame: either sent by the server, or synthesized by the
    /// engine from an internal failure (the `message` header carries the
    /// description, the body the details, `receipt-id` the correlation).
    fn on_error(&self, frame: &Frame);
}

/// Callbacks supplied by a server-side embedder (the broker).
pub trait ServerHost {
    /// Write bytes to the transport. Synchronous and infallible.
    fn send_bytes(&self, bytes: &[u8]);

    /// CONNECT/STOMP passed protocol validation. The return value decides
    /// whether CONNECTED is sent and what its `session` header carries.
    fn on_connect(
        &self,
        frame: &Frame,
        login: Option<&str>,
        passcode: Option<&str>,
        host: Option<&str>,
        session_id: &str,
    ) -> Login;

    /// SEND arrived. `content_type` falls back to `text/plain`.
    fn on_message(&self, frame: &Frame, destination: &str, body: &Bytes, content_type: &str);

    /// SUBSCRIBE was recorded.
    fn on_subscribe(&self, frame: &Frame, id: &str, destination: &str, ack: AckMode);

    /// UNSUBSCRIBE removed a record.
    fn on_unsubscribe(&self, frame: &Frame, id: &str, destination: &str);

    /// ACK arrived; `ack_id` is resolved through the ack correspondence for
    /// pre-1.2 versions.
    fn on_ack(&self, frame: &Frame, ack_id: Option<&str>);

    /// NACK arrived (1.1+).
    fn on_nack(&self, frame: &Frame, ack_id: Option<&str>);

    /// An error was raised while handling `frame` (or outside any frame).
    /// The ERROR reply, if one applies, was already emitted.
    fn on_error(&self, frame: Option<&Frame>, error: &StompError);

    /// The session is going away; `reason` is `"client request"` for a
    /// DISCONNECT frame.
    fn on_disconnect(&self, frame: Option<&Frame>, reason: &str);
}

/// Session/message identity provider, injectable so tests are
/// deterministic.
pub trait SessionIds {
    /// Produce a fresh globally-unique id.
    fn next_id(&self) -> String;
}

/// Default [`SessionIds`] backed by random UUIDs.
pub struct UuidSessionIds;

impl SessionIds for UuidSessionIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = UuidSessionIds;
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
