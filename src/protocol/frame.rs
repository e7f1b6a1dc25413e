//! In-memory STOMP frame value and its wire serialization.
//!
//! A frame is a command token, a header map and an opaque body. Header
//! insertion order is irrelevant: serialization always emits headers in
//! ascending name order, and the parser keeps the first occurrence of a
//! duplicated name. Bodies are `bytes::Bytes` so queued and echoed frames
//! share their payload storage.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use super::command::Command;
use crate::error::{Result, StompError};

/// Header carrying the body byte count.
pub const CONTENT_LENGTH: &str = "content-length";
/// Header carrying the body MIME type.
pub const CONTENT_TYPE: &str = "content-type";
/// MIME type assumed when a non-empty body is emitted without one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// One STOMP protocol unit: command, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl Frame {
    /// Create an empty frame for a known command.
    pub fn new(command: Command) -> Self {
        Self::from_token(command.as_str())
    }

    /// Create an empty frame from a raw command token (used by the parser,
    /// which must represent commands the engines will later reject).
    pub fn from_token(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    /// The command token, as it appeared on the wire or was constructed.
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The body bytes (empty if absent).
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// True when the header is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Iterate headers in ascending name order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Store a header only if the name is not yet present (wire rule: on
    /// duplicate names the first value is retained).
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.entry(name.into()).or_insert_with(|| value.into());
    }

    /// Remove a header, returning its value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    /// Chained form of [`set_header`](Self::set_header).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Chained form of [`set_body`](Self::set_body).
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    /// Require a header to be present.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Missing '<name>' header")` carrying a clone of this
    /// frame when the header is absent.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.header(name)
            .ok_or_else(|| StompError::protocol_for(format!("Missing '{name}' header"), self))
    }

    /// Version-conditional form of [`require`](Self::require): the header is
    /// mandatory only when `applies` is true, but is returned whenever
    /// present.
    pub fn require_if(&self, name: &str, applies: bool) -> Result<Option<&str>> {
        match self.header(name) {
            Some(value) => Ok(Some(value)),
            None if applies => Err(StompError::protocol_for(
                format!("Missing '{name}' header"),
                self,
            )),
            None => Ok(None),
        }
    }

    /// Serialize to wire bytes: command, name-sorted headers, blank line,
    /// body, NUL, LF.
    ///
    /// A non-empty body gets an authoritative `content-length` (required
    /// whenever the body contains a NUL) and a `content-type` of
    /// `text/plain` unless one was set.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size_hint());
        self.write_without_terminator(&mut buf);
        buf.put_u8(0);
        buf.put_u8(b'\n');
        buf.freeze()
    }

    /// Serialization without the trailing NUL/LF pair, as embedded in the
    /// body of server ERROR frames.
    pub fn serialize_without_terminator(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size_hint());
        self.write_without_terminator(&mut buf);
        buf.freeze()
    }

    fn write_without_terminator(&self, buf: &mut BytesMut) {
        buf.put_slice(self.command.as_bytes());
        buf.put_u8(b'\n');

        let content_length;
        let mut extra: Vec<(&str, &str)> = Vec::new();
        if !self.body.is_empty() {
            if !self.has_header(CONTENT_LENGTH) {
                content_length = self.body.len().to_string();
                extra.push((CONTENT_LENGTH, &content_length));
            }
            if !self.has_header(CONTENT_TYPE) {
                extra.push((CONTENT_TYPE, DEFAULT_CONTENT_TYPE));
            }
        }

        // Merge the auto headers into the sorted stream. `extra` is built in
        // ascending order (content-length < content-type).
        let mut extra = extra.into_iter().peekable();
        for (name, value) in &self.headers {
            while let Some(&(auto_name, auto_value)) = extra.peek() {
                if auto_name < name.as_str() {
                    put_header(buf, auto_name, auto_value);
                    extra.next();
                } else {
                    break;
                }
            }
            put_header(buf, name, value);
        }
        for (auto_name, auto_value) in extra {
            put_header(buf, auto_name, auto_value);
        }

        buf.put_u8(b'\n');
        buf.put_slice(&self.body);
    }

    fn wire_size_hint(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum();
        self.command.len() + headers + self.body.len() + 48
    }
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_u8(b':');
    buf.put_slice(value.as_bytes());
    buf.put_u8(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_empty_body() {
        let frame = Frame::new(Command::Connect)
            .with_header("accept-version", "1.0,1.1,1.2")
            .with_header("host", "stomp");
        assert_eq!(
            frame.serialize(),
            &b"CONNECT\naccept-version:1.0,1.1,1.2\nhost:stomp\n\n\x00\n"[..]
        );
    }

    #[test]
    fn test_serialize_headers_name_sorted() {
        let frame = Frame::new(Command::Subscribe)
            .with_header("id", "1")
            .with_header("destination", "/queue/a")
            .with_header("ack", "client");
        assert_eq!(
            frame.serialize(),
            &b"SUBSCRIBE\nack:client\ndestination:/queue/a\nid:1\n\n\x00\n"[..]
        );
    }

    #[test]
    fn test_serialize_nonempty_body_gets_length_and_type() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/q")
            .with_body(&b"hi"[..]);
        assert_eq!(
            frame.serialize(),
            &b"SEND\ncontent-length:2\ncontent-type:text/plain\ndestination:/q\n\nhi\x00\n"[..]
        );
    }

    #[test]
    fn test_serialize_keeps_explicit_content_type() {
        let frame = Frame::new(Command::Send)
            .with_header("content-type", "application/json")
            .with_body(&b"{}"[..]);
        assert_eq!(
            frame.serialize(),
            &b"SEND\ncontent-length:2\ncontent-type:application/json\n\n{}\x00\n"[..]
        );
    }

    #[test]
    fn test_serialize_binary_body_with_nul() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/q")
            .with_body(&b"a\x00b"[..]);
        let wire = frame.serialize();
        assert!(wire.starts_with(b"SEND\ncontent-length:3\n"));
        assert!(wire.ends_with(b"\na\x00b\x00\n"));
    }

    #[test]
    fn test_serialize_auto_headers_sort_with_user_headers() {
        // "a" sorts before content-length, "zebra" after content-type.
        let frame = Frame::new(Command::Send)
            .with_header("a", "1")
            .with_header("zebra", "2")
            .with_body(&b"x"[..]);
        assert_eq!(
            frame.serialize(),
            &b"SEND\na:1\ncontent-length:1\ncontent-type:text/plain\nzebra:2\n\nx\x00\n"[..]
        );
    }

    #[test]
    fn test_serialize_without_terminator() {
        let frame = Frame::new(Command::Connect).with_header("accept-version", "1.2");
        assert_eq!(
            frame.serialize_without_terminator(),
            &b"CONNECT\naccept-version:1.2\n\n"[..]
        );
    }

    #[test]
    fn test_add_header_first_wins() {
        let mut frame = Frame::new(Command::Send);
        frame.add_header("destination", "/first");
        frame.add_header("destination", "/second");
        assert_eq!(frame.header("destination"), Some("/first"));
    }

    #[test]
    fn test_require_present_and_missing() {
        let frame = Frame::new(Command::Send).with_header("destination", "/q");
        assert_eq!(frame.require("destination").unwrap(), "/q");

        let err = frame.require("transaction").unwrap_err();
        assert_eq!(err.to_string(), "Missing 'transaction' header");
        assert_eq!(err.frame().unwrap().command(), "SEND");
    }

    #[test]
    fn test_require_if() {
        let frame = Frame::new(Command::Message).with_header("subscription", "1");
        assert_eq!(
            frame.require_if("subscription", false).unwrap(),
            Some("1")
        );
        assert_eq!(frame.require_if("ack", false).unwrap(), None);
        assert!(frame.require_if("ack", true).is_err());
    }

    #[test]
    fn test_remove_header() {
        let mut frame = Frame::new(Command::Message).with_header("ack", "9");
        assert_eq!(frame.remove_header("ack"), Some("9".to_string()));
        assert!(!frame.has_header("ack"));
    }
}
