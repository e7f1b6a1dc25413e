//! Incremental byte-stream framer.
//!
//! A single `BytesMut` buffer accumulates whatever the transport hands over;
//! `feed` drains as many complete frames as the buffer allows into an
//! internal queue and `next` dequeues them. The parser is a two-state
//! machine per in-progress frame:
//!
//! - `AwaitingHeaders`: need the command line, header lines and the blank
//!   line that terminates them
//! - `AwaitingBody`: headers parsed, waiting for the NUL-terminated body
//!   (bounded by `content-length` when that header was present)
//!
//! Heartbeat bytes (`\n`, `\r\n`, `\r`) between frames are consumed and
//! discarded. Frames split at arbitrary byte boundaries reassemble
//! transparently.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

use super::frame::{Frame, CONTENT_LENGTH};
use crate::error::{Result, StompError};

/// Parsing state for the frame currently being assembled.
enum State {
    /// Waiting for the complete command + header block.
    AwaitingHeaders,
    /// Header block parsed, waiting for the body and its NUL terminator.
    AwaitingBody {
        frame: Frame,
        content_length: Option<usize>,
    },
}

/// Incremental parser turning an opaque byte stream into STOMP frames.
pub struct Parser {
    buffer: BytesMut,
    state: State,
    ready: VecDeque<Frame>,
}

impl Parser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::AwaitingHeaders,
            ready: VecDeque::new(),
        }
    }

    /// Append bytes and drain as many complete frames as possible into the
    /// ready queue.
    ///
    /// # Errors
    ///
    /// `ProtocolError` on a malformed header block or a missing NUL
    /// terminator. The buffer and state are reset afterwards, so one
    /// poisoned stream reports a single error; frames completed before the
    /// error remain queued.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);

        loop {
            match self.try_extract_one() {
                Ok(Some(frame)) => self.ready.push_back(frame),
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    /// Dequeue the next complete frame.
    pub fn next(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Number of bytes buffered but not yet framed.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Discard buffered bytes and any in-progress frame. Queued complete
    /// frames are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::AwaitingHeaders;
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::AwaitingHeaders => {
                self.strip_heartbeats();
                match self.parse_header_block()? {
                    None => Ok(None),
                    Some((frame, content_length)) => {
                        self.state = State::AwaitingBody {
                            frame,
                            content_length,
                        };
                        self.try_extract_one()
                    }
                }
            }

            State::AwaitingBody { content_length, .. } => {
                let body_end = match *content_length {
                    Some(len) => {
                        // The NUL terminator sits right after the declared
                        // body, so the buffer must hold one byte more.
                        if self.buffer.len() <= len {
                            return Ok(None);
                        }
                        if self.buffer[len] != 0 {
                            return Err(StompError::protocol(
                                "Invalid frame (missing null terminator)",
                            ));
                        }
                        len
                    }
                    None => match self.buffer.iter().position(|&b| b == 0) {
                        Some(pos) => pos,
                        None => return Ok(None),
                    },
                };

                let body = self.buffer.split_to(body_end).freeze();
                self.buffer.advance(1); // NUL

                let mut state = State::AwaitingHeaders;
                std::mem::swap(&mut self.state, &mut state);
                let State::AwaitingBody { mut frame, .. } = state else {
                    unreachable!("checked above");
                };
                if !body.is_empty() {
                    frame.set_body(body);
                }
                Ok(Some(frame))
            }
        }
    }

    /// Consume heartbeat bytes at the buffer start. Only called between
    /// frames; the trailing LF of the previous frame is swallowed here too.
    fn strip_heartbeats(&mut self) {
        let skip = self
            .buffer
            .iter()
            .take_while(|&&b| b == b'\n' || b == b'\r')
            .count();
        if skip > 0 {
            self.buffer.advance(skip);
        }
    }

    /// Try to match the command + header block at the buffer start.
    ///
    /// Returns the frame-in-progress and its declared `content-length` when
    /// the block is complete, `None` when more bytes are needed. A block
    /// that cannot match once a NUL is already in the buffer is malformed.
    fn parse_header_block(&mut self) -> Result<Option<(Frame, Option<usize>)>> {
        let Some(block_len) = self.match_block()? else {
            return Ok(None);
        };

        let block = self.buffer.split_to(block_len);
        // `match_block` validated UTF-8-compatible ASCII structure; header
        // names and values are tokenized again here on the owned block.
        let text = String::from_utf8_lossy(&block);
        let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command = lines
            .next()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let mut frame = Frame::from_token(command);

        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').unwrap_or((line, ""));
            frame.add_header(name.trim(), value.trim());
        }

        let content_length = match frame.header(CONTENT_LENGTH) {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                StompError::protocol_for("Invalid 'content-length' header", &frame)
            })?),
            None => None,
        };

        Ok(Some((frame, content_length)))
    }

    /// Locate and structurally validate the header block. Returns its byte
    /// length (including the blank line) without consuming anything.
    fn match_block(&self) -> Result<Option<usize>> {
        let buf = &self.buffer[..];
        let mut pos = 0;
        let mut saw_command = false;

        loop {
            let Some(rel) = buf[pos..].iter().position(|&b| b == b'\n') else {
                // Header block still incomplete. If the frame terminator is
                // already in the buffer the block can never match.
                return if buf.iter().any(|&b| b == 0) {
                    Err(StompError::protocol("Invalid frame (malformed headers)"))
                } else {
                    Ok(None)
                };
            };
            let line_end = pos + rel;
            let mut line = &buf[pos..line_end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if !saw_command {
                let token: &[u8] = trim_ascii(line);
                if token.is_empty() || token.contains(&0) {
                    return self.malformed(buf);
                }
                saw_command = true;
            } else if line.is_empty() {
                return Ok(Some(line_end + 1));
            } else if !line.contains(&b':') || line.contains(&0) {
                return self.malformed(buf);
            }

            pos = line_end + 1;
        }
    }

    fn malformed(&self, buf: &[u8]) -> Result<Option<usize>> {
        if buf.iter().any(|&b| b == 0) {
            Err(StompError::protocol("Invalid frame (malformed headers)"))
        } else {
            Ok(None)
        }
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
