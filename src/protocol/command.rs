//! STOMP commands as an exhaustive tagged enum.
//!
//! Frames on the wire carry their command as a free-form token; the engines
//! decode it into [`Command`] before dispatch, which makes unknown commands
//! an explicit edge instead of a failed name lookup.

use std::fmt;

/// Every command either endpoint can legally exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client -> server.
    /// Open a session.
    Connect,
    /// Alias of CONNECT introduced in 1.1.
    Stomp,
    /// Publish a message to a destination.
    Send,
    /// Register interest in a destination.
    Subscribe,
    /// Drop a subscription.
    Unsubscribe,
    /// Acknowledge a delivered message.
    Ack,
    /// Negative-acknowledge a delivered message (1.1+).
    Nack,
    /// Open a transaction.
    Begin,
    /// Replay a transaction's buffered frames.
    Commit,
    /// Discard a transaction's buffered frames.
    Abort,
    /// Close the session.
    Disconnect,

    // Server -> client.
    /// Successful session negotiation.
    Connected,
    /// Message delivery.
    Message,
    /// Acknowledgement of a frame that carried `receipt`.
    Receipt,
    /// Protocol or application failure report.
    Error,
}

impl Command {
    /// Wire token, uppercase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Case-insensitive decode of a wire token. `None` for unknown commands;
    /// the caller decides how to fail.
    pub fn parse(token: &str) -> Option<Command> {
        match token.to_ascii_lowercase().as_str() {
            "connect" => Some(Command::Connect),
            "stomp" => Some(Command::Stomp),
            "send" => Some(Command::Send),
            "subscribe" => Some(Command::Subscribe),
            "unsubscribe" => Some(Command::Unsubscribe),
            "ack" => Some(Command::Ack),
            "nack" => Some(Command::Nack),
            "begin" => Some(Command::Begin),
            "commit" => Some(Command::Commit),
            "abort" => Some(Command::Abort),
            "disconnect" => Some(Command::Disconnect),
            "connected" => Some(Command::Connected),
            "message" => Some(Command::Message),
            "receipt" => Some(Command::Receipt),
            "error" => Some(Command::Error),
            _ => None,
        }
    }

    /// True for CONNECT and its STOMP alias.
    #[inline]
    pub fn is_connect(&self) -> bool {
        matches!(self, Command::Connect | Command::Stomp)
    }

    /// True for the commands allowed to carry a `transaction` header.
    #[inline]
    pub fn allows_transaction(&self) -> bool {
        matches!(
            self,
            Command::Send
                | Command::Ack
                | Command::Nack
                | Command::Begin
                | Command::Commit
                | Command::Abort
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Command; 15] = [
        Command::Connect,
        Command::Stomp,
        Command::Send,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Ack,
        Command::Nack,
        Command::Begin,
        Command::Commit,
        Command::Abort,
        Command::Disconnect,
        Command::Connected,
        Command::Message,
        Command::Receipt,
        Command::Error,
    ];

    #[test]
    fn test_parse_roundtrip() {
        for cmd in ALL {
            assert_eq!(Command::parse(cmd.as_str()), Some(cmd));
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Command::parse("connect"), Some(Command::Connect));
        assert_eq!(Command::parse("Send"), Some(Command::Send));
        assert_eq!(Command::parse("mEsSaGe"), Some(Command::Message));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(Command::parse("PUBLISH"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_is_connect() {
        assert!(Command::Connect.is_connect());
        assert!(Command::Stomp.is_connect());
        assert!(!Command::Send.is_connect());
    }

    #[test]
    fn test_allows_transaction() {
        assert!(Command::Send.allows_transaction());
        assert!(Command::Commit.allows_transaction());
        assert!(!Command::Subscribe.allows_transaction());
        assert!(!Command::Disconnect.allows_transaction());
    }
}
