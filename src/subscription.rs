//! Subscription records and acknowledgement modes.

use std::fmt;
use std::str::FromStr;

use crate::error::StompError;
use crate::protocol::Version;

/// How deliveries on a subscription are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The server assumes delivery; no ACK frames are exchanged.
    Auto,
    /// Cumulative acknowledgement up to the acked message.
    Client,
    /// Per-message acknowledgement (1.1+).
    ClientIndividual,
}

impl AckMode {
    /// Wire representation of the `ack` header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// True when this mode may appear on a SUBSCRIBE of the given version.
    /// `client-individual` only exists from 1.1.
    pub fn valid_for(&self, version: Version) -> bool {
        match self {
            AckMode::Auto | AckMode::Client => true,
            AckMode::ClientIndividual => version >= Version::V1_1,
        }
    }

    /// True when deliveries need an explicit ACK/NACK.
    #[inline]
    pub fn needs_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::Auto
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::protocol(format!("Invalid ack value: {other}"))),
        }
    }
}

/// Declared interest in a destination. One record per destination per
/// engine; created by SUBSCRIBE, destroyed by UNSUBSCRIBE or session
/// termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Client-scoped subscription id.
    pub id: String,
    /// Acknowledgement mode for deliveries on this subscription.
    pub ack: AckMode,
}

impl Subscription {
    /// Create a subscription record.
    pub fn new(id: impl Into<String>, ack: AckMode) -> Self {
        Self { id: id.into(), ack }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_mode_parse() {
        assert_eq!("auto".parse::<AckMode>().unwrap(), AckMode::Auto);
        assert_eq!("client".parse::<AckMode>().unwrap(), AckMode::Client);
        assert_eq!(
            "client-individual".parse::<AckMode>().unwrap(),
            AckMode::ClientIndividual
        );
        assert!("cumulative".parse::<AckMode>().is_err());
    }

    #[test]
    fn test_ack_mode_validity_per_version() {
        assert!(AckMode::Client.valid_for(Version::V1_0));
        assert!(!AckMode::ClientIndividual.valid_for(Version::V1_0));
        assert!(AckMode::ClientIndividual.valid_for(Version::V1_1));
        assert!(AckMode::ClientIndividual.valid_for(Version::V1_2));
    }

    #[test]
    fn test_needs_ack() {
        assert!(!AckMode::Auto.needs_ack());
        assert!(AckMode::Client.needs_ack());
        assert!(AckMode::ClientIndividual.needs_ack());
    }
}
