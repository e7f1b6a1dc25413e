//! STOMP protocol versions.

use std::fmt;
use std::str::FromStr;

use crate::error::StompError;

/// Every protocol version the engines speak, oldest first.
///
/// The derived ordering is the negotiation ordering: the server picks the
/// highest variant present in the client's `accept-version` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// STOMP 1.0.
    V1_0,
    /// STOMP 1.1.
    V1_1,
    /// STOMP 1.2.
    V1_2,
}

/// All supported versions, negotiation order.
pub const SUPPORTED_VERSIONS: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];

impl Version {
    /// Wire representation, e.g. `"1.2"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Comma-joined list of every supported version, as used in
    /// `accept-version` and in the `version` header of a failed negotiation.
    pub fn supported_list() -> &'static str {
        "1.0,1.1,1.2"
    }

    /// Pick the highest supported version present in an `accept-version`
    /// header value. `None` when there is no overlap.
    pub fn negotiate(accept_version: &str) -> Option<Version> {
        let mut best = None;
        for token in accept_version.split(',') {
            if let Ok(v) = token.trim().parse::<Version>() {
                if best.map_or(true, |b| v > b) {
                    best = Some(v);
                }
            }
        }
        best
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::V1_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(Version::V1_0),
            "1.1" => Ok(Version::V1_1),
            "1.2" => Ok(Version::V1_2),
            other => Err(StompError::protocol(format!(
                "Unsupported version: {other}"
            ))),
        }
    }
}
