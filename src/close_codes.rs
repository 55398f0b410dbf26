//! Close codes reported when a room connection ends.
//!
//! Standard WebSocket codes (RFC 6455 §7.4) plus the application codes the
//! game server uses to reject a room connection during the handshake. On the
//! wire a close code is a bare integer, so [`CloseCode`] serializes as `u16`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A connection close code.
///
/// Unrecognized values are preserved in [`CloseCode::Other`] so that
/// `u16 -> CloseCode -> u16` is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum CloseCode {
    /// 1000: the connection completed its purpose.
    Normal,
    /// 1001: the peer is going away (server shutdown, page navigation).
    GoingAway,
    /// 1005: the close frame carried no status code.
    NoStatus,
    /// 1006: the connection dropped without a close frame.
    Abnormal,
    /// 1011: the server hit an unexpected condition.
    InternalError,
    /// 4001: the bearer credential was missing or rejected.
    Unauthorized,
    /// 4004: the room does not exist or the user is not a member of it.
    RoomUnavailable,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Returns the numeric code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::InternalError => 1011,
            Self::Unauthorized => 4001,
            Self::RoomUnavailable => 4004,
            Self::Other(code) => code,
        }
    }

    /// Returns `true` for the server's application-level rejection codes.
    ///
    /// These closes still go through the regular reconnection path; the flag
    /// only lets callers surface a clearer message.
    pub fn is_rejection(self) -> bool {
        matches!(self, Self::Unauthorized | Self::RoomUnavailable)
    }

    /// Returns a human-readable description of this close code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "The connection was closed normally.",
            Self::GoingAway => "The server is going away or restarting.",
            Self::NoStatus => "The connection was closed without a status code.",
            Self::Abnormal => {
                "The connection dropped unexpectedly. A reconnection will be attempted."
            }
            Self::InternalError => {
                "The server encountered an internal error and closed the connection."
            }
            Self::Unauthorized => {
                "The server rejected the credential. Sign in again to obtain a new token."
            }
            Self::RoomUnavailable => {
                "The room does not exist or you are not a member of it."
            }
            Self::Other(_) => "The connection was closed with an unrecognized code.",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1011 => Self::InternalError,
            4001 => Self::Unauthorized,
            4004 => Self::RoomUnavailable,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.description())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_both_ways() {
        for code in [1000u16, 1001, 1005, 1006, 1011, 4001, 4004] {
            let parsed = CloseCode::from(code);
            assert!(!matches!(parsed, CloseCode::Other(_)), "{code} should be known");
            assert_eq!(u16::from(parsed), code);
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let code = CloseCode::from(4321);
        assert_eq!(code, CloseCode::Other(4321));
        assert_eq!(code.as_u16(), 4321);
    }

    #[test]
    fn serializes_as_bare_integer() {
        assert_eq!(serde_json::to_string(&CloseCode::Abnormal).unwrap(), "1006");
        let parsed: CloseCode = serde_json::from_str("4004").unwrap();
        assert_eq!(parsed, CloseCode::RoomUnavailable);
    }

    #[test]
    fn rejection_codes() {
        assert!(CloseCode::Unauthorized.is_rejection());
        assert!(CloseCode::RoomUnavailable.is_rejection());
        assert!(!CloseCode::Abnormal.is_rejection());
    }

    #[test]
    fn display_includes_number() {
        let rendered = CloseCode::Unauthorized.to_string();
        assert!(rendered.starts_with("4001"));
    }
}
