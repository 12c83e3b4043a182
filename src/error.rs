//! Error types for the navigator.
//!
//! Codec and geometry failures are absorbed locally (best-effort results), so
//! only recalculation errors ever reach the user.

use std::io;
use thiserror::Error;

/// Why an encoded polyline could not be decoded in full.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolylineError {
    /// The string ended in the middle of a value or a lat/lon pair.
    #[error("polyline truncated at byte {offset}")]
    Truncated { offset: usize },

    /// A byte outside the `'?'..='~'` alphabet.
    #[error("invalid polyline character {byte:#04x} at byte {offset}")]
    InvalidCharacter { offset: usize, byte: u8 },

    /// Too many continuation groups for one value.
    #[error("polyline value overflows at byte {offset}")]
    Overflow { offset: usize },

    /// A decoded pair outside the latitude/longitude range.
    #[error("decoded coordinate #{index} out of range: ({latitude}, {longitude})")]
    OutOfRange {
        index: usize,
        latitude: f64,
        longitude: f64,
    },
}

/// Failure talking to the routing service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The request could not be sent or no response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// 4xx response.
    #[error("client error (HTTP {status})")]
    Client { status: u16 },

    /// 5xx response.
    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    /// The response body was not the expected JSON.
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Errors from a route recalculation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecalculationError {
    /// A precondition was not met; no request was sent.
    #[error("missing session context: {0}")]
    MissingSessionContext(&'static str),

    /// Network or backend failure. The previous route is kept.
    #[error("recalculation failed: {0}")]
    Transport(#[from] TransportError),

    /// The new route's polyline yields no usable path. The previous route is kept.
    #[error("recalculated route has an unusable polyline ({points} valid points)")]
    MalformedPolyline { points: usize },

    /// The result belongs to a session that has since been cleared or replaced.
    #[error("stale recalculation result (issued for session {issued}, current {current})")]
    StaleResult { issued: u64, current: u64 },
}

impl RecalculationError {
    /// Whether this error should be surfaced to the walker.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, RecalculationError::StaleResult { .. })
    }
}

/// Session persistence failure. Never fatal: the walk just cannot be resumed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("session store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_result_is_silent() {
        let stale = RecalculationError::StaleResult { issued: 1, current: 2 };
        assert!(!stale.is_user_visible());
        assert!(RecalculationError::MissingSessionContext("current location").is_user_visible());
        assert!(RecalculationError::from(TransportError::Server { status: 503 }).is_user_visible());
    }

    #[test]
    fn test_messages() {
        let err = PolylineError::InvalidCharacter { offset: 3, byte: b' ' };
        assert_eq!(err.to_string(), "invalid polyline character 0x20 at byte 3");
        let err = RecalculationError::from(TransportError::Client { status: 404 });
        assert_eq!(err.to_string(), "recalculation failed: client error (HTTP 404)");
    }
}
