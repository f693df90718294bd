// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printbridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::JobId;

/// Top-level error type for all Printbridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -- Authentication --
    #[error("station token not found")]
    StationNotFound,

    #[error("job store rejected credentials: {0}")]
    Authentication(String),

    // -- Remote job store --
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("job store rejected request: {0}")]
    StoreRejected(String),

    #[error("order status is locked for cancelled job {0}")]
    OrderStatusLocked(JobId),

    // -- Printing --
    #[error("print failed: {0}")]
    Print(String),

    #[error("print timed out after {}ms", .0.as_millis())]
    PrintTimeout(Duration),

    #[error("printer not found: {0}")]
    PrinterNotFound(String),

    #[error("could not list printers: {0}")]
    PrinterEnumeration(String),

    #[error("no printer configured")]
    NoPrinterConfigured,

    // -- Caller / local --
    #[error("station not connected")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How an error propagates through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Bad or unknown station token. Fatal to connect.
    Authentication,
    /// Network or service failure. Retried by the next poll/heartbeat cycle.
    StoreUnavailable,
    /// Delivery to the printer failed (timeouts included).
    Print,
    /// No printer could be resolved; nothing was dispatched.
    NoPrinter,
    /// Returned straight to the caller.
    Caller,
}

impl BridgeError {
    /// Classify this error for propagation decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StationNotFound | Self::Authentication(_) => ErrorClass::Authentication,
            Self::StoreUnavailable(_) | Self::StoreRejected(_) => ErrorClass::StoreUnavailable,
            Self::Print(_)
            | Self::PrintTimeout(_)
            | Self::PrinterNotFound(_)
            | Self::PrinterEnumeration(_) => ErrorClass::Print,
            Self::NoPrinterConfigured => ErrorClass::NoPrinter,
            Self::NotConnected
            | Self::OrderStatusLocked(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorClass::Caller,
        }
    }

    /// Whether a later cycle may succeed without any user action.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::StoreUnavailable
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_print_error() {
        let err = BridgeError::PrintTimeout(Duration::from_secs(10));
        assert_eq!(err.class(), ErrorClass::Print);
        assert_eq!(err.to_string(), "print timed out after 10000ms");
    }

    #[test]
    fn unknown_token_is_authentication() {
        assert_eq!(BridgeError::StationNotFound.class(), ErrorClass::Authentication);
        assert!(!BridgeError::StationNotFound.is_transient());
    }

    #[test]
    fn store_outage_is_transient() {
        let err = BridgeError::StoreUnavailable("connection refused".into());
        assert!(err.is_transient());
    }
}
