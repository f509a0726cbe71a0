//! Unified error types for the connector
//!
//! Bootstrap, session and transport failures flow through [`ConnectorError`].
//! Errors raised by a device action keep their own typed shape
//! ([`crate::device_action::DeviceActionError`]) and are never reclassified.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device_action::DeviceActionError;

/// Main error type for connector operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectorError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ConnectorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, msg)
    }

    pub fn transport_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransportNotFound, msg)
    }

    pub fn discovery_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DiscoveryFailed, msg)
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, msg)
    }

    pub fn session_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SessionNotFound, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransportError, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectorError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Input errors
    InvalidInput,
    InvalidConfig,

    // Device management errors
    TransportNotFound,
    DiscoveryFailed,
    ConnectionFailed,
    SessionNotFound,
    TransportError,

    // Device action errors surfaced during bootstrap
    DeviceAction,

    // Network errors
    NetworkError,
    Timeout,

    // Parse errors
    JsonError,
    HexError,

    // Internal
    Internal,
}

/// Result type alias for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

// Conversions from common error types

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::new(ErrorCode::JsonError, e.to_string())
    }
}

impl From<hex::FromHexError> for ConnectorError {
    fn from(e: hex::FromHexError) -> Self {
        ConnectorError::new(ErrorCode::HexError, e.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ConnectorError::new(ErrorCode::Timeout, "Request timed out")
        } else if e.is_connect() {
            ConnectorError::new(ErrorCode::NetworkError, "Connection failed")
        } else {
            ConnectorError::new(ErrorCode::NetworkError, e.to_string())
        }
    }
}

impl From<url::ParseError> for ConnectorError {
    fn from(e: url::ParseError) -> Self {
        ConnectorError::new(ErrorCode::InvalidConfig, format!("Invalid URL: {}", e))
    }
}

impl From<DeviceActionError> for ConnectorError {
    fn from(e: DeviceActionError) -> Self {
        ConnectorError::new(ErrorCode::DeviceAction, e.to_string())
    }
}
