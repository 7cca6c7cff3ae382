//! Error handling for the notification engine
//!
//! This module defines all error types that can occur in the engine and
//! provides utilities for error handling and conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the notification engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Notification store errors (fetch, record, enqueue)
    #[error("Store error: {message}")]
    Store { message: String },

    /// Channel adapter delivery errors
    #[error("Delivery error on {channel}: {message}")]
    Delivery { channel: String, message: String },

    /// No adapter registered for the requested channel
    #[error("channel-not-implemented: {channel}")]
    ChannelNotImplemented { channel: String },

    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal engine errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Delivery { .. } => StatusCode::BAD_GATEWAY,
            EngineError::ChannelNotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            EngineError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
            EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Serialization { .. } => StatusCode::BAD_REQUEST,
            EngineError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Store { .. } => "STORE_ERROR",
            EngineError::Delivery { .. } => "DELIVERY_ERROR",
            EngineError::ChannelNotImplemented { .. } => "CHANNEL_NOT_IMPLEMENTED",
            EngineError::Config { .. } => "CONFIG_ERROR",
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::Serialization { .. } => "SERIALIZATION_ERROR",
            EngineError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is retryable on a later cycle
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store { .. } => true,
            EngineError::Delivery { .. } => true,
            EngineError::ChannelNotImplemented { .. } => false,
            EngineError::Config { .. } => false,
            EngineError::Validation { .. } => false,
            EngineError::Timeout { .. } => true,
            EngineError::Serialization { .. } => false,
            EngineError::Internal { .. } => true,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

// Conversion implementations for external error types

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Store {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for EngineError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        EngineError::Timeout {
            operation: err.to_string(),
        }
    }
}

impl From<prometheus::Error> for EngineError {
    fn from(err: prometheus::Error) -> Self {
        EngineError::Internal {
            message: err.to_string(),
        }
    }
}

// Utility functions for creating specific error types

impl EngineError {
    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery<S1: Into<String>, S2: Into<String>>(channel: S1, message: S2) -> Self {
        Self::Delivery {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a channel-not-implemented error
    pub fn channel_not_implemented<S: Into<String>>(channel: S) -> Self {
        Self::ChannelNotImplemented {
            channel: channel.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, message: S2) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
