// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types.
//!
//! None of these ever reach a producer: transform errors are swallowed by the
//! ingest gate, dispatch errors are absorbed by the flusher's retry policy.

/// A domain event could not be turned into a queue item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid event: {0}")]
    Invalid(String),
}

/// A batch could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Worth trying again on a later flush cycle.
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    /// The backend refused the batch; retrying would not help.
    #[error("permanent dispatch failure: {0}")]
    Permanent(String),
}

impl DispatchError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a listener is already registered for event type {0}")]
    DuplicateListener(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
