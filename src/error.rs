//! Error types for the chat server.
//!
//! Only conditions the server cannot continue past surface as
//! [`ServerError`]. Failed accepts, disconnections and delivery failures
//! are handled in place and logged.

use crate::config::ConfigError;
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Fatal errors returned from the event loop or startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Readiness wait, registration or listener failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Connection registry could not grow
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Connection registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Doubling the backing storage failed. Not recoverable.
    #[error("failed to grow registry from {capacity} entries: {source}")]
    Grow {
        capacity: usize,
        source: TryReserveError,
    },
}

/// A reliable transfer that stopped before every byte was delivered.
///
/// `sent` is the exact number of bytes handed to the transport before
/// `source` was hit.
#[derive(Debug, Error)]
#[error("transfer stopped after {sent} bytes: {source}")]
pub struct SendError {
    pub sent: usize,
    pub source: io::Error,
}

impl SendError {
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// A payload refused because it would push a connection's pending output
/// past its bound.
#[derive(Debug, Error)]
#[error("outbound queue full: {pending} bytes pending, {refused} refused, limit {limit}")]
pub struct QueueFull {
    pub pending: usize,
    pub refused: usize,
    pub limit: usize,
}
