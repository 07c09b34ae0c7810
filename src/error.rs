//! Unified error handling for all starmesh components.
//!
//! Every fallible component returns [`DfsResult`]; [`NodeError`] classifies
//! failures into the taxonomy used for logging, retry, and CLI reporting.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for starmesh node operations.
#[derive(Error, Debug)]
pub enum NodeError {
    // Transport: broken connections, refused dials, short reads/writes.
    #[error("I/O error: {source} (path: {path:?})")]
    Io {
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("connection to peer {addr} failed: {reason}")]
    Connect { addr: SocketAddr, reason: String },

    #[error("connection to {addr} broken: received {got} of {expected} expected bytes")]
    ShortRead {
        addr: SocketAddr,
        got: usize,
        expected: usize,
    },

    #[error("transport error: {message}")]
    Transport { message: String },

    // Protocol: malformed frame or unknown message kind.
    #[error("frame length {len} exceeds configured maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("failed to decode message payload: {0}")]
    Decode(String),

    #[error("failed to encode message payload: {0}")]
    Encode(String),

    #[error("unknown or unsupported message kind")]
    UnknownMessageKind,

    // Authorization: wrong shared password at CONNECT_REQUEST.
    #[error("authorization denied: incorrect connection password")]
    Authorization,

    // Precondition: referenced file or peer does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("peer not found: {host}:{port}")]
    PeerNotFound { host: String, port: u16 },

    // Integrity: checksum mismatch that survived the retry budget.
    #[error("checksum mismatch for {path} after {attempts} attempt(s)")]
    ChecksumMismatch { path: String, attempts: u32 },

    // Store: metadata persistence failures.
    #[error("metadata store error: {0}")]
    Store(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // Configuration: invalid or incomplete startup configuration.
    #[error("configuration error: {field} - {message}")]
    Configuration { field: String, message: String },

    #[error("missing required configuration: {field}")]
    MissingConfiguration { field: String },

    // Catch-all for contextualized internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the crate.
pub type DfsResult<T> = Result<T, NodeError>;

/// Attach ad-hoc context to a fallible expression, turning it into a
/// [`NodeError::Internal`] while preserving the original message.
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> DfsResult<T>
    where
        F: FnOnce() -> String;

    fn context(self, msg: &str) -> DfsResult<T>;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for Result<T, E> {
    fn with_context<F>(self, f: F) -> DfsResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| NodeError::Internal(format!("{}: {}", f(), e)))
    }

    fn context(self, msg: &str) -> DfsResult<T> {
        self.map_err(|e| NodeError::Internal(format!("{}: {}", msg, e)))
    }
}

/// Broad grouping of [`NodeError`] variants, matching the taxonomy in the
/// error handling design: transport, protocol, authorization, precondition,
/// integrity, store, configuration, internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Authorization,
    Precondition,
    Integrity,
    Store,
    Configuration,
    Internal,
}

impl NodeError {
    /// Classify this error for logging and dispatch decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NodeError::Io { .. } | NodeError::Connect { .. } | NodeError::ShortRead { .. } => {
                ErrorCategory::Transport
            }
            NodeError::Transport { .. } => ErrorCategory::Transport,

            NodeError::FrameTooLarge { .. }
            | NodeError::Decode(_)
            | NodeError::Encode(_)
            | NodeError::UnknownMessageKind => ErrorCategory::Protocol,

            NodeError::Authorization => ErrorCategory::Authorization,

            NodeError::FileNotFound { .. } | NodeError::PeerNotFound { .. } => {
                ErrorCategory::Precondition
            }

            NodeError::ChecksumMismatch { .. } => ErrorCategory::Integrity,

            NodeError::Store(_) | NodeError::Sqlite(_) => ErrorCategory::Store,

            NodeError::Configuration { .. } | NodeError::MissingConfiguration { .. } => {
                ErrorCategory::Configuration
            }

            NodeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// True only for errors that `downloadFile`'s bounded retry loop should
    /// retry on. No other RPC in the system retries automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Integrity
        )
    }

    /// Render a short message suitable for the CLI.
    pub fn user_message(&self) -> String {
        match self {
            NodeError::Connect { addr, .. } => format!("could not reach peer at {addr}"),
            NodeError::Authorization => {
                "connection refused: incorrect password".to_string()
            }
            NodeError::FileNotFound { path } => format!("no such file: {path}"),
            NodeError::ChecksumMismatch { path, attempts } => {
                format!("could not verify {path} after {attempts} attempt(s)")
            }
            _ => self.to_string(),
        }
    }
}

/// Convenience macros mirroring common `anyhow`-style ergonomics while
/// keeping the concrete [`NodeError`] type at every call site.
#[macro_export]
macro_rules! node_error {
    ($variant:ident { $($field:ident: $value:expr),* $(,)? }) => {
        $crate::error::NodeError::$variant { $($field: $value),* }
    };
    ($variant:ident($value:expr)) => {
        $crate::error::NodeError::$variant($value)
    };
}

#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return Err($crate::node_error!($($args)*))
    };
}

#[macro_export]
macro_rules! ensure {
    ($condition:expr, $($args:tt)*) => {
        if !$condition {
            $crate::bail!($($args)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_transport_and_protocol_errors() {
        let io_err = NodeError::Io {
            source: io::Error::new(io::ErrorKind::NotFound, "test"),
            path: None,
        };
        assert_eq!(io_err.category(), ErrorCategory::Transport);

        let proto_err = NodeError::FrameTooLarge { len: 10, max: 5 };
        assert_eq!(proto_err.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn only_transport_and_integrity_are_retryable() {
        let checksum = NodeError::ChecksumMismatch {
            path: "a.txt".into(),
            attempts: 3,
        };
        assert!(checksum.is_retryable());

        let auth = NodeError::Authorization;
        assert!(!auth.is_retryable());
    }

    #[test]
    fn with_context_wraps_message() {
        let result: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        let wrapped = result.context("reading configuration file");
        assert!(wrapped.is_err());
        assert!(wrapped
            .unwrap_err()
            .to_string()
            .contains("reading configuration file"));
    }

    #[test]
    fn user_message_for_authorization_is_friendly() {
        let err = NodeError::Authorization;
        assert!(err.user_message().contains("incorrect password"));
    }
}
