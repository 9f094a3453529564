//! Crate-wide error types.
//!
//! Four variants: `Metadata` (invariant violation or unimplemented case),
//! `Rpc` (message type mismatch, unknown method), `Mapping` (no
//! intercommunicator configured for a pattern that requires one), `Host`
//! (propagated from the native connector).

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invariant of the metadata tree was violated, or the requested
    /// operation is not (yet) implemented for the in-memory path.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// The RPC substrate received a message that did not match the expected
    /// opcode, or named an unknown function/method.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// No intercommunicator was configured for a (filename, path) pair that
    /// required one.
    #[error("mapping error: no intercommunicator configured for {filename:?}:{path:?}")]
    Mapping {
        /// Filename of the object that triggered the lookup.
        filename: String,
        /// Path of the object that triggered the lookup.
        path: String,
    },

    /// An error was propagated from the native HDF5 connector.
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

/// Errors arising from the metadata tree / VOL dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Requested operation has no in-memory implementation and is not one
    /// of the documented benign no-op cases.
    #[error("unimplemented metadata operation: {0}")]
    Unimplemented(String),

    /// A lookup (`search`, `locate`, token resolution) failed to find the
    /// named object.
    #[error("object not found: {0}")]
    NotFound(String),

    /// An operation assumed an invariant of the tree (e.g. at most one
    /// parent, a dataset carrying `is_memory || is_passthru`) that did not
    /// hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A soft link could not be resolved to an existing object.
    #[error("dangling soft link: {0}")]
    DanglingLink(String),

    /// A type or rank mismatch was detected between a read request and the
    /// stored dataset metadata.
    #[error("type/rank mismatch: {0}")]
    TypeMismatch(String),
}

/// Errors arising from the RPC substrate.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A response carried a different opcode than the one the request
    /// expected.
    #[error("unexpected opcode: expected {expected:?}, got {got:?}")]
    UnexpectedOpcode {
        /// Opcode the caller expected.
        expected: String,
        /// Opcode actually received.
        got: String,
    },

    /// A method/function identifier had no registered handler.
    #[error("unknown callable: {0}")]
    UnknownCallable(String),

    /// The client and server disagree on the type hash of a callable's
    /// signature.
    #[error("argument hash mismatch for {name}: client {client_hash:#x}, server {server_hash:#x}")]
    HashMismatch {
        /// Name of the callable.
        name: String,
        /// Hash computed on the client side.
        client_hash: u64,
        /// Hash computed on the server side.
        server_hash: u64,
    },

    /// The number of collective index/query participations diverged between
    /// ranks. Surfaced as an error rather than attempting to recover, since
    /// silently continuing here is how a bulk-synchronous protocol hangs.
    #[error("bulk-synchronous index/query count diverged: {0}")]
    CountDiverged(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// An error propagated unchanged from the native HDF5 connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostError(pub i32);

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native connector returned {}", self.0)
    }
}

impl std::error::Error for HostError {}
