//! Error types for the triangular-solve engine.
//!
//! Provides structured error variants for transport failures, structural
//! inconsistencies in the factor storage, and invalid inputs. All errors
//! implement `std::error::Error` via `thiserror`.

/// Primary error type for solve operations.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// The caller supplied invalid input (dimensions, parameters, etc.).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// A point-to-point or collective transport operation failed.
    ///
    /// On the in-memory fabric this means a peer disconnected or a blocking
    /// receive timed out; on a real interconnect it wraps the backend error.
    #[error("transport failure in {scope} scope: {detail}")]
    Transport {
        /// Communicator scope where the failure occurred.
        scope: &'static str,
        /// Human-readable explanation.
        detail: String,
    },

    /// A message arrived that the current phase cannot interpret.
    #[error("unexpected message for supernode {supernode} (tag {tag:?})")]
    UnexpectedMessage {
        /// Supernode id carried in the message header.
        supernode: usize,
        /// Tag of the offending message.
        tag: crate::transport::MsgTag,
    },

    /// The block-sparse storage is inconsistent with the supernode partition.
    #[error("structural inconsistency: {0}")]
    Structure(String),
}

/// Validation errors for solve inputs.
///
/// These are raised eagerly before any computation or communication begins so
/// that callers get clear diagnostics rather than a stalled collective.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Dimensions of two related inputs disagree.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A value is NaN or infinite where a finite number is required.
    #[error("non-finite value detected: {0}")]
    NonFiniteValue(String),

    /// A parameter is outside its valid range.
    #[error("parameter out of range: {name} = {value} (expected {expected})")]
    ParameterOutOfRange {
        /// Name of the parameter.
        name: String,
        /// The invalid value (as a string for flexibility).
        value: String,
        /// Human-readable description of the valid range.
        expected: String,
    },

    /// The supernode boundary array is not monotonically increasing.
    #[error("supernode boundaries not monotonically increasing at position {position}")]
    NonMonotonicBoundaries {
        /// Position in `xsup` where the violation was detected.
        position: usize,
    },

    /// The depth of the process grid must be a power of two for the binary
    /// reduction hierarchy.
    #[error("grid depth {depth} is not a power of two")]
    DepthNotPowerOfTwo {
        /// Offending depth.
        depth: usize,
    },
}
