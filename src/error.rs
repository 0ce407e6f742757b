//! Error types for ferrogroup

use crate::datatype::DatatypeTag;
use thiserror::Error;

/// Result type for group operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for group operations.
///
/// Every variant is a usage or programming error surfaced to the rank that
/// made the offending call. Nothing is retried: the rest of the group is
/// already committed to the operation and cannot be corrected from here.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport endpoint for this rank has already been bound to a group
    #[error("transport endpoint for rank {0} is already bound to a group")]
    AlreadyInitialized(i32),

    /// A value outside the supported kinds was handed to the codec
    #[error("unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    /// Received bytes do not match the declared payload kind
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Peer rank is outside the group, or is the caller itself
    #[error("{op}: rank {rank} is unreachable from rank {caller} (group size {size})")]
    UnreachableRank {
        /// Operation that named the rank
        op: &'static str,
        /// Rank of the caller
        caller: i32,
        /// The offending rank
        rank: i32,
        /// Group size
        size: i32,
    },

    /// Declared element count disagrees with the data
    #[error("{op}: buffer size mismatch (expected {expected} elements, got {actual})")]
    BufferSizeMismatch {
        /// Operation that detected the mismatch
        op: &'static str,
        /// Element count the caller declared
        expected: usize,
        /// Element count actually present
        actual: usize,
    },

    /// Declared element type disagrees with the data
    #[error("{op}: datatype mismatch (expected {expected:?}, got {actual:?})")]
    DatatypeMismatch {
        /// Operation that detected the mismatch
        op: &'static str,
        /// Element type the caller declared
        expected: DatatypeTag,
        /// Element type actually present
        actual: DatatypeTag,
    },

    /// A request was completed more than once
    #[error("request has already been completed")]
    RequestAlreadyCompleted,

    /// Root's scatter sequence does not have one entry per rank
    #[error("{op}: root supplied {actual} shares for a group of {expected}")]
    ScatterLengthMismatch {
        /// Operation that detected the mismatch
        op: &'static str,
        /// Group size
        expected: usize,
        /// Length root supplied
        actual: usize,
    },

    /// A rank contributed a different element count than root was told to expect
    #[error(
        "gatherv: rank {rank} contributed {actual} elements but {declared} were pre-negotiated"
    )]
    GatherVSizeNotPrenegotiated {
        /// The contributing rank
        rank: i32,
        /// Count root declared for that rank
        declared: usize,
        /// Count the rank actually sent
        actual: usize,
    },

    /// The group has been finalized
    #[error("process group has been finalized")]
    GroupFinalized,

    /// Ranks disagree on the size of the group
    #[error("rank {rank} sees a group of {actual} but rank 0 sees {expected}")]
    GroupSizeDisagreement {
        /// Rank whose view differs
        rank: i32,
        /// Size seen by rank 0
        expected: i32,
        /// Size seen by `rank`
        actual: i32,
    },

    /// The substrate was aborted because a peer failed
    #[error("group aborted by rank {rank}")]
    Aborted {
        /// Rank that triggered the abort
        rank: i32,
    },

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The rank-local worker pool could not be built
    #[error("local worker pool: {0}")]
    LocalPool(String),
}

impl Error {
    /// True when this error only reflects another rank's failure.
    pub fn is_secondary(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }
}

/// Terminate the local process on error.
///
/// A failed collective leaves the rest of the group blocked, so the usual
/// reaction is to report and abort rather than unwind.
pub trait OrAbort<T> {
    /// Return the value, or log the error for `rank` and abort the process.
    fn or_abort(self, rank: i32) -> T;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self, rank: i32) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!("rank {rank}: {err}");
                eprintln!("rank {rank}: fatal: {err}");
                std::process::abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_operation_and_sizes() {
        let err = Error::BufferSizeMismatch {
            op: "recv",
            expected: 5,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "recv: buffer size mismatch (expected 5 elements, got 4)"
        );

        let err = Error::UnreachableRank {
            op: "send",
            caller: 1,
            rank: 1,
            size: 4,
        };
        assert!(err.to_string().contains("rank 1 is unreachable"));

        let err = Error::ScatterLengthMismatch {
            op: "scatter_value",
            expected: 4,
            actual: 3,
        };
        assert!(err.to_string().contains("3 shares for a group of 4"));

        let err = Error::GatherVSizeNotPrenegotiated {
            rank: 2,
            declared: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "gatherv: rank 2 contributed 4 elements but 3 were pre-negotiated"
        );
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn only_abort_is_secondary() {
        assert!(Error::Aborted { rank: 2 }.is_secondary());
        assert!(!Error::GroupFinalized.is_secondary());
        assert!(!Error::RequestAlreadyCompleted.is_secondary());
    }
}
