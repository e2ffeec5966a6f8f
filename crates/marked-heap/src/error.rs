//! Recoverable allocation failures.
//!
//! Protocol violations, such as allocating while a collection runs through
//! the infallible API or touching a deallocated handle, panic instead.

use std::io;

use thiserror::Error;

/// Why [`Heap::try_allocate`](crate::Heap::try_allocate) failed.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The request exceeds the largest size class.
    #[error("cell of {requested} bytes exceeds the maximum cell size of {max} bytes")]
    CellTooLarge {
        /// Bytes requested.
        requested: usize,
        /// Largest supported cell.
        max: usize,
    },
    /// Allocation was attempted from inside a collection.
    #[error("cannot allocate while a collection is in progress")]
    CollectionInProgress,
    /// The OS refused to reserve a new block.
    #[error("failed to reserve a heap block")]
    BlockReservation(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let err = AllocationError::CellTooLarge {
            requested: 2048,
            max: 1024,
        };
        assert_eq!(
            err.to_string(),
            "cell of 2048 bytes exceeds the maximum cell size of 1024 bytes"
        );
        let err = AllocationError::BlockReservation(io::Error::from(io::ErrorKind::OutOfMemory));
        assert!(std::error::Error::source(&err).is_some());
    }
}
