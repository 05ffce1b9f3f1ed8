//! Error types and handling for the `domainmq` library.

use thiserror::Error;

/// Result type alias for `domainmq` operations.
pub type Result<T> = std::result::Result<T, DomainMqError>;

/// Main error type for `domainmq`.
#[derive(Error, Debug)]
pub enum DomainMqError {
    /// `shm_open`, `mmap`, or `ftruncate` failed while opening or creating a
    /// topic segment.
    #[error("failed to open topic segment: {message}")]
    TopicOpenFailed {
        /// Description of what failed.
        message: String,
    },

    /// Acquiring or releasing the advisory file-range lock on a segment
    /// failed.
    #[error("failed to lock topic segment: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The topic already binds the maximum of 32 distinct memory domains;
    /// a new endpoint's domain cannot be added.
    #[error("topic already binds the maximum of {max} memory domains")]
    DomainCapacityExceeded {
        /// The capacity that was exceeded (always `DOMAINS_PER_TOPIC`).
        max: usize,
    },

    /// `pub_count` or `sub_count` would overflow past its saturation limit.
    #[error("endpoint count would exceed {max}")]
    EndpointCountExceeded {
        /// The limit that was hit.
        max: u16,
    },

    /// Unregister was called on an endpoint that was never registered (or
    /// already unregistered).
    #[error("endpoint is not registered with any topic")]
    NotRegistered,

    /// The destination allocator had no free slot to materialize a
    /// cross-domain copy into.
    #[error("allocator out of space")]
    AllocatorOutOfSpace,

    /// A requested allocator id was never seen by this process's registry.
    #[error("allocator {0} not found in local registry")]
    AllocatorNotRegistered(u32),

    /// Raw I/O / syscall failure not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DomainMqError {
    /// Build a `TopicOpenFailed` error.
    pub fn topic_open(message: impl Into<String>) -> Self {
        Self::TopicOpenFailed {
            message: message.into(),
        }
    }

    /// Build a `LockFailed` error.
    pub fn lock_failed(message: impl Into<String>) -> Self {
        Self::LockFailed {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later might succeed (transient
    /// resource pressure, not a logic error).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AllocatorOutOfSpace | Self::LockFailed { .. })
    }

    /// Whether this error reflects one of the topic's fixed capacity limits
    /// (domain count or endpoint count) rather than a transient failure.
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            Self::DomainCapacityExceeded { .. } | Self::EndpointCountExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recoverable_errors() {
        assert!(DomainMqError::AllocatorOutOfSpace.is_recoverable());
        assert!(!DomainMqError::NotRegistered.is_recoverable());
    }

    #[test]
    fn classifies_capacity_errors() {
        let err = DomainMqError::DomainCapacityExceeded { max: 32 };
        assert!(err.is_capacity_error());
        assert!(!err.is_recoverable());

        let err = DomainMqError::EndpointCountExceeded { max: u16::MAX };
        assert!(err.is_capacity_error());
    }

    #[test]
    fn constructors_build_expected_variants() {
        let err = DomainMqError::topic_open("truncate failed");
        assert!(matches!(err, DomainMqError::TopicOpenFailed { .. }));

        let err = DomainMqError::lock_failed("fcntl F_SETLKW failed");
        assert!(matches!(err, DomainMqError::LockFailed { .. }));
    }
}
