//! Error types for the smbdfs wire layer

use thiserror::Error;

/// Failures while encoding or decoding referral messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Buffer ended before a field could be read
    #[error("truncated buffer: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        /// Offset of the read
        offset: usize,
        /// Bytes required
        needed: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },
    /// A record-relative string offset points outside the record or buffer
    #[error("string offset {offset} out of range (buffer length {len})")]
    BadOffset {
        /// The offending absolute offset
        offset: usize,
        /// Length of the buffer
        len: usize,
    },
    /// Referral record version outside 1..=4
    #[error("unsupported referral version: {0}")]
    UnsupportedVersion(u16),
    /// A UTF-16 string could not be decoded
    #[error("invalid UTF-16 string: {reason}")]
    InvalidString {
        /// Decoder message
        reason: String,
    },
    /// Response carried zero referral records
    #[error("referral response contains no referrals")]
    NoReferrals,
    /// Request could not be encoded
    #[error("cannot encode request: {reason}")]
    Encode {
        /// Why the request was rejected
        reason: String,
    },
}

/// Result type alias using ProtoError as the error type.
pub type Result<T> = std::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_display() {
        let err = ProtoError::Truncated {
            offset: 8,
            needed: 4,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "truncated buffer: need 4 bytes at offset 8, have 2"
        );
    }

    #[test]
    fn test_unsupported_version_display() {
        let err = ProtoError::UnsupportedVersion(7);
        assert_eq!(err.to_string(), "unsupported referral version: 7");
    }

    #[test]
    fn test_no_referrals_display() {
        assert_eq!(
            ProtoError::NoReferrals.to_string(),
            "referral response contains no referrals"
        );
    }
}
