//! Error types for smbdfs client

use smbdfs_proto::{NtStatus, ProtoError, ReferralType};
use thiserror::Error;

/// Failure of a single referral exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Server answered the referral request with an error status
    #[error("{referral_type} referral to {host} failed: {status}")]
    Failed {
        /// Kind of referral that was sent
        referral_type: ReferralType,
        /// Host the request was sent to
        host: String,
        /// Status returned by the server
        status: NtStatus,
    },
    /// Response could not be decoded or violated referral rules
    #[error("malformed referral response: {reason}")]
    Malformed {
        /// What was wrong with the response
        reason: String,
    },
    /// Session, tree connect or IOCTL transport failure
    #[error("transport error to {host}: {reason} ({status})")]
    Transport {
        /// Host being contacted
        host: String,
        /// Status reported by the transport
        status: NtStatus,
        /// Transport message
        reason: String,
    },
}

impl ExchangeError {
    /// The NT status this failure surfaces as.
    pub fn status(&self) -> NtStatus {
        match self {
            ExchangeError::Failed { status, .. } => *status,
            ExchangeError::Malformed { .. } => NtStatus::INVALID_NETWORK_RESPONSE,
            ExchangeError::Transport { status, .. } => *status,
        }
    }
}

impl From<ProtoError> for ExchangeError {
    fn from(e: ProtoError) -> Self {
        ExchangeError::Malformed {
            reason: e.to_string(),
        }
    }
}

/// Errors surfaced by DFS path resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DfsError {
    /// Path string could not be parsed or rewritten
    #[error("invalid path: {reason}")]
    InvalidPath {
        /// Why the path was rejected
        reason: String,
    },
    /// No usable domain controller for the path's domain
    #[error("domain resolution failed for {path}: {status}")]
    DomainResolution {
        /// Path under resolution
        path: String,
        /// Last referral status
        status: NtStatus,
    },
    /// Root, link or SYSVOL referral failed for a known DFS path
    #[error("DFS referral failed for {path}: {status}")]
    Referral {
        /// Path under resolution
        path: String,
        /// Last referral status
        status: NtStatus,
    },
    /// Interlink chain longer than the configured bound
    #[error("interlink limit of {hops} exceeded resolving {path}")]
    InterlinkLimit {
        /// Path being resolved when the limit hit
        path: String,
        /// Configured bound
        hops: usize,
    },
    /// I/O against every resolved target failed
    #[error("I/O on {path} failed: {status}")]
    Io {
        /// Last path tried
        path: String,
        /// Last I/O status
        status: NtStatus,
    },
    /// Invalid configuration
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong
        reason: String,
    },
}

impl DfsError {
    /// Converts the error to the NT status a caller should report.
    pub fn status(&self) -> NtStatus {
        match self {
            DfsError::InvalidPath { .. } => NtStatus::OBJECT_PATH_NOT_FOUND,
            DfsError::DomainResolution { status, .. } => *status,
            DfsError::Referral { status, .. } => *status,
            DfsError::InterlinkLimit { .. } => NtStatus::DFS_UNAVAILABLE,
            DfsError::Io { status, .. } => *status,
            DfsError::Config { .. } => NtStatus::INVALID_PARAMETER,
        }
    }
}

/// Result type alias using DfsError as the error type.
pub type Result<T> = std::result::Result<T, DfsError>;
