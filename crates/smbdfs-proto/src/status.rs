//! NT status codes returned by SMB2 servers

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit NTSTATUS value as carried in the SMB2 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NtStatus(pub u32);

impl NtStatus {
    /// The operation completed successfully
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    /// Output buffer was too small; partial data returned
    pub const BUFFER_OVERFLOW: NtStatus = NtStatus(0x8000_0005);
    /// An invalid parameter was passed
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D);
    /// Access denied
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);
    /// Object path component not found
    pub const OBJECT_PATH_NOT_FOUND: NtStatus = NtStatus(0xC000_003A);
    /// The specified domain does not exist
    pub const NO_SUCH_DOMAIN: NtStatus = NtStatus(0xC000_00DF);
    /// I/O request timed out
    pub const IO_TIMEOUT: NtStatus = NtStatus(0xC000_00B5);
    /// The network response was malformed
    pub const INVALID_NETWORK_RESPONSE: NtStatus = NtStatus(0xC000_00C3);
    /// The share name cannot be found on the server
    pub const BAD_NETWORK_NAME: NtStatus = NtStatus(0xC000_00CC);
    /// Domain information could not be reached
    pub const CANT_ACCESS_DOMAIN_INFO: NtStatus = NtStatus(0xC000_00DA);
    /// The DFS filter driver is required for this path
    pub const FS_DRIVER_REQUIRED: NtStatus = NtStatus(0xC000_019C);
    /// The object was not found
    pub const NOT_FOUND: NtStatus = NtStatus(0xC000_0225);
    /// The path is not covered by this tree connect; DFS resolution required
    pub const PATH_NOT_COVERED: NtStatus = NtStatus(0xC000_0257);
    /// DFS is unavailable on the contacted server
    pub const DFS_UNAVAILABLE: NtStatus = NtStatus(0xC000_026D);

    /// Severity bits 0b11 mark an error
    pub fn is_error(&self) -> bool {
        self.0 >> 30 == 0b11
    }

    /// Success or informational severity
    pub fn is_success(&self) -> bool {
        self.0 >> 30 == 0
    }

    /// True for the status a server returns when the tree connect does not
    /// serve the requested sub-path.
    pub fn is_path_not_covered(&self) -> bool {
        *self == NtStatus::PATH_NOT_COVERED
    }

    /// Symbolic name for known codes.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            NtStatus::SUCCESS => "STATUS_SUCCESS",
            NtStatus::BUFFER_OVERFLOW => "STATUS_BUFFER_OVERFLOW",
            NtStatus::INVALID_PARAMETER => "STATUS_INVALID_PARAMETER",
            NtStatus::ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            NtStatus::OBJECT_PATH_NOT_FOUND => "STATUS_OBJECT_PATH_NOT_FOUND",
            NtStatus::NO_SUCH_DOMAIN => "STATUS_NO_SUCH_DOMAIN",
            NtStatus::IO_TIMEOUT => "STATUS_IO_TIMEOUT",
            NtStatus::INVALID_NETWORK_RESPONSE => "STATUS_INVALID_NETWORK_RESPONSE",
            NtStatus::BAD_NETWORK_NAME => "STATUS_BAD_NETWORK_NAME",
            NtStatus::CANT_ACCESS_DOMAIN_INFO => "STATUS_CANT_ACCESS_DOMAIN_INFO",
            NtStatus::FS_DRIVER_REQUIRED => "STATUS_FS_DRIVER_REQUIRED",
            NtStatus::NOT_FOUND => "STATUS_NOT_FOUND",
            NtStatus::PATH_NOT_COVERED => "STATUS_PATH_NOT_COVERED",
            NtStatus::DFS_UNAVAILABLE => "STATUS_DFS_UNAVAILABLE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl From<u32> for NtStatus {
    fn from(v: u32) -> Self {
        NtStatus(v)
    }
}
