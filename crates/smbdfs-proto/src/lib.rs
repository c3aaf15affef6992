#![warn(missing_docs)]

//! smbdfs wire layer: NT status codes and the DFS referral (MS-DFSC) codec
//! carried inside SMB2 IOCTL requests.

pub mod error;
pub mod referral;
pub mod status;
pub mod wire;

pub use error::{ProtoError, Result};
pub use referral::{
    ReferralEntryFlags, ReferralHeaderFlags, ReferralRecord, ReferralRequest, ReferralResponse,
    ReferralType, ServerType, FSCTL_DFS_GET_REFERRALS, FSCTL_DFS_GET_REFERRALS_EX,
};
pub use status::NtStatus;
