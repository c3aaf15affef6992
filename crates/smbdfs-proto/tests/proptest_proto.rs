//! Property-based tests for smbdfs-proto using proptest.
//!
//! The response decoder is fed server-controlled bytes, so it must reject
//! anything malformed with an error rather than panic.

use bytes::Bytes;
use proptest::prelude::*;
use smbdfs_proto::{
    ReferralRecord, ReferralRequest, ReferralResponse, ReferralType, ServerType,
};

/// Generator for path components without separators or NULs.
fn any_component() -> impl Strategy<Value = String> {
    "[A-Za-z0-9$_.-]{1,12}"
}

fn any_unc() -> impl Strategy<Value = String> {
    proptest::collection::vec(any_component(), 1..6).prop_map(|c| format!("\\{}", c.join("\\")))
}

fn any_record() -> impl Strategy<Value = ReferralRecord> {
    (1u16..=4u16, any::<bool>(), any::<u32>(), any_unc(), any_unc()).prop_map(
        |(version, root, ttl, dfs_path, target)| {
            let server_type = if root { ServerType::Root } else { ServerType::Link };
            ReferralRecord::target(version, server_type, ttl, dfs_path, target)
        },
    )
}

proptest! {
    /// Test: decoding arbitrary bytes never panics
    #[test]
    fn test_decode_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = ReferralResponse::decode(Bytes::from(data));
    }

    /// Test: every truncation of a valid response is an error, never a panic
    #[test]
    fn test_decode_truncated(records in proptest::collection::vec(any_record(), 1..4), cut in 0usize..200) {
        let resp = ReferralResponse::new(0, 0, records);
        let buf = resp.encode().unwrap();
        if cut < buf.len() {
            let _ = ReferralResponse::decode(buf.slice(..cut));
        }
    }

    /// Test: targets and TTLs of encoded records survive decoding
    #[test]
    fn test_record_targets_preserved(records in proptest::collection::vec(any_record(), 1..6)) {
        let resp = ReferralResponse::new(0, 0x2, records.clone());
        let decoded = ReferralResponse::decode(resp.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.records.len(), records.len());
        for (got, want) in decoded.records.iter().zip(records.iter()) {
            prop_assert_eq!(&got.network_address, &want.network_address);
            prop_assert_eq!(got.ttl, want.ttl);
            prop_assert_eq!(got.server_type, want.server_type);
        }
    }

    /// Test: the request path is carried verbatim
    #[test]
    fn test_request_path_preserved(path in any_unc()) {
        let req = ReferralRequest::new(ReferralType::Root, path.clone());
        let decoded = ReferralRequest::decode(req.encode().unwrap(), ReferralType::Root).unwrap();
        prop_assert_eq!(decoded.path, path);
    }
}
