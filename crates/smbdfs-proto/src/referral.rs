//! DFS referral messages (MS-DFSC) carried by FSCTL_DFS_GET_REFERRALS.
//!
//! A request names the path being resolved (and optionally the client's
//! site). A response is a fixed 8-byte header followed by
//! `number_of_referrals` records. Every record starts with a version number
//! and its own size; fixed fields follow inline and strings are addressed by
//! offsets relative to the start of the record, so the string area may live
//! anywhere after the fixed parts.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProtoError, Result};
use crate::wire::{utf16_len, WireDecoder, WireEncoder};

/// FSCTL code for a plain referral request
pub const FSCTL_DFS_GET_REFERRALS: u32 = 0x0006_0194;
/// FSCTL code for a referral request carrying a site name
pub const FSCTL_DFS_GET_REFERRALS_EX: u32 = 0x0006_01B0;

/// Highest record version this codec understands
pub const MAX_REFERRAL_VERSION: u16 = 4;

const RESPONSE_HEADER_SIZE: usize = 8;
const RECORD_COMMON_SIZE: usize = 8;
const V2_FIXED_SIZE: usize = 22;
const V3_FIXED_SIZE: usize = 34;
const REQUEST_FLAGS_SITE_NAME: u16 = 0x0001;

/// The four kinds of referral a client issues.
///
/// The kind is not a wire field; it is implied by the shape of the request
/// path and by where the request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralType {
    /// Domain controller referral (`\domain`, or empty for the domain list)
    Dc,
    /// Namespace root referral (`\domain-or-server\root`)
    Root,
    /// Link referral below a root
    Link,
    /// SYSVOL/NETLOGON referral (`\domain\SYSVOL`)
    Sysvol,
}

impl fmt::Display for ReferralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferralType::Dc => "DC",
            ReferralType::Root => "ROOT",
            ReferralType::Link => "LINK",
            ReferralType::Sysvol => "SYSVOL",
        };
        f.write_str(s)
    }
}

/// A referral request ready to be placed in an IOCTL payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralRequest {
    /// Which step of resolution issued this request
    pub referral_type: ReferralType,
    /// Path being resolved, in `\a\b` form (empty for the domain list)
    pub path: String,
    /// Client site, sent with the extended request
    pub site_name: Option<String>,
    /// Highest record version the client accepts
    pub max_referral_level: u16,
}

impl ReferralRequest {
    /// Creates a request with the highest referral level and no site.
    pub fn new(referral_type: ReferralType, path: impl Into<String>) -> Self {
        Self {
            referral_type,
            path: path.into(),
            site_name: None,
            max_referral_level: MAX_REFERRAL_VERSION,
        }
    }

    /// Sets the site name; switches the request to the extended form.
    pub fn with_site_name(mut self, site: impl Into<String>) -> Self {
        self.site_name = Some(site.into());
        self
    }

    /// Sets the maximum referral level.
    pub fn with_max_level(mut self, level: u16) -> Self {
        self.max_referral_level = level;
        self
    }

    /// The FSCTL code this request must be sent with.
    pub fn fsctl_code(&self) -> u32 {
        if self.site_name.is_some() {
            FSCTL_DFS_GET_REFERRALS_EX
        } else {
            FSCTL_DFS_GET_REFERRALS
        }
    }

    /// Encodes the request body.
    pub fn encode(&self) -> Result<Bytes> {
        if self.max_referral_level == 0 || self.max_referral_level > MAX_REFERRAL_VERSION {
            return Err(ProtoError::Encode {
                reason: format!("max referral level {} out of range", self.max_referral_level),
            });
        }
        let mut enc = WireEncoder::new();
        enc.encode_u16(self.max_referral_level);
        match &self.site_name {
            None => enc.encode_utf16_nul(&self.path),
            Some(site) => {
                let name_bytes = utf16_len(&self.path) * 2;
                let site_bytes = utf16_len(site) * 2;
                if name_bytes > u16::MAX as usize || site_bytes > u16::MAX as usize {
                    return Err(ProtoError::Encode {
                        reason: "path or site name too long".to_string(),
                    });
                }
                enc.encode_u16(REQUEST_FLAGS_SITE_NAME);
                enc.encode_u32((2 + name_bytes + 2 + site_bytes) as u32);
                enc.encode_u16(name_bytes as u16);
                enc.encode_utf16(&self.path);
                enc.encode_u16(site_bytes as u16);
                enc.encode_utf16(site);
            }
        }
        Ok(enc.finish())
    }

    /// Decodes a plain (non-extended) request body.
    pub fn decode(buf: Bytes, referral_type: ReferralType) -> Result<Self> {
        let mut dec = WireDecoder::new(buf);
        let max_referral_level = dec.decode_u16()?;
        let path = dec.decode_utf16_nul()?;
        Ok(Self {
            referral_type,
            path,
            site_name: None,
            max_referral_level,
        })
    }

    /// Decodes an extended request body.
    pub fn decode_ex(buf: Bytes, referral_type: ReferralType) -> Result<Self> {
        let mut dec = WireDecoder::new(buf);
        let max_referral_level = dec.decode_u16()?;
        let flags = dec.decode_u16()?;
        let _data_len = dec.decode_u32()?;
        let name_len = dec.decode_u16()? as usize;
        let path = dec.decode_utf16(name_len)?;
        let site_name = if flags & REQUEST_FLAGS_SITE_NAME != 0 {
            let site_len = dec.decode_u16()? as usize;
            Some(dec.decode_utf16(site_len)?)
        } else {
            None
        };
        Ok(Self {
            referral_type,
            path,
            site_name,
            max_referral_level,
        })
    }

    /// Decodes a request body sent with either FSCTL code.
    pub fn decode_for(fsctl: u32, buf: Bytes, referral_type: ReferralType) -> Result<Self> {
        if fsctl == FSCTL_DFS_GET_REFERRALS_EX {
            Self::decode_ex(buf, referral_type)
        } else {
            Self::decode(buf, referral_type)
        }
    }
}

/// Flags in the response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferralHeaderFlags(pub u32);

impl ReferralHeaderFlags {
    /// Targets are namespace servers able to answer further referrals
    pub const REFERRAL_SERVERS: u32 = 0x0000_0001;
    /// Targets hold the storage for the path
    pub const STORAGE_SERVERS: u32 = 0x0000_0002;
    /// Client should fail back to a preferred target when possible
    pub const TARGET_FAILBACK: u32 = 0x0000_0004;

    /// R flag set
    pub fn referral_servers(&self) -> bool {
        self.0 & Self::REFERRAL_SERVERS != 0
    }

    /// S flag set
    pub fn storage_servers(&self) -> bool {
        self.0 & Self::STORAGE_SERVERS != 0
    }

    /// T flag set
    pub fn target_failback(&self) -> bool {
        self.0 & Self::TARGET_FAILBACK != 0
    }
}

/// Flags carried on each referral record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferralEntryFlags(pub u16);

impl ReferralEntryFlags {
    /// Record is a DC/domain name list rather than a target
    pub const NAME_LIST_REFERRAL: u16 = 0x0002;
    /// Record starts a new target set (V4 only)
    pub const TARGET_SET_BOUNDARY: u16 = 0x0004;

    /// Record is a name list
    pub fn name_list(&self) -> bool {
        self.0 & Self::NAME_LIST_REFERRAL != 0
    }

    /// Record starts a target set
    pub fn target_set_boundary(&self) -> bool {
        self.0 & Self::TARGET_SET_BOUNDARY != 0
    }
}

/// Whether the targets of a record are namespace roots or link targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    /// Non-root targets (links, SYSVOL)
    Link,
    /// Root targets
    Root,
}

impl ServerType {
    fn from_u16(v: u16) -> Self {
        if v & 0x0001 != 0 {
            ServerType::Root
        } else {
            ServerType::Link
        }
    }

    fn as_u16(&self) -> u16 {
        match self {
            ServerType::Link => 0,
            ServerType::Root => 1,
        }
    }
}

/// One decoded referral record (any version).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralRecord {
    /// Record version, 1 to 4
    pub version: u16,
    /// Root or link targets
    pub server_type: ServerType,
    /// Per-record flags
    pub entry_flags: ReferralEntryFlags,
    /// V2 only
    pub proximity: u32,
    /// None for V1, which has no TTL field
    pub ttl: Option<u32>,
    /// DFS path the record answers for (V2+)
    pub dfs_path: Option<String>,
    /// 8.3 form of `dfs_path` (V2+)
    pub dfs_alternate_path: Option<String>,
    /// Target UNC path; the V1 share name lands here too
    pub network_address: Option<String>,
    /// Domain name of a name-list record
    pub special_name: Option<String>,
    /// DC or domain names of a name-list record
    pub expanded_names: Vec<String>,
    /// V3/V4 service site GUID when present
    pub service_site_guid: Option<Uuid>,
}

impl ReferralRecord {
    /// A target record of the given version.
    pub fn target(
        version: u16,
        server_type: ServerType,
        ttl: u32,
        dfs_path: impl Into<String>,
        network_address: impl Into<String>,
    ) -> Self {
        let dfs_path = dfs_path.into();
        Self {
            version,
            server_type,
            entry_flags: ReferralEntryFlags::default(),
            proximity: 0,
            ttl: if version == 1 { None } else { Some(ttl) },
            dfs_alternate_path: Some(dfs_path.clone()),
            dfs_path: Some(dfs_path),
            network_address: Some(network_address.into()),
            special_name: None,
            expanded_names: Vec::new(),
            service_site_guid: None,
        }
    }

    /// A V3 name-list record, as returned for DC and domain-list referrals.
    pub fn name_list(ttl: u32, special_name: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            version: 3,
            server_type: ServerType::Link,
            entry_flags: ReferralEntryFlags(ReferralEntryFlags::NAME_LIST_REFERRAL),
            proximity: 0,
            ttl: Some(ttl),
            dfs_path: None,
            dfs_alternate_path: None,
            network_address: None,
            special_name: Some(special_name.into()),
            expanded_names: names,
            service_site_guid: None,
        }
    }

    /// Marks the record as the first of a new target set.
    pub fn with_target_set_boundary(mut self) -> Self {
        self.entry_flags.0 |= ReferralEntryFlags::TARGET_SET_BOUNDARY;
        self
    }

    /// True for a DC or domain name list (V3 and later).
    pub fn is_name_list(&self) -> bool {
        self.version >= 3 && self.entry_flags.name_list()
    }

    /// True when the targets are roots.
    pub fn is_root(&self) -> bool {
        self.server_type == ServerType::Root
    }

    /// True when the record starts a target set (V4).
    pub fn is_target_set_boundary(&self) -> bool {
        self.version >= 4 && self.entry_flags.target_set_boundary()
    }

    fn decode(dec: &WireDecoder, start: usize) -> Result<(Self, usize)> {
        let mut rd = dec.view_from(start)?;
        let version = rd.decode_u16()?;
        let size = rd.decode_u16()? as usize;
        let server_type = ServerType::from_u16(rd.decode_u16()?);
        let entry_flags = ReferralEntryFlags(rd.decode_u16()?);

        if version == 0 || version > MAX_REFERRAL_VERSION {
            return Err(ProtoError::UnsupportedVersion(version));
        }
        if size < RECORD_COMMON_SIZE {
            return Err(ProtoError::BadOffset {
                offset: start + size,
                len: dec.len(),
            });
        }

        let string_at = |offset: u16| -> Result<String> { dec.utf16_nul_at(start + offset as usize) };

        let mut record = ReferralRecord {
            version,
            server_type,
            entry_flags,
            proximity: 0,
            ttl: None,
            dfs_path: None,
            dfs_alternate_path: None,
            network_address: None,
            special_name: None,
            expanded_names: Vec::new(),
            service_site_guid: None,
        };

        match version {
            1 => {
                record.network_address = Some(rd.decode_utf16_nul()?);
            }
            2 => {
                record.proximity = rd.decode_u32()?;
                record.ttl = Some(rd.decode_u32()?);
                let path_off = rd.decode_u16()?;
                let alt_off = rd.decode_u16()?;
                let addr_off = rd.decode_u16()?;
                record.dfs_path = Some(string_at(path_off)?);
                record.dfs_alternate_path = Some(string_at(alt_off)?);
                record.network_address = Some(string_at(addr_off)?);
            }
            _ => {
                record.ttl = Some(rd.decode_u32()?);
                if entry_flags.name_list() {
                    let special_off = rd.decode_u16()?;
                    let count = rd.decode_u16()? as usize;
                    let expanded_off = rd.decode_u16()?;
                    record.special_name = Some(string_at(special_off)?);
                    if count > 0 {
                        record.expanded_names =
                            dec.utf16_list_at(start + expanded_off as usize, count)?;
                    }
                } else {
                    let path_off = rd.decode_u16()?;
                    let alt_off = rd.decode_u16()?;
                    let addr_off = rd.decode_u16()?;
                    record.dfs_path = Some(string_at(path_off)?);
                    record.dfs_alternate_path = Some(string_at(alt_off)?);
                    record.network_address = Some(string_at(addr_off)?);
                    if size >= V3_FIXED_SIZE {
                        let raw = rd.decode_bytes(16)?;
                        let mut guid = [0u8; 16];
                        guid.copy_from_slice(&raw);
                        let guid = Uuid::from_bytes_le(guid);
                        if !guid.is_nil() {
                            record.service_site_guid = Some(guid);
                        }
                    }
                }
            }
        }

        Ok((record, size))
    }

    fn fixed_size(&self) -> usize {
        match self.version {
            1 => {
                let name = self.network_address.as_deref().unwrap_or_default();
                RECORD_COMMON_SIZE + (utf16_len(name) + 1) * 2
            }
            2 => V2_FIXED_SIZE,
            _ => V3_FIXED_SIZE,
        }
    }
}

/// A decoded referral response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralResponse {
    /// Bytes of the request path (UTF-16) covered by the referral
    pub path_consumed: u16,
    /// Record count from the header
    pub number_of_referrals: u16,
    /// Header flags
    pub header_flags: ReferralHeaderFlags,
    /// Decoded records, in server order
    pub records: Vec<ReferralRecord>,
}

impl ReferralResponse {
    /// Creates a response over the given records.
    pub fn new(path_consumed: u16, header_flags: u32, records: Vec<ReferralRecord>) -> Self {
        Self {
            path_consumed,
            number_of_referrals: records.len() as u16,
            header_flags: ReferralHeaderFlags(header_flags),
            records,
        }
    }

    /// Decodes a response. Zero records or any record with an unsupported
    /// version is an error.
    pub fn decode(buf: Bytes) -> Result<Self> {
        let mut dec = WireDecoder::new(buf);
        let path_consumed = dec.decode_u16()?;
        let number_of_referrals = dec.decode_u16()?;
        let header_flags = ReferralHeaderFlags(dec.decode_u32()?);

        if number_of_referrals == 0 {
            return Err(ProtoError::NoReferrals);
        }

        let mut records = Vec::with_capacity(number_of_referrals as usize);
        let mut start = RESPONSE_HEADER_SIZE;
        for _ in 0..number_of_referrals {
            let (record, size) = ReferralRecord::decode(&dec, start)?;
            records.push(record);
            start += size;
        }
        debug!(
            "decoded referral response: consumed={} records={} flags=0x{:x}",
            path_consumed, number_of_referrals, header_flags.0
        );

        Ok(Self {
            path_consumed,
            number_of_referrals,
            header_flags,
            records,
        })
    }

    /// Encodes the response, placing every record's fixed part first and
    /// all strings after them.
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = WireEncoder::new();
        enc.encode_u16(self.path_consumed);
        enc.encode_u16(self.records.len() as u16);
        enc.encode_u32(self.header_flags.0);

        let fixed_total: usize = self.records.iter().map(|r| r.fixed_size()).sum();
        let mut string_area = WireEncoder::new();
        let strings_base = RESPONSE_HEADER_SIZE + fixed_total;
        let mut record_start = RESPONSE_HEADER_SIZE;

        for record in &self.records {
            if record.version == 0 || record.version > MAX_REFERRAL_VERSION {
                return Err(ProtoError::UnsupportedVersion(record.version));
            }
            let size = record.fixed_size();
            enc.encode_u16(record.version);
            enc.encode_u16(size as u16);
            enc.encode_u16(record.server_type.as_u16());
            enc.encode_u16(record.entry_flags.0);

            let mut place = |s: &str| -> Result<u16> {
                let offset = strings_base + string_area.len() - record_start;
                string_area.encode_utf16_nul(s);
                u16::try_from(offset).map_err(|_| ProtoError::Encode {
                    reason: "string area exceeds 64KiB".to_string(),
                })
            };

            match record.version {
                1 => {
                    enc.encode_utf16_nul(record.network_address.as_deref().unwrap_or_default());
                }
                2 => {
                    enc.encode_u32(record.proximity);
                    enc.encode_u32(record.ttl.unwrap_or(0));
                    let path = record.dfs_path.as_deref().unwrap_or_default();
                    let alt = record.dfs_alternate_path.as_deref().unwrap_or(path);
                    enc.encode_u16(place(path)?);
                    enc.encode_u16(place(alt)?);
                    enc.encode_u16(place(record.network_address.as_deref().unwrap_or_default())?);
                }
                _ => {
                    enc.encode_u32(record.ttl.unwrap_or(0));
                    if record.entry_flags.name_list() {
                        enc.encode_u16(place(record.special_name.as_deref().unwrap_or_default())?);
                        enc.encode_u16(record.expanded_names.len() as u16);
                        let mut first = None;
                        for name in &record.expanded_names {
                            let off = place(name)?;
                            first.get_or_insert(off);
                        }
                        enc.encode_u16(first.unwrap_or(0));
                        enc.encode_bytes(&[0u8; V3_FIXED_SIZE - 18]);
                    } else {
                        let path = record.dfs_path.as_deref().unwrap_or_default();
                        let alt = record.dfs_alternate_path.as_deref().unwrap_or(path);
                        enc.encode_u16(place(path)?);
                        enc.encode_u16(place(alt)?);
                        enc.encode_u16(place(record.network_address.as_deref().unwrap_or_default())?);
                        let guid = record.service_site_guid.unwrap_or_else(Uuid::nil);
                        enc.encode_bytes(&guid.to_bytes_le());
                    }
                }
            }
            record_start += size;
        }

        enc.encode_bytes(&string_area.finish());
        Ok(enc.finish())
    }
}
