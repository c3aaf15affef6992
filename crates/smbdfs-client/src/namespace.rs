//! In-memory DFS namespace served over the session traits.
//!
//! A [`NamespaceServer`] answers referral FSCTLs on `IPC$` the way a domain
//! controller and root servers would, from a namespace described in JSON.
//! Requests and responses travel through the real referral codec, so the
//! resolver under test exercises the same bytes it would see on the wire.
//! Used by the `smbdfs-resolve` binary and by integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smbdfs_proto::{
    NtStatus, ReferralHeaderFlags, ReferralRecord, ReferralRequest, ReferralResponse,
    ReferralType, ServerType, FSCTL_DFS_GET_REFERRALS, FSCTL_DFS_GET_REFERRALS_EX,
};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{DfsError, ExchangeError, Result};
use crate::path::SmbPath;
use crate::session::{Connector, Credentials, IoctlResponse, Session, Share};

const IPC_SHARE: &str = "IPC$";

fn default_ttl() -> u32 {
    300
}

/// A domain and its controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDef {
    /// Domain name (NetBIOS or DNS)
    pub name: String,
    /// DCs answering for the domain, preferred first
    pub dcs: Vec<String>,
    /// TTL of DC referrals, in seconds
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

/// A namespace root (`\domain-or-server\root`) or a link below one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDef {
    /// DFS path of the root or link
    pub path: String,
    /// Target paths in referral order
    pub targets: Vec<String>,
    /// Referral TTL, in seconds
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    /// Link whose targets are themselves DFS paths
    #[serde(default)]
    pub interlink: bool,
}

/// Namespace description loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceDef {
    /// Trusted domains
    pub domains: Vec<DomainDef>,
    /// Namespace roots
    pub roots: Vec<TargetDef>,
    /// Links below the roots
    pub links: Vec<TargetDef>,
    /// Hosts that refuse connections
    pub offline: Vec<String>,
}

impl NamespaceDef {
    /// Parses a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DfsError::Config {
            reason: format!("namespace: {}", e),
        })
    }
}

/// One request received by the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRequest {
    /// Host the referral was sent to
    pub host: String,
    /// Requested referral type
    pub referral_type: ReferralType,
    /// Request path as sent
    pub path: String,
    /// Site name of an extended request
    pub site_name: Option<String>,
}

struct Parsed {
    prefix: SmbPath,
    def: TargetDef,
}

struct NamespaceInner {
    def: NamespaceDef,
    roots: Vec<Parsed>,
    links: Vec<Parsed>,
    log: Mutex<Vec<LoggedRequest>>,
}

fn parse_all(defs: &[TargetDef]) -> Result<Vec<Parsed>> {
    defs.iter()
        .map(|d| {
            Ok(Parsed {
                prefix: SmbPath::parse(&d.path)?,
                def: d.clone(),
            })
        })
        .collect()
}

// Bytes of UTF-16 the first `n` components of `path` occupy, leading
// separator included.
fn consumed_bytes(path: &SmbPath, n: usize) -> u16 {
    let units = path.truncate(n).to_string().encode_utf16().count();
    (units * 2).min(u16::MAX as usize) as u16
}

fn classify(path: &str) -> ReferralType {
    match SmbPath::parse(path) {
        Err(_) => ReferralType::Dc,
        Ok(p) if p.has_single_component() => ReferralType::Dc,
        Ok(p) if p.len() == 2 && p.is_sysvol_or_netlogon() => ReferralType::Sysvol,
        Ok(p) if p.len() == 2 => ReferralType::Root,
        Ok(_) => ReferralType::Link,
    }
}

impl NamespaceInner {
    fn is_offline(&self, host: &str) -> bool {
        self.def.offline.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    fn domain(&self, name: &str) -> Option<&DomainDef> {
        self.def
            .domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    fn record(&self, request: LoggedRequest) {
        if let Ok(mut log) = self.log.lock() {
            log.push(request);
        }
    }

    fn answer(&self, request: &ReferralRequest) -> std::result::Result<ReferralResponse, NtStatus> {
        let version = request.max_referral_level.min(4);
        if request.path.is_empty() {
            let records = self
                .def
                .domains
                .iter()
                .map(|d| ReferralRecord::name_list(d.ttl, format!("\\{}", d.name), vec![]))
                .collect::<Vec<_>>();
            if records.is_empty() {
                return Err(NtStatus::NOT_FOUND);
            }
            return Ok(ReferralResponse::new(0, 0, records));
        }

        let path = SmbPath::parse(&request.path).map_err(|_| NtStatus::INVALID_PARAMETER)?;

        if path.has_single_component() {
            let domain = self.domain(path.host()).ok_or(NtStatus::NO_SUCH_DOMAIN)?;
            if version < 3 {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            let names = domain.dcs.iter().map(|dc| format!("\\{}", dc)).collect();
            return Ok(ReferralResponse::new(
                0,
                0,
                vec![ReferralRecord::name_list(
                    domain.ttl,
                    format!("\\{}", domain.name),
                    names,
                )],
            ));
        }

        if path.is_sysvol_or_netlogon() {
            if let Some(domain) = self.domain(path.host()) {
                let share = path.share().unwrap_or_default();
                let prefix = path.truncate(2).to_string();
                let records = domain
                    .dcs
                    .iter()
                    .map(|dc| {
                        ReferralRecord::target(
                            version,
                            ServerType::Link,
                            domain.ttl,
                            prefix.clone(),
                            format!("\\{}\\{}", dc, share),
                        )
                    })
                    .collect::<Vec<_>>();
                if records.is_empty() {
                    return Err(NtStatus::NOT_FOUND);
                }
                return Ok(ReferralResponse::new(
                    consumed_bytes(&path, 2),
                    ReferralHeaderFlags::STORAGE_SERVERS,
                    records,
                ));
            }
        }

        let link = self
            .links
            .iter()
            .filter(|l| l.prefix.is_prefix_of(&path))
            .max_by_key(|l| l.prefix.len());
        if let Some(link) = link {
            let flags = if link.def.interlink {
                ReferralHeaderFlags::REFERRAL_SERVERS
            } else {
                ReferralHeaderFlags::STORAGE_SERVERS
            };
            return Ok(self.targets(&path, link, ServerType::Link, flags, version));
        }

        let root = self.roots.iter().find(|r| r.prefix.is_prefix_of(&path));
        match root {
            Some(root) => Ok(self.targets(
                &path,
                root,
                ServerType::Root,
                ReferralHeaderFlags::REFERRAL_SERVERS | ReferralHeaderFlags::STORAGE_SERVERS,
                version,
            )),
            None => Err(NtStatus::NOT_FOUND),
        }
    }

    fn targets(
        &self,
        path: &SmbPath,
        entry: &Parsed,
        server_type: ServerType,
        flags: u32,
        version: u16,
    ) -> ReferralResponse {
        let prefix = entry.prefix.to_string();
        let records = entry
            .def
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let record =
                    ReferralRecord::target(version, server_type, entry.def.ttl, prefix.clone(), t);
                if i == 0 && version >= 4 {
                    record.with_target_set_boundary()
                } else {
                    record
                }
            })
            .collect();
        ReferralResponse::new(consumed_bytes(path, entry.prefix.len()), flags, records)
    }
}

/// Shared in-memory namespace; clones share state and the request log.
#[derive(Clone)]
pub struct NamespaceServer {
    inner: Arc<NamespaceInner>,
}

impl NamespaceServer {
    /// Builds a server over `def`.
    pub fn new(def: NamespaceDef) -> Result<Self> {
        let roots = parse_all(&def.roots)?;
        let links = parse_all(&def.links)?;
        Ok(Self {
            inner: Arc::new(NamespaceInner {
                def,
                roots,
                links,
                log: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Builds a server from a JSON definition.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(NamespaceDef::from_json(json)?)
    }

    /// The loaded definition.
    pub fn definition(&self) -> &NamespaceDef {
        &self.inner.def
    }

    /// A session to `host` without going through [`Connector`].
    pub fn session(&self, host: &str, credentials: Credentials) -> Arc<dyn Session> {
        Arc::new(MemorySession {
            host: host.to_string(),
            credentials,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Every referral received so far, oldest first.
    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.inner
            .log
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Number of referrals received.
    pub fn request_count(&self) -> usize {
        self.inner.log.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Number of referrals received of `referral_type`.
    pub fn count_of(&self, referral_type: ReferralType) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.referral_type == referral_type)
            .count()
    }

    /// Forgets the request log.
    pub fn clear_log(&self) {
        if let Ok(mut log) = self.inner.log.lock() {
            log.clear();
        }
    }
}

#[async_trait]
impl Connector for NamespaceServer {
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> std::result::Result<Arc<dyn Session>, ExchangeError> {
        if self.inner.is_offline(host) {
            return Err(ExchangeError::Transport {
                host: host.to_string(),
                status: NtStatus::BAD_NETWORK_NAME,
                reason: "host is offline".to_string(),
            });
        }
        Ok(self.session(host, credentials.clone()))
    }
}

struct MemorySession {
    host: String,
    credentials: Credentials,
    inner: Arc<NamespaceInner>,
}

#[async_trait]
impl Session for MemorySession {
    fn server_name(&self) -> &str {
        &self.host
    }

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn connect_share(
        &self,
        share_name: &str,
    ) -> std::result::Result<Arc<dyn Share>, ExchangeError> {
        if self.inner.is_offline(&self.host) || !share_name.eq_ignore_ascii_case(IPC_SHARE) {
            return Err(ExchangeError::Transport {
                host: self.host.clone(),
                status: NtStatus::BAD_NETWORK_NAME,
                reason: format!("cannot connect to {}", share_name),
            });
        }
        Ok(Arc::new(MemoryShare {
            host: self.host.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryShare {
    host: String,
    inner: Arc<NamespaceInner>,
}

#[async_trait]
impl Share for MemoryShare {
    fn share_name(&self) -> &str {
        IPC_SHARE
    }

    async fn send_ioctl(
        &self,
        ctl_code: u32,
        is_fsctl: bool,
        input: Bytes,
        max_output_response: u32,
    ) -> std::result::Result<IoctlResponse, ExchangeError> {
        if !is_fsctl
            || (ctl_code != FSCTL_DFS_GET_REFERRALS && ctl_code != FSCTL_DFS_GET_REFERRALS_EX)
        {
            return Ok(IoctlResponse::error(NtStatus::INVALID_PARAMETER));
        }
        let mut request = match ReferralRequest::decode_for(ctl_code, input, ReferralType::Root) {
            Ok(r) => r,
            Err(_) => return Ok(IoctlResponse::error(NtStatus::INVALID_PARAMETER)),
        };
        request.referral_type = classify(&request.path);
        self.inner.record(LoggedRequest {
            host: self.host.clone(),
            referral_type: request.referral_type,
            path: request.path.clone(),
            site_name: request.site_name.clone(),
        });

        let resp = match self.inner.answer(&request) {
            Ok(resp) => resp,
            Err(status) => {
                debug!("namespace: {} '{}' -> {}", self.host, request.path, status);
                return Ok(IoctlResponse::error(status));
            }
        };
        let output = resp.encode().map_err(ExchangeError::from)?;
        if output.len() > max_output_response as usize {
            return Ok(IoctlResponse::error(NtStatus::BUFFER_OVERFLOW));
        }
        debug!(
            "namespace: {} '{}' -> {} records",
            self.host,
            request.path,
            resp.records.len()
        );
        Ok(IoctlResponse::ok(output))
    }
}
