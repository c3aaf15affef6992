//! DFS resolver: turns a UNC path into the path on the server that backs it.
//!
//! Resolution follows the fourteen-step client procedure of MS-DFSC 3.1.4.1.
//! Steps are variants of [`Step`] driven by a loop rather than recursive
//! calls, so a referral chain of any shape runs in constant stack. Interlink
//! traversals are counted and bounded by `max_interlink_hops`.
//!
//! ```text
//!  1 single component / IPC$ ------------------------------> 12
//!  2 referral cache lookup: miss, expired root -------------> 5
//!                           expired link -------------------> 9
//!                           root -> 3, link -> 4
//!  3 rewrite with target hint ------------------------------> 8
//!  4 SYSVOL/NETLOGON -> 3, interlink -> 11, else -> 3
//!  5 domain cache: miss -> 6 (first component is the host)
//!                  no DC hint -> DC referral (fail -> 13)
//!                  SYSVOL/NETLOGON -> 10, else -> 6 via DC
//!  6 ROOT referral: ok -> 7, fail -> 13 | 14 | 12
//!  7 root -> 3, link -> 4
//!  9 LINK referral via root target: ok -> 7, fail -> 14
//! 10 SYSVOL referral via DC: ok -> 3, fail -> 13
//! 11 rewrite, hops += 1 -----------------------------------> 2
//! ```

use smbdfs_proto::{NtStatus, ReferralRequest, ReferralResponse, ReferralType};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DfsConfig;
use crate::domain_cache::{DomainCache, DomainCacheEntry};
use crate::error::{DfsError, ExchangeError, Result};
use crate::exchange::ReferralExchange;
use crate::path::SmbPath;
use crate::referral_cache::{EntryKind, ReferralCache, ReferralCacheEntry};
use crate::session::Session;
use crate::stats::ResolverStats;

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Path to issue I/O against
    pub path: SmbPath,
    /// True when any referral rewrote the path
    pub is_dfs: bool,
    /// Entry whose target produced `path`, when DFS
    pub entry: Option<Arc<ReferralCacheEntry>>,
    /// Index of the target used within `entry`
    pub target_index: usize,
}

impl ResolvedPath {
    /// A path outside any DFS namespace, used as-is.
    pub fn not_dfs(path: SmbPath) -> Self {
        Self {
            path,
            is_dfs: false,
            entry: None,
            target_index: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    Lookup,
    Rewrite,
    LinkHit,
    Domain,
    RootReferral,
    Referred,
    LinkReferral,
    Sysvol,
    Interlink,
    NotDfs,
    DomainFailure,
    ReferralFailure,
}

// Per-call state; never shared.
struct ResolveState {
    original: SmbPath,
    path: SmbPath,
    is_dfs_path: bool,
    resolved_via_domain_entry: bool,
    host_name: Option<String>,
    dc_hint: Option<String>,
    entry: Option<Arc<ReferralCacheEntry>>,
    target_index: usize,
    hops: usize,
    reactive: bool,
    last_status: NtStatus,
}

impl ResolveState {
    fn new(path: &SmbPath, reactive: bool) -> Self {
        Self {
            original: path.clone(),
            path: path.clone(),
            is_dfs_path: false,
            resolved_via_domain_entry: false,
            host_name: None,
            dc_hint: None,
            entry: None,
            target_index: 0,
            hops: 0,
            reactive,
            last_status: NtStatus::SUCCESS,
        }
    }

    // Reactive handling only applies to the lookup of the path that failed.
    fn take_reactive(&mut self) -> bool {
        std::mem::replace(&mut self.reactive, false)
    }
}

/// The resolver. Cheap to share behind an `Arc`; all state lives in the
/// two caches.
pub struct DfsResolver {
    config: DfsConfig,
    referral_cache: Arc<ReferralCache>,
    domain_cache: Arc<DomainCache>,
    exchange: Arc<dyn ReferralExchange>,
    stats: Arc<ResolverStats>,
}

impl DfsResolver {
    /// Resolver with fresh caches seeded with `config.known_domains`.
    pub fn new(config: DfsConfig, exchange: Arc<dyn ReferralExchange>) -> Self {
        let domain_cache = DomainCache::with_domains(config.known_domains.iter().cloned());
        Self::with_caches(
            config,
            exchange,
            Arc::new(ReferralCache::new()),
            Arc::new(domain_cache),
        )
    }

    /// Builds a resolver over caches shared with other resolvers.
    pub fn with_caches(
        config: DfsConfig,
        exchange: Arc<dyn ReferralExchange>,
        referral_cache: Arc<ReferralCache>,
        domain_cache: Arc<DomainCache>,
    ) -> Self {
        Self {
            config,
            referral_cache,
            domain_cache,
            exchange,
            stats: Arc::new(ResolverStats::new()),
        }
    }

    /// Resolver configuration.
    pub fn config(&self) -> &DfsConfig {
        &self.config
    }

    /// Shared referral cache.
    pub fn referral_cache(&self) -> &Arc<ReferralCache> {
        &self.referral_cache
    }

    /// Shared domain cache.
    pub fn domain_cache(&self) -> &Arc<DomainCache> {
        &self.domain_cache
    }

    /// Resolution counters.
    pub fn stats(&self) -> &Arc<ResolverStats> {
        &self.stats
    }

    /// Resolves `path` before an operation is issued.
    pub async fn resolve(&self, session: &dyn Session, path: &SmbPath) -> Result<ResolvedPath> {
        self.run(session, path, false).await
    }

    /// Resolves `path` after an operation on it failed with `status`.
    ///
    /// PATH_NOT_COVERED means the cached view is stale or incomplete: a
    /// cached root match triggers a LINK referral to discover the link the
    /// server is pointing at, and a cached link match is refreshed. The
    /// referral goes through the root's current target. If it fails the
    /// result is [`DfsError::Referral`]; this call never rotates targets,
    /// which is left to [`DfsPathResolver::run_with_failover`]. Any other
    /// status behaves like [`resolve`](Self::resolve).
    ///
    /// [`DfsPathResolver::run_with_failover`]: crate::DfsPathResolver::run_with_failover
    pub async fn resolve_after(
        &self,
        session: &dyn Session,
        path: &SmbPath,
        status: NtStatus,
    ) -> Result<ResolvedPath> {
        self.run(session, path, status.is_path_not_covered()).await
    }

    /// Learns the trusted domains from a domain-list referral sent to the
    /// session's host. Known domains keep their DC hints.
    pub async fn refresh_domains(&self, session: &dyn Session) -> Result<usize> {
        let host = session.server_name().to_string();
        let request = self.request(ReferralType::Dc, String::new());
        let resp = self
            .send(session, &host, &request)
            .await
            .map_err(|e| DfsError::DomainResolution {
                path: String::new(),
                status: e.status(),
            })?;
        let entries = DomainCacheEntry::from_domain_list(&resp);
        let count = entries.len();
        for entry in entries {
            self.domain_cache.put_if_absent(entry);
        }
        info!("resolver: learned {} domains from {}", count, host);
        Ok(count)
    }

    fn request(&self, referral_type: ReferralType, path: String) -> ReferralRequest {
        let request =
            ReferralRequest::new(referral_type, path).with_max_level(self.config.max_referral_level);
        match &self.config.site_name {
            Some(site) => request.with_site_name(site.clone()),
            None => request,
        }
    }

    async fn send(
        &self,
        session: &dyn Session,
        host: &str,
        request: &ReferralRequest,
    ) -> std::result::Result<ReferralResponse, ExchangeError> {
        self.stats.record_referral(request.referral_type);
        let result = self.exchange.send_referral(session, host, request).await;
        if let Err(e) = &result {
            self.stats.record_referral_failure();
            warn!(
                "resolver: {} referral for '{}' to {} failed: {}",
                request.referral_type, request.path, host, e
            );
        }
        result
    }

    // Sends a target referral and publishes the resulting entry.
    async fn refer(
        &self,
        session: &dyn Session,
        host: &str,
        referral_type: ReferralType,
        path: &SmbPath,
    ) -> std::result::Result<Arc<ReferralCacheEntry>, ExchangeError> {
        let request = self.request(referral_type, path.to_string());
        let resp = self.send(session, host, &request).await?;
        let entry = ReferralCacheEntry::from_response(
            &request,
            &resp,
            &self.domain_cache,
            self.config.v1_default_ttl_secs,
        )
        .map_err(|e| {
            self.stats.record_referral_failure();
            warn!("resolver: rejected {} referral from {}: {}", referral_type, host, e);
            e
        })?;
        Ok(self.referral_cache.put(entry))
    }

    async fn run(
        &self,
        session: &dyn Session,
        path: &SmbPath,
        reactive: bool,
    ) -> Result<ResolvedPath> {
        self.stats.record_resolution();
        let mut st = ResolveState::new(path, reactive);
        let mut step = Step::Start;

        loop {
            debug!("resolver: step {:?} path {}", step, st.path);
            step = match step {
                // 1
                Step::Start => {
                    if st.path.has_single_component() || st.path.is_ipc() {
                        Step::NotDfs
                    } else {
                        Step::Lookup
                    }
                }

                // 2
                Step::Lookup => self.step_lookup(&mut st),

                // 3 and 8
                Step::Rewrite => {
                    self.rewrite(&mut st)?;
                    return Ok(ResolvedPath {
                        path: st.path,
                        is_dfs: true,
                        entry: st.entry,
                        target_index: st.target_index,
                    });
                }

                // 4
                Step::LinkHit => {
                    let interlink = st.entry.as_ref().map(|e| e.is_interlink()).unwrap_or(false);
                    if st.path.is_sysvol_or_netlogon() || !interlink {
                        Step::Rewrite
                    } else {
                        Step::Interlink
                    }
                }

                // 5
                Step::Domain => self.step_domain(session, &mut st).await,

                // 6
                Step::RootReferral => {
                    let host = match st.host_name.clone() {
                        Some(h) => h,
                        None => st.path.host().to_string(),
                    };
                    let root = st.path.truncate(2);
                    match self.refer(session, &host, ReferralType::Root, &root).await {
                        Ok(entry) => {
                            st.entry = Some(entry);
                            Step::Referred
                        }
                        Err(e) => {
                            st.last_status = e.status();
                            if st.resolved_via_domain_entry {
                                Step::DomainFailure
                            } else if st.is_dfs_path {
                                Step::ReferralFailure
                            } else {
                                Step::NotDfs
                            }
                        }
                    }
                }

                // 7
                Step::Referred => match st.entry.as_ref().map(|e| e.kind()) {
                    Some(EntryKind::Root) => Step::Rewrite,
                    _ => Step::LinkHit,
                },

                // 9
                Step::LinkReferral => self.step_link_referral(session, &mut st).await,

                // 10
                Step::Sysvol => {
                    let Some(dc) = st.dc_hint.clone() else {
                        st.last_status = NtStatus::CANT_ACCESS_DOMAIN_INFO;
                        return Err(self.domain_failure(&st));
                    };
                    let sysvol = st.path.truncate(2);
                    match self.refer(session, &dc, ReferralType::Sysvol, &sysvol).await {
                        Ok(entry) => {
                            st.entry = Some(entry);
                            Step::Rewrite
                        }
                        Err(e) => {
                            st.last_status = e.status();
                            Step::DomainFailure
                        }
                    }
                }

                // 11
                Step::Interlink => {
                    st.hops += 1;
                    if st.hops > self.config.max_interlink_hops {
                        warn!(
                            "resolver: interlink limit {} exceeded at {}",
                            self.config.max_interlink_hops, st.path
                        );
                        return Err(DfsError::InterlinkLimit {
                            path: st.original.to_string(),
                            hops: self.config.max_interlink_hops,
                        });
                    }
                    self.stats.record_interlink();
                    self.rewrite(&mut st)?;
                    st.resolved_via_domain_entry = false;
                    st.host_name = None;
                    st.dc_hint = None;
                    Step::Lookup
                }

                // 12
                Step::NotDfs => {
                    self.stats.record_not_dfs();
                    debug!("resolver: {} is not a DFS path", st.original);
                    return Ok(ResolvedPath::not_dfs(st.original));
                }

                // 13
                Step::DomainFailure => return Err(self.domain_failure(&st)),

                // 14
                Step::ReferralFailure => {
                    return Err(DfsError::Referral {
                        path: st.original.to_string(),
                        status: st.last_status,
                    })
                }
            };
        }
    }

    fn domain_failure(&self, st: &ResolveState) -> DfsError {
        DfsError::DomainResolution {
            path: st.original.to_string(),
            status: st.last_status,
        }
    }

    fn rewrite(&self, st: &mut ResolveState) -> Result<()> {
        let entry = st.entry.as_ref().ok_or_else(|| DfsError::InvalidPath {
            reason: format!("no referral to rewrite {}", st.path),
        })?;
        let index = entry.target_hint_index();
        let target = &entry.targets()[index].target_path;
        let rewritten = st.path.replace_prefix(entry.path_prefix(), target)?;
        debug!("resolver: {} -> {}", st.path, rewritten);
        st.path = rewritten;
        st.target_index = index;
        st.is_dfs_path = true;
        Ok(())
    }

    fn step_lookup(&self, st: &mut ResolveState) -> Step {
        let reactive = st.take_reactive();
        let Some(entry) = self.referral_cache.lookup(&st.path) else {
            self.stats.record_cache_miss();
            return Step::Domain;
        };
        let expired = entry.is_expired();
        let kind = entry.kind();
        st.entry = Some(entry);

        if reactive {
            debug!("resolver: not covered, refreshing below {}", st.path);
            self.stats.record_cache_miss();
            return Step::LinkReferral;
        }
        match (kind, expired) {
            (EntryKind::Root, true) => {
                self.stats.record_cache_miss();
                Step::Domain
            }
            (EntryKind::Link, true) => {
                self.stats.record_cache_miss();
                Step::LinkReferral
            }
            (EntryKind::Root, false) => {
                self.stats.record_cache_hit();
                Step::Rewrite
            }
            (EntryKind::Link, false) => {
                self.stats.record_cache_hit();
                Step::LinkHit
            }
        }
    }

    async fn step_domain(&self, session: &dyn Session, st: &mut ResolveState) -> Step {
        let domain_name = st.path.host().to_string();
        let Some(mut domain) = self.domain_cache.lookup(&domain_name) else {
            st.host_name = Some(domain_name);
            return Step::RootReferral;
        };
        st.resolved_via_domain_entry = true;

        if !domain.has_valid_hint() {
            let host = session.server_name().to_string();
            let request = self.request(ReferralType::Dc, format!("\\{}", domain_name));
            let parsed = match self.send(session, &host, &request).await {
                Ok(resp) => DomainCacheEntry::from_dc_response(domain.domain_name(), &resp),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(entry) => domain = self.domain_cache.put(entry),
                Err(e) => {
                    warn!("resolver: no DC for domain {}: {}", domain_name, e);
                    st.last_status = e.status();
                    return Step::DomainFailure;
                }
            }
        }

        st.dc_hint = domain.dc_hint().map(str::to_string);
        if st.path.is_sysvol_or_netlogon() {
            return Step::Sysvol;
        }
        st.host_name = st.dc_hint.clone();
        Step::RootReferral
    }

    async fn step_link_referral(&self, session: &dyn Session, st: &mut ResolveState) -> Step {
        let stale = st.entry.take();
        let root_prefix = st.path.truncate(2);
        let root = self
            .referral_cache
            .get(&root_prefix)
            .filter(|e| e.is_root());

        let Some(root) = root else {
            if let Some(stale) = stale {
                debug!(
                    "resolver: no root for {}, dropping {}",
                    root_prefix,
                    stale.path_prefix()
                );
                self.referral_cache.clear(stale.path_prefix());
            }
            return Step::Start;
        };

        let host = root.target_hint().target_path.host().to_string();
        let path = st.path.clone();
        match self.refer(session, &host, ReferralType::Link, &path).await {
            Ok(entry) => {
                st.entry = Some(entry);
                Step::Referred
            }
            Err(e) => {
                st.last_status = e.status();
                st.is_dfs_path = true;
                Step::ReferralFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Credentials, Share};
    use async_trait::async_trait;
    use smbdfs_proto::{ReferralHeaderFlags, ReferralRecord, ServerType};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct TestSession {
        credentials: Credentials,
    }

    #[async_trait]
    impl Session for TestSession {
        fn server_name(&self) -> &str {
            "DC0"
        }

        fn credentials(&self) -> &Credentials {
            &self.credentials
        }

        async fn connect_share(
            &self,
            _share_name: &str,
        ) -> std::result::Result<Arc<dyn Share>, ExchangeError> {
            Err(ExchangeError::Transport {
                host: "DC0".to_string(),
                status: NtStatus::ACCESS_DENIED,
                reason: "not used".to_string(),
            })
        }
    }

    fn session() -> TestSession {
        TestSession {
            credentials: Credentials::anonymous(),
        }
    }

    // Replies keyed by (type, lower-cased host, lower-cased path).
    #[derive(Default)]
    struct ScriptedExchange {
        replies: Mutex<HashMap<(ReferralType, String, String), ReferralResponse>>,
        log: Mutex<Vec<(ReferralType, String, String)>>,
    }

    impl ScriptedExchange {
        fn reply(&self, ty: ReferralType, host: &str, path: &str, resp: ReferralResponse) {
            self.replies
                .lock()
                .unwrap()
                .insert((ty, host.to_lowercase(), path.to_lowercase()), resp);
        }

        fn calls(&self) -> Vec<(ReferralType, String, String)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReferralExchange for ScriptedExchange {
        async fn send_referral(
            &self,
            _session: &dyn Session,
            host: &str,
            request: &ReferralRequest,
        ) -> std::result::Result<ReferralResponse, ExchangeError> {
            self.log.lock().unwrap().push((
                request.referral_type,
                host.to_string(),
                request.path.clone(),
            ));
            let key = (
                request.referral_type,
                host.to_lowercase(),
                request.path.to_lowercase(),
            );
            self.replies
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or(ExchangeError::Failed {
                    referral_type: request.referral_type,
                    host: host.to_string(),
                    status: NtStatus::NOT_FOUND,
                })
        }
    }

    fn p(s: &str) -> SmbPath {
        SmbPath::parse(s).unwrap()
    }

    fn consumed(s: &str) -> u16 {
        (s.encode_utf16().count() * 2) as u16
    }

    fn root_resp(prefix: &str, ttl: u32, targets: &[&str]) -> ReferralResponse {
        ReferralResponse::new(
            consumed(prefix),
            ReferralHeaderFlags::REFERRAL_SERVERS | ReferralHeaderFlags::STORAGE_SERVERS,
            targets
                .iter()
                .map(|t| ReferralRecord::target(4, ServerType::Root, ttl, prefix, *t))
                .collect(),
        )
    }

    fn link_resp(prefix: &str, interlink: bool, targets: &[&str]) -> ReferralResponse {
        let flags = if interlink {
            ReferralHeaderFlags::REFERRAL_SERVERS
        } else {
            ReferralHeaderFlags::STORAGE_SERVERS
        };
        ReferralResponse::new(
            consumed(prefix),
            flags,
            targets
                .iter()
                .map(|t| ReferralRecord::target(4, ServerType::Link, 300, prefix, *t))
                .collect(),
        )
    }

    fn dc_resp(domain: &str, dcs: &[&str]) -> ReferralResponse {
        ReferralResponse::new(
            0,
            0,
            vec![ReferralRecord::name_list(
                600,
                format!("\\{}", domain),
                dcs.iter().map(|d| format!("\\{}", d)).collect(),
            )],
        )
    }

    fn resolver(exchange: &Arc<ScriptedExchange>, config: DfsConfig) -> DfsResolver {
        DfsResolver::new(config, exchange.clone())
    }

    #[tokio::test]
    async fn test_single_component_passes_through() {
        let exchange = Arc::new(ScriptedExchange::default());
        let r = resolver(&exchange, DfsConfig::default());
        let out = r.resolve(&session(), &p("\\\\ACME")).await.unwrap();
        assert!(!out.is_dfs);
        assert_eq!(out.path, p("\\\\ACME"));
        assert!(exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ipc_passes_through() {
        let exchange = Arc::new(ScriptedExchange::default());
        let r = resolver(&exchange, DfsConfig::default());
        let out = r.resolve(&session(), &p("\\\\SRV\\IPC$\\srvsvc")).await.unwrap();
        assert_eq!(out.path, p("\\\\SRV\\IPC$\\srvsvc"));
        assert!(exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cold_root_resolution_then_cached() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "ACME",
            "\\ACME\\DFSROOT",
            root_resp("\\ACME\\DFSROOT", 300, &["\\SRV1\\SHARE1"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        let path = p("\\ACME\\DFSROOT\\docs\\readme.txt");

        let out = r.resolve(&session(), &path).await.unwrap();
        assert!(out.is_dfs);
        assert_eq!(out.path.to_string(), "\\SRV1\\SHARE1\\docs\\readme.txt");
        assert_eq!(exchange.calls().len(), 1);

        let again = r.resolve(&session(), &path).await.unwrap();
        assert_eq!(again.path, out.path);
        assert_eq!(exchange.calls().len(), 1);
        assert_eq!(r.stats().snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_non_dfs_share_returns_original() {
        let exchange = Arc::new(ScriptedExchange::default());
        let r = resolver(&exchange, DfsConfig::default());
        let path = p("\\SRV\\data\\file");
        let out = r.resolve(&session(), &path).await.unwrap();
        assert!(!out.is_dfs);
        assert_eq!(out.path, path);
        assert_eq!(
            exchange.calls(),
            vec![(ReferralType::Root, "SRV".to_string(), "\\SRV\\data".to_string())]
        );
    }

    #[tokio::test]
    async fn test_expired_root_refreshed() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "D",
            "\\D\\R",
            root_resp("\\D\\R", 0, &["\\S\\X"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        r.resolve(&session(), &p("\\D\\R\\a")).await.unwrap();
        let out = r.resolve(&session(), &p("\\D\\R\\a\\b")).await.unwrap();
        assert_eq!(out.path, p("\\S\\X\\a\\b"));
        assert_eq!(exchange.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_root_refresh_failure_is_not_dfs() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "D",
            "\\D\\R",
            root_resp("\\D\\R", 0, &["\\S\\X"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        r.resolve(&session(), &p("\\D\\R\\a")).await.unwrap();
        assert!(r.referral_cache().lookup(&p("\\D\\R\\a")).unwrap().is_expired());

        // the root stops answering referrals
        exchange.replies.lock().unwrap().clear();
        let before = exchange.calls().len();
        let original = p("\\D\\R\\a\\b");
        let out = r.resolve(&session(), &original).await.unwrap();

        assert!(!out.is_dfs);
        assert_eq!(out.path, original);
        assert!(out.entry.is_none());
        let calls = exchange.calls();
        assert_eq!(
            &calls[before..],
            &[(ReferralType::Root, "D".to_string(), "\\D\\R".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_reactive_link_referral_is_referral_error() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "D",
            "\\D\\R",
            root_resp("\\D\\R", 300, &["\\S1\\X", "\\S2\\X"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        let p1 = p("\\D\\R\\a");
        r.resolve(&session(), &p1).await.unwrap();

        let err = r
            .resolve_after(&session(), &p1, NtStatus::PATH_NOT_COVERED)
            .await
            .unwrap_err();
        assert!(matches!(err, DfsError::Referral { .. }));
        assert_eq!(err.status(), NtStatus::NOT_FOUND);
        assert_eq!(
            exchange.calls().last().unwrap(),
            &(ReferralType::Link, "S1".to_string(), "\\D\\R\\a".to_string())
        );
        // the root keeps its hint
        let root = r.referral_cache().get(&p("\\D\\R")).unwrap();
        assert_eq!(root.target_hint_index(), 0);
    }

    #[tokio::test]
    async fn test_domain_root_via_dc() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(ReferralType::Dc, "DC0", "\\ACME", dc_resp("ACME", &["dc1.acme"]));
        exchange.reply(
            ReferralType::Root,
            "dc1.acme",
            "\\ACME\\NS",
            root_resp("\\ACME\\NS", 300, &["\\FS1\\ns"]),
        );
        let config = DfsConfig {
            known_domains: vec!["ACME".to_string()],
            ..DfsConfig::default()
        };
        let r = resolver(&exchange, config);
        let out = r.resolve(&session(), &p("\\ACME\\NS\\f")).await.unwrap();
        assert_eq!(out.path, p("\\FS1\\ns\\f"));
        assert_eq!(
            r.domain_cache().lookup("acme").unwrap().dc_hint(),
            Some("dc1.acme")
        );
    }

    #[tokio::test]
    async fn test_domain_dc_failure_is_domain_resolution_error() {
        let exchange = Arc::new(ScriptedExchange::default());
        let config = DfsConfig {
            known_domains: vec!["ACME".to_string()],
            ..DfsConfig::default()
        };
        let r = resolver(&exchange, config);
        let err = r.resolve(&session(), &p("\\ACME\\NS\\f")).await.unwrap_err();
        assert!(matches!(err, DfsError::DomainResolution { .. }));
        assert_eq!(err.status(), NtStatus::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_root_failure_via_domain_is_domain_resolution_error() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(ReferralType::Dc, "DC0", "\\ACME", dc_resp("ACME", &["dc1"]));
        let config = DfsConfig {
            known_domains: vec!["ACME".to_string()],
            ..DfsConfig::default()
        };
        let r = resolver(&exchange, config);
        let err = r.resolve(&session(), &p("\\ACME\\NS\\f")).await.unwrap_err();
        assert!(matches!(err, DfsError::DomainResolution { .. }));
    }

    #[tokio::test]
    async fn test_sysvol_via_dc() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(ReferralType::Dc, "DC0", "\\ACME", dc_resp("ACME", &["dc1"]));
        exchange.reply(
            ReferralType::Sysvol,
            "dc1",
            "\\ACME\\SYSVOL",
            link_resp("\\ACME\\SYSVOL", false, &["\\dc1\\SYSVOL"]),
        );
        let config = DfsConfig {
            known_domains: vec!["ACME".to_string()],
            ..DfsConfig::default()
        };
        let r = resolver(&exchange, config);
        let out = r
            .resolve(&session(), &p("\\ACME\\SYSVOL\\acme\\Policies"))
            .await
            .unwrap();
        assert_eq!(out.path, p("\\dc1\\SYSVOL\\acme\\Policies"));
        let types: Vec<ReferralType> = exchange.calls().iter().map(|c| c.0).collect();
        assert_eq!(types, vec![ReferralType::Dc, ReferralType::Sysvol]);
    }

    #[tokio::test]
    async fn test_sysvol_failure_is_domain_resolution_error() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(ReferralType::Dc, "DC0", "\\ACME", dc_resp("ACME", &["dc1"]));
        let config = DfsConfig {
            known_domains: vec!["ACME".to_string()],
            ..DfsConfig::default()
        };
        let r = resolver(&exchange, config);
        let err = r
            .resolve(&session(), &p("\\ACME\\NETLOGON\\x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DfsError::DomainResolution { .. }));
    }

    #[tokio::test]
    async fn test_interlink_reresolved() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "OTHER",
            "\\OTHER\\NS2",
            root_resp("\\OTHER\\NS2", 300, &["\\FS9\\data"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        r.referral_cache().put(
            ReferralCacheEntry::from_response(
                &ReferralRequest::new(ReferralType::Link, "\\ACME\\DFSROOT\\link1"),
                &link_resp("\\ACME\\DFSROOT\\link1", true, &["\\OTHER\\NS2\\sub"]),
                r.domain_cache(),
                300,
            )
            .unwrap(),
        );
        let out = r
            .resolve(&session(), &p("\\ACME\\DFSROOT\\link1\\x"))
            .await
            .unwrap();
        assert_eq!(out.path, p("\\FS9\\data\\sub\\x"));
        assert_eq!(r.stats().snapshot().interlinks, 1);
        assert_eq!(exchange.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_interlink_cycle_bounded() {
        let exchange = Arc::new(ScriptedExchange::default());
        let config = DfsConfig {
            max_interlink_hops: 3,
            ..DfsConfig::default()
        };
        let r = resolver(&exchange, config);
        for (from, to) in [("\\A\\R\\l", "\\B\\R\\l"), ("\\B\\R\\l", "\\A\\R\\l")] {
            r.referral_cache().put(
                ReferralCacheEntry::new(
                    p(from),
                    EntryKind::Link,
                    true,
                    300,
                    vec![crate::referral_cache::TargetSetEntry {
                        target_path: p(to),
                        is_set_boundary: false,
                    }],
                )
                .unwrap(),
            );
        }
        let err = r.resolve(&session(), &p("\\A\\R\\l\\x")).await.unwrap_err();
        assert!(matches!(err, DfsError::InterlinkLimit { hops: 3, .. }));
        assert!(exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn test_expired_link_refreshed_via_root_target() {
        let exchange = Arc::new(ScriptedExchange::default());
        let r = resolver(&exchange, DfsConfig::default());
        r.referral_cache().put(
            ReferralCacheEntry::from_response(
                &ReferralRequest::new(ReferralType::Root, "\\D\\R"),
                &root_resp("\\D\\R", 300, &["\\RS1\\R"]),
                r.domain_cache(),
                300,
            )
            .unwrap(),
        );
        r.referral_cache().put(
            ReferralCacheEntry::new(
                p("\\D\\R\\l"),
                EntryKind::Link,
                false,
                0,
                vec![crate::referral_cache::TargetSetEntry {
                    target_path: p("\\OLD\\x"),
                    is_set_boundary: false,
                }],
            )
            .unwrap(),
        );
        exchange.reply(
            ReferralType::Link,
            "RS1",
            "\\D\\R\\l\\f",
            link_resp("\\D\\R\\l", false, &["\\NEW\\x"]),
        );
        let out = r.resolve(&session(), &p("\\D\\R\\l\\f")).await.unwrap();
        assert_eq!(out.path, p("\\NEW\\x\\f"));
    }

    #[tokio::test]
    async fn test_expired_link_failure_is_referral_error() {
        let exchange = Arc::new(ScriptedExchange::default());
        let r = resolver(&exchange, DfsConfig::default());
        r.referral_cache().put(
            ReferralCacheEntry::from_response(
                &ReferralRequest::new(ReferralType::Root, "\\D\\R"),
                &root_resp("\\D\\R", 300, &["\\RS1\\R"]),
                r.domain_cache(),
                300,
            )
            .unwrap(),
        );
        r.referral_cache().put(
            ReferralCacheEntry::new(
                p("\\D\\R\\l"),
                EntryKind::Link,
                false,
                0,
                vec![crate::referral_cache::TargetSetEntry {
                    target_path: p("\\OLD\\x"),
                    is_set_boundary: false,
                }],
            )
            .unwrap(),
        );
        let err = r.resolve(&session(), &p("\\D\\R\\l\\f")).await.unwrap_err();
        assert!(matches!(err, DfsError::Referral { .. }));
    }

    #[tokio::test]
    async fn test_expired_link_without_root_restarts() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "D",
            "\\D\\R",
            root_resp("\\D\\R", 300, &["\\S\\R"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        r.referral_cache().put(
            ReferralCacheEntry::new(
                p("\\D\\R\\l"),
                EntryKind::Link,
                false,
                0,
                vec![crate::referral_cache::TargetSetEntry {
                    target_path: p("\\OLD\\x"),
                    is_set_boundary: false,
                }],
            )
            .unwrap(),
        );
        let out = r.resolve(&session(), &p("\\D\\R\\l\\f")).await.unwrap();
        assert_eq!(out.path, p("\\S\\R\\l\\f"));
        assert!(r.referral_cache().get(&p("\\D\\R\\l")).is_none());
    }

    #[tokio::test]
    async fn test_reactive_root_hit_discovers_link() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Root,
            "D",
            "\\D\\R",
            root_resp("\\D\\R", 300, &["\\RS1\\R"]),
        );
        exchange.reply(
            ReferralType::Link,
            "RS1",
            "\\D\\R\\l\\f",
            link_resp("\\D\\R\\l", false, &["\\FS\\share"]),
        );
        let r = resolver(&exchange, DfsConfig::default());
        let path = p("\\D\\R\\l\\f");
        let first = r.resolve(&session(), &path).await.unwrap();
        assert_eq!(first.path, p("\\RS1\\R\\l\\f"));

        let out = r
            .resolve_after(&session(), &path, NtStatus::PATH_NOT_COVERED)
            .await
            .unwrap();
        assert_eq!(out.path, p("\\FS\\share\\f"));

        let cached = r.resolve(&session(), &path).await.unwrap();
        assert_eq!(cached.path, out.path);
        assert_eq!(exchange.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_site_name_and_level_applied() {
        #[derive(Default)]
        struct Capture(Mutex<Vec<ReferralRequest>>);

        #[async_trait]
        impl ReferralExchange for Capture {
            async fn send_referral(
                &self,
                _session: &dyn Session,
                host: &str,
                request: &ReferralRequest,
            ) -> std::result::Result<ReferralResponse, ExchangeError> {
                self.0.lock().unwrap().push(request.clone());
                Err(ExchangeError::Failed {
                    referral_type: request.referral_type,
                    host: host.to_string(),
                    status: NtStatus::NOT_FOUND,
                })
            }
        }

        let capture = Arc::new(Capture::default());
        let config = DfsConfig {
            site_name: Some("HQ".to_string()),
            max_referral_level: 3,
            ..DfsConfig::default()
        };
        let r = DfsResolver::new(config, capture.clone());
        r.resolve(&session(), &p("\\SRV\\share")).await.unwrap();
        let sent = capture.0.lock().unwrap();
        assert_eq!(sent[0].site_name.as_deref(), Some("HQ"));
        assert_eq!(sent[0].max_referral_level, 3);
    }

    #[tokio::test]
    async fn test_refresh_domains() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.reply(
            ReferralType::Dc,
            "DC0",
            "",
            ReferralResponse::new(
                0,
                0,
                vec![
                    ReferralRecord::name_list(600, "\\ACME", vec![]),
                    ReferralRecord::name_list(600, "\\CORP", vec![]),
                ],
            ),
        );
        let r = resolver(&exchange, DfsConfig::default());
        assert_eq!(r.refresh_domains(&session()).await.unwrap(), 2);
        assert!(r.domain_cache().contains("corp"));
    }
}
