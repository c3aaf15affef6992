//! Referral cache: DFS path prefix to cached referral.
//!
//! Queries carry a full sub-path while entries are stored under the shorter
//! root or link prefix, so lookup tries every leading sub-path of the query,
//! longest first, against an exact-match map of prefixes.

use dashmap::DashMap;
use smbdfs_proto::{ReferralRequest, ReferralResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::domain_cache::DomainCache;
use crate::error::ExchangeError;
use crate::path::{PathKey, SmbPath};

/// Whether a cached referral covers a namespace root or a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Namespace root
    Root,
    /// Link inside a namespace
    Link,
}

/// One target of a referral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSetEntry {
    /// Path replacing the entry's prefix
    pub target_path: SmbPath,
    /// Starts a new target set (V4 priority grouping)
    pub is_set_boundary: bool,
}

/// A cached referral. Immutable once built except for the target hint.
#[derive(Debug)]
pub struct ReferralCacheEntry {
    path_prefix: SmbPath,
    kind: EntryKind,
    interlink: bool,
    target_failback: bool,
    ttl_secs: u32,
    expires_at: Instant,
    targets: Vec<TargetSetEntry>,
    target_hint: AtomicUsize,
}

fn consumed_prefix(request_path: &str, path_consumed: u16) -> Option<SmbPath> {
    let units: Vec<u16> = request_path.encode_utf16().collect();
    let consumed = path_consumed as usize / 2;
    if consumed == 0 || consumed > units.len() {
        return None;
    }
    let prefix = String::from_utf16_lossy(&units[..consumed]);
    SmbPath::parse(&prefix).ok()
}

impl ReferralCacheEntry {
    /// Builds an entry directly. `targets` must not be empty.
    pub fn new(
        path_prefix: SmbPath,
        kind: EntryKind,
        interlink: bool,
        ttl_secs: u32,
        targets: Vec<TargetSetEntry>,
    ) -> Result<Self, ExchangeError> {
        if targets.is_empty() {
            return Err(ExchangeError::Malformed {
                reason: format!("referral for {} has no targets", path_prefix),
            });
        }
        Ok(Self {
            path_prefix,
            kind,
            interlink,
            target_failback: false,
            ttl_secs,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs as u64),
            targets,
            target_hint: AtomicUsize::new(0),
        })
    }

    /// Builds an entry from a ROOT, LINK or SYSVOL referral response.
    ///
    /// The prefix is the part of the request path the server consumed,
    /// falling back to the first record's DFS path and then to the request
    /// path itself. The TTL comes from the first record.
    pub fn from_response(
        request: &ReferralRequest,
        resp: &ReferralResponse,
        domain_cache: &DomainCache,
        v1_default_ttl: u32,
    ) -> Result<Self, ExchangeError> {
        let first = resp.records.first().ok_or_else(|| ExchangeError::Malformed {
            reason: "referral response has no records".to_string(),
        })?;
        let request_path = SmbPath::parse(&request.path).map_err(|e| ExchangeError::Malformed {
            reason: e.to_string(),
        })?;

        let path_prefix = consumed_prefix(&request.path, resp.path_consumed)
            .filter(|p| p.is_prefix_of(&request_path))
            .or_else(|| {
                first
                    .dfs_path
                    .as_deref()
                    .and_then(|p| SmbPath::parse(p).ok())
                    .filter(|p| p.is_prefix_of(&request_path))
            })
            .unwrap_or(request_path);

        let mut targets = Vec::with_capacity(resp.records.len());
        for record in &resp.records {
            if record.is_name_list() {
                return Err(ExchangeError::Malformed {
                    reason: "name list record in a target referral".to_string(),
                });
            }
            let address = record
                .network_address
                .as_deref()
                .ok_or_else(|| ExchangeError::Malformed {
                    reason: "referral record without a target".to_string(),
                })?;
            let target_path = SmbPath::parse(address).map_err(|e| ExchangeError::Malformed {
                reason: format!("bad target '{}': {}", address, e),
            })?;
            targets.push(TargetSetEntry {
                target_path,
                is_set_boundary: record.is_target_set_boundary(),
            });
        }

        let kind = if first.is_root() {
            EntryKind::Root
        } else {
            EntryKind::Link
        };
        let flags = resp.header_flags;
        let interlink = (flags.referral_servers() && !flags.storage_servers())
            || (targets.len() == 1 && domain_cache.contains(targets[0].target_path.host()));
        let ttl_secs = first.ttl.unwrap_or(v1_default_ttl);

        let mut entry = Self::new(path_prefix, kind, interlink, ttl_secs, targets)?;
        entry.target_failback = flags.target_failback();
        Ok(entry)
    }

    /// Path prefix this entry covers.
    pub fn path_prefix(&self) -> &SmbPath {
        &self.path_prefix
    }

    /// Root or link.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// True for a root entry.
    pub fn is_root(&self) -> bool {
        self.kind == EntryKind::Root
    }

    /// True for a link entry.
    pub fn is_link(&self) -> bool {
        self.kind == EntryKind::Link
    }

    /// True when the targets are other DFS namespaces.
    pub fn is_interlink(&self) -> bool {
        self.interlink
    }

    /// Server asked for failback to preferred targets.
    pub fn target_failback(&self) -> bool {
        self.target_failback
    }

    /// TTL the entry was cached with.
    pub fn ttl_secs(&self) -> u32 {
        self.ttl_secs
    }

    /// When the entry stops being usable.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// True once the TTL has run out.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Targets in referral order.
    pub fn targets(&self) -> &[TargetSetEntry] {
        &self.targets
    }

    /// Index of the preferred target; always within `targets`.
    pub fn target_hint_index(&self) -> usize {
        self.target_hint.load(Ordering::Acquire) % self.targets.len()
    }

    /// The preferred target.
    pub fn target_hint(&self) -> &TargetSetEntry {
        &self.targets[self.target_hint_index()]
    }

    /// Moves the hint past `failed_index` after a failed attempt.
    ///
    /// `attempted` counts targets the caller already gave up on in the
    /// current operation; once every target has been tried this returns
    /// None. If another caller already moved the hint off `failed_index`,
    /// the current hint is returned without rotating again.
    pub fn next_target_hint(&self, failed_index: usize, attempted: usize) -> Option<usize> {
        let len = self.targets.len();
        if attempted + 1 >= len {
            return None;
        }
        let next = (failed_index + 1) % len;
        match self.target_hint.compare_exchange(
            failed_index,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!(
                    "referral_cache: {} target hint {} -> {}",
                    self.path_prefix, failed_index, next
                );
                Some(next)
            }
            Err(current) => Some(current % len),
        }
    }
}

/// Shared referral cache keyed by case-folded path prefix.
pub struct ReferralCache {
    entries: DashMap<PathKey, Arc<ReferralCacheEntry>>,
}

impl ReferralCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Entry with the longest prefix covering `path`.
    pub fn lookup(&self, path: &SmbPath) -> Option<Arc<ReferralCacheEntry>> {
        for key in path.prefix_keys() {
            if let Some(entry) = self.entries.get(&key) {
                debug!("referral_cache: {} matched prefix {}", path, key.as_str());
                return Some(Arc::clone(entry.value()));
            }
        }
        debug!("referral_cache: miss for {}", path);
        None
    }

    /// Entry stored under exactly `prefix`.
    pub fn get(&self, prefix: &SmbPath) -> Option<Arc<ReferralCacheEntry>> {
        self.entries.get(&prefix.key()).map(|e| Arc::clone(e.value()))
    }

    /// Publishes an entry, replacing any entry for the same prefix.
    pub fn put(&self, entry: ReferralCacheEntry) -> Arc<ReferralCacheEntry> {
        let entry = Arc::new(entry);
        info!(
            "referral_cache: {} ({:?}, interlink={}, ttl={}s, {} targets)",
            entry.path_prefix(),
            entry.kind(),
            entry.is_interlink(),
            entry.ttl_secs(),
            entry.targets().len()
        );
        self.entries
            .insert(entry.path_prefix().key(), Arc::clone(&entry));
        entry
    }

    /// Drops the entry stored under `prefix`.
    pub fn clear(&self, prefix: &SmbPath) -> bool {
        self.entries.remove(&prefix.key()).is_some()
    }

    /// Drops every entry.
    pub fn clear_all(&self) {
        self.entries.clear();
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before - self.entries.len()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReferralCache {
    fn default() -> Self {
        Self::new()
    }
}
