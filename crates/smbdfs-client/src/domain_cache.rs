//! Domain cache: domain name to domain controller list.

use dashmap::DashMap;
use smbdfs_proto::ReferralResponse;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::ExchangeError;

/// One domain and the DCs that serve it.
#[derive(Debug, Clone)]
pub struct DomainCacheEntry {
    domain_name: String,
    dc_hint: Option<String>,
    dc_list: Vec<String>,
    expires_at: Option<Instant>,
}

fn strip_separators(name: &str) -> String {
    name.trim_start_matches(['\\', '/']).to_string()
}

impl DomainCacheEntry {
    /// An entry with a resolved DC list; the hint is the first DC.
    pub fn new(domain_name: impl Into<String>, dc_list: Vec<String>, ttl: Duration) -> Self {
        Self {
            domain_name: domain_name.into(),
            dc_hint: dc_list.first().cloned(),
            dc_list,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    /// A domain known by name only; its DCs are looked up on first use.
    pub fn unresolved(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            dc_hint: None,
            dc_list: Vec::new(),
            expires_at: None,
        }
    }

    /// Builds an entry from a DC referral response.
    ///
    /// Accepted only when the response holds exactly one record, of version
    /// 3 or later, flagged as a name list with at least one name.
    pub fn from_dc_response(
        domain_name: &str,
        resp: &ReferralResponse,
    ) -> Result<Self, ExchangeError> {
        if resp.records.len() != 1 {
            return Err(ExchangeError::Malformed {
                reason: format!(
                    "DC referral must carry exactly one record, got {}",
                    resp.records.len()
                ),
            });
        }
        let record = &resp.records[0];
        if record.version < 3 {
            return Err(ExchangeError::Malformed {
                reason: format!("DC referral version {} below 3", record.version),
            });
        }
        if !record.is_name_list() {
            return Err(ExchangeError::Malformed {
                reason: "DC referral is not a name list".to_string(),
            });
        }
        let dc_list: Vec<String> = record
            .expanded_names
            .iter()
            .map(|n| strip_separators(n))
            .filter(|n| !n.is_empty())
            .collect();
        if dc_list.is_empty() {
            return Err(ExchangeError::Malformed {
                reason: "DC referral lists no domain controllers".to_string(),
            });
        }
        let ttl = Duration::from_secs(record.ttl.unwrap_or(0) as u64);
        Ok(Self::new(domain_name, dc_list, ttl))
    }

    /// Builds hint-less entries from a domain list referral (empty request
    /// path): one name-list record per domain.
    pub fn from_domain_list(resp: &ReferralResponse) -> Vec<Self> {
        resp.records
            .iter()
            .filter(|r| r.is_name_list())
            .filter_map(|r| r.special_name.as_deref())
            .map(strip_separators)
            .filter(|n| !n.is_empty())
            .map(Self::unresolved)
            .collect()
    }

    /// Domain name as first learned
    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Current DC hint, when a DC referral has filled the list
    pub fn dc_hint(&self) -> Option<&str> {
        self.dc_hint.as_deref()
    }

    /// Known DCs, hint first
    pub fn dc_list(&self) -> &[String] {
        &self.dc_list
    }

    /// A hint is usable when present and not past its TTL.
    pub fn has_valid_hint(&self) -> bool {
        match (&self.dc_hint, self.expires_at) {
            (Some(_), Some(at)) => Instant::now() < at,
            _ => false,
        }
    }
}

/// Shared domain cache, exact match on case-folded domain name.
pub struct DomainCache {
    entries: DashMap<String, Arc<DomainCacheEntry>>,
}

impl DomainCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Cache seeded with hint-less entries for the given domains.
    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cache = Self::new();
        for d in domains {
            cache.put(DomainCacheEntry::unresolved(d));
        }
        cache
    }

    /// Entry for `domain_name`, case-insensitively.
    pub fn lookup(&self, domain_name: &str) -> Option<Arc<DomainCacheEntry>> {
        let found = self
            .entries
            .get(&domain_name.to_lowercase())
            .map(|e| Arc::clone(e.value()));
        debug!(
            "domain_cache: lookup {} -> {}",
            domain_name,
            if found.is_some() { "hit" } else { "miss" }
        );
        found
    }

    /// True when `domain_name` is a known domain.
    pub fn contains(&self, domain_name: &str) -> bool {
        self.entries.contains_key(&domain_name.to_lowercase())
    }

    /// Upserts by domain name and returns the published entry.
    pub fn put(&self, entry: DomainCacheEntry) -> Arc<DomainCacheEntry> {
        let entry = Arc::new(entry);
        info!(
            "domain_cache: {} -> {:?}",
            entry.domain_name(),
            entry.dc_list()
        );
        self.entries
            .insert(entry.domain_name().to_lowercase(), Arc::clone(&entry));
        entry
    }

    /// Inserts only if the domain is not cached yet.
    pub fn put_if_absent(&self, entry: DomainCacheEntry) {
        self.entries
            .entry(entry.domain_name().to_lowercase())
            .or_insert_with(|| Arc::new(entry));
    }

    /// Forgets `domain_name`; true if it was cached.
    pub fn remove(&self, domain_name: &str) -> bool {
        self.entries.remove(&domain_name.to_lowercase()).is_some()
    }

    /// Forgets every domain.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached domains.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no domain is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DomainCache {
    fn default() -> Self {
        Self::new()
    }
}
