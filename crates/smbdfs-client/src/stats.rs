//! Resolver statistics

use serde::Serialize;
use smbdfs_proto::ReferralType;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the resolver.
#[derive(Debug, Default)]
pub struct ResolverStats {
    /// Resolutions started
    pub resolutions: AtomicU64,
    /// Lookups answered by an unexpired referral cache entry
    pub cache_hits: AtomicU64,
    /// Lookups with no usable entry
    pub cache_misses: AtomicU64,
    /// DC referrals sent
    pub dc_referrals: AtomicU64,
    /// ROOT referrals sent
    pub root_referrals: AtomicU64,
    /// LINK referrals sent
    pub link_referrals: AtomicU64,
    /// SYSVOL referrals sent
    pub sysvol_referrals: AtomicU64,
    /// Referral exchanges that failed
    pub referral_failures: AtomicU64,
    /// Interlinks followed
    pub interlinks: AtomicU64,
    /// Resolutions that ended with the path not in DFS
    pub not_dfs: AtomicU64,
    /// Target failovers after I/O errors
    pub failovers: AtomicU64,
}

/// Point-in-time copy of [`ResolverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStatsSnapshot {
    /// Resolutions started
    pub resolutions: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// Cache misses
    pub cache_misses: u64,
    /// DC referrals sent
    pub dc_referrals: u64,
    /// ROOT referrals sent
    pub root_referrals: u64,
    /// LINK referrals sent
    pub link_referrals: u64,
    /// SYSVOL referrals sent
    pub sysvol_referrals: u64,
    /// Failed referral exchanges
    pub referral_failures: u64,
    /// Interlinks followed
    pub interlinks: u64,
    /// Resolutions ending outside DFS
    pub not_dfs: u64,
    /// Target failovers
    pub failovers: u64,
}

impl ResolverStatsSnapshot {
    /// All referral requests sent, of any type.
    pub fn referrals_sent(&self) -> u64 {
        self.dc_referrals + self.root_referrals + self.link_referrals + self.sysvol_referrals
    }
}

impl ResolverStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a started resolution.
    pub fn record_resolution(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a referral sent of `referral_type`.
    pub fn record_referral(&self, referral_type: ReferralType) {
        let counter = match referral_type {
            ReferralType::Dc => &self.dc_referrals,
            ReferralType::Root => &self.root_referrals,
            ReferralType::Link => &self.link_referrals,
            ReferralType::Sysvol => &self.sysvol_referrals,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failed referral.
    pub fn record_referral_failure(&self) {
        self.referral_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an interlink hop.
    pub fn record_interlink(&self) {
        self.interlinks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a path found outside DFS.
    pub fn record_not_dfs(&self) {
        self.not_dfs.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a move to another target.
    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counters.
    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            dc_referrals: self.dc_referrals.load(Ordering::Relaxed),
            root_referrals: self.root_referrals.load(Ordering::Relaxed),
            link_referrals: self.link_referrals.load(Ordering::Relaxed),
            sysvol_referrals: self.sysvol_referrals.load(Ordering::Relaxed),
            referral_failures: self.referral_failures.load(Ordering::Relaxed),
            interlinks: self.interlinks.load(Ordering::Relaxed),
            not_dfs: self.not_dfs.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
        }
    }
}
