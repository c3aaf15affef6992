//! Path resolver façade used by the rest of the client.
//!
//! Every operation resolves its path first and, when the server answers
//! PATH_NOT_COVERED, resolves it again reactively. With DFS disabled the
//! same calls go through [`NoopPathResolver`].

use async_trait::async_trait;
use smbdfs_proto::NtStatus;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DfsConfig;
use crate::error::{DfsError, Result};
use crate::exchange::ReferralExchange;
use crate::path::SmbPath;
use crate::resolver::{DfsResolver, ResolvedPath};
use crate::session::Session;

/// Resolution entry points exposed to the client.
#[async_trait]
pub trait PathResolver: Send + Sync {
    /// Resolves `path` before an operation.
    async fn resolve(&self, session: &dyn Session, path: &SmbPath) -> Result<ResolvedPath>;

    /// Resolves `path` again after an operation on it failed with `status`.
    async fn resolve_after(
        &self,
        session: &dyn Session,
        path: &SmbPath,
        status: NtStatus,
    ) -> Result<ResolvedPath>;

    /// True when `status` calls for reactive resolution.
    fn should_resolve(&self, status: NtStatus) -> bool;
}

/// Leaves every path untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPathResolver;

#[async_trait]
impl PathResolver for NoopPathResolver {
    async fn resolve(&self, _session: &dyn Session, path: &SmbPath) -> Result<ResolvedPath> {
        Ok(ResolvedPath::not_dfs(path.clone()))
    }

    async fn resolve_after(
        &self,
        _session: &dyn Session,
        path: &SmbPath,
        _status: NtStatus,
    ) -> Result<ResolvedPath> {
        Ok(ResolvedPath::not_dfs(path.clone()))
    }

    fn should_resolve(&self, _status: NtStatus) -> bool {
        false
    }
}

/// DFS-aware resolver with target failover.
pub struct DfsPathResolver {
    resolver: DfsResolver,
}

impl DfsPathResolver {
    /// Resolver with its own caches.
    pub fn new(config: DfsConfig, exchange: Arc<dyn ReferralExchange>) -> Self {
        Self {
            resolver: DfsResolver::new(config, exchange),
        }
    }

    /// Wraps an existing resolver.
    pub fn from_resolver(resolver: DfsResolver) -> Self {
        Self { resolver }
    }

    /// The underlying resolver.
    pub fn resolver(&self) -> &DfsResolver {
        &self.resolver
    }

    /// Runs `op` against the resolved form of `path`.
    ///
    /// A failed attempt first moves the entry's target hint past the failing
    /// target and retries `op` on the next target, rewritten straight from
    /// that entry so an expired entry is not replaced before every target has
    /// been tried. Once no target is left, PATH_NOT_COVERED re-resolves the
    /// original path reactively, at most `max_not_covered_retries` times, and
    /// any other status is returned as [`DfsError::Io`].
    pub async fn run_with_failover<T, F, Fut>(
        &self,
        session: &dyn Session,
        path: &SmbPath,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(SmbPath) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, NtStatus>> + Send,
        T: Send,
    {
        let max_not_covered = self.resolver.config().max_not_covered_retries;
        let mut resolved = self.resolver.resolve(session, path).await?;
        let mut not_covered = 0;
        let mut attempted = 0;

        loop {
            let status = match op(resolved.path.clone()).await {
                Ok(v) => return Ok(v),
                Err(status) => status,
            };

            if let Some(next) = self.next_target(&resolved, attempted)? {
                attempted += 1;
                debug!(
                    "path_resolver: {} failed on {} ({}), trying {}",
                    path, resolved.path, status, next.path
                );
                resolved = next;
                continue;
            }

            if !status.is_path_not_covered() {
                warn!(
                    "path_resolver: {} failed on {} with {}, no targets left",
                    path, resolved.path, status
                );
                return Err(DfsError::Io {
                    path: resolved.path.to_string(),
                    status,
                });
            }
            if not_covered >= max_not_covered {
                warn!("path_resolver: {} still not covered, giving up", path);
                return Err(DfsError::Io {
                    path: resolved.path.to_string(),
                    status,
                });
            }
            not_covered += 1;
            debug!("path_resolver: {} not covered at {}", path, resolved.path);
            let previous = resolved.entry.clone();
            resolved = self.resolver.resolve_after(session, path, status).await?;
            // a different entry brings its own targets to try
            let same_entry = match (&previous, &resolved.entry) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !same_entry {
                attempted = 0;
            }
        }
    }

    // Rotates the entry behind `resolved` past its target and rewrites the
    // path onto the next one. None when the path is not DFS or every target
    // has been attempted.
    fn next_target(
        &self,
        resolved: &ResolvedPath,
        attempted: usize,
    ) -> Result<Option<ResolvedPath>> {
        let Some(entry) = resolved.entry.as_ref() else {
            return Ok(None);
        };
        let Some(failed) = entry.targets().get(resolved.target_index) else {
            return Ok(None);
        };
        let Some(index) = entry.next_target_hint(resolved.target_index, attempted) else {
            return Ok(None);
        };
        let Some(target) = entry.targets().get(index) else {
            return Ok(None);
        };
        let rewritten = resolved
            .path
            .replace_prefix(&failed.target_path, &target.target_path)?;
        self.resolver.stats().record_failover();
        Ok(Some(ResolvedPath {
            path: rewritten,
            is_dfs: true,
            entry: Some(Arc::clone(entry)),
            target_index: index,
        }))
    }
}

#[async_trait]
impl PathResolver for DfsPathResolver {
    async fn resolve(&self, session: &dyn Session, path: &SmbPath) -> Result<ResolvedPath> {
        self.resolver.resolve(session, path).await
    }

    async fn resolve_after(
        &self,
        session: &dyn Session,
        path: &SmbPath,
        status: NtStatus,
    ) -> Result<ResolvedPath> {
        self.resolver.resolve_after(session, path, status).await
    }

    fn should_resolve(&self, status: NtStatus) -> bool {
        status.is_path_not_covered()
    }
}

/// Picks the resolver for `config`: pass-through when DFS is disabled.
pub fn path_resolver_for(
    config: DfsConfig,
    exchange: Arc<dyn ReferralExchange>,
) -> Arc<dyn PathResolver> {
    if config.enabled {
        Arc::new(DfsPathResolver::new(config, exchange))
    } else {
        Arc::new(NoopPathResolver)
    }
}
