//! UNC path value type used throughout DFS resolution.
//!
//! A path is an ordered list of non-empty components: host or domain, then
//! share or DFS root, then the sub-path. Component comparison and cache keys
//! are case-insensitive; the original spelling is kept for display.

use std::fmt;

use crate::error::{DfsError, Result};

const IPC_SHARE: &str = "IPC$";
const SYSVOL_SHARE: &str = "SYSVOL";
const NETLOGON_SHARE: &str = "NETLOGON";

/// An immutable, parsed UNC path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmbPath {
    components: Vec<String>,
}

/// Case-folded cache key over a component sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    fn from_components(components: &[String]) -> Self {
        let mut key = String::new();
        for c in components {
            key.push('\\');
            key.push_str(&c.to_lowercase());
        }
        PathKey(key)
    }

    /// The folded key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

impl SmbPath {
    /// Parses `\\host\share\a`, `\host\share\a` or the `/` equivalents.
    pub fn parse(s: &str) -> Result<Self> {
        let mut rest = s;
        for _ in 0..2 {
            if let Some(c) = rest.chars().next() {
                if is_separator(c) {
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        let components: Vec<String> = rest
            .split(is_separator)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        Self::from_components(components)
    }

    /// Builds a path from components; at least one, none empty.
    pub fn from_components(components: Vec<String>) -> Result<Self> {
        if components.is_empty() {
            return Err(DfsError::InvalidPath {
                reason: "path has no components".to_string(),
            });
        }
        if let Some(bad) = components
            .iter()
            .find(|c| c.is_empty() || c.contains(is_separator) || c.contains('\0'))
        {
            return Err(DfsError::InvalidPath {
                reason: format!("invalid component '{}'", bad),
            });
        }
        Ok(Self { components })
    }

    /// Path components, host first.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// First component: server or domain name.
    pub fn host(&self) -> &str {
        &self.components[0]
    }

    /// Second component: share or DFS root name.
    pub fn share(&self) -> Option<&str> {
        self.components.get(1).map(String::as_str)
    }

    /// True for `\\host` with nothing after it.
    pub fn has_single_component(&self) -> bool {
        self.components.len() == 1
    }

    fn share_is(&self, name: &str) -> bool {
        self.share()
            .map(|s| s.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }

    /// True when the share is `IPC$`.
    pub fn is_ipc(&self) -> bool {
        self.share_is(IPC_SHARE)
    }

    /// True when the share is `SYSVOL`.
    pub fn is_sysvol(&self) -> bool {
        self.share_is(SYSVOL_SHARE)
    }

    /// True when the share is `NETLOGON`.
    pub fn is_netlogon(&self) -> bool {
        self.share_is(NETLOGON_SHARE)
    }

    /// SYSVOL and NETLOGON are resolved with a dedicated referral type.
    pub fn is_sysvol_or_netlogon(&self) -> bool {
        self.is_sysvol() || self.is_netlogon()
    }

    /// True when every component of `self` matches the leading components
    /// of `other`.
    pub fn is_prefix_of(&self, other: &SmbPath) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a.to_lowercase() == b.to_lowercase())
    }

    /// Replaces the leading `prefix` components with `replacement`,
    /// keeping everything beyond `prefix`.
    pub fn replace_prefix(&self, prefix: &SmbPath, replacement: &SmbPath) -> Result<SmbPath> {
        if !prefix.is_prefix_of(self) {
            return Err(DfsError::InvalidPath {
                reason: format!("{} is not a prefix of {}", prefix, self),
            });
        }
        let mut components = replacement.components.clone();
        components.extend_from_slice(&self.components[prefix.len()..]);
        Ok(SmbPath { components })
    }

    /// The first `n` components (all of them when `n` exceeds the length).
    pub fn truncate(&self, n: usize) -> SmbPath {
        let n = n.clamp(1, self.components.len());
        SmbPath {
            components: self.components[..n].to_vec(),
        }
    }

    /// Case-folded key of the whole path.
    pub fn key(&self) -> PathKey {
        PathKey::from_components(&self.components)
    }

    /// Keys of every leading sub-path, longest first.
    pub fn prefix_keys(&self) -> Vec<PathKey> {
        (1..=self.components.len())
            .rev()
            .map(|n| PathKey::from_components(&self.components[..n]))
            .collect()
    }

    /// `\\host\share\...` form.
    pub fn to_unc(&self) -> String {
        format!("\\{}", self)
    }
}

impl fmt::Display for SmbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.components {
            write!(f, "\\{}", c)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SmbPath {
    type Err = DfsError;

    fn from_str(s: &str) -> Result<Self> {
        SmbPath::parse(s)
    }
}
