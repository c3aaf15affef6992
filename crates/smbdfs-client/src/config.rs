//! DFS resolver configuration

use serde::{Deserialize, Serialize};

use crate::error::{DfsError, Result};

/// Configuration for DFS path resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfsConfig {
    /// When false, paths pass through unresolved
    pub enabled: bool,
    /// Interlink traversals allowed in one resolution
    pub max_interlink_hops: usize,
    /// Highest referral record version requested (1-4)
    pub max_referral_level: u16,
    /// Maximum IOCTL output size for referral responses
    pub max_output_response: u32,
    /// Client site; when set, requests use the extended form
    pub site_name: Option<String>,
    /// Domains seeded into the domain cache without a DC hint
    pub known_domains: Vec<String>,
    /// TTL applied to version 1 records, which carry none
    pub v1_default_ttl_secs: u32,
    /// PATH_NOT_COVERED re-entries allowed per operation
    pub max_not_covered_retries: usize,
}

impl Default for DfsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_interlink_hops: 8,
            max_referral_level: 4,
            max_output_response: 65_536,
            site_name: None,
            known_domains: vec![],
            v1_default_ttl_secs: 300,
            max_not_covered_retries: 2,
        }
    }
}

impl DfsConfig {
    /// Configuration with resolution turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DfsConfig = serde_json::from_str(json).map_err(|e| DfsError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_referral_level == 0 || self.max_referral_level > 4 {
            return Err(DfsError::Config {
                reason: format!(
                    "max_referral_level must be between 1 and 4, got {}",
                    self.max_referral_level
                ),
            });
        }
        if self.max_interlink_hops == 0 {
            return Err(DfsError::Config {
                reason: "max_interlink_hops must be at least 1".to_string(),
            });
        }
        if self.max_output_response < 8 {
            return Err(DfsError::Config {
                reason: "max_output_response cannot hold a referral header".to_string(),
            });
        }
        if let Some(site) = &self.site_name {
            if site.is_empty() {
                return Err(DfsError::Config {
                    reason: "site_name cannot be empty".to_string(),
                });
            }
        }
        if self.known_domains.iter().any(|d| d.is_empty()) {
            return Err(DfsError::Config {
                reason: "known_domains cannot contain empty names".to_string(),
            });
        }
        Ok(())
    }
}
