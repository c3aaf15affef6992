//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use smbdfs_client::exchange::SmbReferralExchange;
use smbdfs_client::namespace::NamespaceServer;
use smbdfs_client::session::{Credentials, Session};
use smbdfs_client::{DfsConfig, DfsPathResolver, SmbPath};
use std::sync::Arc;

/// Namespace shared by the integration tests.
///
/// - ACME and OTHER are domains with their own DCs
/// - `\ACME\DFSROOT` has a plain link and an interlink into `\OTHER\NS2`
/// - `\ACME\MULTI` has two targets, the first on an offline host
/// - `\ACME\SHORT` is cached for zero seconds
pub const NAMESPACE: &str = r#"{
    "domains": [
        {"name": "ACME", "dcs": ["dc1.acme", "dc2.acme"], "ttl": 600},
        {"name": "OTHER", "dcs": ["dc1.other"]}
    ],
    "roots": [
        {"path": "\\ACME\\DFSROOT", "targets": ["\\SRV1\\SHARE1"], "ttl": 300},
        {"path": "\\ACME\\MULTI", "targets": ["\\SRV3\\M", "\\SRV4\\M"]},
        {"path": "\\ACME\\SHORT", "targets": ["\\SRV5\\S"], "ttl": 0},
        {"path": "\\OTHER\\NS2", "targets": ["\\FS9\\data"]}
    ],
    "links": [
        {"path": "\\ACME\\DFSROOT\\link1", "targets": ["\\OTHER\\NS2\\sub"], "interlink": true},
        {"path": "\\ACME\\DFSROOT\\plain", "targets": ["\\SRV6\\p"]}
    ],
    "offline": ["SRV3"]
}"#;

/// In-process namespace plus a resolver wired to it over the real codec.
pub struct TestNamespace {
    pub server: NamespaceServer,
    pub resolver: Arc<DfsPathResolver>,
    pub session: Arc<dyn Session>,
}

impl TestNamespace {
    pub fn new() -> Self {
        Self::with_config(DfsConfig::default())
    }

    pub fn with_config(config: DfsConfig) -> Self {
        let server = NamespaceServer::from_json(NAMESPACE).expect("namespace fixture");
        let exchange = Arc::new(SmbReferralExchange::new(
            Arc::new(server.clone()),
            config.max_output_response,
        ));
        let resolver = Arc::new(DfsPathResolver::new(config, exchange));
        let session = server.session("dc1.acme", Credentials::new("alice", "ACME", "pw"));
        Self {
            server,
            resolver,
            session,
        }
    }

    /// Resolver that already knows the given domains.
    pub fn with_domains(domains: &[&str]) -> Self {
        Self::with_config(DfsConfig {
            known_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..DfsConfig::default()
        })
    }
}

pub fn path(s: &str) -> SmbPath {
    SmbPath::parse(s).expect("test path")
}
