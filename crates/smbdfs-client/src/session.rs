//! Session seam between DFS resolution and the SMB2/3 client stack.
//!
//! Resolution never opens files; it only needs to tree-connect `IPC$` on a
//! host and issue an FSCTL there. The traits below are that surface. The
//! [`SessionCache`] keeps authenticated sessions keyed by identity and host
//! so referrals to the same DC or root server reuse one session.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use smbdfs_proto::NtStatus;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ExchangeError;

/// Identity a session authenticates with.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    domain: String,
    password: String,
}

impl Credentials {
    /// Credentials for `domain\username`.
    pub fn new(
        username: impl Into<String>,
        domain: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            domain: domain.into(),
            password: password.into(),
        }
    }

    /// Anonymous (null session) credentials.
    pub fn anonymous() -> Self {
        Self::new("", "", "")
    }

    /// Account name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Secret, never logged
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of an IOCTL: server status plus output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoctlResponse {
    /// Status the server returned
    pub status: NtStatus,
    /// FSCTL output buffer
    pub output: Bytes,
}

impl IoctlResponse {
    /// Successful response carrying `output`.
    pub fn ok(output: Bytes) -> Self {
        Self {
            status: NtStatus::SUCCESS,
            output,
        }
    }

    /// Failed response with no output.
    pub fn error(status: NtStatus) -> Self {
        Self {
            status,
            output: Bytes::new(),
        }
    }
}

/// A tree connection.
#[async_trait]
pub trait Share: Send + Sync {
    fn share_name(&self) -> &str;

    /// Sends an IOCTL. Transport failures are errors; a server status is
    /// returned in the response.
    async fn send_ioctl(
        &self,
        ctl_code: u32,
        is_fsctl: bool,
        input: Bytes,
        max_output_response: u32,
    ) -> Result<IoctlResponse, ExchangeError>;
}

/// An authenticated session to one server.
#[async_trait]
pub trait Session: Send + Sync {
    /// Host this session is connected to.
    fn server_name(&self) -> &str;

    fn credentials(&self) -> &Credentials;

    async fn connect_share(&self, share_name: &str) -> Result<Arc<dyn Share>, ExchangeError>;
}

/// Opens new authenticated sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>, ExchangeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    username: String,
    domain: String,
    host: String,
}

impl SessionKey {
    fn new(credentials: &Credentials, host: &str) -> Self {
        Self {
            username: credentials.username().to_lowercase(),
            domain: credentials.domain().to_lowercase(),
            host: host.to_lowercase(),
        }
    }
}

/// Sessions shared across resolutions, one per identity and host.
pub struct SessionCache {
    connector: Arc<dyn Connector>,
    sessions: DashMap<SessionKey, Arc<dyn Session>>,
}

impl SessionCache {
    /// Empty cache opening sessions through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: DashMap::new(),
        }
    }

    /// Returns a cached session for `host` or opens one.
    pub async fn get_or_connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>, ExchangeError> {
        let key = SessionKey::new(credentials, host);
        if let Some(session) = self.sessions.get(&key) {
            debug!("session_cache: reusing session to {}", host);
            return Ok(Arc::clone(session.value()));
        }
        // Connect without holding a map guard across the await.
        let session = self.connector.connect(host, credentials).await?;
        info!(
            "session_cache: connected to {} as {}\\{}",
            host,
            credentials.domain(),
            credentials.username()
        );
        let published = self
            .sessions
            .entry(key)
            .or_insert_with(|| Arc::clone(&session));
        Ok(Arc::clone(published.value()))
    }

    /// Drops every session to `host`.
    pub fn invalidate(&self, host: &str) -> usize {
        let host = host.to_lowercase();
        let before = self.sessions.len();
        self.sessions.retain(|k, _| k.host != host);
        before - self.sessions.len()
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is cached.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
