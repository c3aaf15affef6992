//! Referral exchange: one referral request, one response.
//!
//! The request is encoded, sent as an FSCTL on the target host's `IPC$`
//! share and the output decoded. Any non-success status from the server is
//! a failure, including the partial-response status.

use async_trait::async_trait;
use smbdfs_proto::{ReferralRequest, ReferralResponse};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ExchangeError;
use crate::session::{Connector, Session, SessionCache};

const IPC_SHARE: &str = "IPC$";

/// Sends referral requests on behalf of the resolver.
#[async_trait]
pub trait ReferralExchange: Send + Sync {
    /// Sends `request` to `host`. `session` is the caller's session; it is
    /// used directly when it is already connected to `host`, otherwise its
    /// credentials open (or reuse) a session to `host`.
    async fn send_referral(
        &self,
        session: &dyn Session,
        host: &str,
        request: &ReferralRequest,
    ) -> Result<ReferralResponse, ExchangeError>;
}

/// Exchange over real SMB sessions obtained from a [`Connector`].
pub struct SmbReferralExchange {
    sessions: SessionCache,
    max_output_response: u32,
}

impl SmbReferralExchange {
    /// Exchange opening sessions through `connector`.
    pub fn new(connector: Arc<dyn Connector>, max_output_response: u32) -> Self {
        Self {
            sessions: SessionCache::new(connector),
            max_output_response,
        }
    }

    /// Sessions opened to referral servers.
    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    async fn send_on(
        &self,
        session: &dyn Session,
        host: &str,
        request: &ReferralRequest,
    ) -> Result<ReferralResponse, ExchangeError> {
        let ipc = session.connect_share(IPC_SHARE).await?;
        let input = request.encode()?;
        debug!(
            "exchange: {} referral for '{}' to {} ({} bytes)",
            request.referral_type,
            request.path,
            host,
            input.len()
        );
        let resp = ipc
            .send_ioctl(request.fsctl_code(), true, input, self.max_output_response)
            .await?;
        if !resp.status.is_success() {
            warn!(
                "exchange: {} referral for '{}' to {} returned {}",
                request.referral_type, request.path, host, resp.status
            );
            return Err(ExchangeError::Failed {
                referral_type: request.referral_type,
                host: host.to_string(),
                status: resp.status,
            });
        }
        Ok(ReferralResponse::decode(resp.output)?)
    }
}

#[async_trait]
impl ReferralExchange for SmbReferralExchange {
    async fn send_referral(
        &self,
        session: &dyn Session,
        host: &str,
        request: &ReferralRequest,
    ) -> Result<ReferralResponse, ExchangeError> {
        if session.server_name().eq_ignore_ascii_case(host) {
            return self.send_on(session, host, request).await;
        }
        let remote = self
            .sessions
            .get_or_connect(host, session.credentials())
            .await?;
        let result = self.send_on(remote.as_ref(), host, request).await;
        if let Err(ExchangeError::Transport { .. }) = &result {
            self.sessions.invalidate(host);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Credentials, IoctlResponse, Share};
    use bytes::Bytes;
    use smbdfs_proto::{
        NtStatus, ReferralHeaderFlags, ReferralRecord, ReferralType, ServerType,
        FSCTL_DFS_GET_REFERRALS, FSCTL_DFS_GET_REFERRALS_EX,
    };
    use std::sync::Mutex;

    struct ScriptedShare {
        calls: Arc<Mutex<Vec<(String, u32)>>>,
        host: String,
        reply: IoctlResponse,
    }

    #[async_trait]
    impl Share for ScriptedShare {
        fn share_name(&self) -> &str {
            IPC_SHARE
        }

        async fn send_ioctl(
            &self,
            ctl_code: u32,
            is_fsctl: bool,
            _input: Bytes,
            _max_output_response: u32,
        ) -> Result<IoctlResponse, ExchangeError> {
            assert!(is_fsctl);
            self.calls
                .lock()
                .unwrap()
                .push((self.host.clone(), ctl_code));
            Ok(self.reply.clone())
        }
    }

    struct ScriptedSession {
        host: String,
        credentials: Credentials,
        calls: Arc<Mutex<Vec<(String, u32)>>>,
        reply: IoctlResponse,
    }

    #[async_trait]
    impl Session for ScriptedSession {
        fn server_name(&self) -> &str {
            &self.host
        }

        fn credentials(&self) -> &Credentials {
            &self.credentials
        }

        async fn connect_share(&self, share_name: &str) -> Result<Arc<dyn Share>, ExchangeError> {
            assert_eq!(share_name, IPC_SHARE);
            Ok(Arc::new(ScriptedShare {
                calls: self.calls.clone(),
                host: self.host.clone(),
                reply: self.reply.clone(),
            }))
        }
    }

    struct ScriptedConnector {
        calls: Arc<Mutex<Vec<(String, u32)>>>,
        reply: IoctlResponse,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            host: &str,
            credentials: &Credentials,
        ) -> Result<Arc<dyn Session>, ExchangeError> {
            Ok(Arc::new(ScriptedSession {
                host: host.to_string(),
                credentials: credentials.clone(),
                calls: self.calls.clone(),
                reply: self.reply.clone(),
            }))
        }
    }

    fn root_reply() -> IoctlResponse {
        let resp = ReferralResponse::new(
            26,
            ReferralHeaderFlags::STORAGE_SERVERS,
            vec![ReferralRecord::target(
                4,
                ServerType::Root,
                300,
                "\\ACME\\DFSROOT",
                "\\SRV1\\SHARE1",
            )],
        );
        IoctlResponse::ok(resp.encode().unwrap())
    }

    fn setup(reply: IoctlResponse) -> (Arc<Mutex<Vec<(String, u32)>>>, SmbReferralExchange, ScriptedSession) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(ScriptedConnector {
            calls: calls.clone(),
            reply: reply.clone(),
        });
        let session = ScriptedSession {
            host: "DC1".to_string(),
            credentials: Credentials::new("alice", "ACME", "pw"),
            calls: calls.clone(),
            reply,
        };
        (calls, SmbReferralExchange::new(connector, 65_536), session)
    }

    #[tokio::test]
    async fn test_same_host_uses_caller_session() {
        let (calls, exchange, session) = setup(root_reply());
        let request = ReferralRequest::new(ReferralType::Root, "\\ACME\\DFSROOT");
        let resp = exchange
            .send_referral(&session, "dc1", &request)
            .await
            .unwrap();
        assert_eq!(resp.records.len(), 1);
        assert!(exchange.sessions().is_empty());
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("DC1".to_string(), FSCTL_DFS_GET_REFERRALS)]
        );
    }

    #[tokio::test]
    async fn test_other_host_opens_session() {
        let (calls, exchange, session) = setup(root_reply());
        let request =
            ReferralRequest::new(ReferralType::Root, "\\ACME\\DFSROOT").with_site_name("HQ");
        exchange
            .send_referral(&session, "SRV9", &request)
            .await
            .unwrap();
        assert_eq!(exchange.sessions().len(), 1);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("SRV9".to_string(), FSCTL_DFS_GET_REFERRALS_EX)]
        );
    }

    #[tokio::test]
    async fn test_error_status_is_failure() {
        let (_, exchange, session) = setup(IoctlResponse::error(NtStatus::NOT_FOUND));
        let request = ReferralRequest::new(ReferralType::Link, "\\ACME\\DFSROOT\\x");
        let err = exchange
            .send_referral(&session, "DC1", &request)
            .await
            .unwrap_err();
        assert_eq!(err.status(), NtStatus::NOT_FOUND);
        assert!(matches!(
            err,
            ExchangeError::Failed {
                referral_type: ReferralType::Link,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_buffer_overflow_is_failure() {
        let (_, exchange, session) = setup(IoctlResponse::error(NtStatus::BUFFER_OVERFLOW));
        let request = ReferralRequest::new(ReferralType::Root, "\\ACME\\DFSROOT");
        let err = exchange
            .send_referral(&session, "DC1", &request)
            .await
            .unwrap_err();
        assert_eq!(err.status(), NtStatus::BUFFER_OVERFLOW);
    }

    #[tokio::test]
    async fn test_garbage_output_is_malformed() {
        let (_, exchange, session) = setup(IoctlResponse::ok(Bytes::from_static(&[1, 2, 3])));
        let request = ReferralRequest::new(ReferralType::Root, "\\ACME\\DFSROOT");
        let err = exchange
            .send_referral(&session, "DC1", &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Malformed { .. }));
        assert_eq!(err.status(), NtStatus::INVALID_NETWORK_RESPONSE);
    }
}
