//! 連線與交易的准入判斷
//!
//! 兩者在 CA 無法連線時的策略不同: 連線在首次接觸時一律拒絕,
//! 交易則預設放行並記錄警告。已快取的身分一律沿用上次已知的狀態

use std::sync::Arc;

use async_trait::async_trait;
use lca_cert_utils::{identity_from_certificate, CertUtils, CertificatePermission, IdentitySet};
use lca_crl_cache::{CachedResult, RevocationCache};
use openssl::x509::X509;
use tokio::time::Duration;

use crate::{PermissionEnforcer, PermissionError};

/// TLS 交握完成後取得對端憑證
#[async_trait]
pub trait PeerCertificateSource: Send + Sync {
    async fn peer_certificate(&self) -> Option<Vec<u8>>;
}

/// 沒有快取紀錄且 CA 無法回應時的處理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstContactPolicy {
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoCertificate,
    UntrustedChain,
    MalformedIdentity,
    Revoked,
    RevocationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit(IdentitySet),
    Reject(RejectReason),
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admit(_))
    }
}

/// 帶逾時的撤銷檢查
/// # 回傳
/// * `Some(revoked)`: 取得權威結果，或退回上次已知的狀態
/// * `None`: 首次接觸且無法取得結果
async fn revocation_with_timeout(
    cache: &RevocationCache,
    thumbprint: &str,
    timeout: Duration,
) -> Option<bool> {
    let cached = cache.check_cached(thumbprint).await;
    if let CachedResult::Fresh(revoked) = cached {
        return Some(revoked);
    }
    match tokio::time::timeout(timeout, cache.is_revoked(thumbprint, true)).await {
        Ok(Ok(revoked)) => Some(revoked),
        Ok(Err(e)) => {
            tracing::warn!(%thumbprint, ?e, "撤銷檢查失敗");
            cached.last_known()
        }
        Err(_) => {
            tracing::warn!(%thumbprint, timeout_ms = timeout.as_millis() as u64, "撤銷檢查逾時");
            cached.last_known()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerAdmission {
    root:    X509,
    cache:   Arc<RevocationCache>,
    timeout: Duration,
    policy:  FirstContactPolicy,
}

impl PeerAdmission {
    /// # 參數
    /// * `root`: 網路唯一的根 CA 憑證
    /// * `cache`: 撤銷快取
    /// * `timeout`: 首次接觸時等待 CA 的上限
    pub fn new(root: X509, cache: Arc<RevocationCache>, timeout: Duration) -> Self {
        Self { root, cache, timeout, policy: FirstContactPolicy::FailClosed }
    }

    pub fn with_policy(mut self, policy: FirstContactPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn admit_connection(&self, conn: &dyn PeerCertificateSource) -> AdmissionDecision {
        match conn.peer_certificate().await {
            Some(der) => self.admit(&der).await,
            None => AdmissionDecision::Reject(RejectReason::NoCertificate),
        }
    }

    /// 驗證對端憑證鏈、解出身分並檢查撤銷狀態
    pub async fn admit(&self, peer_der: &[u8]) -> AdmissionDecision {
        let Ok(cert) = X509::from_der(peer_der) else {
            return AdmissionDecision::Reject(RejectReason::MalformedIdentity);
        };
        match CertUtils::verify_chain(&cert, &self.root) {
            Ok(true) => {}
            Ok(false) => return AdmissionDecision::Reject(RejectReason::UntrustedChain),
            Err(e) => {
                tracing::warn!(?e, "驗證對端憑證鏈失敗");
                return AdmissionDecision::Reject(RejectReason::UntrustedChain);
            }
        }
        let identity = match identity_from_certificate(peer_der) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(?e, "對端憑證身分欄位格式錯誤");
                return AdmissionDecision::Reject(RejectReason::MalformedIdentity);
            }
        };
        let Ok(thumbprint) = CertUtils::thumbprint_sha1(peer_der) else {
            return AdmissionDecision::Reject(RejectReason::MalformedIdentity);
        };
        match revocation_with_timeout(&self.cache, &thumbprint, self.timeout).await {
            Some(true) => AdmissionDecision::Reject(RejectReason::Revoked),
            Some(false) => AdmissionDecision::Admit(identity),
            None => match self.policy {
                FirstContactPolicy::FailClosed => {
                    AdmissionDecision::Reject(RejectReason::RevocationUnavailable)
                }
                FirstContactPolicy::FailOpen => {
                    tracing::warn!(%thumbprint, "無法確認撤銷狀態，依設定放行連線");
                    AdmissionDecision::Admit(identity)
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionAdmission {
    enforcer: PermissionEnforcer,
    timeout:  Duration,
    policy:   FirstContactPolicy,
}

impl TransactionAdmission {
    pub fn new(enforcer: PermissionEnforcer, timeout: Duration) -> Self {
        Self { enforcer, timeout, policy: FirstContactPolicy::FailOpen }
    }

    pub fn with_policy(mut self, policy: FirstContactPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 交易簽署者是否具備所需能力
    /// # 回傳
    /// * `Ok(false)`: 沒有有效憑證、沒有此權限，或已撤銷
    pub async fn admit(
        &self,
        address: &str,
        permission: CertificatePermission,
    ) -> Result<bool, PermissionError> {
        let Some(info) = self.enforcer.granted_certificate(address, permission).await? else {
            return Ok(false);
        };
        let cache = self.enforcer.revocations();
        Ok(match revocation_with_timeout(cache, &info.thumbprint, self.timeout).await {
            Some(revoked) => !revoked,
            None => match self.policy {
                FirstContactPolicy::FailOpen => {
                    tracing::warn!(%address, thumbprint = %info.thumbprint, "無法確認撤銷狀態，交易依預設放行");
                    true
                }
                FirstContactPolicy::FailClosed => false,
            },
        })
    }
}
