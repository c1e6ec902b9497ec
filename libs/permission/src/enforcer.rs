use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use lca_cert_utils::{identity_from_certificate, CertificateInfo, CertificatePermission};
use lca_crl_cache::RevocationCache;

use crate::PermissionError;

/// 由位址找出目前有效的憑證 (CA 本地的 registry 或遠端 API)
#[async_trait]
pub trait CertificateSource: Send + Sync + Debug {
    async fn active_certificate(
        &self,
        address: &str,
    ) -> Result<Option<CertificateInfo>, PermissionError>;
}

#[derive(Debug, Clone)]
pub struct PermissionEnforcer {
    certificates: Arc<dyn CertificateSource>,
    revocations:  Arc<RevocationCache>,
}

impl PermissionEnforcer {
    pub fn new(certificates: Arc<dyn CertificateSource>, revocations: Arc<RevocationCache>) -> Self {
        Self { certificates, revocations }
    }

    pub fn revocations(&self) -> &Arc<RevocationCache> {
        &self.revocations
    }

    /// 找出位址的有效憑證，並確認憑證本身帶有指定的權限標記
    /// # 回傳
    /// * `Ok(None)`: 沒有有效憑證，或憑證沒有此權限
    pub async fn granted_certificate(
        &self,
        address: &str,
        permission: CertificatePermission,
    ) -> Result<Option<CertificateInfo>, PermissionError> {
        let Some(info) = self.certificates.active_certificate(address).await? else {
            return Ok(None);
        };
        if !info.is_active() || info.address != address {
            return Ok(None);
        }
        // 以憑證內的擴充欄位為準，不信任來源額外附帶的權限清單
        let identity = identity_from_certificate(&info.der)?;
        if identity.address != address || !identity.has_permission(permission) {
            return Ok(None);
        }
        Ok(Some(info))
    }

    /// 位址是否持有指定的憑證能力，且該憑證未被撤銷
    /// # 參數
    /// * `address`: 帳本位址
    /// * `permission`: 需要的能力
    /// # 回傳
    /// * `Err(PermissionError::Revocation)`: 首次接觸且 CA 無法連線，由呼叫端決定放行與否
    pub async fn has_certificate_permission(
        &self,
        address: &str,
        permission: CertificatePermission,
    ) -> Result<bool, PermissionError> {
        let Some(info) = self.granted_certificate(address, permission).await? else {
            return Ok(false);
        };
        let revoked = self.revocations.is_revoked(&info.thumbprint, true).await?;
        Ok(!revoked)
    }
}
