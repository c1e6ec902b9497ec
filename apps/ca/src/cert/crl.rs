//! 撤銷權威: 撤銷憑證並對外提供狀態與撤銷清單

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lca_cert_utils::CertStatus;
use lca_crl_cache::{CrlCacheError, RevocationSource, RevokedPage};
use lca_permission::AccessFlags;

use crate::{account::Account, cert::store::CertificateStore, error::CaError};

#[derive(Debug)]
pub struct RevocationAuthority {
    store:           Arc<dyn CertificateStore>,
    update_interval: Duration,
    max_page_size:   usize,
}

impl RevocationAuthority {
    /// # 參數
    /// * `store`: 憑證 registry
    /// * `update_interval`: 建議用戶端的更新間隔
    /// * `max_page_size`: 單頁最多回傳的筆數
    pub fn new(store: Arc<dyn CertificateStore>, update_interval: Duration, max_page_size: usize) -> Self {
        Self { store, update_interval, max_page_size: max_page_size.max(1) }
    }

    /// 撤銷憑證
    /// # 回傳
    /// * `Ok(true)`: 這次呼叫完成撤銷
    /// * `Ok(false)`: 先前已撤銷或沒有這張憑證
    pub async fn revoke(&self, thumbprint: &str, caller: &Account) -> Result<bool, CaError> {
        if !caller.has(AccessFlags::REVOKE_CERTIFICATES) {
            return Err(CaError::denied(format!("帳號 {} 不能撤銷憑證", caller.id)));
        }
        match self.store.mark_revoked(thumbprint, caller.id).await {
            Ok(done) => {
                tracing::info!(%thumbprint, account_id = caller.id, "已撤銷憑證");
                Ok(done)
            }
            Err(CaError::AlreadyRevoked) => {
                tracing::debug!(%thumbprint, "憑證先前已撤銷");
                Ok(false)
            }
            Err(CaError::NotFound(_)) => {
                tracing::debug!(%thumbprint, "沒有這張憑證，略過撤銷");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self, thumbprint: &str) -> Result<CertStatus, CaError> {
        self.store.query_status(thumbprint).await
    }

    /// 分頁的撤銷清單
    /// # 參數
    /// * `since`: 只列出此時間之後撤銷的指紋
    /// * `limit`: 未指定或超過上限時使用上限
    /// * `offset`: 略過的筆數
    pub async fn revoked_list(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<RevokedPage, CaError> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(self.max_page_size).min(self.max_page_size);
        let entries = self.store.list_revoked_since(since, limit, offset).await?;
        let this_update = Utc::now();
        let next_update = this_update
            + chrono::Duration::from_std(self.update_interval)
                .map_err(|e| CaError::Internal(e.to_string()))?;
        Ok(RevokedPage {
            thumbprints: entries.into_iter().map(|e| e.thumbprint).collect(),
            this_update,
            next_update,
        })
    }
}

/// 與 CA 同行程的快取可以直接以撤銷權威作為來源
#[async_trait]
impl RevocationSource for RevocationAuthority {
    async fn certificate_status(&self, thumbprint: &str) -> Result<CertStatus, CrlCacheError> {
        self.status(thumbprint).await.map_err(|e| CrlCacheError::ProviderError(e.to_string()))
    }

    async fn revoked_page(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<RevokedPage, CrlCacheError> {
        self.revoked_list(since, Some(limit), offset)
            .await
            .map_err(|e| CrlCacheError::ProviderError(e.to_string()))
    }
}
