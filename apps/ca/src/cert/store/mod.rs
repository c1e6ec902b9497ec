use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lca_cert_utils::{CertStatus, CertificateInfo, CertificatePermission};
use lca_permission::{CertificateSource, PermissionError};

use crate::error::CaError;

pub mod sqlite;

pub use sqlite::SqliteCertStore;

/// 要寫入 registry 的新憑證，`id` 由資料庫產生
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub der:               Vec<u8>,
    pub thumbprint:        String,
    pub serial:            String,
    pub subject:           String,
    pub issuer_account_id: i64,
    pub address:           String,
    /// base64
    pub tx_key_hash:       String,
    /// base64
    pub block_signing_key: Option<String>,
    /// SPKI DER 的 base64
    pub public_key:        String,
    pub permissions:       Vec<CertificatePermission>,
    pub issued_at:         DateTime<Utc>,
    pub not_after:         DateTime<Utc>,
}

/// 撤銷紀錄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub thumbprint:         String,
    pub revoker_account_id: i64,
    pub revoked_at:         DateTime<Utc>,
}

#[async_trait]
pub trait CertificateStore: Send + Sync + Debug {
    /// 寫入新憑證；同一把公鑰已有有效憑證時回傳 `MalformedRequest`
    async fn insert(&self, cert: NewCertificate) -> Result<CertificateInfo, CaError>;
    /// 根據指紋查詢憑證
    async fn get_by_thumbprint(&self, thumbprint: &str) -> Result<Option<CertificateInfo>, CaError>;
    /// 根據位址查詢，優先回傳有效的憑證，否則回傳最新的一張
    async fn get_by_address(&self, address: &str) -> Result<Option<CertificateInfo>, CaError>;
    /// 根據交易簽章金鑰雜湊 (base64) 查詢，規則同 `get_by_address`
    async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<CertificateInfo>, CaError>;
    /// 列出所有憑證
    async fn list_all(&self) -> Result<Vec<CertificateInfo>, CaError>;
    /// 查詢憑證狀態，沒有紀錄時為 `Unknown`
    async fn query_status(&self, thumbprint: &str) -> Result<CertStatus, CaError>;
    /// 所有有效憑證的公鑰 (base64)
    async fn list_active_public_keys(&self) -> Result<Vec<String>, CaError>;
    /// 公鑰是否已綁定在一張有效憑證上
    async fn has_active_public_key(&self, public_key: &str) -> Result<bool, CaError>;
    /// 所有已撤銷的指紋
    async fn list_revoked(&self) -> Result<Vec<String>, CaError>;
    /// 分頁列出撤銷紀錄，依撤銷順序排列
    /// # 參數
    /// * `since`: 只列出此時間之後撤銷的紀錄
    /// * `limit`: 單頁筆數
    /// * `offset`: 略過的筆數
    async fn list_revoked_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RevokedEntry>, CaError>;
    /// 將憑證標記為撤銷
    /// # 回傳
    /// * `Ok(true)`: 這次呼叫完成撤銷
    /// * `Err(CaError::AlreadyRevoked)`: 先前已撤銷
    /// * `Err(CaError::NotFound)`: 沒有這張憑證
    async fn mark_revoked(&self, thumbprint: &str, revoker_account_id: i64) -> Result<bool, CaError>;
}

/// 讓同一個行程內的權限檢查直接查詢 registry
#[derive(Debug, Clone)]
pub struct LocalCertificateSource {
    store: Arc<dyn CertificateStore>,
}

impl LocalCertificateSource {
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CertificateSource for LocalCertificateSource {
    async fn active_certificate(
        &self,
        address: &str,
    ) -> Result<Option<CertificateInfo>, PermissionError> {
        let found = self
            .store
            .get_by_address(address)
            .await
            .map_err(|e| PermissionError::Source(e.to_string()))?;
        Ok(found.filter(CertificateInfo::is_active))
    }
}
