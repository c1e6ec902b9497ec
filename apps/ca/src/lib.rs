//! 帳本網路的憑證中心: 帳號目錄、憑證簽發、registry 與撤銷權威

use std::sync::Arc;

use lca_password::generate_password;
use sqlx::SqlitePool;

pub mod account;
pub mod api;
pub mod cert;
pub mod config;
pub mod db;
pub mod error;

pub use crate::{
    account::{Account, AccountDirectory, Credentials, NewAccount},
    cert::{
        crl::RevocationAuthority,
        keys::{KeyProvider, MnemonicKeyProvider, NetworkParams},
        process::{CertificateProcess, TemplateRequest},
        store::{CertificateStore, LocalCertificateSource, SqliteCertStore},
    },
    config::Settings,
    error::{CaError, ErrorBody},
};

/// 定義一個簡化的結果類型，用於返回結果或錯誤
pub type CaResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const GENERATED_PASSWORD_LEN: usize = 24;

/// HTTP 層共用的 CA 狀態
#[derive(Debug)]
pub struct CaService {
    pub accounts:     Arc<AccountDirectory>,
    pub store:        Arc<dyn CertificateStore>,
    pub certificates: Arc<CertificateProcess>,
    pub revocation:   Arc<RevocationAuthority>,
}

impl CaService {
    /// 以既有的連線池組出所有元件，並載入已存在的根憑證
    pub fn with_pool(pool: SqlitePool, settings: &Settings) -> Result<Self, CaError> {
        let store: Arc<dyn CertificateStore> = Arc::new(SqliteCertStore::new(pool.clone()));
        let certificates =
            Arc::new(CertificateProcess::new(store.clone(), settings.certificate.clone()));
        certificates.load_identity()?;
        let revocation = Arc::new(RevocationAuthority::new(
            store.clone(),
            settings.crl.update_interval,
            settings.crl.max_page_size,
        ));
        Ok(Self { accounts: Arc::new(AccountDirectory::new(pool)), store, certificates, revocation })
    }

    /// 開啟資料庫並建立初始管理者
    pub async fn open(settings: &Settings) -> Result<Self, CaError> {
        let pool = db::connect(&settings.backend).await?;
        let service = Self::with_pool(pool, settings)?;
        service.bootstrap(settings).await?;
        Ok(service)
    }

    /// 沒有任何帳號時建立管理者；未設定密碼則產生一組並寫入日誌
    /// # 回傳
    /// * `Ok(Some(id))`: 新建立的管理者帳號
    pub async fn bootstrap(&self, settings: &Settings) -> Result<Option<i64>, CaError> {
        let configured = &settings.accounts.admin_password;
        let password = if configured.is_empty() {
            generate_password(GENERATED_PASSWORD_LEN)
        } else {
            configured.clone()
        };
        let created = self.accounts.bootstrap_admin(&settings.accounts.admin_name, &password).await?;
        if let Some(id) = created {
            if configured.is_empty() {
                tracing::warn!(account_id = id, %password, "已產生初始管理者密碼，請盡快變更");
            }
        }
        Ok(created)
    }
}
