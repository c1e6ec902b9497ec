use std::path::PathBuf;

use lca_config_loader::{load_config, store_config, ConfigSources, LoaderError};
use lca_project_const::ProjectConst;
use serde::{Deserialize, Serialize};

/// 設定檔與環境變數使用的服務代號 (`CA_config.toml`、`LCA_CA__...`)
pub const ID: &str = "CA";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_TIMEOUT: u64 = 10;
pub const DEFAULT_VALIDITY_YEARS: u32 = 1;
pub const DEFAULT_ROOT_VALIDITY_YEARS: u32 = 10;
pub const DEFAULT_CRL_UPDATE_INTERVAL: u64 = 3600;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
/// 伺服器設定
pub struct Server {
    #[serde(default = "Server::default_host")]
    /// 伺服器主機名稱或 IP 地址
    pub host:    String,
    #[serde(default = "Server::default_port")]
    /// 伺服器埠號
    pub port:    u16,
    #[serde(default = "Server::default_workers")]
    pub workers: usize,
}

impl Server {
    fn default_host() -> String {
        "127.0.0.1".into()
    }
    fn default_port() -> u16 {
        ProjectConst::SOFTWARE_PORT
    }
    fn default_workers() -> usize {
        4
    }
}

impl Default for Server {
    fn default() -> Self {
        Server {
            host:    Server::default_host(),
            port:    Server::default_port(),
            workers: Server::default_workers(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    /// SQLite 資料庫後端
    /// 最大連線數量預設為 5，逾時時間預設為 10 秒
    Sqlite {
        #[serde(default = "SqliteSettings::default_store_path")]
        store_path:      String,
        #[serde(default = "SqliteSettings::default_max_connections")]
        max_connections: u32,
        #[serde(default = "SqliteSettings::default_timeout")]
        timeout:         u64,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sqlite {
            store_path:      SqliteSettings::default_store_path(),
            max_connections: SqliteSettings::default_max_connections(),
            timeout:         SqliteSettings::default_timeout(),
        }
    }
}

struct SqliteSettings;
impl SqliteSettings {
    fn default_store_path() -> String {
        ProjectConst::db_path().join("ca_store.db").display().to_string()
    }
    fn default_max_connections() -> u32 {
        DEFAULT_MAX_CONNECTIONS
    }
    fn default_timeout() -> u64 {
        DEFAULT_TIMEOUT
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
/// 憑證設定
pub struct Certificate {
    /// 根憑證、私鑰與已簽發憑證的存放目錄
    #[serde(default = "Certificate::default_certs_dir")]
    pub certs_dir:               PathBuf,
    /// 簽發憑證的有效年數
    #[serde(default = "Certificate::default_validity_years")]
    pub validity_years:          u32,
    /// 根憑證的有效年數
    #[serde(default = "Certificate::default_root_validity_years")]
    pub root_validity_years:     u32,
    /// 是否拒絕沒有持有證明簽章的 CSR
    #[serde(default = "Certificate::default_require_signed_requests")]
    pub require_signed_requests: bool,
    /// 根憑證私鑰的密碼短語，空字串代表不加密
    #[serde(default)]
    pub passphrase:              String,
}

impl Certificate {
    fn default_certs_dir() -> PathBuf {
        ProjectConst::certs_path()
    }
    fn default_validity_years() -> u32 {
        DEFAULT_VALIDITY_YEARS
    }
    fn default_root_validity_years() -> u32 {
        DEFAULT_ROOT_VALIDITY_YEARS
    }
    fn default_require_signed_requests() -> bool {
        true
    }
}

impl Default for Certificate {
    fn default() -> Self {
        Certificate {
            certs_dir:               Certificate::default_certs_dir(),
            validity_years:          Certificate::default_validity_years(),
            root_validity_years:     Certificate::default_root_validity_years(),
            require_signed_requests: Certificate::default_require_signed_requests(),
            passphrase:              String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
/// 初始管理者帳號
pub struct Accounts {
    #[serde(default = "Accounts::default_admin_name")]
    pub admin_name:     String,
    /// 留空時第一次啟動會產生隨機密碼並寫入日誌
    #[serde(default)]
    pub admin_password: String,
}

impl Accounts {
    fn default_admin_name() -> String {
        "admin".into()
    }
}

impl Default for Accounts {
    fn default() -> Self {
        Accounts { admin_name: Accounts::default_admin_name(), admin_password: String::new() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
/// 撤銷清單設定
pub struct Crl {
    /// 建議用戶端的更新間隔，會放進撤銷清單的 NextUpdate
    #[serde(with = "humantime_serde", default = "Crl::default_update_interval")]
    pub update_interval: std::time::Duration,
    /// 單頁最多回傳的指紋數
    #[serde(default = "Crl::default_max_page_size")]
    pub max_page_size:   usize,
}

impl Crl {
    fn default_update_interval() -> std::time::Duration {
        std::time::Duration::from_secs(DEFAULT_CRL_UPDATE_INTERVAL)
    }
    fn default_max_page_size() -> usize {
        1000
    }
}

impl Default for Crl {
    fn default() -> Self {
        Crl {
            update_interval: Crl::default_update_interval(),
            max_page_size:   Crl::default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
/// 應用程式設定
pub struct Settings {
    #[serde(default)]
    /// 伺服器設定
    pub server:      Server,
    #[serde(default)]
    /// 憑證設定
    pub certificate: Certificate,
    #[serde(default)]
    /// 資料庫設定
    pub backend:     BackendConfig,
    #[serde(default)]
    pub accounts:    Accounts,
    #[serde(default)]
    pub crl:         Crl,
}

impl Settings {
    /// 從系統與本地的 `CA_config.toml` 讀取設定並套用環境變數覆蓋
    /// # 回傳
    /// * `Result<Self, LoaderError>` - 返回設定實例或錯誤
    pub fn load() -> Result<Self, LoaderError> {
        load_config(ID, &ConfigSources::default())
    }

    /// 產生一份包含預設值的設定檔
    /// # 參數
    /// * `path` - 要生成的設定檔路徑
    pub async fn init(path: &str) -> Result<(), LoaderError> {
        store_config(&Settings::default(), path).await?;
        tracing::info!("已產生預設設定檔 {path}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_uses_defaults() {
        let raw = r#"
            [Server]
            Port = 9000

            [Certificate]
            ValidityYears = 3

            [Backend]
            backend = "sqlite"
            store_path = "/tmp/x.db"
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.certificate.validity_years, 3);
        assert!(settings.certificate.require_signed_requests);
        let BackendConfig::Sqlite { store_path, max_connections, .. } = settings.backend;
        assert_eq!(store_path, "/tmp/x.db");
        assert_eq!(max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(settings.crl.update_interval, std::time::Duration::from_secs(3600));
    }

    #[test]
    fn default_settings_serialize_to_toml() {
        let s = toml::to_string_pretty(&Settings::default()).unwrap();
        assert!(s.contains("[Server]"));
        assert!(s.contains("UpdateInterval = \"1h\""));
    }
}
