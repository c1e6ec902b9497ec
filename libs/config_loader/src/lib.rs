use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub const PROJECT: (&str, &str, &str) = ("org", "lca-ledger", "LCA");

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("無法解析設定: {0}")]
    Config(#[from] config::ConfigError),
    #[error("無法序列化設定: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("設定檔寫入失敗: {0}")]
    Io(#[from] std::io::Error),
}

/// 設定檔的搜尋位置
#[derive(Debug, Clone)]
pub struct ConfigSources {
    /// 系統層級目錄 (release 預設 `/etc/LCA`)
    pub system_dir: PathBuf,
    /// 使用者設定目錄 (例如 `~/.config/lca`)，無法取得家目錄時略過
    pub user_dir:   Option<PathBuf>,
    /// 開發用的本地目錄 (預設 `config`)
    pub dev_dir:    PathBuf,
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self {
            system_dir: PathBuf::from("/etc").join(PROJECT.2),
            user_dir:   ProjectDirs::from(PROJECT.0, PROJECT.1, PROJECT.2)
                .map(|dirs| dirs.config_dir().to_path_buf()),
            dev_dir:    PathBuf::from("config"),
        }
    }
}

/// 讀取 `{env_prefix}_config.toml`，依序套用系統級、使用者、本地與環境變數
/// # 參數
/// * `env_prefix`: 服務代號，同時決定檔名與環境變數前綴
/// * `sources`: 搜尋目錄
/// # 回傳
/// * `Result<T, LoaderError>`: 反序列化後的設定
pub fn load_config<T>(env_prefix: &str, sources: &ConfigSources) -> Result<T, LoaderError>
where
    T: DeserializeOwned,
{
    let file_name = format!("{env_prefix}_config.toml");
    let mut builder = Config::builder()
        // 系統級（不存在也沒關係）
        .add_source(File::from(sources.system_dir.join(&file_name)).required(false));
    if let Some(user_dir) = &sources.user_dir {
        builder = builder.add_source(File::from(user_dir.join(&file_name)).required(false));
    }
    let builder = builder
        // 本地開發
        .add_source(File::from(sources.dev_dir.join(&file_name)).required(false))
        // 環境變數覆蓋：LCA_CA__SERVER___PORT
        .add_source(
            Environment::with_prefix(&format!("{}_{}", PROJECT.2, env_prefix))
                .prefix_separator("__")
                .separator("___"),
        );
    Ok(builder.build()?.try_deserialize::<T>()?)
}

/// 將設定以 TOML 格式寫入指定路徑
pub async fn store_config<T>(config: &T, path: impl AsRef<Path>) -> Result<(), LoaderError>
where
    T: Serialize,
{
    let path = path.as_ref();
    let s = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, s).await?;
    Ok(())
}
