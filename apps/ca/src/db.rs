use std::{path::Path, time::Duration};

use lca_project_const::ProjectConst;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{config::BackendConfig, error::CaError};

/// 開啟資料庫連線池並執行 migrations
/// # 參數
/// * `cfg`: 後端設定
/// # 回傳
/// * `Result<SqlitePool, CaError>`: 連線池
pub async fn connect(cfg: &BackendConfig) -> Result<SqlitePool, CaError> {
    let BackendConfig::Sqlite { store_path, max_connections, timeout } = cfg;
    let store_path = Path::new(store_path);
    if let Some(parent) = store_path.parent() {
        ProjectConst::ensure_dir(parent.to_path_buf())?;
    }
    let connect_opts = SqliteConnectOptions::new()
        .filename(store_path)
        .create_if_missing(true)
        .pragma("auto_vacuum", "FULL")
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(*max_connections)
        .acquire_timeout(Duration::from_secs(*timeout))
        .connect_with(connect_opts)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    tracing::info!(path = %store_path.display(), "資料庫已就緒");
    Ok(pool)
}

/// 測試用的記憶體資料庫
///
/// 記憶體資料庫只存在於單一連線中，因此連線池只保留一條且不回收
pub async fn connect_in_memory() -> Result<SqlitePool, CaError> {
    let connect_opts = SqliteConnectOptions::new().in_memory(true).foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_opts)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}
