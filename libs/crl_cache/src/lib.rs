use std::{collections::HashMap, fmt::Debug, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lca_cert_utils::CertStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

pub mod providers;
pub mod store;

/// 重試間隔的上限 (秒)
const MAX_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum CrlCacheError {
    #[error("無法連線至 CA: {0}")]
    AuthorityUnreachable(String),
    #[error("CA 回應錯誤: {0}")]
    ProviderError(String),
    #[error("CA 拒絕請求 (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("快取檔案讀寫失敗: {0}")]
    Io(#[from] std::io::Error),
    #[error("快取檔案格式錯誤: {0}")]
    Format(#[from] serde_json::Error),
}

/// 一頁已撤銷憑證
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevokedPage {
    pub thumbprints: Vec<String>,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
}

/// 撤銷狀態的權威來源 (遠端 CA 或同一行程內的撤銷服務)
#[async_trait]
pub trait RevocationSource: Send + Sync + Debug {
    async fn certificate_status(&self, thumbprint: &str) -> Result<CertStatus, CrlCacheError>;

    async fn revoked_page(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<RevokedPage, CrlCacheError>;
}

/// 快取中每個指紋的紀錄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub last_checked: DateTime<Utc>,
    pub revoked:      bool,
}

/// 只看本地快取的查詢結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedResult {
    /// 仍在 TTL 內，可以直接採信
    Fresh(bool),
    /// 超過 TTL，只能在 CA 無法連線時作為備援
    Stale(bool),
    Missing,
}

impl CachedResult {
    pub fn last_known(self) -> Option<bool> {
        match self {
            CachedResult::Fresh(r) | CachedResult::Stale(r) => Some(r),
            CachedResult::Missing => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheConfig {
    #[serde(with = "humantime_serde", default = "CacheConfig::default_ttl")]
    pub ttl:              Duration,
    #[serde(with = "humantime_serde", default = "CacheConfig::default_refresh_interval")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde", default = "CacheConfig::default_request_timeout")]
    pub request_timeout:  Duration,
    #[serde(default = "CacheConfig::default_page_size")]
    pub page_size:        usize,
    #[serde(default = "CacheConfig::default_max_retries")]
    pub max_retries:      u32,
    /// 快取檔位置；None 表示不落地
    #[serde(default)]
    pub persist_path:     Option<PathBuf>,
}

impl CacheConfig {
    fn default_ttl() -> Duration {
        Duration::from_secs(600)
    }
    fn default_refresh_interval() -> Duration {
        Duration::from_secs(3600)
    }
    fn default_request_timeout() -> Duration {
        Duration::from_secs(5)
    }
    fn default_page_size() -> usize {
        500
    }
    fn default_max_retries() -> u32 {
        5
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl:              Self::default_ttl(),
            refresh_interval: Self::default_refresh_interval(),
            request_timeout:  Self::default_request_timeout(),
            page_size:        Self::default_page_size(),
            max_retries:      Self::default_max_retries(),
            persist_path:     None,
        }
    }
}

/// 節點端的撤銷快取
///
/// 快取只提供「已撤銷」的負面訊號，不能作為授權依據。一旦觀察到 Revoked
/// 就不會再被改回 Good
#[derive(Debug)]
pub struct RevocationCache {
    entries:     RwLock<HashMap<String, RevocationRecord>>,
    last_update: RwLock<Option<DateTime<Utc>>>,
    source:      Arc<dyn RevocationSource>,
    config:      CacheConfig,
}

impl RevocationCache {
    pub fn new(source: Arc<dyn RevocationSource>, config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_update: RwLock::new(None),
            source,
            config,
        }
    }

    /// 建立快取，若設定了 `persist_path` 則先載入上次保存的紀錄
    pub async fn load(
        source: Arc<dyn RevocationSource>,
        config: CacheConfig,
    ) -> Result<Self, CrlCacheError> {
        let cache = Self::new(source, config);
        if let Some(path) = &cache.config.persist_path {
            let records = store::load(path).await?;
            tracing::info!(count = records.len(), path = %path.display(), "已載入撤銷快取");
            *cache.entries.write().await = records;
        }
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read().await
    }

    pub async fn record(&self, thumbprint: &str) -> Option<RevocationRecord> {
        self.entries.read().await.get(thumbprint).copied()
    }

    /// 直接寫入一筆紀錄；已是 Revoked 的紀錄不會被改回
    pub async fn insert_record(&self, thumbprint: &str, record: RevocationRecord) {
        let mut w = self.entries.write().await;
        let sticky = w.get(thumbprint).is_some_and(|r| r.revoked);
        w.insert(thumbprint.to_string(), RevocationRecord {
            revoked: record.revoked || sticky,
            ..record
        });
    }

    /// 只查本地，不會發出網路請求
    pub async fn check_cached(&self, thumbprint: &str) -> CachedResult {
        let Some(record) = self.record(thumbprint).await else {
            return CachedResult::Missing;
        };
        let age = Utc::now().signed_duration_since(record.last_checked).to_std().unwrap_or_default();
        if age < self.config.ttl {
            CachedResult::Fresh(record.revoked)
        } else {
            CachedResult::Stale(record.revoked)
        }
    }

    /// 向 CA 查詢一次並更新快取
    /// # 回傳
    /// * `Ok(CertStatus)`: 快取中已是 Revoked 時一律回傳 Revoked
    /// * `Err(AuthorityUnreachable)`: 逾時或無法連線，快取不變
    pub async fn check_authoritative(&self, thumbprint: &str) -> Result<CertStatus, CrlCacheError> {
        let status = tokio::time::timeout(
            self.config.request_timeout,
            self.source.certificate_status(thumbprint),
        )
        .await
        .map_err(|_| CrlCacheError::AuthorityUnreachable("查詢逾時".into()))??;

        let mut w = self.entries.write().await;
        let previously_revoked = w.get(thumbprint).is_some_and(|r| r.revoked);
        if previously_revoked && !status.is_revoked() {
            tracing::warn!(%thumbprint, %status, "CA 回報的狀態與已知的撤銷紀錄不符，維持 Revoked");
        }
        let revoked = previously_revoked || status.is_revoked();
        w.insert(thumbprint.to_string(), RevocationRecord { last_checked: Utc::now(), revoked });
        Ok(if revoked { CertStatus::Revoked } else { status })
    }

    /// 查詢憑證是否已撤銷
    /// # 參數
    /// * `thumbprint`: 憑證指紋
    /// * `allow_cached`: 允許直接採信 TTL 內的快取
    /// # 回傳
    /// * `Ok(bool)`: CA 無法連線時退回上次已知的狀態
    /// * `Err(AuthorityUnreachable)`: CA 無法連線且沒有任何快取紀錄
    pub async fn is_revoked(&self, thumbprint: &str, allow_cached: bool) -> Result<bool, CrlCacheError> {
        let cached = self.check_cached(thumbprint).await;
        if allow_cached {
            if let CachedResult::Fresh(revoked) = cached {
                return Ok(revoked);
            }
        }
        match self.check_authoritative(thumbprint).await {
            Ok(status) => Ok(status.is_revoked()),
            Err(e) => match cached.last_known() {
                Some(revoked) => {
                    tracing::warn!(%thumbprint, ?e, revoked, "CA 無法連線，使用上次已知的狀態");
                    Ok(revoked)
                }
                None => Err(e),
            },
        }
    }

    /// 全量抓取一次已撤銷清單並標記到快取 (只增不減)
    /// # 回傳
    /// * `Ok(usize)`: 本次收到的指紋數量
    pub async fn refresh(&self) -> Result<usize, CrlCacheError> {
        let page_size = self.config.page_size.max(1);
        let mut all = Vec::new();
        let mut offset = 0;
        let mut this_update = None;
        loop {
            let page = tokio::time::timeout(
                self.config.request_timeout,
                self.source.revoked_page(None, page_size, offset),
            )
            .await
            .map_err(|_| CrlCacheError::AuthorityUnreachable("取得撤銷清單逾時".into()))??;
            if offset == 0 {
                this_update = Some(page.this_update);
            }
            // CA 可能以較小的上限截斷每頁，只有空頁才代表結束
            let n = page.thumbprints.len();
            if n == 0 {
                break;
            }
            all.extend(page.thumbprints);
            offset += n;
        }
        let now = Utc::now();
        let count = all.len();
        {
            let mut w = self.entries.write().await;
            for t in all {
                w.insert(t, RevocationRecord { last_checked: now, revoked: true });
            }
        }
        *self.last_update.write().await = this_update;
        Ok(count)
    }

    /// 帶指數退避的 refresh，重試期間可被取消
    pub async fn refresh_with_retry(&self, cancel: &CancellationToken) -> Result<usize, CrlCacheError> {
        let mut attempt = 0;
        loop {
            let err = match self.refresh().await {
                Ok(n) => return Ok(n),
                Err(e) => e,
            };
            attempt += 1;
            if attempt >= self.config.max_retries {
                tracing::error!(?err, attempt, "撤銷清單更新重試後仍失敗，放棄本次更新");
                return Err(err);
            }
            let backoff = retry_backoff(attempt);
            tracing::warn!(?err, attempt, backoff = backoff.as_secs(), "撤銷清單更新失敗，稍後重試");
            tokio::select! {
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// 將目前快取寫入 `persist_path`
    pub async fn persist(&self) -> Result<(), CrlCacheError> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        let snapshot = self.entries.read().await.clone();
        store::save(path, &snapshot).await
    }
}

/// 第 `attempt` 次失敗後的等待時間，以 2 的次方成長並有上限
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS))
}

/// 背景更新迴圈；啟動後立即更新一次，之後每 `refresh_interval` 更新一次
#[derive(Debug)]
pub struct RefreshTask {
    cache:  Arc<RevocationCache>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    pub fn spawn(cache: Arc<RevocationCache>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.child_token();
        let handle = tokio::spawn(Self::run(cache.clone(), token));
        tracing::info!("撤銷快取背景更新已啟動");
        Self { cache, cancel, handle }
    }

    async fn run(cache: Arc<RevocationCache>, cancel: CancellationToken) {
        let interval = cache.config.refresh_interval;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                r = cache.refresh_with_retry(&cancel) => r,
            };
            match result {
                Ok(n) => {
                    tracing::debug!(revoked = n, "撤銷清單已更新");
                    if let Err(e) = cache.persist().await {
                        tracing::error!(?e, "撤銷快取寫入失敗");
                    }
                }
                Err(e) => tracing::warn!(?e, "本輪撤銷清單更新失敗"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    pub fn cache(&self) -> &Arc<RevocationCache> {
        &self.cache
    }

    /// 取消背景迴圈、等待結束，再把快取寫入磁碟
    pub async fn shutdown(self) -> Result<(), CrlCacheError> {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("撤銷快取背景任務 panic: {e}");
        }
        self.cache.persist().await?;
        tracing::info!("撤銷快取背景更新已停止");
        Ok(())
    }
}
