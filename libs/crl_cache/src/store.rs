//! 撤銷快取的落地格式: `{ thumbprint: RevocationRecord }` 的 JSON 檔

use std::{collections::HashMap, path::Path};

use crate::{CrlCacheError, RevocationRecord};

/// 讀取快取檔；檔案不存在時回傳空表
pub async fn load(path: &Path) -> Result<HashMap<String, RevocationRecord>, CrlCacheError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// 先寫入暫存檔再 rename，避免留下寫到一半的檔案
pub async fn save(
    path: &Path,
    records: &HashMap<String, RevocationRecord>,
) -> Result<(), CrlCacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
