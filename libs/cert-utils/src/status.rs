use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::CertificatePermission;

/// 憑證目前的狀態；`Unknown` 代表 CA 沒有這張憑證的紀錄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

impl CertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CertStatus::Good => "Good",
            CertStatus::Revoked => "Revoked",
            CertStatus::Unknown => "Unknown",
        }
    }

    pub fn is_revoked(self) -> bool {
        self == CertStatus::Revoked
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Good" => Ok(CertStatus::Good),
            "Revoked" => Ok(CertStatus::Revoked),
            "Unknown" => Ok(CertStatus::Unknown),
            other => Err(format!("未知的憑證狀態: {other}")),
        }
    }
}

/// CA 保存的一筆已簽發憑證
///
/// 二進位欄位以 base64 表示，方便直接作為 JSON 傳輸
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateInfo {
    pub id:                 i64,
    #[serde(with = "base64_bytes")]
    pub der:                Vec<u8>,
    pub thumbprint:         String,
    pub serial:             String,
    pub subject:            String,
    pub issuer_account_id:  i64,
    pub revoker_account_id: Option<i64>,
    pub status:             CertStatus,
    pub address:            String,
    /// base64
    pub tx_key_hash:        String,
    /// base64
    pub block_signing_key:  Option<String>,
    /// 申請者公鑰 SPKI DER 的 base64
    pub public_key:         String,
    pub permissions:        Vec<CertificatePermission>,
    pub issued_at:          DateTime<Utc>,
    pub not_after:          DateTime<Utc>,
    pub revoked_at:         Option<DateTime<Utc>>,
}

impl CertificateInfo {
    pub fn is_active(&self) -> bool {
        self.status == CertStatus::Good
    }
}

pub mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        general_purpose::STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
