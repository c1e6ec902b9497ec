//! 節點端的權限判斷：帳號旗標、憑證能力與連線 / 交易准入

use lca_cert_utils::CodecError;
use lca_crl_cache::CrlCacheError;
use thiserror::Error;

pub mod admission;
pub mod enforcer;
pub mod flags;
pub mod sources;

pub use admission::{
    AdmissionDecision, FirstContactPolicy, PeerAdmission, PeerCertificateSource, RejectReason,
    TransactionAdmission,
};
pub use enforcer::{CertificateSource, PermissionEnforcer};
pub use flags::{has_account_permission, AccessFlags};

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("查詢撤銷狀態失敗: {0}")]
    Revocation(#[from] CrlCacheError),
    #[error("查詢憑證失敗: {0}")]
    Source(String),
    #[error("憑證內容無法解析: {0}")]
    Codec(#[from] CodecError),
}
