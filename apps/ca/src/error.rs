use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use lca_cert_utils::CodecError;
use lca_config_loader::LoaderError;
use lca_password::PasswordError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("帳號或密碼錯誤")]
    InvalidCredentials,
    #[error("權限不足: {0}")]
    AuthorizationDenied(String),
    #[error("找不到{0}")]
    NotFound(String),
    #[error("請求格式錯誤: {0}")]
    MalformedRequest(String),
    #[error("憑證已撤銷")]
    AlreadyRevoked,
    #[error("CA 尚未初始化")]
    CaUninitialized,
    #[error("CA 已經初始化")]
    AlreadyInitialized,
    #[error("無法連線至 CA: {0}")]
    AuthorityUnreachable(String),
    #[error("簽發憑證失敗: {0}")]
    SigningFailure(String),
    #[error("資料庫錯誤: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("資料庫 migration 失敗: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("設定錯誤: {0}")]
    Config(String),
    #[error("檔案存取失敗: {0}")]
    Io(#[from] std::io::Error),
    #[error("內部錯誤: {0}")]
    Internal(String),
}

impl CaError {
    pub fn denied(reason: impl Into<String>) -> Self {
        CaError::AuthorizationDenied(reason.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        CaError::MalformedRequest(reason.into())
    }

    /// 對外固定的錯誤代碼
    pub fn code(&self) -> &'static str {
        match self {
            CaError::InvalidCredentials => "InvalidCredentials",
            CaError::AuthorizationDenied(_) => "AuthorizationDenied",
            CaError::NotFound(_) => "NotFound",
            CaError::MalformedRequest(_) => "MalformedRequest",
            CaError::AlreadyRevoked => "AlreadyRevoked",
            CaError::CaUninitialized => "CaUninitialized",
            CaError::AlreadyInitialized => "AlreadyInitialized",
            CaError::AuthorityUnreachable(_) => "AuthorityUnreachable",
            CaError::SigningFailure(_) => "SigningFailure",
            CaError::Storage(_)
            | CaError::Migrate(_)
            | CaError::Config(_)
            | CaError::Io(_)
            | CaError::Internal(_) => "Internal",
        }
    }
}

impl From<CodecError> for CaError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => CaError::Io(io),
            CodecError::OpenSsl(e) => CaError::SigningFailure(e.to_string()),
            other => CaError::MalformedRequest(other.to_string()),
        }
    }
}

impl From<openssl::error::ErrorStack> for CaError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        CaError::SigningFailure(e.to_string())
    }
}

impl From<PasswordError> for CaError {
    fn from(e: PasswordError) -> Self {
        CaError::Internal(e.to_string())
    }
}

impl From<LoaderError> for CaError {
    fn from(e: LoaderError) -> Self {
        CaError::Config(e.to_string())
    }
}

/// HTTP 錯誤回應的內容
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    pub code:    String,
    pub message: String,
}

impl ResponseError for CaError {
    fn status_code(&self) -> StatusCode {
        match self {
            CaError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            CaError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            CaError::NotFound(_) => StatusCode::NOT_FOUND,
            CaError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            CaError::AlreadyRevoked | CaError::AlreadyInitialized => StatusCode::CONFLICT,
            CaError::CaUninitialized | CaError::AuthorityUnreachable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // 內部錯誤只記錄在日誌，不把細節回傳給呼叫端
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "內部錯誤");
            "內部錯誤".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(ErrorBody { code: self.code().to_string(), message })
    }
}
