use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// 自訂身分欄位缺漏、型別錯誤或未標記為 critical
    #[error("身分擴充欄位 {field} 格式錯誤: {reason}")]
    MalformedExtension { field: String, reason: String },
    #[error("CSR 格式錯誤: {0}")]
    MalformedRequest(String),
    #[error("不支援的金鑰類型: {0}")]
    UnsupportedKey(String),
    #[error("DER 編解碼失敗: {0}")]
    Der(#[from] der::Error),
    #[error("OpenSSL 錯誤: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("檔案存取失敗: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CodecError::MalformedExtension { field: field.into(), reason: reason.into() }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
