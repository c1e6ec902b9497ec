use base64::{engine::general_purpose, Engine as _};
use lca_cert_utils::{CertificateInfo, CertificatePermission};
use lca_permission::AccessFlags;
use serde::{Deserialize, Serialize};

use crate::{
    account::{Account, Credentials, NewAccount},
    cert::{keys::NetworkParams, process::TemplateRequest},
    error::CaError,
};

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, CaError> {
    general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| CaError::malformed(format!("{field} 不是合法的 base64: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialsRequest {
    pub credentials: Credentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitializeCaRequest {
    pub credentials: Credentials,
    pub mnemonic:    String,
    /// 助記詞的額外密碼
    #[serde(default)]
    pub password:    String,
    pub network:     NetworkParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateAccountRequest {
    pub credentials: Credentials,
    pub account:     NewAccount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetAccountRequest {
    pub credentials:       Credentials,
    pub target_account_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeAccessLevelRequest {
    pub credentials:       Credentials,
    pub target_account_id: i64,
    pub access_flags:      AccessFlags,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangePasswordRequest {
    pub credentials:       Credentials,
    pub target_account_id: i64,
    pub new_password:      String,
}

/// 申請 CSR 模板，二進位欄位皆為 base64
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenerateRequestBody {
    pub credentials:       Credentials,
    pub address:           String,
    /// SPKI DER
    pub public_key:        String,
    pub tx_key_hash:       String,
    #[serde(default)]
    pub block_signing_key: Option<String>,
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
    #[serde(default)]
    pub permissions:       Option<Vec<CertificatePermission>>,
}

impl GenerateRequestBody {
    pub fn to_template(&self) -> Result<TemplateRequest, CaError> {
        Ok(TemplateRequest {
            address:           self.address.clone(),
            public_key:        decode_b64("PublicKey", &self.public_key)?,
            tx_key_hash:       decode_b64("TxKeyHash", &self.tx_key_hash)?,
            block_signing_key: self
                .block_signing_key
                .as_deref()
                .map(|k| decode_b64("BlockSigningKey", k))
                .transpose()?,
            subject_alt_names: self.subject_alt_names.clone(),
            permissions:       self.permissions.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestTemplateResponse {
    /// 未簽名的 CertificationRequestInfo DER (base64)
    pub request:             String,
    pub signature_algorithm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IssueRequest {
    pub credentials: Credentials,
    /// CSR DER (base64)
    pub request:     String,
}

impl IssueRequest {
    pub fn csr_der(&self) -> Result<Vec<u8>, CaError> {
        decode_b64("Request", &self.request)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ThumbprintRequest {
    pub credentials: Credentials,
    pub thumbprint:  String,
}

/// 交易簽章金鑰雜湊 (base64)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyHashRequest {
    pub tx_key_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultResponse {
    pub result: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountIdResponse {
    pub account_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountsResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificatesResponse {
    pub certificates: Vec<CertificateInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicKeysResponse {
    /// SPKI DER (base64)
    pub public_keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthResponse {
    pub status:      String,
    pub initialized: bool,
}
