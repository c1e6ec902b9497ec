use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lca_cert_utils::CertStatus;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Duration;

use crate::{CrlCacheError, RevocationSource, RevokedPage};

/// 用戶端的 JSON 傳輸層
#[async_trait]
pub trait JsonTransport: Send + Sync + Debug {
    async fn post_json(&self, endpoint: &str, body: Value) -> Result<Value, CrlCacheError>;
}

/// 序列化請求、呼叫 `post_json`、再反序列化回應
pub async fn call<Req, Resp>(
    transport: &dyn JsonTransport,
    endpoint: &str,
    req: &Req,
) -> Result<Resp, CrlCacheError>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    let body = serde_json::to_value(req)?;
    let resp = transport.post_json(endpoint, body).await?;
    serde_json::from_value(resp).map_err(|e| CrlCacheError::ProviderError(format!("{endpoint}: {e}")))
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client:   reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// # 參數
    /// * `base_url`: CA 服務位址，例如 `http://ca.local:11210`
    /// * `timeout`: 單一請求的逾時
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CrlCacheError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrlCacheError::ProviderError(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl JsonTransport for ReqwestTransport {
    async fn post_json(&self, endpoint: &str, body: Value) -> Result<Value, CrlCacheError> {
        let url = format!("{}/api/{endpoint}", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrlCacheError::AuthorityUnreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrlCacheError::Rejected { status: status.as_u16(), body });
        }
        resp.json::<Value>().await.map_err(|e| CrlCacheError::ProviderError(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusRequest {
    pub thumbprint:   String,
    #[serde(default)]
    pub allow_cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    pub status: CertStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevokedRequest {
    #[serde(default)]
    pub since:  Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit:  Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// 透過 CA 的 HTTP API 查詢撤銷狀態
#[derive(Debug, Clone)]
pub struct HttpRevocationSource {
    transport: Arc<dyn JsonTransport>,
}

impl HttpRevocationSource {
    pub fn new(transport: Arc<dyn JsonTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl RevocationSource for HttpRevocationSource {
    async fn certificate_status(&self, thumbprint: &str) -> Result<CertStatus, CrlCacheError> {
        let req = StatusRequest { thumbprint: thumbprint.to_string(), allow_cached: false };
        let resp: StatusResponse =
            call(self.transport.as_ref(), "get_certificate_status", &req).await?;
        Ok(resp.status)
    }

    async fn revoked_page(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<RevokedPage, CrlCacheError> {
        let req = RevokedRequest { since, limit: Some(limit), offset: Some(offset) };
        call(self.transport.as_ref(), "get_revoked_certificates", &req).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl JsonTransport for Recorder {
        async fn post_json(&self, endpoint: &str, body: Value) -> Result<Value, CrlCacheError> {
            self.calls.lock().unwrap().push((endpoint.to_string(), body));
            Ok(match endpoint {
                "get_certificate_status" => json!({ "Status": "Revoked" }),
                _ => json!({
                    "Thumbprints": ["AA"],
                    "ThisUpdate": "2026-01-01T00:00:00Z",
                    "NextUpdate": "2026-01-01T01:00:00Z"
                }),
            })
        }
    }

    #[tokio::test]
    async fn requests_use_pascal_case_wire_format() {
        let recorder = Arc::new(Recorder::default());
        let source = HttpRevocationSource::new(recorder.clone());
        assert_eq!(source.certificate_status("AA").await.unwrap(), CertStatus::Revoked);
        let page = source.revoked_page(None, 10, 20).await.unwrap();
        assert_eq!(page.thumbprints, vec!["AA".to_string()]);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].1["Thumbprint"], "AA");
        assert_eq!(calls[0].1["AllowCached"], false);
        assert_eq!(calls[1].0, "get_revoked_certificates");
        assert_eq!(calls[1].1["Limit"], 10);
        assert_eq!(calls[1].1["Offset"], 20);
    }

    #[tokio::test]
    async fn unreachable_endpoint_maps_to_authority_unreachable() {
        let transport = ReqwestTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = transport.post_json("get_certificate_status", json!({})).await.unwrap_err();
        assert!(matches!(err, CrlCacheError::AuthorityUnreachable(_)));
    }
}
