use std::sync::Arc;

use async_trait::async_trait;
use lca_cert_utils::CertificateInfo;
use lca_crl_cache::{
    providers::http::{call, JsonTransport},
    CrlCacheError,
};
use serde::{Deserialize, Serialize};

use crate::{CertificateSource, PermissionError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddressRequest {
    pub address: String,
}

/// 透過 CA 的 `get_certificate_by_address` 查詢憑證
#[derive(Debug, Clone)]
pub struct HttpCertificateSource {
    transport: Arc<dyn JsonTransport>,
}

impl HttpCertificateSource {
    pub fn new(transport: Arc<dyn JsonTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl CertificateSource for HttpCertificateSource {
    async fn active_certificate(
        &self,
        address: &str,
    ) -> Result<Option<CertificateInfo>, PermissionError> {
        let req = AddressRequest { address: address.to_string() };
        match call::<_, CertificateInfo>(self.transport.as_ref(), "get_certificate_by_address", &req)
            .await
        {
            Ok(info) => Ok(Some(info)),
            Err(CrlCacheError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => Err(PermissionError::Source(e.to_string())),
        }
    }
}
