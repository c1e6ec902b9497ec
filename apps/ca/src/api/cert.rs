use actix_web::{post, web};
use base64::{engine::general_purpose, Engine as _};
use lca_cert_utils::{request::ECDSA_WITH_SHA256, CertificateInfo};
use lca_crl_cache::{
    providers::http::{RevokedRequest, StatusRequest, StatusResponse},
    RevokedPage,
};
use lca_permission::{sources::AddressRequest, AccessFlags};

use crate::{
    api::{
        types::{
            CertificatesResponse, CredentialsRequest, GenerateRequestBody, IssueRequest, KeyHashRequest,
            PublicKeysResponse, RequestTemplateResponse, ResultResponse, ThumbprintRequest,
        },
        ApiResult,
    },
    error::CaError,
    CaService,
};

pub fn cert_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(generate_certificate_signing_request)
        .service(issue_certificate_using_request_string)
        .service(get_certificate)
        .service(get_all_certificates)
        .service(get_certificate_status)
        .service(get_revoked_certificates)
        .service(revoke_certificate)
        .service(get_certificate_public_keys)
        .service(get_certificate_by_address)
        .service(get_certificate_by_key_hash);
}

#[post("/generate_certificate_signing_request")]
async fn generate_certificate_signing_request(
    state: web::Data<CaService>,
    data: web::Json<GenerateRequestBody>,
) -> ApiResult<web::Json<RequestTemplateResponse>> {
    let caller = state.accounts.authenticate(&data.credentials).await?;
    let template = state.certificates.generate_request_template(&caller, &data.to_template()?)?;
    Ok(web::Json(RequestTemplateResponse {
        request:             general_purpose::STANDARD.encode(template),
        signature_algorithm: ECDSA_WITH_SHA256.to_string(),
    }))
}

#[post("/issue_certificate_using_request_string")]
async fn issue_certificate_using_request_string(
    state: web::Data<CaService>,
    data: web::Json<IssueRequest>,
) -> ApiResult<web::Json<CertificateInfo>> {
    let caller = state.accounts.authenticate(&data.credentials).await?;
    let csr_der = data.csr_der()?;
    let info = state
        .certificates
        .issue(&csr_der, &caller)
        .await
        .inspect_err(|e| tracing::warn!(account_id = caller.id, ?e, "簽發憑證失敗"))?;
    Ok(web::Json(info))
}

/// 持有 `READ_CERTIFICATES` 或是該憑證的申請者才能讀取
#[post("/get_certificate")]
async fn get_certificate(
    state: web::Data<CaService>,
    data: web::Json<ThumbprintRequest>,
) -> ApiResult<web::Json<CertificateInfo>> {
    let caller = state.accounts.authenticate(&data.credentials).await?;
    let can_read_all = caller.has(AccessFlags::READ_CERTIFICATES);
    match state.store.get_by_thumbprint(&data.thumbprint).await? {
        Some(info) if can_read_all || info.issuer_account_id == caller.id => Ok(web::Json(info)),
        None if can_read_all => Err(CaError::NotFound(format!("憑證 {}", data.thumbprint))),
        _ => Err(CaError::denied("不能讀取此憑證")),
    }
}

#[post("/get_all_certificates")]
async fn get_all_certificates(
    state: web::Data<CaService>,
    data: web::Json<CredentialsRequest>,
) -> ApiResult<web::Json<CertificatesResponse>> {
    state.accounts.authorize(&data.credentials, AccessFlags::READ_CERTIFICATES).await?;
    let certificates = state.store.list_all().await?;
    Ok(web::Json(CertificatesResponse { certificates }))
}

/// CA 本身就是權威來源，`AllowCached` 不影響結果
#[post("/get_certificate_status")]
async fn get_certificate_status(
    state: web::Data<CaService>,
    data: web::Json<StatusRequest>,
) -> ApiResult<web::Json<StatusResponse>> {
    let status = state.revocation.status(&data.thumbprint).await?;
    Ok(web::Json(StatusResponse { status }))
}

#[post("/get_revoked_certificates")]
async fn get_revoked_certificates(
    state: web::Data<CaService>,
    data: web::Json<RevokedRequest>,
) -> ApiResult<web::Json<RevokedPage>> {
    let page = state
        .revocation
        .revoked_list(data.since, data.limit, data.offset.unwrap_or(0))
        .await?;
    Ok(web::Json(page))
}

#[post("/revoke_certificate")]
async fn revoke_certificate(
    state: web::Data<CaService>,
    data: web::Json<ThumbprintRequest>,
) -> ApiResult<web::Json<ResultResponse>> {
    let caller = state.accounts.authenticate(&data.credentials).await?;
    let result = state.revocation.revoke(&data.thumbprint, &caller).await?;
    Ok(web::Json(ResultResponse { result }))
}

#[post("/get_certificate_public_keys")]
async fn get_certificate_public_keys(
    state: web::Data<CaService>,
) -> ApiResult<web::Json<PublicKeysResponse>> {
    let public_keys = state.store.list_active_public_keys().await?;
    Ok(web::Json(PublicKeysResponse { public_keys }))
}

#[post("/get_certificate_by_address")]
async fn get_certificate_by_address(
    state: web::Data<CaService>,
    data: web::Json<AddressRequest>,
) -> ApiResult<web::Json<CertificateInfo>> {
    state
        .store
        .get_by_address(&data.address)
        .await?
        .map(web::Json)
        .ok_or_else(|| CaError::NotFound(format!("位址 {}", data.address)))
}

#[post("/get_certificate_by_key_hash")]
async fn get_certificate_by_key_hash(
    state: web::Data<CaService>,
    data: web::Json<KeyHashRequest>,
) -> ApiResult<web::Json<CertificateInfo>> {
    let key_hash = data.tx_key_hash.trim();
    state
        .store
        .get_by_key_hash(key_hash)
        .await?
        .map(web::Json)
        .ok_or_else(|| CaError::NotFound(format!("金鑰雜湊 {key_hash}")))
}
