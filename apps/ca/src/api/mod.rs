//! HTTP JSON API，全部為 `POST /api/<operation>`

use actix_web::{get, web, Responder};

use crate::{api::types::HealthResponse, error::CaError, CaService};

pub mod account;
pub mod cert;
pub mod types;

pub type ApiResult<T> = Result<T, CaError>;

#[get("/health")]
async fn health(state: web::Data<CaService>) -> impl Responder {
    web::Json(HealthResponse {
        status:      "ok".to_string(),
        initialized: state.certificates.is_initialized(),
    })
}

/// JSON 解析失敗時回傳與其他錯誤相同格式的 400
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        tracing::error!(?err, "JSON deserialization error");
        CaError::malformed(err.to_string()).into()
    })
}

pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(json_config())
            .service(health)
            .configure(account::account_routes)
            .configure(cert::cert_routes),
    );
}
