use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use argh::FromArgs;
use ca::{api::configure_app, config::Settings, CaResult, CaService};
use tracing_subscriber::EnvFilter;

#[derive(Debug, FromArgs)]
/// 憑證中心主程式參數
pub struct Args {
    /// 產生範例設定檔後結束
    #[argh(switch, short = 'i')]
    init_config: bool,
    /// 範例設定檔的輸出路徑
    #[argh(option, default = "String::from(\"CA_config.toml\")")]
    config_path: String,
}

#[actix_web::main]
async fn main() -> CaResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args: Args = argh::from_env();
    if args.init_config {
        Settings::init(&args.config_path).await?;
        return Ok(());
    }
    let settings = Settings::load().inspect_err(|e| tracing::error!(?e, "讀取設定失敗"))?;
    let service = Arc::new(CaService::open(&settings).await?);
    if !service.certificates.is_initialized() {
        tracing::warn!("CA 尚未初始化，請呼叫 initialize_ca 建立根憑證");
    }
    let addr = (settings.server.host.clone(), settings.server.port);
    tracing::info!(host = %addr.0, port = addr.1, "啟動 CA HTTP 服務");
    let data = web::Data::from(service);
    HttpServer::new(move || {
        App::new().app_data(data.clone()).wrap(Logger::default()).configure(configure_app)
    })
    .workers(settings.server.workers.max(1))
    .bind(addr)?
    .run()
    .await?;
    tracing::info!("CA HTTP 服務已停止");
    Ok(())
}
