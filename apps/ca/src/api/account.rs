use actix_web::{post, web};

use crate::{
    api::{
        types::{
            AccountIdResponse, AccountsResponse, ChangeAccessLevelRequest, ChangePasswordRequest,
            CreateAccountRequest, CredentialsRequest, InitializeCaRequest, ResultResponse,
            TargetAccountRequest,
        },
        ApiResult,
    },
    account::Account,
    cert::keys::MnemonicKeyProvider,
    CaService,
};

pub fn account_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(initialize_ca)
        .service(create_account)
        .service(approve_account)
        .service(change_access_level)
        .service(change_password)
        .service(delete_account)
        .service(get_account)
        .service(list_accounts);
}

/// 建立根憑證，需要 `INITIALIZE_CA`
#[post("/initialize_ca")]
async fn initialize_ca(
    state: web::Data<CaService>,
    data: web::Json<InitializeCaRequest>,
) -> ApiResult<web::Json<ResultResponse>> {
    let req = data.into_inner();
    state.accounts.authorize(&req.credentials, lca_permission::AccessFlags::INITIALIZE_CA).await?;
    let provider = MnemonicKeyProvider::new(&req.mnemonic, &req.password)?;
    state
        .certificates
        .initialize(&provider, &req.network)
        .await
        .inspect_err(|e| tracing::warn!(?e, "初始化 CA 失敗"))?;
    Ok(web::Json(ResultResponse { result: true }))
}

#[post("/create_account")]
async fn create_account(
    state: web::Data<CaService>,
    data: web::Json<CreateAccountRequest>,
) -> ApiResult<web::Json<AccountIdResponse>> {
    let req = data.into_inner();
    let account_id = state.accounts.create(&req.credentials, req.account).await?;
    Ok(web::Json(AccountIdResponse { account_id }))
}

#[post("/approve_account")]
async fn approve_account(
    state: web::Data<CaService>,
    data: web::Json<TargetAccountRequest>,
) -> ApiResult<web::Json<ResultResponse>> {
    state.accounts.approve(data.target_account_id, &data.credentials).await?;
    Ok(web::Json(ResultResponse { result: true }))
}

#[post("/change_access_level")]
async fn change_access_level(
    state: web::Data<CaService>,
    data: web::Json<ChangeAccessLevelRequest>,
) -> ApiResult<web::Json<ResultResponse>> {
    state
        .accounts
        .change_access_level(data.target_account_id, data.access_flags, &data.credentials)
        .await?;
    Ok(web::Json(ResultResponse { result: true }))
}

#[post("/change_password")]
async fn change_password(
    state: web::Data<CaService>,
    data: web::Json<ChangePasswordRequest>,
) -> ApiResult<web::Json<ResultResponse>> {
    state
        .accounts
        .change_password(data.target_account_id, &data.new_password, &data.credentials)
        .await?;
    Ok(web::Json(ResultResponse { result: true }))
}

#[post("/delete_account")]
async fn delete_account(
    state: web::Data<CaService>,
    data: web::Json<TargetAccountRequest>,
) -> ApiResult<web::Json<ResultResponse>> {
    state.accounts.delete(data.target_account_id, &data.credentials).await?;
    Ok(web::Json(ResultResponse { result: true }))
}

#[post("/get_account")]
async fn get_account(
    state: web::Data<CaService>,
    data: web::Json<TargetAccountRequest>,
) -> ApiResult<web::Json<Account>> {
    Ok(web::Json(state.accounts.get(data.target_account_id, &data.credentials).await?))
}

#[post("/list_accounts")]
async fn list_accounts(
    state: web::Data<CaService>,
    data: web::Json<CredentialsRequest>,
) -> ApiResult<web::Json<AccountsResponse>> {
    let accounts = state.accounts.list_all(&data.credentials).await?;
    Ok(web::Json(AccountsResponse { accounts }))
}
