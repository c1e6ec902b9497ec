//! CA 帳號目錄: 驗證、建立、核准與權限調整
//!
//! 每個受保護的操作都先驗證呼叫者的帳號密碼，再檢查對應的 [`AccessFlags`]

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use lca_cert_utils::{CertificatePermission, SubjectFields};
use lca_password::{hash_password, verify_password};
use lca_permission::{has_account_permission, AccessFlags};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::error::CaError;

pub mod store;

use store::{AccountRecord, AccountStore};

/// 呼叫者的帳號與密碼
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    pub account_id: i64,
    pub password:   String,
}

impl Credentials {
    pub fn new(account_id: i64, password: impl Into<String>) -> Self {
        Self { account_id, password: password.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("account_id", &self.account_id).finish_non_exhaustive()
    }
}

/// 對外可見的帳號資料，不含密碼雜湊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    pub id:                  i64,
    pub name:                String,
    pub access_flags:        AccessFlags,
    pub approved:            bool,
    pub creator_id:          Option<i64>,
    pub country:             String,
    pub organization:        String,
    pub organizational_unit: String,
    pub locality:            String,
    pub email:               String,
    /// 此帳號申請的憑證可以帶有的能力
    pub permissions:         Vec<CertificatePermission>,
    pub created_at:          DateTime<Utc>,
}

impl Account {
    pub fn has(&self, required: AccessFlags) -> bool {
        has_account_permission(self.access_flags, required)
    }

    /// 以帳號資料組出憑證主體，CN 由呼叫端指定
    pub fn subject(&self, common_name: impl Into<String>) -> SubjectFields {
        SubjectFields {
            common_name:         common_name.into(),
            country:             self.country.clone(),
            organization:        self.organization.clone(),
            organizational_unit: self.organizational_unit.clone(),
            locality:            self.locality.clone(),
            email:               self.email.clone(),
        }
    }

    pub fn permission_set(&self) -> BTreeSet<CertificatePermission> {
        self.permissions.iter().copied().collect()
    }
}

/// 建立帳號的請求內容
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewAccount {
    pub name:                String,
    pub password:            String,
    #[serde(default)]
    pub access_flags:        AccessFlags,
    #[serde(default)]
    pub permissions:         Vec<CertificatePermission>,
    #[serde(default)]
    pub country:             String,
    #[serde(default)]
    pub organization:        String,
    #[serde(default)]
    pub organizational_unit: String,
    #[serde(default)]
    pub locality:            String,
    #[serde(default)]
    pub email:               String,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("access_flags", &self.access_flags)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct AccountDirectory {
    store:      AccountStore,
    write_lock: Mutex<()>,
}

impl AccountDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { store: AccountStore::new(pool), write_lock: Mutex::new(()) }
    }

    /// 驗證帳號密碼
    /// # 回傳
    /// * `Err(CaError::InvalidCredentials)`: 帳號不存在或密碼錯誤
    pub async fn authenticate(&self, creds: &Credentials) -> Result<Account, CaError> {
        let Some((account, hash)) = self.store.get_with_hash(creds.account_id).await? else {
            tracing::debug!(account_id = creds.account_id, "帳號不存在");
            return Err(CaError::InvalidCredentials);
        };
        if !verify_password(&creds.password, &hash)? {
            tracing::debug!(account_id = creds.account_id, "密碼錯誤");
            return Err(CaError::InvalidCredentials);
        }
        Ok(account)
    }

    /// 驗證後檢查旗標
    pub async fn authorize(
        &self,
        creds: &Credentials,
        required: AccessFlags,
    ) -> Result<Account, CaError> {
        let account = self.authenticate(creds).await?;
        if !account.has(required) {
            return Err(CaError::denied(format!("帳號 {} 缺少 {:?}", account.id, required)));
        }
        Ok(account)
    }

    /// 不經驗證直接取得帳號，給內部流程使用
    pub async fn account(&self, id: i64) -> Result<Account, CaError> {
        self.store.get(id).await?.ok_or_else(|| CaError::NotFound(format!("帳號 {id}")))
    }

    /// 建立帳號，新帳號預設未核准
    /// # 參數
    /// * `creds`: 建立者的憑據，需要 `CREATE_ACCOUNTS`
    /// * `request`: 新帳號內容，旗標與憑證權限都不得超出建立者本身
    /// # 回傳
    /// * `Result<i64, CaError>`: 新帳號的 id
    pub async fn create(&self, creds: &Credentials, request: NewAccount) -> Result<i64, CaError> {
        let creator = self.authorize(creds, AccessFlags::CREATE_ACCOUNTS).await?;
        if !creator.access_flags.can_grant(request.access_flags) {
            return Err(CaError::denied("不能授予自己沒有的權限"));
        }
        let allowed = creator.permission_set();
        if let Some(p) = request.permissions.iter().find(|p| !allowed.contains(p)) {
            return Err(CaError::denied(format!("不能授予自己沒有的憑證權限 {p}")));
        }
        if request.name.trim().is_empty() {
            return Err(CaError::malformed("帳號名稱不得為空"));
        }
        if request.password.is_empty() {
            return Err(CaError::malformed("密碼不得為空"));
        }
        let record = AccountRecord {
            password_hash:       hash_password(&request.password)?,
            name:                request.name,
            access_flags:        request.access_flags,
            approved:            false,
            creator_id:          Some(creator.id),
            country:             request.country,
            organization:        request.organization,
            organizational_unit: request.organizational_unit,
            locality:            request.locality,
            email:               request.email,
            permissions:         dedup(request.permissions),
        };
        let _guard = self.write_lock.lock().await;
        let id = self.store.insert(&record).await?;
        tracing::info!(account_id = id, creator = creator.id, flags = ?record.access_flags, "已建立帳號");
        Ok(id)
    }

    pub async fn approve(&self, target: i64, creds: &Credentials) -> Result<(), CaError> {
        let approver = self.authorize(creds, AccessFlags::APPROVE_ACCOUNTS).await?;
        let _guard = self.write_lock.lock().await;
        if !self.store.set_approved(target).await? {
            return Err(CaError::NotFound(format!("帳號 {target}")));
        }
        tracing::info!(account_id = target, approver = approver.id, "已核准帳號");
        Ok(())
    }

    /// 調整帳號旗標；呼叫者只能設定、也只能調整自己涵蓋得了的旗標
    pub async fn change_access_level(
        &self,
        target: i64,
        flags: AccessFlags,
        creds: &Credentials,
    ) -> Result<(), CaError> {
        let caller = self.authorize(creds, AccessFlags::CHANGE_ACCESS_LEVEL).await?;
        if !caller.access_flags.can_grant(flags) {
            return Err(CaError::denied("不能授予自己沒有的權限"));
        }
        let _guard = self.write_lock.lock().await;
        let current = self.account(target).await?;
        if !caller.access_flags.can_grant(current.access_flags) {
            return Err(CaError::denied("目標帳號的權限超出呼叫者"));
        }
        self.store.set_access_flags(target, flags).await?;
        tracing::info!(account_id = target, caller = caller.id, ?flags, "已調整帳號權限");
        Ok(())
    }

    /// 變更密碼；變更自己的密碼不需要 `CHANGE_PASSWORDS`
    pub async fn change_password(
        &self,
        target: i64,
        new_password: &str,
        creds: &Credentials,
    ) -> Result<(), CaError> {
        let caller = self.authenticate(creds).await?;
        if caller.id != target && !caller.has(AccessFlags::CHANGE_PASSWORDS) {
            return Err(CaError::denied("不能變更其他帳號的密碼"));
        }
        if new_password.is_empty() {
            return Err(CaError::malformed("密碼不得為空"));
        }
        let hash = hash_password(new_password)?;
        let _guard = self.write_lock.lock().await;
        if !self.store.set_password_hash(target, &hash).await? {
            return Err(CaError::NotFound(format!("帳號 {target}")));
        }
        tracing::info!(account_id = target, caller = caller.id, "已變更密碼");
        Ok(())
    }

    pub async fn delete(&self, target: i64, creds: &Credentials) -> Result<(), CaError> {
        let caller = self.authorize(creds, AccessFlags::DELETE_ACCOUNTS).await?;
        if caller.id == target {
            return Err(CaError::denied("不能刪除自己的帳號"));
        }
        let _guard = self.write_lock.lock().await;
        if !self.store.delete(target).await? {
            return Err(CaError::NotFound(format!("帳號 {target}")));
        }
        tracing::info!(account_id = target, caller = caller.id, "已刪除帳號");
        Ok(())
    }

    /// 讀取帳號；讀取自己不需要 `READ_ACCOUNTS`
    pub async fn get(&self, target: i64, creds: &Credentials) -> Result<Account, CaError> {
        let caller = self.authenticate(creds).await?;
        if caller.id == target {
            return Ok(caller);
        }
        if !caller.has(AccessFlags::READ_ACCOUNTS) {
            return Err(CaError::denied("不能讀取其他帳號"));
        }
        self.account(target).await
    }

    pub async fn list_all(&self, creds: &Credentials) -> Result<Vec<Account>, CaError> {
        self.authorize(creds, AccessFlags::READ_ACCOUNTS).await?;
        self.store.list_all().await
    }

    /// 資料庫中沒有任何帳號時建立一個擁有全部旗標的管理者
    /// # 回傳
    /// * `Ok(Some(id))`: 新建立的管理者帳號
    /// * `Ok(None)`: 已經有帳號，不做任何事
    pub async fn bootstrap_admin(&self, name: &str, password: &str) -> Result<Option<i64>, CaError> {
        let _guard = self.write_lock.lock().await;
        if self.store.count().await? > 0 {
            return Ok(None);
        }
        let record = AccountRecord {
            name:                name.to_string(),
            password_hash:       hash_password(password)?,
            access_flags:        AccessFlags::all(),
            approved:            true,
            creator_id:          None,
            country:             String::new(),
            organization:        String::new(),
            organizational_unit: String::new(),
            locality:            String::new(),
            email:               String::new(),
            permissions:         CertificatePermission::ALL.to_vec(),
        };
        let id = self.store.insert(&record).await?;
        tracing::info!(account_id = id, %name, "已建立初始管理者帳號");
        Ok(Some(id))
    }
}

fn dedup(permissions: Vec<CertificatePermission>) -> Vec<CertificatePermission> {
    permissions.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn directory() -> (AccountDirectory, Credentials) {
        let dir = AccountDirectory::new(db::connect_in_memory().await.unwrap());
        let id = dir.bootstrap_admin("admin", "root-pass").await.unwrap().unwrap();
        (dir, Credentials::new(id, "root-pass"))
    }

    fn new_account(name: &str, flags: AccessFlags) -> NewAccount {
        NewAccount {
            name: name.into(),
            password: format!("{name}-pass"),
            access_flags: flags,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_runs_once() {
        let (dir, admin) = directory().await;
        assert!(dir.bootstrap_admin("again", "x").await.unwrap().is_none());
        let account = dir.authenticate(&admin).await.unwrap();
        assert_eq!(account.access_flags, AccessFlags::all());
        assert!(account.approved);
        assert_eq!(account.creator_id, None);
    }

    #[tokio::test]
    async fn wrong_password_and_missing_account_are_indistinguishable() {
        let (dir, admin) = directory().await;
        let wrong = Credentials::new(admin.account_id, "nope");
        assert!(matches!(dir.authenticate(&wrong).await, Err(CaError::InvalidCredentials)));
        let missing = Credentials::new(999, "root-pass");
        assert!(matches!(dir.authenticate(&missing).await, Err(CaError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn created_accounts_start_unapproved() {
        let (dir, admin) = directory().await;
        let id = dir.create(&admin, new_account("op", AccessFlags::ISSUE_CERTIFICATES)).await.unwrap();
        let op = dir.get(id, &admin).await.unwrap();
        assert!(!op.approved);
        assert_eq!(op.creator_id, Some(admin.account_id));
        dir.approve(id, &admin).await.unwrap();
        assert!(dir.account(id).await.unwrap().approved);
    }

    #[tokio::test]
    async fn creator_cannot_grant_missing_flags() {
        let (dir, admin) = directory().await;
        let flags = AccessFlags::CREATE_ACCOUNTS | AccessFlags::ISSUE_CERTIFICATES;
        let id = dir.create(&admin, new_account("sub", flags)).await.unwrap();
        let sub = Credentials::new(id, "sub-pass");

        let err = dir
            .create(&sub, new_account("x", AccessFlags::REVOKE_CERTIFICATES))
            .await
            .unwrap_err();
        assert!(matches!(err, CaError::AuthorizationDenied(_)));
        dir.create(&sub, new_account("y", AccessFlags::ISSUE_CERTIFICATES)).await.unwrap();
    }

    #[tokio::test]
    async fn creator_cannot_grant_missing_certificate_permissions() {
        let (dir, admin) = directory().await;
        let sub = NewAccount {
            permissions: vec![CertificatePermission::Send],
            ..new_account("sub", AccessFlags::CREATE_ACCOUNTS | AccessFlags::ISSUE_CERTIFICATES)
        };
        let id = dir.create(&admin, sub).await.unwrap();
        let sub = Credentials::new(id, "sub-pass");

        for extra in [CertificatePermission::Mine, CertificatePermission::CreateChannel] {
            let request = NewAccount {
                permissions: vec![CertificatePermission::Send, extra],
                ..new_account("x", AccessFlags::ISSUE_CERTIFICATES)
            };
            let err = dir.create(&sub, request).await.unwrap_err();
            assert!(matches!(err, CaError::AuthorizationDenied(_)));
        }

        let request = NewAccount {
            permissions: vec![CertificatePermission::Send],
            ..new_account("y", AccessFlags::ISSUE_CERTIFICATES)
        };
        let child = dir.create(&sub, request).await.unwrap();
        assert_eq!(dir.account(child).await.unwrap().permissions, vec![CertificatePermission::Send]);
    }

    #[tokio::test]
    async fn each_gated_operation_checks_its_flag() {
        let (dir, admin) = directory().await;
        let target = dir.create(&admin, new_account("target", AccessFlags::empty())).await.unwrap();
        let id = dir.create(&admin, new_account("weak", AccessFlags::empty())).await.unwrap();
        let weak = Credentials::new(id, "weak-pass");

        let denied = |r: Result<(), CaError>| matches!(r, Err(CaError::AuthorizationDenied(_)));
        assert!(denied(dir.create(&weak, new_account("z", AccessFlags::empty())).await.map(|_| ())));
        assert!(denied(dir.approve(target, &weak).await));
        assert!(denied(dir.change_access_level(target, AccessFlags::empty(), &weak).await));
        assert!(denied(dir.change_password(target, "p", &weak).await));
        assert!(denied(dir.delete(target, &weak).await));
        assert!(denied(dir.get(target, &weak).await.map(|_| ())));
        assert!(denied(dir.list_all(&weak).await.map(|_| ())));

        // 自己的資料與密碼不需要旗標
        assert_eq!(dir.get(id, &weak).await.unwrap().name, "weak");
        dir.change_password(id, "new-pass", &weak).await.unwrap();
        assert!(dir.authenticate(&Credentials::new(id, "new-pass")).await.is_ok());
    }

    #[tokio::test]
    async fn cannot_delete_self_and_missing_targets_are_not_found() {
        let (dir, admin) = directory().await;
        assert!(matches!(
            dir.delete(admin.account_id, &admin).await,
            Err(CaError::AuthorizationDenied(_))
        ));
        assert!(matches!(dir.delete(404, &admin).await, Err(CaError::NotFound(_))));
        assert!(matches!(dir.approve(404, &admin).await, Err(CaError::NotFound(_))));
        assert!(matches!(dir.get(404, &admin).await, Err(CaError::NotFound(_))));
    }

    #[tokio::test]
    async fn access_level_changes_stay_within_caller_flags() {
        let (dir, admin) = directory().await;
        let flags = AccessFlags::CHANGE_ACCESS_LEVEL | AccessFlags::READ_ACCOUNTS;
        let id = dir.create(&admin, new_account("mgr", flags)).await.unwrap();
        let mgr = Credentials::new(id, "mgr-pass");
        let target = dir.create(&admin, new_account("t", AccessFlags::empty())).await.unwrap();

        dir.change_access_level(target, AccessFlags::READ_ACCOUNTS, &mgr).await.unwrap();
        assert_eq!(dir.account(target).await.unwrap().access_flags, AccessFlags::READ_ACCOUNTS);
        assert!(matches!(
            dir.change_access_level(target, AccessFlags::all(), &mgr).await,
            Err(CaError::AuthorizationDenied(_))
        ));
        assert!(matches!(
            dir.change_access_level(admin.account_id, AccessFlags::empty(), &mgr).await,
            Err(CaError::AuthorizationDenied(_))
        ));
        assert_eq!(dir.list_all(&mgr).await.unwrap().len(), 3);
    }
}
