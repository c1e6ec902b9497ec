use chrono::{DateTime, Utc};
use lca_cert_utils::CertificatePermission;
use lca_permission::AccessFlags;
use sqlx::SqlitePool;

use crate::{account::Account, error::CaError};

#[derive(Debug, sqlx::FromRow)]
struct SqlAccount {
    id:                  i64,
    name:                String,
    password_hash:       String,
    access_flags:        i64,
    approved:            bool,
    creator_id:          Option<i64>,
    country:             String,
    organization:        String,
    organizational_unit: String,
    locality:            String,
    email:               String,
    permissions:         String,
    created_at:          DateTime<Utc>,
}

impl SqlAccount {
    fn into_parts(self) -> Result<(Account, String), CaError> {
        let permissions: Vec<CertificatePermission> = serde_json::from_str(&self.permissions)
            .map_err(|e| CaError::Internal(format!("帳號權限欄位格式錯誤: {e}")))?;
        let account = Account {
            id: self.id,
            name: self.name,
            access_flags: AccessFlags::from_stored(self.access_flags),
            approved: self.approved,
            creator_id: self.creator_id,
            country: self.country,
            organization: self.organization,
            organizational_unit: self.organizational_unit,
            locality: self.locality,
            email: self.email,
            permissions,
            created_at: self.created_at,
        };
        Ok((account, self.password_hash))
    }
}

/// 寫進資料庫的新帳號，密碼已經雜湊
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub name:                String,
    pub password_hash:       String,
    pub access_flags:        AccessFlags,
    pub approved:            bool,
    pub creator_id:          Option<i64>,
    pub country:             String,
    pub organization:        String,
    pub organizational_unit: String,
    pub locality:            String,
    pub email:               String,
    pub permissions:         Vec<CertificatePermission>,
}

const SELECT_ACCOUNT: &str = r#"
    SELECT
        id,
        name,
        password_hash,
        access_flags,
        approved,
        creator_id,
        country,
        organization,
        organizational_unit,
        locality,
        email,
        permissions,
        created_at
    FROM accounts
"#;

/// accounts 資料表的存取，序列化由上層的 `AccountDirectory` 負責
#[derive(Debug, Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, CaError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM accounts").fetch_one(&self.pool).await?)
    }

    pub async fn insert(&self, record: &AccountRecord) -> Result<i64, CaError> {
        let permissions = serde_json::to_string(&record.permissions)
            .map_err(|e| CaError::Internal(e.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                name, password_hash, access_flags, approved, creator_id,
                country, organization, organizational_unit, locality, email,
                permissions, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.name)
        .bind(&record.password_hash)
        .bind(i64::from(record.access_flags.bits()))
        .bind(record.approved)
        .bind(record.creator_id)
        .bind(&record.country)
        .bind(&record.organization)
        .bind(&record.organizational_unit)
        .bind(&record.locality)
        .bind(&record.email)
        .bind(&permissions)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// 帳號資料與密碼雜湊
    pub async fn get_with_hash(&self, id: i64) -> Result<Option<(Account, String)>, CaError> {
        let sql = format!("{SELECT_ACCOUNT} WHERE id = ?");
        let row = sqlx::query_as::<_, SqlAccount>(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(SqlAccount::into_parts).transpose()
    }

    pub async fn get(&self, id: i64) -> Result<Option<Account>, CaError> {
        Ok(self.get_with_hash(id).await?.map(|(account, _)| account))
    }

    pub async fn list_all(&self) -> Result<Vec<Account>, CaError> {
        let sql = format!("{SELECT_ACCOUNT} ORDER BY id");
        let rows = sqlx::query_as::<_, SqlAccount>(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.into_parts().map(|(account, _)| account)).collect()
    }

    /// # 回傳
    /// * `Ok(false)`: 帳號不存在
    pub async fn set_approved(&self, id: i64) -> Result<bool, CaError> {
        let result = sqlx::query("UPDATE accounts SET approved = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_access_flags(&self, id: i64, flags: AccessFlags) -> Result<bool, CaError> {
        let result = sqlx::query("UPDATE accounts SET access_flags = ? WHERE id = ?")
            .bind(i64::from(flags.bits()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, CaError> {
        let result = sqlx::query("UPDATE accounts SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: i64) -> Result<bool, CaError> {
        let result =
            sqlx::query("DELETE FROM accounts WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
