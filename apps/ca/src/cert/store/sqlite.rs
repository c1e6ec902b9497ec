use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lca_cert_utils::{CertStatus, CertificateInfo, CertificatePermission};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::{
    cert::store::{CertificateStore, NewCertificate, RevokedEntry},
    error::CaError,
};

const SELECT_CERT: &str = r#"
    SELECT
        id,
        thumbprint,
        serial,
        subject,
        issuer_account_id,
        revoker_account_id,
        status,
        address,
        tx_key_hash,
        block_signing_key,
        public_key,
        permissions,
        cert_der,
        issued_at,
        not_after,
        revoked_at
    FROM certs
"#;

/// 有效憑證優先，其次取最新簽發的一張
const PREFER_ACTIVE: &str = "ORDER BY (status = 'Good') DESC, id DESC LIMIT 1";

#[derive(Debug, sqlx::FromRow)]
struct SqlCert {
    id:                 i64,
    thumbprint:         String,
    serial:             String,
    subject:            String,
    issuer_account_id:  i64,
    revoker_account_id: Option<i64>,
    status:             String,
    address:            String,
    tx_key_hash:        String,
    block_signing_key:  Option<String>,
    public_key:         String,
    permissions:        String,
    cert_der:           Vec<u8>,
    issued_at:          DateTime<Utc>,
    not_after:          DateTime<Utc>,
    revoked_at:         Option<DateTime<Utc>>,
}

impl TryFrom<SqlCert> for CertificateInfo {
    type Error = CaError;

    fn try_from(s: SqlCert) -> Result<Self, Self::Error> {
        let status = s.status.parse::<CertStatus>().map_err(CaError::Internal)?;
        let permissions: Vec<CertificatePermission> = serde_json::from_str(&s.permissions)
            .map_err(|e| CaError::Internal(format!("權限欄位格式錯誤: {e}")))?;
        Ok(CertificateInfo {
            id: s.id,
            der: s.cert_der,
            thumbprint: s.thumbprint,
            serial: s.serial,
            subject: s.subject,
            issuer_account_id: s.issuer_account_id,
            revoker_account_id: s.revoker_account_id,
            status,
            address: s.address,
            tx_key_hash: s.tx_key_hash,
            block_signing_key: s.block_signing_key,
            public_key: s.public_key,
            permissions,
            issued_at: s.issued_at,
            not_after: s.not_after,
            revoked_at: s.revoked_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqlRevoked {
    thumbprint:         String,
    revoker_account_id: i64,
    revoked_at:         DateTime<Utc>,
}

impl From<SqlRevoked> for RevokedEntry {
    fn from(s: SqlRevoked) -> Self {
        RevokedEntry {
            thumbprint:         s.thumbprint,
            revoker_account_id: s.revoker_account_id,
            revoked_at:         s.revoked_at,
        }
    }
}

/// SQLite 實作的憑證 registry
///
/// 所有寫入都經過 `write_lock`，讀取可以並行
#[derive(Debug)]
pub struct SqliteCertStore {
    pool:       SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteCertStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, write_lock: Mutex::new(()) }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<CertificateInfo>, CaError> {
        let sql = format!("{SELECT_CERT} {clause}");
        let row = sqlx::query_as::<_, SqlCert>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CertificateInfo::try_from).transpose()
    }
}

#[async_trait]
impl CertificateStore for SqliteCertStore {
    async fn insert(&self, cert: NewCertificate) -> Result<CertificateInfo, CaError> {
        let permissions = serde_json::to_string(&cert.permissions)
            .map_err(|e| CaError::Internal(e.to_string()))?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let bound: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM certs WHERE public_key = ? AND status = 'Good'")
                .bind(&cert.public_key)
                .fetch_one(&mut *tx)
                .await?;
        if bound > 0 {
            return Err(CaError::malformed("此公鑰已有有效的憑證"));
        }
        let result = sqlx::query(
            r#"
            INSERT INTO certs (
                thumbprint, serial, subject, issuer_account_id, status, address,
                tx_key_hash, block_signing_key, public_key, permissions,
                cert_der, issued_at, not_after
            ) VALUES (?, ?, ?, ?, 'Good', ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cert.thumbprint)
        .bind(&cert.serial)
        .bind(&cert.subject)
        .bind(cert.issuer_account_id)
        .bind(&cert.address)
        .bind(&cert.tx_key_hash)
        .bind(&cert.block_signing_key)
        .bind(&cert.public_key)
        .bind(&permissions)
        .bind(&cert.der)
        .bind(cert.issued_at)
        .bind(cert.not_after)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return CaError::SigningFailure(format!("指紋重複: {}", cert.thumbprint));
                }
            }
            CaError::Storage(e)
        })?;
        tx.commit().await?;
        Ok(CertificateInfo {
            id:                 result.last_insert_rowid(),
            der:                cert.der,
            thumbprint:         cert.thumbprint,
            serial:             cert.serial,
            subject:            cert.subject,
            issuer_account_id:  cert.issuer_account_id,
            revoker_account_id: None,
            status:             CertStatus::Good,
            address:            cert.address,
            tx_key_hash:        cert.tx_key_hash,
            block_signing_key:  cert.block_signing_key,
            public_key:         cert.public_key,
            permissions:        cert.permissions,
            issued_at:          cert.issued_at,
            not_after:          cert.not_after,
            revoked_at:         None,
        })
    }

    async fn get_by_thumbprint(&self, thumbprint: &str) -> Result<Option<CertificateInfo>, CaError> {
        self.fetch_one_where("WHERE thumbprint = ?", thumbprint).await
    }

    async fn get_by_address(&self, address: &str) -> Result<Option<CertificateInfo>, CaError> {
        self.fetch_one_where(&format!("WHERE address = ? {PREFER_ACTIVE}"), address).await
    }

    async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<CertificateInfo>, CaError> {
        self.fetch_one_where(&format!("WHERE tx_key_hash = ? {PREFER_ACTIVE}"), key_hash).await
    }

    async fn list_all(&self) -> Result<Vec<CertificateInfo>, CaError> {
        let sql = format!("{SELECT_CERT} ORDER BY id");
        let rows = sqlx::query_as::<_, SqlCert>(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(CertificateInfo::try_from).collect()
    }

    async fn query_status(&self, thumbprint: &str) -> Result<CertStatus, CaError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM certs WHERE thumbprint = ?")
                .bind(thumbprint)
                .fetch_optional(&self.pool)
                .await?;
        match status {
            Some(s) => s.parse().map_err(CaError::Internal),
            None => Ok(CertStatus::Unknown),
        }
    }

    async fn list_active_public_keys(&self) -> Result<Vec<String>, CaError> {
        Ok(sqlx::query_scalar("SELECT public_key FROM certs WHERE status = 'Good' ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn has_active_public_key(&self, public_key: &str) -> Result<bool, CaError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM certs WHERE public_key = ? AND status = 'Good'")
                .bind(public_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn list_revoked(&self) -> Result<Vec<String>, CaError> {
        Ok(sqlx::query_scalar("SELECT thumbprint FROM revoked_certs ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_revoked_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RevokedEntry>, CaError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = match since {
            Some(since) => {
                sqlx::query_as::<_, SqlRevoked>(
                    r#"
                    SELECT thumbprint, revoker_account_id, revoked_at
                    FROM revoked_certs
                    WHERE revoked_at > ?
                    ORDER BY id
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(since)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SqlRevoked>(
                    r#"
                    SELECT thumbprint, revoker_account_id, revoked_at
                    FROM revoked_certs
                    ORDER BY id
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_revoked(&self, thumbprint: &str, revoker_account_id: i64) -> Result<bool, CaError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM certs WHERE thumbprint = ?")
                .bind(thumbprint)
                .fetch_optional(&mut *tx)
                .await?;
        match status.as_deref() {
            None => return Err(CaError::NotFound(format!("憑證 {thumbprint}"))),
            Some("Revoked") => return Err(CaError::AlreadyRevoked),
            Some(_) => {}
        }
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE certs
            SET status = 'Revoked', revoker_account_id = ?, revoked_at = ?
            WHERE thumbprint = ?
            "#,
        )
        .bind(revoker_account_id)
        .bind(now)
        .bind(thumbprint)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO revoked_certs (thumbprint, revoker_account_id, revoked_at) VALUES (?, ?, ?)",
        )
        .bind(thumbprint)
        .bind(revoker_account_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}
