use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use lca_cert_utils::{
    identity_from_certificate, CertUtils, CertificateInfo, CertificatePermission, IdentitySet,
    ParsedRequest, RequestTemplate,
};
use lca_permission::AccessFlags;
use lca_project_const::ProjectConst;
use once_cell::sync::OnceCell;
use openssl::{
    asn1::{Asn1Object, Asn1OctetString, Asn1Time, Asn1TimeRef},
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    symm::Cipher,
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        X509Builder, X509Extension, X509Name, X509NameBuilder, X509,
    },
};
use tokio::sync::Mutex;

use crate::{
    account::Account,
    cert::{
        keys::{KeyProvider, NetworkParams, CA_KEY_PATH},
        store::{CertificateStore, NewCertificate},
    },
    config::Certificate as CertificateSettings,
    error::CaError,
};

const ROOT_CERT_FILE: &str = "rootCA.pem";
const ROOT_KEY_FILE: &str = "rootCA.key";
const DAYS_PER_YEAR: u32 = 365;

/// CA 的根憑證與私鑰
#[derive(Debug)]
pub struct CaIdentity {
    cert: X509,
    key:  PKey<Private>,
}

/// 申請憑證模板所需的資料
#[derive(Debug, Clone, Default)]
pub struct TemplateRequest {
    pub address:           String,
    /// 申請者公鑰 (SPKI DER)
    pub public_key:        Vec<u8>,
    pub tx_key_hash:       Vec<u8>,
    pub block_signing_key: Option<Vec<u8>>,
    pub subject_alt_names: Vec<String>,
    /// 未指定時使用帳號允許的全部能力
    pub permissions:       Option<Vec<CertificatePermission>>,
}

/// 憑證處理器，負責建立根憑證、產生 CSR 模板與簽發憑證
#[derive(Debug)]
pub struct CertificateProcess {
    identity:  OnceCell<CaIdentity>,
    init_lock: Mutex<()>,
    store:     Arc<dyn CertificateStore>,
    settings:  CertificateSettings,
}

impl CertificateProcess {
    pub fn new(store: Arc<dyn CertificateStore>, settings: CertificateSettings) -> Self {
        Self { identity: OnceCell::new(), init_lock: Mutex::new(()), store, settings }
    }

    fn root_cert_path(&self) -> PathBuf {
        self.settings.certs_dir.join(ROOT_CERT_FILE)
    }

    fn root_key_path(&self) -> PathBuf {
        self.settings.certs_dir.join(ROOT_KEY_FILE)
    }

    /// 已簽發憑證的存放路徑
    pub fn issued_path(&self, address: &str) -> PathBuf {
        self.settings.certs_dir.join(ProjectConst::ISSUED_DIR).join(format!("{address}.der"))
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.get().is_some()
    }

    fn identity(&self) -> Result<&CaIdentity, CaError> {
        self.identity.get().ok_or(CaError::CaUninitialized)
    }

    /// 獲取RootCA憑證
    pub fn ca_cert(&self) -> Result<&X509, CaError> {
        Ok(&self.identity()?.cert)
    }

    /// 從 `certs_dir` 載入先前建立的根憑證與私鑰
    /// # 回傳
    /// * `Ok(true)`: 載入成功
    /// * `Ok(false)`: 檔案不存在，CA 尚未初始化
    pub fn load_identity(&self) -> Result<bool, CaError> {
        let (cert_path, key_path) = (self.root_cert_path(), self.root_key_path());
        if !cert_path.exists() || !key_path.exists() {
            return Ok(false);
        }
        let cert = CertUtils::load_cert(&cert_path)?;
        let passphrase = Some(self.settings.passphrase.as_str()).filter(|p| !p.is_empty());
        let key = CertUtils::load_key(&key_path, passphrase)?;
        if !cert.public_key()?.public_eq(&key) {
            return Err(CaError::Config(format!(
                "{} 與 {} 不是同一組金鑰",
                cert_path.display(),
                key_path.display()
            )));
        }
        tracing::info!(path = %cert_path.display(), "已載入根憑證");
        // 已經初始化過的情況下保留現有的身分
        let _ = self.identity.set(CaIdentity { cert, key });
        Ok(true)
    }

    /// 建立自簽根憑證
    /// # 參數
    /// * `provider`: 金鑰來源，以 `m/ca/0` 衍生根金鑰
    /// * `params`: 網路參數
    /// # 回傳
    /// * `Err(CaError::AlreadyInitialized)`: 根憑證已存在
    pub async fn initialize(
        &self,
        provider: &dyn KeyProvider,
        params: &NetworkParams,
    ) -> Result<(), CaError> {
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Err(CaError::AlreadyInitialized);
        }
        if params.network_name.trim().is_empty() {
            return Err(CaError::malformed("網路名稱不得為空"));
        }
        let key = provider.derive_key_pair(CA_KEY_PATH)?;
        let cert = self.build_root(&key, params)?;

        let cert_pem = cert.to_pem()?;
        CertUtils::write_file(self.root_cert_path(), &cert_pem)?;
        let key_pem = if self.settings.passphrase.is_empty() {
            key.private_key_to_pem_pkcs8()?
        } else {
            key.private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                self.settings.passphrase.as_bytes(),
            )?
        };
        CertUtils::write_file(self.root_key_path(), &key_pem)?;
        restrict_permissions(&self.root_key_path())?;

        let fingerprint = CertUtils::cert_fingerprint_sha256(&cert)?;
        self.identity.set(CaIdentity { cert, key }).map_err(|_| CaError::AlreadyInitialized)?;
        tracing::info!(network = %params.network_name, %fingerprint, "已建立根憑證");
        Ok(())
    }

    fn build_root(&self, key: &PKey<Private>, params: &NetworkParams) -> Result<X509, CaError> {
        let mut name_builder = X509NameBuilder::new()?;
        if !params.country.is_empty() {
            name_builder.append_entry_by_text("C", &params.country)?;
        }
        if !params.organization.is_empty() {
            name_builder.append_entry_by_text("O", &params.organization)?;
        }
        name_builder.append_entry_by_text("CN", &params.network_name)?;
        let name = name_builder.build();

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let serial = random_serial()?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(self.settings.root_validity_years * DAYS_PER_YEAR)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new().critical().key_cert_sign().crl_sign().digital_signature().build()?,
        )?;
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;
        builder.sign(key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// 產生尚未簽名的 CSR 模板 (CertificationRequestInfo 的 DER)
    ///
    /// 持有私鑰的一方簽名後以 `RequestTemplate::attach_signature` 組成 CSR 再送回 `issue`
    pub fn generate_request_template(
        &self,
        caller: &Account,
        request: &TemplateRequest,
    ) -> Result<Vec<u8>, CaError> {
        check_issuer(caller)?;
        self.identity()?;
        let permissions = match &request.permissions {
            Some(requested) => requested.clone(),
            None => caller.permissions.clone(),
        };
        let mut identity = IdentitySet::new(request.address.clone(), request.tx_key_hash.clone())
            .with_permissions(permissions);
        if let Some(key) = &request.block_signing_key {
            identity = identity.with_block_signing_key(key.clone());
        }
        for name in &request.subject_alt_names {
            identity = identity.with_subject_alt_name(name.clone());
        }
        check_permissions(caller, &identity)?;
        let subject = caller.subject(request.address.clone());
        let template = RequestTemplate::new(&subject, &request.public_key, &identity)?;
        Ok(template.to_be_signed()?)
    }

    /// 簽發憑證
    /// # 參數
    /// * `csr_der`: PKCS#10 CSR 的 DER
    /// * `caller`: 已通過驗證的申請帳號
    /// # 回傳
    /// * `Result<CertificateInfo, CaError>`: 已寫入 registry 的憑證
    pub async fn issue(&self, csr_der: &[u8], caller: &Account) -> Result<CertificateInfo, CaError> {
        check_issuer(caller)?;
        let ca = self.identity()?;
        let parsed = ParsedRequest::from_der(csr_der)?;
        if parsed.is_signed() {
            if !parsed.verify_signature()? {
                return Err(CaError::malformed("CSR 簽章與公鑰不符"));
            }
        } else if self.settings.require_signed_requests {
            return Err(CaError::malformed("CSR 缺少持有證明簽章"));
        }
        let identity = parsed.identity.clone();
        check_permissions(caller, &identity)?;

        let public_key = parsed.public_key()?;
        let public_key_b64 = general_purpose::STANDARD.encode(public_key.public_key_to_der()?);
        if self.store.has_active_public_key(&public_key_b64).await? {
            return Err(CaError::malformed("此公鑰已有有效的憑證"));
        }

        let subject = X509Name::from_der(&parsed.subject_der)
            .map_err(|e| CaError::malformed(format!("無法解碼 CSR 主體: {e}")))?;
        let serial = random_serial()?;
        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let serial_number = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial_number)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(ca.cert.subject_name())?;
        builder.set_pubkey(&public_key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(self.settings.validity_years * DAYS_PER_YEAR)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(&ca.cert), None))?;
        builder.append_extension(ski)?;
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(&ca.cert), None))?;
        builder.append_extension(aki)?;
        if !identity.subject_alt_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in &identity.subject_alt_names {
                if name.parse::<IpAddr>().is_ok() {
                    san.ip(name);
                } else {
                    san.dns(name);
                }
            }
            let san = san.build(&builder.x509v3_context(Some(&ca.cert), None))?;
            builder.append_extension(san)?;
        }
        // 只寫入已解碼的身分欄位，申請中無法辨識的擴充欄位不帶入憑證
        for ext in identity.custom_extensions()? {
            let oid = Asn1Object::from_str(&ext.extn_id.to_string())?;
            let value = Asn1OctetString::new_from_bytes(ext.extn_value.as_bytes())?;
            builder.append_extension(X509Extension::new_from_der(&oid, ext.critical, &value)?)?;
        }
        builder.sign(&ca.key, MessageDigest::sha256())?;
        let cert = builder.build();
        let der = cert.to_der()?;

        // 簽完後重新解碼，身分欄位必須與申請內容一致
        let embedded = identity_from_certificate(&der)
            .map_err(|e| CaError::SigningFailure(format!("無法解碼剛簽發的憑證: {e}")))?;
        if embedded.address != identity.address
            || embedded.tx_key_hash != identity.tx_key_hash
            || embedded.block_signing_key != identity.block_signing_key
            || embedded.permissions != identity.permissions
        {
            return Err(CaError::SigningFailure("簽發後的身分欄位與申請內容不符".into()));
        }

        let record = NewCertificate {
            thumbprint:        CertUtils::thumbprint_sha1(&der)?,
            serial:            serial.to_hex_str()?.to_string(),
            subject:           parsed.subject.clone(),
            issuer_account_id: caller.id,
            address:           identity.address.clone(),
            tx_key_hash:       general_purpose::STANDARD.encode(&identity.tx_key_hash),
            block_signing_key: identity
                .block_signing_key
                .as_ref()
                .map(|k| general_purpose::STANDARD.encode(k)),
            public_key:        public_key_b64,
            permissions:       identity.permissions.iter().copied().collect(),
            issued_at:         asn1_to_utc(cert.not_before())?,
            not_after:         asn1_to_utc(cert.not_after())?,
            der,
        };
        let info = self.store.insert(record).await?;
        let path = self.issued_path(&info.address);
        if let Err(e) = CertUtils::write_file(&path, &info.der) {
            tracing::warn!(path = %path.display(), ?e, "寫入已簽發憑證檔案失敗");
        }
        tracing::info!(
            thumbprint = %info.thumbprint,
            address = %info.address,
            account_id = caller.id,
            "已簽發憑證"
        );
        Ok(info)
    }
}

fn check_issuer(caller: &Account) -> Result<(), CaError> {
    if !caller.approved {
        return Err(CaError::denied(format!("帳號 {} 尚未核准", caller.id)));
    }
    if !caller.has(AccessFlags::ISSUE_CERTIFICATES) {
        return Err(CaError::denied(format!("帳號 {} 不能申請憑證", caller.id)));
    }
    Ok(())
}

/// 憑證能力必須是帳號允許能力的子集
fn check_permissions(caller: &Account, identity: &IdentitySet) -> Result<(), CaError> {
    let allowed = caller.permission_set();
    if let Some(p) = identity.permissions.iter().find(|p| !allowed.contains(p)) {
        return Err(CaError::denied(format!("帳號 {} 不能申請 {p} 權限", caller.id)));
    }
    Ok(())
}

/// 63 位元的隨機正整數序號
fn random_serial() -> Result<BigNum, CaError> {
    let mut serial = BigNum::new()?;
    serial.rand(63, MsbOption::ONE, false)?;
    Ok(serial)
}

fn asn1_to_utc(t: &Asn1TimeRef) -> Result<DateTime<Utc>, CaError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(t)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or_else(|| CaError::Internal("憑證時間超出範圍".into()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CaError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), CaError> {
    Ok(())
}
