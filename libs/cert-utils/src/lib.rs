use std::{fs, path::Path};

use openssl::{
    ec::{EcGroup, EcKey},
    hash::{hash, MessageDigest},
    nid::Nid,
    pkey::{PKey, Private},
    stack::Stack,
    x509::{store::X509StoreBuilder, verify::X509VerifyFlags, X509StoreContext, X509},
};

pub mod address;
pub mod error;
pub mod identity;
pub mod request;
pub mod status;

pub use error::{CodecError, CodecResult};
pub use identity::{identity_from_certificate, CertificatePermission, IdentityField, IdentitySet};
pub use request::{ParsedRequest, RequestTemplate, SubjectFields};
pub use status::{CertStatus, CertificateInfo};

#[derive(Debug)]
pub struct CertUtils;

impl CertUtils {
    /// 產生 P-256 (prime256v1) 私鑰
    pub fn generate_ec_key() -> CodecResult<PKey<Private>> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let ec = EcKey::generate(&group)?;
        Ok(PKey::from_ec_key(ec)?)
    }

    /// 憑證 DER 的 SHA-1 指紋 (大寫十六進位)，作為憑證的主鍵
    pub fn thumbprint_sha1(der: &[u8]) -> CodecResult<String> {
        let digest = hash(MessageDigest::sha1(), der)?;
        Ok(hex::encode_upper(digest))
    }

    pub fn cert_fingerprint_sha256(cert: &X509) -> CodecResult<String> {
        let der = cert.to_der()?;
        let digest = hash(MessageDigest::sha256(), &der)?;
        Ok(hex::encode(digest))
    }

    /// 將資料寫入檔案，必要時建立上層目錄
    /// # 參數
    /// * `path`: 目標路徑
    /// * `data`: 檔案內容
    pub fn write_file<P: AsRef<Path>>(path: P, data: &[u8]) -> CodecResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }

    /// 從指定的路徑載入憑證，PEM 與 DER 皆可
    /// # 參數
    /// * `path`: 憑證檔案的路徑
    /// # 回傳
    /// * `CodecResult<X509>`：返回憑證或錯誤
    pub fn load_cert<P: AsRef<Path>>(path: P) -> CodecResult<X509> {
        let raw = fs::read(path)?;
        Ok(X509::from_pem(&raw).or_else(|_| X509::from_der(&raw))?)
    }

    /// 從指定的路徑載入私鑰
    /// # 參數
    /// * `path`: 私鑰檔案的路徑
    /// * `passphrase`: 私鑰的密碼短語 (如果有的話)
    pub fn load_key<P: AsRef<Path>>(
        path: P,
        passphrase: Option<&str>,
    ) -> CodecResult<PKey<Private>> {
        let key_pem = fs::read(path)?;
        Ok(match passphrase {
            Some(pass) => PKey::private_key_from_pem_passphrase(&key_pem, pass.as_bytes())?,
            None => PKey::private_key_from_pem(&key_pem)?,
        })
    }

    /// 以單一根憑證驗證葉憑證的簽章鏈與有效期間
    pub fn verify_chain(leaf: &X509, root: &X509) -> CodecResult<bool> {
        let mut builder = X509StoreBuilder::new()?;
        builder.add_cert(root.clone())?;
        // 自訂身分欄位皆為 critical，交由 identity 模組解析
        builder.set_flags(X509VerifyFlags::IGNORE_CRITICAL)?;
        let store = builder.build();
        let chain: Stack<X509> = Stack::new()?;
        let mut ctx = X509StoreContext::new()?;
        Ok(ctx.init(&store, leaf, &chain, |c| c.verify_cert())?)
    }
}
