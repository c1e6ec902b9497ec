//! PKCS#10 憑證請求：預先建立未簽名的模板、附加簽章、解析與驗證

use der::{
    asn1::{BitString, ObjectIdentifier, SetOfVec},
    oid::AssociatedOid,
    Decode, Encode,
};
use openssl::{
    hash::MessageDigest,
    pkey::{Id, PKey, PKeyRef, Private, Public},
    sign::{Signer, Verifier},
    x509::X509NameBuilder,
};
use serde::{Deserialize, Serialize};
use x509_cert::{
    attr::Attribute,
    name::Name,
    request::{CertReq, CertReqInfo, ExtensionReq, Version},
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
};

use crate::{
    error::{CodecError, CodecResult},
    identity::IdentitySet,
};

/// ecdsa-with-SHA256
pub const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

/// CSR 的主體欄位
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubjectFields {
    pub common_name:         String,
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

impl SubjectFields {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self { common_name: common_name.into(), ..Default::default() }
    }

    /// 以 OpenSSL 的 X509NameBuilder 組出 DN，再轉為 DER
    pub fn to_name_der(&self) -> CodecResult<Vec<u8>> {
        if self.common_name.is_empty() {
            return Err(CodecError::MalformedRequest("CN 不得為空".into()));
        }
        let mut name_builder = X509NameBuilder::new()?;
        for (field, value) in [
            ("C", &self.country),
            ("O", &self.organization),
            ("OU", &self.organizational_unit),
            ("L", &self.locality),
            ("CN", &self.common_name),
            ("emailAddress", &self.email),
        ] {
            if !value.is_empty() {
                name_builder.append_entry_by_text(field, value)?;
            }
        }
        Ok(name_builder.build().to_der()?)
    }
}

/// 尚未簽名的 CertificationRequestInfo
///
/// 延後簽章流程: CA 產生模板 → 持有私鑰的一方對 [`RequestTemplate::to_be_signed`]
/// 簽名 → [`RequestTemplate::attach_signature`] 組成完整 CSR
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    info: CertReqInfo,
}

impl RequestTemplate {
    /// 建立模板
    /// # 參數
    /// * `subject`: 主體欄位
    /// * `public_key_der`: 申請者公鑰 (SPKI DER)
    /// * `identity`: 要寫入 extensionRequest 的身分欄位
    /// # 回傳
    /// * `CodecResult<RequestTemplate>`
    pub fn new(
        subject: &SubjectFields,
        public_key_der: &[u8],
        identity: &IdentitySet,
    ) -> CodecResult<Self> {
        let subject_der = subject.to_name_der()?;
        let subject = Name::from_der(&subject_der)?;
        let public_key = SubjectPublicKeyInfoOwned::from_der(public_key_der)
            .map_err(|e| CodecError::MalformedRequest(format!("公鑰格式錯誤: {e}")))?;
        let ext_req = Attribute::try_from(ExtensionReq(identity.to_extensions()?))?;
        let info = CertReqInfo {
            version: Version::V1,
            subject,
            public_key,
            attributes: SetOfVec::try_from(vec![ext_req])?,
        };
        Ok(Self { info })
    }

    pub fn from_der(der: &[u8]) -> CodecResult<Self> {
        let info = CertReqInfo::from_der(der)
            .map_err(|e| CodecError::MalformedRequest(format!("模板格式錯誤: {e}")))?;
        Ok(Self { info })
    }

    /// 需要被簽名的位元組 (CertificationRequestInfo 的 DER)
    pub fn to_be_signed(&self) -> CodecResult<Vec<u8>> {
        Ok(self.info.to_der()?)
    }

    /// 附上 ECDSA/SHA-256 簽章 (DER 編碼的 ECDSA-Sig-Value)，回傳完整 CSR 的 DER
    pub fn attach_signature(self, signature: &[u8]) -> CodecResult<Vec<u8>> {
        let req = CertReq {
            info:      self.info,
            algorithm: AlgorithmIdentifierOwned { oid: ECDSA_WITH_SHA256, parameters: None },
            signature: BitString::from_bytes(signature)?,
        };
        Ok(req.to_der()?)
    }

    /// 以本地私鑰直接簽名
    pub fn sign(self, key: &PKeyRef<Private>) -> CodecResult<Vec<u8>> {
        let tbs = self.to_be_signed()?;
        let sig = sign_bytes(key, &tbs)?;
        self.attach_signature(&sig)
    }
}

/// 以 EC 私鑰做 SHA-256 簽章
pub fn sign_bytes(key: &PKeyRef<Private>, data: &[u8]) -> CodecResult<Vec<u8>> {
    if key.id() != Id::EC {
        return Err(CodecError::UnsupportedKey(format!("{:?}", key.id())));
    }
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

/// 解析後的 CSR
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub subject:             String,
    pub subject_der:         Vec<u8>,
    pub public_key_der:      Vec<u8>,
    pub identity:            IdentitySet,
    pub signature_algorithm: ObjectIdentifier,
    pub signature:           Vec<u8>,
    info_der:                Vec<u8>,
}

impl ParsedRequest {
    pub fn from_der(der: &[u8]) -> CodecResult<Self> {
        let req = CertReq::from_der(der)
            .map_err(|e| CodecError::MalformedRequest(format!("無法解析 CSR: {e}")))?;
        let mut exts = Vec::new();
        for attr in req.info.attributes.iter().filter(|a| a.oid == ExtensionReq::OID) {
            for value in attr.values.iter() {
                let value_der = value.to_der()?;
                let ext_req = ExtensionReq::from_der(&value_der)?;
                exts.extend(ext_req.0);
            }
        }
        let identity = IdentitySet::from_extensions(&exts)?;
        let signature = req
            .signature
            .as_bytes()
            .ok_or_else(|| CodecError::MalformedRequest("簽章位元長度不是 8 的倍數".into()))?
            .to_vec();
        Ok(Self {
            subject: req.info.subject.to_string(),
            subject_der: req.info.subject.to_der()?,
            public_key_der: req.info.public_key.to_der()?,
            identity,
            signature_algorithm: req.algorithm.oid,
            signature,
            info_der: req.info.to_der()?,
        })
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// 申請者提交的公鑰；無法解碼 (例如點不在曲線上) 屬於請求格式錯誤
    pub fn public_key(&self) -> CodecResult<PKey<Public>> {
        PKey::public_key_from_der(&self.public_key_der)
            .map_err(|e| CodecError::MalformedRequest(format!("無法解碼 CSR 公鑰: {e}")))
    }

    /// 持有證明: 檢查 CSR 是否由其內含公鑰對應的私鑰所簽
    /// # 回傳
    /// * `Ok(false)`: 沒有簽章或簽章不符
    pub fn verify_signature(&self) -> CodecResult<bool> {
        if !self.is_signed() {
            return Ok(false);
        }
        if self.signature_algorithm != ECDSA_WITH_SHA256 {
            return Err(CodecError::UnsupportedKey(self.signature_algorithm.to_string()));
        }
        let key = self.public_key()?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key)
            .map_err(|e| CodecError::MalformedRequest(format!("無法以 CSR 公鑰驗證簽章: {e}")))?;
        verifier.update(&self.info_der)?;
        // 格式錯誤的簽章在 OpenSSL 會回報錯誤，視同不符
        Ok(verifier.verify(&self.signature).unwrap_or(false))
    }
}
