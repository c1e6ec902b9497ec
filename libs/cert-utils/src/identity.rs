//! 憑證中的身分欄位 (位址、金鑰雜湊、權限標記) 與 X.509 擴充欄位的互轉

use std::{
    collections::BTreeSet,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use der::{
    asn1::{Ia5String, ObjectIdentifier, OctetString},
    oid::AssociatedOid,
    Decode, Encode,
};
use serde::{Deserialize, Serialize};
use x509_cert::{
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        Extension,
    },
    Certificate,
};

use crate::{
    address::is_safe_address,
    error::{CodecError, CodecResult},
};

pub const ID_LCA_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.1");
pub const ID_LCA_TX_KEY_HASH: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.2");
pub const ID_LCA_BLOCK_SIGNING_KEY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.3");
pub const ID_LCA_PERM_SEND: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.10");
pub const ID_LCA_PERM_MINE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.11");
pub const ID_LCA_PERM_CREATE_CONTRACT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.12");
pub const ID_LCA_PERM_CALL_CONTRACT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.13");
pub const ID_LCA_PERM_CREATE_CHANNEL: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.14");

const PERMISSION_PRESENT: u8 = 0x01;

/// 憑證層級的能力
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CertificatePermission {
    Send,
    Mine,
    CreateContract,
    CallContract,
    CreateChannel,
}

impl CertificatePermission {
    pub const ALL: [CertificatePermission; 5] = [
        CertificatePermission::Send,
        CertificatePermission::Mine,
        CertificatePermission::CreateContract,
        CertificatePermission::CallContract,
        CertificatePermission::CreateChannel,
    ];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            CertificatePermission::Send => ID_LCA_PERM_SEND,
            CertificatePermission::Mine => ID_LCA_PERM_MINE,
            CertificatePermission::CreateContract => ID_LCA_PERM_CREATE_CONTRACT,
            CertificatePermission::CallContract => ID_LCA_PERM_CALL_CONTRACT,
            CertificatePermission::CreateChannel => ID_LCA_PERM_CREATE_CHANNEL,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.oid() == *oid)
    }

    pub fn name(self) -> &'static str {
        match self {
            CertificatePermission::Send => "send",
            CertificatePermission::Mine => "mine",
            CertificatePermission::CreateContract => "create_contract",
            CertificatePermission::CallContract => "call_contract",
            CertificatePermission::CreateChannel => "create_channel",
        }
    }
}

impl fmt::Display for CertificatePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CertificatePermission {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| CodecError::malformed("permission", format!("未知的權限名稱 {s}")))
    }
}

/// 單一擴充欄位解碼後的結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityField {
    Address(String),
    TxKeyHash(Vec<u8>),
    BlockSigningKey(Vec<u8>),
    /// `granted` 為 false 代表欄位存在但標記為未授予
    Permission { permission: CertificatePermission, granted: bool },
    Unknown { oid: ObjectIdentifier, value: Vec<u8> },
}

impl IdentityField {
    /// 解碼一個擴充欄位；不屬於本專案的 OID 一律回傳 `Unknown`
    pub fn decode(ext: &Extension) -> CodecResult<Self> {
        let oid = ext.extn_id;
        let field = field_name(&oid);
        let Some(field) = field else {
            return Ok(IdentityField::Unknown { oid, value: ext.extn_value.as_bytes().to_vec() });
        };
        if !ext.critical {
            return Err(CodecError::malformed(field, "自訂欄位必須標記為 critical"));
        }
        let inner = OctetString::from_der(ext.extn_value.as_bytes())
            .map_err(|e| CodecError::malformed(field, format!("不是 OCTET STRING: {e}")))?
            .into_bytes();
        if oid == ID_LCA_ADDRESS {
            let address =
                String::from_utf8(inner).map_err(|_| CodecError::malformed(field, "位址不是 UTF-8"))?;
            if !is_safe_address(&address) {
                return Err(CodecError::malformed(field, "位址含有不允許的字元"));
            }
            return Ok(IdentityField::Address(address));
        }
        if oid == ID_LCA_TX_KEY_HASH || oid == ID_LCA_BLOCK_SIGNING_KEY {
            if inner.is_empty() {
                return Err(CodecError::malformed(field, "欄位內容為空"));
            }
            return Ok(if oid == ID_LCA_TX_KEY_HASH {
                IdentityField::TxKeyHash(inner)
            } else {
                IdentityField::BlockSigningKey(inner)
            });
        }
        let permission = CertificatePermission::from_oid(&oid)
            .ok_or_else(|| CodecError::malformed(field, "未知的權限"))?;
        match inner.as_slice() {
            [b] => Ok(IdentityField::Permission { permission, granted: *b != 0 }),
            _ => Err(CodecError::malformed(field, "權限標記必須是單一位元組")),
        }
    }

    fn encode(oid: ObjectIdentifier, value: &[u8]) -> CodecResult<Extension> {
        let inner = OctetString::new(value)?.to_der()?;
        Ok(Extension { extn_id: oid, critical: true, extn_value: OctetString::new(inner)? })
    }
}

fn field_name(oid: &ObjectIdentifier) -> Option<&'static str> {
    if *oid == ID_LCA_ADDRESS {
        Some("address")
    } else if *oid == ID_LCA_TX_KEY_HASH {
        Some("tx_key_hash")
    } else if *oid == ID_LCA_BLOCK_SIGNING_KEY {
        Some("block_signing_key")
    } else {
        CertificatePermission::from_oid(oid).map(CertificatePermission::name)
    }
}

/// 一張憑證 (或 CSR) 攜帶的完整身分
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentitySet {
    pub address:           String,
    pub tx_key_hash:       Vec<u8>,
    pub block_signing_key: Option<Vec<u8>>,
    pub permissions:       BTreeSet<CertificatePermission>,
    /// DNS 名稱或 IP 位址字串
    pub subject_alt_names: Vec<String>,
}

impl IdentitySet {
    pub fn new(address: impl Into<String>, tx_key_hash: impl Into<Vec<u8>>) -> Self {
        Self { address: address.into(), tx_key_hash: tx_key_hash.into(), ..Default::default() }
    }

    pub fn with_block_signing_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.block_signing_key = Some(key.into());
        self
    }

    pub fn with_permissions<I>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = CertificatePermission>,
    {
        self.permissions.extend(permissions);
        self
    }

    pub fn with_subject_alt_name(mut self, name: impl Into<String>) -> Self {
        self.subject_alt_names.push(name.into());
        self
    }

    pub fn has_permission(&self, permission: CertificatePermission) -> bool {
        self.permissions.contains(&permission)
    }

    /// 只產生本專案的自訂欄位 (皆為 critical)，不含 SAN
    pub fn custom_extensions(&self) -> CodecResult<Vec<Extension>> {
        if !is_safe_address(&self.address) {
            return Err(CodecError::malformed("address", "位址含有不允許的字元"));
        }
        if self.tx_key_hash.is_empty() {
            return Err(CodecError::malformed("tx_key_hash", "金鑰雜湊為空"));
        }
        let mut exts = vec![
            IdentityField::encode(ID_LCA_ADDRESS, self.address.as_bytes())?,
            IdentityField::encode(ID_LCA_TX_KEY_HASH, &self.tx_key_hash)?,
        ];
        if let Some(key) = &self.block_signing_key {
            exts.push(IdentityField::encode(ID_LCA_BLOCK_SIGNING_KEY, key)?);
        }
        for p in &self.permissions {
            exts.push(IdentityField::encode(p.oid(), &[PERMISSION_PRESENT])?);
        }
        Ok(exts)
    }

    /// 自訂欄位加上 (若有) subjectAltName
    pub fn to_extensions(&self) -> CodecResult<Vec<Extension>> {
        let mut exts = self.custom_extensions()?;
        if !self.subject_alt_names.is_empty() {
            let names = self
                .subject_alt_names
                .iter()
                .map(|n| general_name(n))
                .collect::<CodecResult<Vec<_>>>()?;
            exts.push(Extension {
                extn_id:    SubjectAltName::OID,
                critical:   false,
                extn_value: OctetString::new(SubjectAltName(names).to_der()?)?,
            });
        }
        Ok(exts)
    }

    /// 由擴充欄位還原身分；未知的 OID 會被略過
    pub fn from_extensions(exts: &[Extension]) -> CodecResult<Self> {
        let mut address = None;
        let mut tx_key_hash = None;
        let mut set = IdentitySet::default();
        for ext in exts {
            if ext.extn_id == SubjectAltName::OID {
                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
                set.subject_alt_names.extend(san.0.iter().filter_map(san_to_string));
                continue;
            }
            match IdentityField::decode(ext)? {
                IdentityField::Address(a) => {
                    if address.replace(a).is_some() {
                        return Err(CodecError::malformed("address", "欄位重複"));
                    }
                }
                IdentityField::TxKeyHash(h) => {
                    if tx_key_hash.replace(h).is_some() {
                        return Err(CodecError::malformed("tx_key_hash", "欄位重複"));
                    }
                }
                IdentityField::BlockSigningKey(k) => {
                    if set.block_signing_key.replace(k).is_some() {
                        return Err(CodecError::malformed("block_signing_key", "欄位重複"));
                    }
                }
                IdentityField::Permission { permission, granted } => {
                    if granted {
                        set.permissions.insert(permission);
                    }
                }
                IdentityField::Unknown { .. } => {}
            }
        }
        set.address = address.ok_or_else(|| CodecError::malformed("address", "缺少必要欄位"))?;
        set.tx_key_hash =
            tx_key_hash.ok_or_else(|| CodecError::malformed("tx_key_hash", "缺少必要欄位"))?;
        Ok(set)
    }
}

fn general_name(name: &str) -> CodecResult<GeneralName> {
    Ok(match name.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => GeneralName::IpAddress(OctetString::new(v4.octets().to_vec())?),
        Ok(IpAddr::V6(v6)) => GeneralName::IpAddress(OctetString::new(v6.octets().to_vec())?),
        Err(_) => GeneralName::DnsName(Ia5String::new(name)?),
    })
}

fn san_to_string(name: &GeneralName) -> Option<String> {
    match name {
        GeneralName::DnsName(dns) => Some(dns.to_string()),
        GeneralName::IpAddress(ip) => match ip.as_bytes() {
            b if b.len() == 4 => {
                let mut o = [0u8; 4];
                o.copy_from_slice(b);
                Some(Ipv4Addr::from(o).to_string())
            }
            b if b.len() == 16 => {
                let mut o = [0u8; 16];
                o.copy_from_slice(b);
                Some(Ipv6Addr::from(o).to_string())
            }
            _ => None,
        },
        _ => None,
    }
}

/// 從已簽發的憑證 DER 讀出身分
pub fn identity_from_certificate(der: &[u8]) -> CodecResult<IdentitySet> {
    let cert = Certificate::from_der(der)?;
    let exts = cert.tbs_certificate.extensions.unwrap_or_default();
    IdentitySet::from_extensions(&exts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IdentitySet {
        IdentitySet::new("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", vec![7u8; 32])
            .with_block_signing_key(vec![4u8; 65])
            .with_permissions([CertificatePermission::Send, CertificatePermission::Mine])
            .with_subject_alt_name("node1.ledger.local")
            .with_subject_alt_name("10.0.0.7")
    }

    #[test]
    fn identity_survives_extension_encoding() {
        let set = sample();
        let exts = set.to_extensions().unwrap();
        let custom = exts.iter().filter(|e| e.extn_id != SubjectAltName::OID);
        assert!(custom.clone().all(|e| e.critical));
        assert_eq!(custom.count(), 5);
        assert_eq!(IdentitySet::from_extensions(&exts).unwrap(), set);
    }

    #[test]
    fn permission_names_match_oids() {
        for p in CertificatePermission::ALL {
            assert_eq!(CertificatePermission::from_oid(&p.oid()), Some(p));
            assert_eq!(p.name().parse::<CertificatePermission>().unwrap(), p);
        }
        assert!("fly".parse::<CertificatePermission>().is_err());
    }

    #[test]
    fn missing_address_is_malformed() {
        let exts = vec![IdentityField::encode(ID_LCA_TX_KEY_HASH, &[1, 2, 3]).unwrap()];
        let err = IdentitySet::from_extensions(&exts).unwrap_err();
        assert!(matches!(err, CodecError::MalformedExtension { ref field, .. } if field == "address"));
    }

    #[test]
    fn non_critical_custom_field_is_malformed() {
        let mut exts = sample().custom_extensions().unwrap();
        exts[1].critical = false;
        assert!(matches!(
            IdentitySet::from_extensions(&exts),
            Err(CodecError::MalformedExtension { .. })
        ));
    }

    #[test]
    fn value_that_is_not_an_octet_string_is_malformed() {
        let mut exts = sample().custom_extensions().unwrap();
        // INTEGER 5
        exts[0].extn_value = OctetString::new(vec![0x02, 0x01, 0x05]).unwrap();
        assert!(matches!(
            IdentitySet::from_extensions(&exts),
            Err(CodecError::MalformedExtension { .. })
        ));
    }

    #[test]
    fn unknown_oids_are_tolerated() {
        let mut exts = sample().custom_extensions().unwrap();
        exts.push(Extension {
            extn_id:    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.62140.1.99"),
            critical:   false,
            extn_value: OctetString::new(vec![0x05, 0x00]).unwrap(),
        });
        let decoded = IdentitySet::from_extensions(&exts).unwrap();
        assert_eq!(decoded.address, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
    }

    #[test]
    fn permission_marker_with_zero_byte_is_not_granted() {
        let mut exts = IdentitySet::new("abc", vec![1]).custom_extensions().unwrap();
        exts.push(IdentityField::encode(ID_LCA_PERM_MINE, &[0x00]).unwrap());
        let decoded = IdentitySet::from_extensions(&exts).unwrap();
        assert!(!decoded.has_permission(CertificatePermission::Mine));
    }

    #[test]
    fn address_with_path_characters_cannot_be_encoded() {
        let set = IdentitySet::new("../../x", vec![1]);
        assert!(set.to_extensions().is_err());
    }
}
