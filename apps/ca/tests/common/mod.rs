#![allow(dead_code)]

use std::path::Path;

use ca::{
    account::NewAccount, config::Settings, db, CaService, Credentials, MnemonicKeyProvider,
    NetworkParams,
};
use lca_cert_utils::{address, CertUtils, CertificatePermission, IdentitySet, RequestTemplate, SubjectFields};
use lca_permission::AccessFlags;
use openssl::pkey::{PKey, Private};

pub const ADMIN_PASSWORD: &str = "admin-pass";
pub const MNEMONIC: &str =
    "abandon ability able about above absent absorb abstract absurd abuse access accident";

pub fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.certificate.certs_dir = dir.to_path_buf();
    settings.accounts.admin_password = ADMIN_PASSWORD.into();
    settings
}

/// 記憶體資料庫上的 CA 與管理者憑據
pub async fn service(dir: &Path) -> (CaService, Credentials) {
    let settings = settings(dir);
    let pool = db::connect_in_memory().await.unwrap();
    let service = CaService::with_pool(pool, &settings).unwrap();
    let admin = service.bootstrap(&settings).await.unwrap().unwrap();
    (service, Credentials::new(admin, ADMIN_PASSWORD))
}

pub async fn initialize(service: &CaService) {
    let provider = MnemonicKeyProvider::new(MNEMONIC, "").unwrap();
    service.certificates.initialize(&provider, &NetworkParams::new("testnet")).await.unwrap();
}

/// 建立一個可以申請憑證的帳號
pub async fn issuer(
    service: &CaService,
    admin: &Credentials,
    permissions: &[CertificatePermission],
    approve: bool,
) -> Credentials {
    let request = NewAccount {
        name: "issuer".into(),
        password: "issuer-pass".into(),
        access_flags: AccessFlags::ISSUE_CERTIFICATES,
        permissions: permissions.to_vec(),
        organization: "Ledger Org".into(),
        ..Default::default()
    };
    let id = service.accounts.create(admin, request).await.unwrap();
    if approve {
        service.accounts.approve(id, admin).await.unwrap();
    }
    Credentials::new(id, "issuer-pass")
}

pub struct Applicant {
    pub key:      PKey<Private>,
    pub pub_der:  Vec<u8>,
    pub identity: IdentitySet,
}

impl Applicant {
    pub fn new(permissions: &[CertificatePermission]) -> Self {
        let key = CertUtils::generate_ec_key().unwrap();
        let pub_der = key.public_key_to_der().unwrap();
        let identity =
            IdentitySet::new(address::derive_address(&pub_der), address::key_hash(&pub_der))
                .with_permissions(permissions.iter().copied());
        Self { key, pub_der, identity }
    }

    pub fn template(&self) -> RequestTemplate {
        let subject = SubjectFields::new(self.identity.address.clone());
        RequestTemplate::new(&subject, &self.pub_der, &self.identity).unwrap()
    }

    pub fn signed_csr(&self) -> Vec<u8> {
        self.template().sign(&self.key).unwrap()
    }
}
