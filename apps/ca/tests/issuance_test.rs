mod common;

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use ca::{
    account::{Account, NewAccount},
    CaError, CaService, CertificateProcess, LocalCertificateSource, MnemonicKeyProvider,
    NetworkParams, TemplateRequest,
};
use common::{initialize, issuer, service, Applicant};
use lca_cert_utils::{
    address, identity_from_certificate, CertStatus, CertUtils, CertificatePermission, IdentitySet,
    RequestTemplate, SubjectFields,
};
use lca_crl_cache::{CacheConfig, RevocationCache};
use lca_permission::{AccessFlags, PermissionEnforcer};
use openssl::{
    asn1::{Asn1Object, Asn1OctetString},
    hash::MessageDigest,
    stack::Stack,
    x509::{X509Extension, X509NameBuilder, X509ReqBuilder, X509},
};

use CertificatePermission::{CreateChannel, Mine, Send};

async fn approved_issuer(service: &CaService, admin: &ca::Credentials) -> Account {
    let creds = issuer(service, admin, &[Send, Mine], true).await;
    service.accounts.authenticate(&creds).await.unwrap()
}

#[tokio::test]
async fn issued_certificate_chains_to_root_and_carries_identity() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let applicant = Applicant::new(&[Send]);

    let info = service.certificates.issue(&applicant.signed_csr(), &account).await.unwrap();
    assert_eq!(info.status, CertStatus::Good);
    assert_eq!(info.address, applicant.identity.address);
    assert_eq!(info.issuer_account_id, account.id);
    assert_eq!(info.permissions, vec![Send]);
    assert_eq!(info.public_key, general_purpose::STANDARD.encode(&applicant.pub_der));
    assert_eq!(info.thumbprint, CertUtils::thumbprint_sha1(&info.der).unwrap());
    assert!(info.not_after > info.issued_at);

    let cert = X509::from_der(&info.der).unwrap();
    let root = service.certificates.ca_cert().unwrap();
    assert!(CertUtils::verify_chain(&cert, root).unwrap());
    assert_eq!(identity_from_certificate(&info.der).unwrap(), applicant.identity);

    let on_disk = std::fs::read(service.certificates.issued_path(&info.address)).unwrap();
    assert_eq!(on_disk, info.der);
    let stored = service.store.get_by_thumbprint(&info.thumbprint).await.unwrap().unwrap();
    assert_eq!(stored, info);
}

#[tokio::test]
async fn subject_alt_names_are_carried_into_the_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let mut applicant = Applicant::new(&[Mine]);
    applicant.identity = applicant
        .identity
        .clone()
        .with_subject_alt_name("node1.ledger.local")
        .with_subject_alt_name("10.0.0.7");

    let info = service.certificates.issue(&applicant.signed_csr(), &account).await.unwrap();
    let identity = identity_from_certificate(&info.der).unwrap();
    assert_eq!(identity.subject_alt_names, vec!["node1.ledger.local", "10.0.0.7"]);
}

#[tokio::test]
async fn unapproved_or_unflagged_accounts_cannot_issue() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let pending = issuer(&service, &admin, &[Send], false).await;
    let pending = service.accounts.authenticate(&pending).await.unwrap();
    let csr = Applicant::new(&[Send]).signed_csr();
    assert!(matches!(
        service.certificates.issue(&csr, &pending).await,
        Err(CaError::AuthorizationDenied(_))
    ));

    service.accounts.approve(pending.id, &admin).await.unwrap();
    let approved = service.accounts.account(pending.id).await.unwrap();
    service.certificates.issue(&csr, &approved).await.unwrap();
}

#[tokio::test]
async fn permissions_beyond_the_account_grant_are_denied() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let csr = Applicant::new(&[Send, CreateChannel]).signed_csr();
    assert!(matches!(
        service.certificates.issue(&csr, &account).await,
        Err(CaError::AuthorizationDenied(_))
    ));
    assert!(service.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn proof_of_possession_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let applicant = Applicant::new(&[Send]);

    let unsigned = applicant.template().attach_signature(&[]).unwrap();
    assert!(matches!(
        service.certificates.issue(&unsigned, &account).await,
        Err(CaError::MalformedRequest(_))
    ));

    let stranger = CertUtils::generate_ec_key().unwrap();
    let forged = applicant.template().sign(&stranger).unwrap();
    assert!(matches!(
        service.certificates.issue(&forged, &account).await,
        Err(CaError::MalformedRequest(_))
    ));

    assert!(matches!(
        service.certificates.issue(b"not a csr", &account).await,
        Err(CaError::MalformedRequest(_))
    ));
}

#[tokio::test]
async fn undecodable_applicant_key_is_a_malformed_request() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let applicant = Applicant::new(&[Send]);

    let mut pub_der = applicant.pub_der.clone();
    let last = pub_der.len() - 1;
    pub_der[last] ^= 0x01;
    let identity = IdentitySet::new(address::derive_address(&pub_der), address::key_hash(&pub_der))
        .with_permissions([Send]);
    let subject = SubjectFields::new(identity.address.clone());
    let csr = RequestTemplate::new(&subject, &pub_der, &identity).unwrap().sign(&applicant.key).unwrap();

    let err = service.certificates.issue(&csr, &account).await.unwrap_err();
    assert!(matches!(err, CaError::MalformedRequest(_)), "{err:?}");
    assert_eq!(err.code(), "MalformedRequest");
    assert!(service.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn a_key_holds_one_active_certificate_until_revoked() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let admin_account = service.accounts.authenticate(&admin).await.unwrap();
    let applicant = Applicant::new(&[Send]);

    let first = service.certificates.issue(&applicant.signed_csr(), &account).await.unwrap();
    assert!(matches!(
        service.certificates.issue(&applicant.signed_csr(), &account).await,
        Err(CaError::MalformedRequest(_))
    ));

    assert!(service.revocation.revoke(&first.thumbprint, &admin_account).await.unwrap());
    let second = service.certificates.issue(&applicant.signed_csr(), &account).await.unwrap();
    assert_ne!(first.thumbprint, second.thumbprint);
    assert_eq!(
        service.store.get_by_address(&applicant.identity.address).await.unwrap().unwrap().thumbprint,
        second.thumbprint
    );
}

#[tokio::test]
async fn second_revoker_does_not_replace_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let admin_account = service.accounts.authenticate(&admin).await.unwrap();
    let auditor = NewAccount {
        name: "auditor".into(),
        password: "auditor-pass".into(),
        access_flags: AccessFlags::REVOKE_CERTIFICATES,
        ..Default::default()
    };
    let auditor_id = service.accounts.create(&admin, auditor).await.unwrap();
    let auditor = service.accounts.account(auditor_id).await.unwrap();

    let info = service.certificates.issue(&Applicant::new(&[]).signed_csr(), &account).await.unwrap();
    assert!(service.revocation.revoke(&info.thumbprint, &admin_account).await.unwrap());
    let first = service.store.get_by_thumbprint(&info.thumbprint).await.unwrap().unwrap();

    assert!(!service.revocation.revoke(&info.thumbprint, &auditor).await.unwrap());
    let after = service.store.get_by_thumbprint(&info.thumbprint).await.unwrap().unwrap();
    assert_eq!(after.revoker_account_id, Some(admin_account.id));
    assert_eq!(after.revoked_at, first.revoked_at);
    assert_eq!(service.store.list_revoked().await.unwrap(), vec![info.thumbprint.clone()]);
}

#[tokio::test]
async fn delayed_signing_template_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let applicant = Applicant::new(&[]);

    let request = TemplateRequest {
        address: applicant.identity.address.clone(),
        public_key: applicant.pub_der.clone(),
        tx_key_hash: applicant.identity.tx_key_hash.clone(),
        ..Default::default()
    };
    let template_der = service.certificates.generate_request_template(&account, &request).unwrap();
    // 簽名在 CA 之外完成
    let csr = RequestTemplate::from_der(&template_der).unwrap().sign(&applicant.key).unwrap();
    let info = service.certificates.issue(&csr, &account).await.unwrap();

    // 未指定時帶入帳號允許的全部能力
    assert_eq!(info.permissions, vec![Send, Mine]);
    assert!(info.subject.contains("Ledger Org"));

    let too_much = TemplateRequest { permissions: Some(vec![CreateChannel]), ..request };
    assert!(matches!(
        service.certificates.generate_request_template(&account, &too_much),
        Err(CaError::AuthorizationDenied(_))
    ));
}

#[tokio::test]
async fn root_is_created_once_and_reloaded_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    let account = approved_issuer(&service, &admin).await;
    assert!(matches!(
        service.certificates.issue(&Applicant::new(&[]).signed_csr(), &account).await,
        Err(CaError::CaUninitialized)
    ));

    initialize(&service).await;
    let provider = MnemonicKeyProvider::new(common::MNEMONIC, "").unwrap();
    assert!(matches!(
        service.certificates.initialize(&provider, &NetworkParams::new("again")).await,
        Err(CaError::AlreadyInitialized)
    ));
    assert!(dir.path().join("rootCA.pem").exists());
    assert!(dir.path().join("rootCA.key").exists());

    let settings = common::settings(dir.path());
    let reloaded = CertificateProcess::new(service.store.clone(), settings.certificate);
    assert!(reloaded.load_identity().unwrap());
    assert_eq!(
        reloaded.ca_cert().unwrap().to_der().unwrap(),
        service.certificates.ca_cert().unwrap().to_der().unwrap()
    );
}

#[tokio::test]
async fn in_process_enforcement_follows_registry_and_revocation() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let admin_account = service.accounts.authenticate(&admin).await.unwrap();
    let applicant = Applicant::new(&[Send]);
    let info = service.certificates.issue(&applicant.signed_csr(), &account).await.unwrap();

    let cache = Arc::new(RevocationCache::new(service.revocation.clone(), CacheConfig::default()));
    let enforcer = PermissionEnforcer::new(
        Arc::new(LocalCertificateSource::new(service.store.clone())),
        cache.clone(),
    );
    let address = applicant.identity.address.as_str();
    assert!(enforcer.has_certificate_permission(address, Send).await.unwrap());
    assert!(!enforcer.has_certificate_permission(address, Mine).await.unwrap());

    service.revocation.revoke(&info.thumbprint, &admin_account).await.unwrap();
    assert_eq!(cache.refresh().await.unwrap(), 1);
    assert!(cache.is_revoked(&info.thumbprint, true).await.unwrap());
    assert!(!enforcer.has_certificate_permission(address, Send).await.unwrap());
}

#[tokio::test]
async fn unrecognised_request_extensions_are_not_copied_into_the_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let (service, admin) = service(dir.path()).await;
    initialize(&service).await;
    let account = approved_issuer(&service, &admin).await;
    let applicant = Applicant::new(&[Send]);

    let mut exts = Stack::new().unwrap();
    for ext in applicant.identity.custom_extensions().unwrap() {
        let oid = Asn1Object::from_str(&ext.extn_id.to_string()).unwrap();
        let value = Asn1OctetString::new_from_bytes(ext.extn_value.as_bytes()).unwrap();
        exts.push(X509Extension::new_from_der(&oid, ext.critical, &value).unwrap()).unwrap();
    }
    let foreign = Asn1Object::from_str("1.2.3.4.5.6.7").unwrap();
    let payload = Asn1OctetString::new_from_bytes(&[0x04, 0x02, 0xAB, 0xCD]).unwrap();
    exts.push(X509Extension::new_from_der(&foreign, false, &payload).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", &applicant.identity.address).unwrap();
    let name = name.build();
    let mut req = X509ReqBuilder::new().unwrap();
    req.set_subject_name(&name).unwrap();
    req.set_pubkey(&applicant.key).unwrap();
    req.add_extensions(&exts).unwrap();
    req.sign(&applicant.key, MessageDigest::sha256()).unwrap();
    let csr = req.build().to_der().unwrap();

    let info = service.certificates.issue(&csr, &account).await.unwrap();
    let cert = X509::from_der(&info.der).unwrap();
    let text = String::from_utf8(cert.to_text().unwrap()).unwrap();
    assert!(!text.contains("1.2.3.4.5.6.7"));
    assert_eq!(identity_from_certificate(&info.der).unwrap(), applicant.identity);
}
