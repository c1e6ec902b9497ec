use der::Encode;
use lca_cert_utils::{
    address, identity_from_certificate, CertUtils, CertificatePermission, CodecError, IdentitySet,
};
use openssl::{
    asn1::{Asn1Object, Asn1OctetString, Asn1Time},
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    x509::{X509Builder, X509Extension, X509NameBuilder, X509},
};

fn self_signed_with(identity: &IdentitySet, critical: bool) -> (PKey<Private>, X509) {
    let key = CertUtils::generate_ec_key().unwrap();
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(63, MsbOption::MAYBE_ZERO, false).unwrap();
    builder.set_serial_number(&serial.to_asn1_integer().unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "test").unwrap();
    let name = name.build();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    for ext in identity.custom_extensions().unwrap() {
        let oid = Asn1Object::from_str(&ext.extn_id.to_string()).unwrap();
        let value = Asn1OctetString::new_from_bytes(ext.extn_value.as_bytes()).unwrap();
        builder
            .append_extension(X509Extension::new_from_der(&oid, critical, &value).unwrap())
            .unwrap();
    }
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (key, builder.build())
}

#[test]
fn identity_embedded_by_openssl_is_decoded() {
    let pk = b"tx-signing-public-key";
    let identity = IdentitySet::new(address::derive_address(pk), address::key_hash(pk))
        .with_block_signing_key(b"block-key".to_vec())
        .with_permissions([CertificatePermission::Mine, CertificatePermission::CreateChannel]);
    let (_, cert) = self_signed_with(&identity, true);
    let der = cert.to_der().unwrap();
    let decoded = identity_from_certificate(&der).unwrap();
    assert_eq!(decoded, identity);
    assert!(CertUtils::verify_chain(&cert, &cert).unwrap());
}

#[test]
fn non_critical_identity_in_certificate_is_rejected() {
    let identity = IdentitySet::new("abc123", vec![9u8; 32]);
    let (_, cert) = self_signed_with(&identity, false);
    let err = identity_from_certificate(&cert.to_der().unwrap()).unwrap_err();
    assert!(matches!(err, CodecError::MalformedExtension { .. }));
}

#[test]
fn chain_from_other_root_fails() {
    let identity = IdentitySet::new("abc123", vec![9u8; 32]);
    let (_, a) = self_signed_with(&identity, true);
    let (_, b) = self_signed_with(&identity, true);
    assert!(!CertUtils::verify_chain(&a, &b).unwrap());
}

#[test]
fn extension_der_is_stable() {
    let identity = IdentitySet::new("abc123", vec![1, 2, 3]);
    let exts = identity.custom_extensions().unwrap();
    // OCTET STRING { OCTET STRING "abc123" }
    let der = exts[0].extn_value.to_der().unwrap();
    assert_eq!(&der[..2], &[0x04u8, 0x08]);
    assert_eq!(&der[2..], b"\x04\x06abc123");
}
