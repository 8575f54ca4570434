//! Test-time certificate hierarchy generator
//!
//! Builds root / intermediate / end-entity certificates with fixed validity
//! windows so validation tests are independent of the wall clock.

use crate::certificate::Certificate;
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE_TEST: u32 = 2048;
const ROOT_CA_PATH_LENGTH: u32 = 1;
const INTERMEDIATE_CA_PATH_LENGTH: u32 = 0;

/// 2020-01-01T00:00:00Z
pub const ROOT_NOT_BEFORE: i64 = 1_577_836_800;
/// 2040-01-01T00:00:00Z
pub const ROOT_NOT_AFTER: i64 = 2_208_988_800;
/// 2022-01-01T00:00:00Z
pub const INTERMEDIATE_NOT_BEFORE: i64 = 1_640_995_200;
/// 2036-01-01T00:00:00Z
pub const INTERMEDIATE_NOT_AFTER: i64 = 2_082_758_400;
/// 2024-07-23T11:46:39Z
pub const LEAF_NOT_BEFORE: i64 = 1_721_735_199;
/// 2034-07-21T11:46:39Z
pub const LEAF_NOT_AFTER: i64 = 2_037_095_199;
/// 2025-01-01T00:00:00Z, inside every window above
pub const VALIDATION_DATE: i64 = 1_735_689_600;

pub const LEAF_HOSTNAME: &str = "login.agni.example.com";
pub const LEAF_SERIAL: &str = "9E8D3413E79BF931";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CertificateDataType {
    RootCA,
    IntermediateCA,
    TlsCert,
    ClientCert,
}

#[derive(Debug, Clone)]
pub struct CertificateData {
    pub subject_common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub locality: String,
    pub state: String,
    pub country: String,
    pub email: Option<String>,
    pub serial_hex: Option<String>,
    pub path_len: Option<u32>,
    /// Also record the issuer's name and serial in the authority key identifier
    pub issuer_serial: bool,
    pub not_before: i64,
    pub not_after: i64,
    pub cert_type: CertificateDataType,
}

impl CertificateData {
    pub fn new(common_name: &str, cert_type: CertificateDataType) -> Self {
        let (not_before, not_after, path_len) = match cert_type {
            CertificateDataType::RootCA => (ROOT_NOT_BEFORE, ROOT_NOT_AFTER, Some(ROOT_CA_PATH_LENGTH)),
            CertificateDataType::IntermediateCA => (
                INTERMEDIATE_NOT_BEFORE,
                INTERMEDIATE_NOT_AFTER,
                Some(INTERMEDIATE_CA_PATH_LENGTH),
            ),
            CertificateDataType::TlsCert | CertificateDataType::ClientCert => {
                (LEAF_NOT_BEFORE, LEAF_NOT_AFTER, None)
            }
        };
        Self {
            subject_common_name: common_name.to_string(),
            organization: "Example Grid".to_string(),
            organizational_unit: "Grid".to_string(),
            locality: "San Francisco".to_string(),
            state: "California".to_string(),
            country: "US".to_string(),
            email: None,
            serial_hex: None,
            path_len,
            issuer_serial: false,
            not_before,
            not_after,
            cert_type,
        }
    }
}

pub struct Issued {
    pub key: PKey<Private>,
    pub cert: Certificate,
}

fn generate_rsa_key() -> Result<PKey<Private>> {
    let rsa = openssl::rsa::Rsa::generate(RSA_KEY_SIZE_TEST)
        .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
    PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
}

/// Issues a certificate; `issuer` of `None` produces a self-signed one
pub fn generate_key_pair(cert_data: &CertificateData, issuer: Option<&Issued>) -> Result<Issued> {
    let (key, x509) = issue_x509(cert_data, issuer)?;
    let cert = Certificate::from_x509(x509)?;
    Ok(Issued { key, cert })
}

/// Raw OpenSSL certificate, for content `Certificate` itself refuses to wrap
pub fn issue_x509(
    cert_data: &CertificateData,
    issuer: Option<&Issued>,
) -> Result<(PKey<Private>, X509)> {
    let private_key = generate_rsa_key()?;
    let mut builder =
        X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
    builder
        .set_version(X509_VERSION_3)
        .map_err(|e| anyhow!("Failed to set version: {}", e))?;

    let serial = match &cert_data.serial_hex {
        Some(hex) => BigNum::from_hex_str(hex)?,
        None => {
            let mut serial = BigNum::new()?;
            serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
            serial
        }
    };
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    let mut name_builder =
        X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
    name_builder.append_entry_by_nid(Nid::COUNTRYNAME, &cert_data.country)?;
    name_builder.append_entry_by_nid(Nid::STATEORPROVINCENAME, &cert_data.state)?;
    name_builder.append_entry_by_nid(Nid::LOCALITYNAME, &cert_data.locality)?;
    name_builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, &cert_data.organization)?;
    name_builder.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, &cert_data.organizational_unit)?;
    name_builder.append_entry_by_nid(Nid::COMMONNAME, &cert_data.subject_common_name)?;
    if let Some(email) = &cert_data.email {
        name_builder.append_entry_by_nid(Nid::PKCS9_EMAILADDRESS, email)?;
    }
    let name = name_builder.build();
    builder
        .set_subject_name(&name)
        .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
    match issuer {
        Some(parent) => builder.set_issuer_name(parent.cert.native_handle().subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }

    let not_before = Asn1Time::from_unix(cert_data.not_before)?;
    let not_after = Asn1Time::from_unix(cert_data.not_after)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder
        .set_pubkey(&private_key)
        .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

    let issuer_x509 = issuer.map(|parent| parent.cert.native_handle());
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(issuer_x509.as_deref(), None))?;
    builder.append_extension(ski)?;
    if let Some(parent) = issuer_x509.as_deref() {
        let mut aki = AuthorityKeyIdentifier::new();
        aki.keyid(false);
        if cert_data.issuer_serial {
            aki.issuer(true);
        }
        let aki = aki.build(&builder.x509v3_context(Some(parent), None))?;
        builder.append_extension(aki)?;
    }

    match cert_data.cert_type {
        CertificateDataType::RootCA | CertificateDataType::IntermediateCA => {
            let mut bc = BasicConstraints::new();
            bc.critical().ca();
            if let Some(path_len) = cert_data.path_len {
                bc.pathlen(path_len);
            }
            builder.append_extension(bc.build()?)?;
            let ku = KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()
                .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
            builder.append_extension(ku)?;
        }
        CertificateDataType::TlsCert | CertificateDataType::ClientCert => {
            builder.append_extension(BasicConstraints::new().critical().build()?)?;
            let ku = KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()
                .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
            builder.append_extension(ku)?;
            let mut eku = ExtendedKeyUsage::new();
            if cert_data.cert_type == CertificateDataType::TlsCert {
                eku.server_auth();
            } else {
                eku.client_auth();
            }
            builder.append_extension(eku.build()?)?;
        }
    }

    let signing_key = issuer.map_or(&private_key, |parent| &parent.key);
    builder
        .sign(signing_key, MessageDigest::sha256())
        .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
    Ok((private_key, builder.build()))
}

/// Root -> intermediate -> TLS leaf hierarchy shared by the test modules
pub struct TestPki {
    pub root: Certificate,
    pub intermediate: Certificate,
    pub leaf: Certificate,
    pub root_issued: Issued,
    pub intermediate_issued: Issued,
    pub leaf_issued: Issued,
}

impl TestPki {
    pub fn generate() -> Result<Self> {
        let root_issued = generate_key_pair(
            &CertificateData::new("Example Grid Root CA", CertificateDataType::RootCA),
            None,
        )?;
        let intermediate_issued = generate_key_pair(
            &CertificateData::new(
                "Example Grid Intermediate CA",
                CertificateDataType::IntermediateCA,
            ),
            Some(&root_issued),
        )?;
        let mut leaf_data = CertificateData::new(LEAF_HOSTNAME, CertificateDataType::TlsCert);
        leaf_data.email = Some("noreply@example.com".to_string());
        leaf_data.serial_hex = Some(LEAF_SERIAL.to_string());
        let leaf_issued = generate_key_pair(&leaf_data, Some(&intermediate_issued))?;
        Ok(Self {
            root: root_issued.cert.clone(),
            intermediate: intermediate_issued.cert.clone(),
            leaf: leaf_issued.cert.clone(),
            root_issued,
            intermediate_issued,
            leaf_issued,
        })
    }
}

pub static TEST_PKI: Lazy<TestPki> =
    Lazy::new(|| TestPki::generate().expect("test PKI generation failed"));

/// Copy of `cert` with the last byte of its DER encoding (inside the signature) flipped
pub fn tamper_signature(cert: &Certificate) -> Certificate {
    let mut der = cert.der().to_vec();
    if let Some(last) = der.last_mut() {
        *last ^= 0x01;
    }
    Certificate::from_der(&der).expect("tampered certificate still parses")
}
