//! X.509 certificate value type
//!
//! A [`Certificate`] wraps one parsed OpenSSL `X509` handle together with its
//! DER and PEM encodings and a structured [`CertificateFields`] record. The
//! record is extracted once, at construction, so every later lookup is a
//! plain field access. Distinguished names and the extensions OpenSSL does
//! not expose getters for (key usage, extended key usage, basic constraints,
//! key identifiers) are read with `x509-parser` from the same DER bytes. A
//! name value containing a NUL character makes the certificate invalid.
//!
//! Certificates are cheap to clone (reference counted) and compare equal when
//! their SHA1 fingerprints match.

use crate::error::CertError;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use openssl::asn1::Asn1Object;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use x509_parser::der_parser::asn1_rs::{Any, BmpString, Tag, UniversalString};
use x509_parser::prelude::*;

const PEM_LABEL: &str = "CERTIFICATE";

/// Named key usage bits, in bit order
pub const KEY_USAGE_NAMES: [&str; 9] = [
    "digitalSignature",
    "nonRepudiation",
    "keyEncipherment",
    "dataEncipherment",
    "keyAgreement",
    "certSigning",
    "crlSigning",
    "encipherOnly",
    "decipherOnly",
];

pub const KU_DIGITAL_SIGNATURE: &str = "digitalSignature";
pub const KU_KEY_ENCIPHERMENT: &str = "keyEncipherment";
pub const KU_CERT_SIGNING: &str = "certSigning";
pub const EKU_SERVER_AUTH: &str = "serverAuth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicConstraintsInfo {
    pub ca: bool,
    pub path_len: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityKeyId {
    /// Lower-case hex
    pub key_id: Option<String>,
    /// Upper-case hex, same rendering as [`CertificateFields::serial_number`]
    pub serial: Option<String>,
}

/// Structured field record of a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFields {
    pub version: i32,
    pub subject_name: BTreeMap<String, String>,
    pub subject_name_string: String,
    pub issuer_name: BTreeMap<String, String>,
    pub issuer_name_string: String,
    pub serial_number: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub sha1_digest: String,
    pub md5_digest: String,
    pub basic_constraints: Option<BasicConstraintsInfo>,
    pub key_usage: Option<Vec<String>>,
    pub extended_key_usage: Option<Vec<String>>,
    pub subject_key_identifier: Option<String>,
    pub authority_key_identifier: Option<AuthorityKeyId>,
}

impl CertificateFields {
    pub fn common_name(&self) -> Option<&str> {
        self.subject_name.get("commonName").map(String::as_str)
    }

    pub fn has_key_usage(&self, usage: &str) -> bool {
        self.key_usage
            .as_ref()
            .map_or(false, |bits| bits.iter().any(|b| b == usage))
    }

    pub fn has_extended_key_usage(&self, usage: &str) -> bool {
        self.extended_key_usage
            .as_ref()
            .map_or(false, |purposes| purposes.iter().any(|p| p == usage))
    }
}

struct Inner {
    x509: X509,
    der: Vec<u8>,
    pem: String,
    fields: CertificateFields,
}

#[derive(Clone)]
pub struct Certificate {
    inner: Arc<Inner>,
}

impl Certificate {
    pub fn from_x509(x509: X509) -> Result<Self, CertError> {
        let der = x509
            .to_der()
            .map_err(|e| CertError::invalid(format!("Failed to encode certificate: {}", e)))?;
        let pem = x509
            .to_pem()
            .map_err(|e| CertError::invalid(format!("Failed to encode certificate: {}", e)))
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| CertError::invalid(e.to_string()))
            })?;
        let fields = extract_fields(&x509, &der)?;
        Ok(Self {
            inner: Arc::new(Inner {
                x509,
                der,
                pem,
                fields,
            }),
        })
    }

    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        let x509 = X509::from_der(der)
            .map_err(|e| CertError::invalid(format!("Failed to parse DER certificate: {}", e)))?;
        Self::from_x509(x509)
    }

    /// Parses text holding exactly one PEM certificate block
    pub fn from_pem(text: &str) -> Result<Self, CertError> {
        let mut blocks = certificate_blocks(text).into_iter();
        match (blocks.next(), blocks.next()) {
            (None, _) => Err(CertError::invalid("no PEM certificate found")),
            (Some(block), None) => Self::from_der(&block?),
            (Some(_), Some(_)) => Err(CertError::invalid(format!(
                "expected one PEM certificate, found {}",
                blocks.count() + 2
            ))),
        }
    }

    pub fn pem(&self) -> &str {
        &self.inner.pem
    }

    pub fn der(&self) -> &[u8] {
        &self.inner.der
    }

    pub fn fields(&self) -> &CertificateFields {
        &self.inner.fields
    }

    /// Lower-case hex SHA1 of the DER encoding; the certificate's identity
    pub fn sha1(&self) -> &str {
        &self.inner.fields.sha1_digest
    }

    pub fn common_name(&self) -> Option<&str> {
        self.inner.fields.common_name()
    }

    /// Owned copy of the OpenSSL handle (reference count bump)
    pub fn native_handle(&self) -> X509 {
        self.inner.x509.clone()
    }

    pub fn public_key(&self) -> Result<PKey<Public>, CertError> {
        self.inner
            .x509
            .public_key()
            .map_err(|e| CertError::invalid_cert(format!("Failed to read public key: {}", e), self))
    }

    /// True when this certificate's signature verifies under `parent`'s key
    pub fn is_signed_by(&self, parent: &Certificate) -> bool {
        match parent.public_key() {
            Ok(key) => self.inner.x509.verify(&key).unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.sha1() == other.sha1()
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sha1().hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.inner.fields.subject_name_string)
            .field("sha1", &self.sha1())
            .finish()
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.fields.subject_name_string)
    }
}

/// DER contents of every `CERTIFICATE` block in `text`; blocks with other labels are ignored
fn certificate_blocks(text: &str) -> Vec<Result<Vec<u8>, CertError>> {
    Pem::iter_from_buffer(text.as_bytes())
        .filter_map(|block| match block {
            Ok(pem) if pem.label == PEM_LABEL => Some(Ok(pem.contents)),
            Ok(pem) => {
                debug!("Ignoring PEM block labelled {}", pem.label);
                None
            }
            Err(e) => Some(Err(CertError::invalid(format!("Bad PEM block: {}", e)))),
        })
        .collect()
}

/// Parses every certificate block in a PEM bundle, skipping unparseable ones
pub fn parse_pem_bundle(text: &str) -> Vec<Certificate> {
    certificate_blocks(text)
        .into_iter()
        .enumerate()
        .filter_map(|(index, block)| match block.and_then(|der| Certificate::from_der(&der)) {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!("Skipping certificate block {}: {}", index, e);
                None
            }
        })
        .collect()
}

pub(crate) fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn extract_fields(x509: &X509, der: &[u8]) -> Result<CertificateFields, CertError> {
    let (_, parsed) = parse_x509_certificate(der)
        .map_err(|e| CertError::invalid(format!("Failed to parse certificate: {}", e)))?;

    let basic_constraints = parsed
        .basic_constraints()
        .map_err(|e| CertError::invalid(format!("Bad basic constraints: {}", e)))?
        .map(|bc| BasicConstraintsInfo {
            ca: bc.value.ca,
            path_len: bc.value.path_len_constraint,
        });
    let key_usage = parsed
        .key_usage()
        .map_err(|e| CertError::invalid(format!("Bad key usage: {}", e)))?
        .map(|ku| key_usage_names(ku.value));
    let extended_key_usage = parsed
        .extended_key_usage()
        .map_err(|e| CertError::invalid(format!("Bad extended key usage: {}", e)))?
        .map(|eku| extended_key_usage_names(eku.value));

    let mut subject_key_identifier = None;
    let mut authority_key_identifier = None;
    for ext in parsed.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                subject_key_identifier = Some(hex::encode(ski.0));
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                authority_key_identifier = Some(AuthorityKeyId {
                    key_id: aki.key_identifier.as_ref().map(|id| hex::encode(id.0)),
                    serial: aki.authority_cert_serial.map(serial_hex),
                });
            }
            _ => {}
        }
    }

    let validity = parsed.validity();
    let valid_from = Utc
        .timestamp_opt(validity.not_before.timestamp(), 0)
        .single();
    let valid_to = Utc.timestamp_opt(validity.not_after.timestamp(), 0).single();

    let serial_number = x509
        .serial_number()
        .to_bn()
        .and_then(|bn| bn.to_hex_str().map(|s| s.to_string()))
        .map_err(|e| CertError::invalid(format!("Bad serial number: {}", e)))?;

    let digest = |md: MessageDigest| {
        x509.digest(md)
            .map(|d| hex::encode(&*d))
            .map_err(|e| CertError::invalid(format!("Failed to digest certificate: {}", e)))
    };

    let subject = name_entries(parsed.subject())?;
    let issuer = name_entries(parsed.issuer())?;

    Ok(CertificateFields {
        version: x509.version() + 1,
        subject_name: name_map(&subject),
        subject_name_string: name_string(&subject),
        issuer_name: name_map(&issuer),
        issuer_name_string: name_string(&issuer),
        serial_number,
        valid_from,
        valid_to,
        sha1_digest: digest(MessageDigest::sha1())?,
        md5_digest: digest(MessageDigest::md5())?,
        basic_constraints,
        key_usage,
        extended_key_usage,
        subject_key_identifier,
        authority_key_identifier,
    })
}

fn key_usage_names(ku: &KeyUsage) -> Vec<String> {
    let bits = [
        ku.digital_signature(),
        ku.non_repudiation(),
        ku.key_encipherment(),
        ku.data_encipherment(),
        ku.key_agreement(),
        ku.key_cert_sign(),
        ku.crl_sign(),
        ku.encipher_only(),
        ku.decipher_only(),
    ];
    KEY_USAGE_NAMES
        .iter()
        .zip(bits)
        .filter(|(_, set)| *set)
        .map(|(name, _)| name.to_string())
        .collect()
}

fn extended_key_usage_names(eku: &ExtendedKeyUsage) -> Vec<String> {
    let known = [
        (eku.server_auth, "serverAuth"),
        (eku.client_auth, "clientAuth"),
        (eku.code_signing, "codeSigning"),
        (eku.email_protection, "emailProtection"),
        (eku.time_stamping, "timeStamping"),
        (eku.ocsp_signing, "OCSPSigning"),
        (eku.any, "anyExtendedKeyUsage"),
    ];
    known
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name.to_string())
        .chain(eku.other.iter().map(|oid| oid.to_id_string()))
        .collect()
}

fn serial_hex(bytes: &[u8]) -> String {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    if start == bytes.len() {
        return "0".to_string();
    }
    hex::encode_upper(&bytes[start..])
}

/// One attribute of a distinguished name, in encoding order
struct NameEntry {
    long_name: String,
    short_name: String,
    value: String,
}

fn name_entries(name: &X509Name<'_>) -> Result<Vec<NameEntry>, CertError> {
    name.iter_attributes()
        .map(|attr| -> Result<NameEntry, CertError> {
            let oid = attr.attr_type().to_id_string();
            let nid = Asn1Object::from_str(&oid).map_or(Nid::UNDEF, |obj| obj.nid());
            let (long_name, short_name) = match (nid.long_name(), nid.short_name()) {
                (Ok(long), Ok(short)) if nid != Nid::UNDEF => (long.to_string(), short.to_string()),
                _ => (oid.clone(), oid),
            };
            Ok(NameEntry {
                long_name,
                short_name,
                value: attribute_text(attr.attr_value())?,
            })
        })
        .collect()
}

/// Full decoded text of a name attribute; embedded NUL characters are rejected
fn attribute_text(value: &Any<'_>) -> Result<String, CertError> {
    let text = match value.header.tag() {
        Tag::BmpString => BmpString::try_from(value).ok().map(|s| s.string()),
        Tag::UniversalString => UniversalString::try_from(value).ok().map(|s| s.string()),
        // T.61 read as Latin-1
        Tag::TeletexString => Some(value.data.iter().map(|&b| char::from(b)).collect()),
        _ => std::str::from_utf8(value.data).ok().map(str::to_string),
    }
    .ok_or_else(|| CertError::invalid("certificate name has an undecodable value"))?;
    if text.contains('\0') {
        return Err(CertError::invalid(format!(
            "certificate name value {:?} contains a NUL character",
            text
        )));
    }
    Ok(text)
}

fn name_map(entries: &[NameEntry]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|entry| (entry.long_name.clone(), entry.value.clone()))
        .collect()
}

/// RFC 2253 one-line rendering: reverse RDN order, short names
fn name_string(entries: &[NameEntry]) -> String {
    entries
        .iter()
        .rev()
        .map(|entry| format!("{}={}", entry.short_name, escape_rdn_value(&entry.value)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let edge_space = c == ' ' && (i == 0 || i == last);
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';') || edge_space || (i == 0 && c == '#')
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
