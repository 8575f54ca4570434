//! Ordered, digest de-duplicated certificate collections
//!
//! [`CertificateSet`] is the one concrete container. Chains and the trust
//! store embed a set and expose it through [`CertificateCollection`], which
//! supplies the shared find / add / insert / erase behavior.

use crate::certificate::{Certificate, CertificateFields};
use std::collections::BTreeMap;

/// One field equality test used by [`CertificateCollection::find`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertPredicate {
    Sha1Digest(String),
    SubjectNameString(String),
    IssuerNameString(String),
    SubjectName(BTreeMap<String, String>),
    CommonName(String),
    SerialNumber(String),
    SubjectKeyIdentifier(String),
}

impl CertPredicate {
    /// A field the certificate does not carry never matches
    pub fn matches(&self, fields: &CertificateFields) -> bool {
        match self {
            CertPredicate::Sha1Digest(sha1) => fields.sha1_digest == *sha1,
            CertPredicate::SubjectNameString(name) => fields.subject_name_string == *name,
            CertPredicate::IssuerNameString(name) => fields.issuer_name_string == *name,
            CertPredicate::SubjectName(map) => fields.subject_name == *map,
            CertPredicate::CommonName(cn) => fields.common_name() == Some(cn.as_str()),
            CertPredicate::SerialNumber(serial) => fields.serial_number == *serial,
            CertPredicate::SubjectKeyIdentifier(ski) => {
                fields.subject_key_identifier.as_deref() == Some(ski.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSet {
    certs: Vec<Certificate>,
}

impl CertificateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[Certificate] {
        &self.certs
    }

    fn position_of(&self, sha1: &str) -> Option<usize> {
        self.certs.iter().position(|c| c.sha1() == sha1)
    }

    fn insert_unique(&mut self, position: usize, cert: Certificate) -> bool {
        if self.position_of(cert.sha1()).is_some() {
            return false;
        }
        let position = position.min(self.certs.len());
        self.certs.insert(position, cert);
        true
    }

    fn remove_at(&mut self, position: usize) -> Option<Certificate> {
        (position < self.certs.len()).then(|| self.certs.remove(position))
    }

    pub(crate) fn take_matching(&mut self, predicates: &[CertPredicate]) -> Option<Certificate> {
        let index = self.find(predicates)?;
        self.remove_at(index)
    }
}

impl FromIterator<Certificate> for CertificateSet {
    fn from_iter<I: IntoIterator<Item = Certificate>>(iter: I) -> Self {
        let mut set = CertificateSet::new();
        for cert in iter {
            set.add(cert);
        }
        set
    }
}

impl<'a> IntoIterator for &'a CertificateSet {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certs.iter()
    }
}

/// Shared behavior of every certificate container
pub trait CertificateCollection {
    fn certificates(&self) -> &CertificateSet;
    fn certificates_mut(&mut self) -> &mut CertificateSet;

    fn len(&self) -> usize {
        self.certificates().certs.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<&Certificate> {
        self.certificates().certs.get(index)
    }

    fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.certificates().certs.iter()
    }

    /// Index of the first certificate satisfying every predicate
    fn find(&self, predicates: &[CertPredicate]) -> Option<usize> {
        self.iter()
            .position(|cert| predicates.iter().all(|p| p.matches(cert.fields())))
    }

    fn find_cert(&self, predicates: &[CertPredicate]) -> Option<&Certificate> {
        self.find(predicates).and_then(|index| self.get(index))
    }

    fn contains(&self, cert: &Certificate) -> bool {
        self.certificates().position_of(cert.sha1()).is_some()
    }

    /// Appends `cert`; returns false when its digest is already present
    fn add(&mut self, cert: Certificate) -> bool {
        let len = self.len();
        self.insert(len, cert)
    }

    /// Inserts at `position` (clamped to the length) unless the digest is present
    fn insert(&mut self, position: usize, cert: Certificate) -> bool {
        self.certificates_mut().insert_unique(position, cert)
    }

    fn erase(&mut self, position: usize) -> Option<Certificate> {
        self.certificates_mut().remove_at(position)
    }
}

impl CertificateCollection for CertificateSet {
    fn certificates(&self) -> &CertificateSet {
        self
    }

    fn certificates_mut(&mut self) -> &mut CertificateSet {
        self
    }
}
