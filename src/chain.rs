//! Peer certificate chains, leaf first

use crate::cert_set::{CertPredicate, CertificateCollection, CertificateSet};
use crate::certificate::{parse_pem_bundle, Certificate};
use log::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain {
    certs: CertificateSet,
}

impl CertificateChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain in the given order; duplicates are dropped
    pub fn from_certificates(certs: impl IntoIterator<Item = Certificate>) -> Self {
        Self {
            certs: certs.into_iter().collect(),
        }
    }

    /// Every certificate of a PEM bundle, in file order
    pub fn from_pem_bundle(text: &str) -> Self {
        Self::from_certificates(parse_pem_bundle(text))
    }

    /// Walks issuer links from `leaf` through the `untrusted` pool
    ///
    /// A parent is the pool entry whose subject equals the current issuer and,
    /// when the current certificate names an authority key id, whose subject
    /// key identifier equals it. Each parent is taken out of the pool, so the
    /// walk ends at a self-signed certificate or when no parent is found.
    pub fn from_untrusted(leaf: Certificate, untrusted: &CertificateSet) -> Self {
        let mut pool = untrusted.clone();
        pool.take_matching(&[CertPredicate::Sha1Digest(leaf.sha1().to_string())]);

        let mut certs = CertificateSet::new();
        certs.add(leaf.clone());
        let mut current = leaf;
        loop {
            let fields = current.fields();
            let mut predicates = vec![CertPredicate::SubjectNameString(
                fields.issuer_name_string.clone(),
            )];
            if let Some(key_id) = fields
                .authority_key_identifier
                .as_ref()
                .and_then(|aki| aki.key_id.clone())
            {
                predicates.push(CertPredicate::SubjectKeyIdentifier(key_id));
            }
            let Some(parent) = pool.take_matching(&predicates) else {
                break;
            };
            debug!("Chain: {} issued by {}", current, parent);
            if !certs.add(parent.clone()) {
                break;
            }
            current = parent;
        }
        Self { certs }
    }

    pub fn leaf(&self) -> Option<&Certificate> {
        self.get(0)
    }
}

impl CertificateCollection for CertificateChain {
    fn certificates(&self) -> &CertificateSet {
        &self.certs
    }

    fn certificates_mut(&mut self) -> &mut CertificateSet {
        &mut self.certs
    }
}
