//! Persisted trust anchor store with a validation cache
//!
//! The store is a [`CertificateSet`] of trust anchors backed by a PEM file.
//! It is opened from the read-only application bundle merged with the
//! user's writable file and saved to the writable file only.

use crate::cert_set::{CertificateCollection, CertificateSet};
use crate::certificate::{parse_pem_bundle, Certificate};
use crate::chain::CertificateChain;
use crate::error::{CertError, StoreError};
use crate::storage::{read_optional, write_atomic};
use crate::validation::{validate_chain, ValidationParams, ValidationPolicy};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Cached outcome of a successful validation of one leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedValidation {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub policy: ValidationPolicy,
}

#[derive(Debug, Default)]
pub struct CertificateStore {
    certs: CertificateSet,
    path: Option<PathBuf>,
    cache: HashMap<String, CachedValidation>,
}

impl CertificateStore {
    /// Empty store without a backing file
    pub fn new() -> Self {
        Self::default()
    }

    fn read_bundle(path: &Path) -> Result<Vec<Certificate>, StoreError> {
        let bytes = read_optional(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let Some(bytes) = bytes else {
            debug!("Trust store {} does not exist", path.display());
            return Ok(Vec::new());
        };
        Ok(parse_pem_bundle(&String::from_utf8_lossy(&bytes)))
    }

    /// Every certificate in the PEM file at `path`; a missing file gives an empty store
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let certs = Self::read_bundle(path)?.into_iter().collect();
        Ok(Self {
            certs,
            path: Some(path.to_path_buf()),
            cache: HashMap::new(),
        })
    }

    /// Bundled anchors from `default_path` plus the user's additions from `user_path`
    pub fn open(default_path: impl AsRef<Path>, user_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut store = Self::load(user_path)?;
        let mut merged: CertificateSet = Self::read_bundle(default_path.as_ref())?
            .into_iter()
            .collect();
        let bundled_count = merged.len();
        for cert in store.certs.iter() {
            merged.add(cert.clone());
        }
        store.certs = merged;
        info!(
            "Trust store opened with {} certificates ({} bundled)",
            store.len(),
            bundled_count
        );
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes every certificate as PEM to the backing file
    pub fn save(&self) -> Result<(), StoreError> {
        let path = self.path.as_deref().ok_or(StoreError::NoBackingFile)?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        let pem: String = self
            .iter()
            .map(|cert| {
                let mut block = cert.pem().trim_end().to_string();
                block.push('\n');
                block
            })
            .collect();
        write_atomic(path, pem.as_bytes()).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved {} certificates to {}", self.len(), path.display());
        Ok(())
    }

    pub fn validate(
        &mut self,
        policy: ValidationPolicy,
        chain: &CertificateChain,
        params: &ValidationParams,
    ) -> Result<(), CertError> {
        validate_chain(self, policy, chain, params)
    }

    pub fn clear_validation_cache(&mut self) {
        self.cache.clear();
    }

    pub fn is_cached(&self, sha1: &str) -> bool {
        self.cache.contains_key(sha1)
    }

    /// Cache entry usable for `policy`: it must have covered every structural check asked for
    pub(crate) fn cached_validation(
        &self,
        sha1: &str,
        policy: ValidationPolicy,
    ) -> Option<CachedValidation> {
        let required = policy
            .without(ValidationPolicy::TIME)
            .without(ValidationPolicy::HOSTNAME);
        self.cache
            .get(sha1)
            .filter(|entry| entry.policy.contains(required))
            .copied()
    }

    pub(crate) fn cache_validation(&mut self, leaf: &Certificate, policy: ValidationPolicy) {
        let fields = leaf.fields();
        if let (Some(valid_from), Some(valid_to)) = (fields.valid_from, fields.valid_to) {
            self.cache.insert(
                leaf.sha1().to_string(),
                CachedValidation {
                    valid_from,
                    valid_to,
                    policy,
                },
            );
        }
    }
}

impl CertificateCollection for CertificateStore {
    fn certificates(&self) -> &CertificateSet {
        &self.certs
    }

    fn certificates_mut(&mut self) -> &mut CertificateSet {
        &mut self.certs
    }
}
