//! Chain validation against a trust store
//!
//! A chain is walked from the leaf toward the root. Each certificate is
//! checked against the requested [`ValidationPolicy`] and against the
//! signature of the certificate below it. The walk succeeds at the first
//! certificate that is itself a trust anchor, or that was issued by one.
//! Successful leaves are remembered in the store's validation cache together
//! with their validity window.

use crate::cert_set::{CertPredicate, CertificateCollection};
use crate::cert_store::CertificateStore;
use crate::certificate::{
    Certificate, EKU_SERVER_AUTH, KU_CERT_SIGNING, KU_DIGITAL_SIGNATURE, KU_KEY_ENCIPHERMENT,
};
use crate::chain::CertificateChain;
use crate::error::{cert_data, CertError};
use crate::hostname::wildcard_match;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

/// Combinable set of checks applied during validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValidationPolicy(u32);

impl ValidationPolicy {
    pub const NONE: Self = Self(0);
    pub const TIME: Self = Self(0x01);
    pub const TRUSTED: Self = Self(0x02);
    pub const HOSTNAME: Self = Self(0x04);
    pub const SSL_KEY_USAGE: Self = Self(0x08);
    pub const CA_BASIC_CONSTRAINTS: Self = Self(0x10);
    pub const CA_KEY_USAGE: Self = Self(0x20);
    pub const SSL: Self = Self(0x3f);

    const NAMES: [(&'static str, Self); 6] = [
        ("time", Self::TIME),
        ("trusted", Self::TRUSTED),
        ("hostname", Self::HOSTNAME),
        ("ssl_key_usage", Self::SSL_KEY_USAGE),
        ("ca_basic_constraints", Self::CA_BASIC_CONSTRAINTS),
        ("ca_key_usage", Self::CA_KEY_USAGE),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ValidationPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValidationPolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ValidationPolicy {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl FromStr for ValidationPolicy {
    type Err = String;

    /// Parses `ssl`, `none` or a `,`/`|` separated list of check names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut policy = Self::NONE;
        for name in s.split(|c| c == ',' || c == '|').map(str::trim) {
            policy |= match name.to_ascii_lowercase().as_str() {
                "" | "none" => Self::NONE,
                "ssl" => Self::SSL,
                other => Self::NAMES
                    .iter()
                    .find(|(n, _)| *n == other)
                    .map(|(_, p)| *p)
                    .ok_or_else(|| format!("unknown validation policy '{}'", name))?,
            };
        }
        Ok(policy)
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, p)| self.contains(*p))
            .map(|(n, _)| *n)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Inputs of a validation call besides the policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationParams {
    pub hostname: Option<String>,
    /// Defaults to the current time
    pub validation_date: Option<DateTime<Utc>>,
}

impl ValidationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn at(mut self, date: DateTime<Utc>) -> Self {
        self.validation_date = Some(date);
        self
    }
}

/// Checks one certificate at `depth` (0 = leaf) against `policy`
pub fn validate_cert(
    policy: ValidationPolicy,
    cert: &Certificate,
    params: &ValidationParams,
    depth: usize,
) -> Result<(), CertError> {
    let date = params.validation_date.unwrap_or_else(Utc::now);
    check_cert(policy, cert, params.hostname.as_deref(), date, depth)
}

fn check_cert(
    policy: ValidationPolicy,
    cert: &Certificate,
    hostname: Option<&str>,
    date: DateTime<Utc>,
    depth: usize,
) -> Result<(), CertError> {
    let fields = cert.fields();
    if fields.subject_name.is_empty() {
        return Err(CertError::invalid_cert("certificate has no subject name", cert));
    }
    if fields.issuer_name.is_empty() {
        return Err(CertError::invalid_cert("certificate has no issuer name", cert));
    }
    let (Some(valid_from), Some(valid_to)) = (fields.valid_from, fields.valid_to) else {
        return Err(CertError::invalid_cert("certificate has no validity window", cert));
    };
    if fields.sha1_digest.is_empty() {
        return Err(CertError::invalid_cert("certificate has no digest", cert));
    }

    if policy.contains(ValidationPolicy::TIME) && (date < valid_from || date > valid_to) {
        return Err(CertError::ValidationExpiration {
            date,
            cert: cert_data(cert),
        });
    }

    if policy.contains(ValidationPolicy::SSL_KEY_USAGE) {
        let key_usage_ok = fields.key_usage.is_none()
            || (fields.has_key_usage(KU_DIGITAL_SIGNATURE)
                && fields.has_key_usage(KU_KEY_ENCIPHERMENT));
        let ext_key_usage_ok =
            fields.extended_key_usage.is_none() || fields.has_extended_key_usage(EKU_SERVER_AUTH);
        if !key_usage_ok || !ext_key_usage_ok {
            return Err(CertError::KeyUsage {
                cert: cert_data(cert),
            });
        }
    }

    if policy.contains(ValidationPolicy::CA_KEY_USAGE)
        && fields.key_usage.is_some()
        && !fields.has_key_usage(KU_CERT_SIGNING)
    {
        return Err(CertError::KeyUsage {
            cert: cert_data(cert),
        });
    }

    if policy.contains(ValidationPolicy::CA_BASIC_CONSTRAINTS) {
        if let Some(bc) = &fields.basic_constraints {
            let path_ok = match bc.path_len {
                Some(len) if len > 0 => depth <= len as usize,
                _ => true,
            };
            if !bc.ca || !path_ok {
                return Err(CertError::BasicConstraints {
                    cert: cert_data(cert),
                });
            }
        }
    }

    if policy.contains(ValidationPolicy::HOSTNAME) {
        let hostname = hostname.ok_or_else(|| CertError::Validation {
            message: "no hostname to validate against".to_string(),
            cert: cert_data(cert),
        })?;
        let common_name = fields
            .common_name()
            .ok_or_else(|| CertError::invalid_cert("certificate has no common name", cert))?;
        if !wildcard_match(hostname, common_name) {
            return Err(CertError::ValidationHostname {
                hostname: hostname.to_string(),
                cert: cert_data(cert),
            });
        }
    }

    Ok(())
}

/// Trust anchor lookup key for the issuer of `cert`
fn issuer_predicates(cert: &Certificate) -> Vec<CertPredicate> {
    let fields = cert.fields();
    let mut predicates = vec![CertPredicate::SubjectNameString(
        fields.issuer_name_string.clone(),
    )];
    if let Some(aki) = &fields.authority_key_identifier {
        if let Some(key_id) = &aki.key_id {
            predicates.push(CertPredicate::SubjectKeyIdentifier(key_id.clone()));
        }
        if let Some(serial) = &aki.serial {
            predicates.push(CertPredicate::SerialNumber(serial.clone()));
        }
    }
    predicates
}

/// Validates `chain` (leaf first) against the anchors in `store`
pub fn validate_chain(
    store: &mut CertificateStore,
    policy: ValidationPolicy,
    chain: &CertificateChain,
    params: &ValidationParams,
) -> Result<(), CertError> {
    let leaf = chain.leaf().ok_or_else(|| CertError::Validation {
        message: "no certificates in chain".to_string(),
        cert: None,
    })?;
    let date = params.validation_date.unwrap_or_else(Utc::now);

    if policy.contains(ValidationPolicy::HOSTNAME) {
        let hostname = params.hostname.as_deref().ok_or_else(|| CertError::Validation {
            message: "no hostname to validate against".to_string(),
            cert: cert_data(leaf),
        })?;
        check_cert(ValidationPolicy::HOSTNAME, leaf, Some(hostname), date, 0)
            .map_err(|e| log_failure(leaf, e))?;
    }

    if let Some(entry) = store.cached_validation(leaf.sha1(), policy) {
        if policy.contains(ValidationPolicy::TIME)
            && (date < entry.valid_from || date > entry.valid_to)
        {
            return Err(log_failure(
                leaf,
                CertError::ValidationExpiration {
                    date,
                    cert: cert_data(leaf),
                },
            ));
        }
        debug!("Validation cache hit for {}", leaf.sha1());
        return Ok(());
    }

    let walk_policy = policy.without(ValidationPolicy::HOSTNAME);
    let mut previous: Option<&Certificate> = None;
    for (depth, current) in chain.iter().enumerate() {
        let cert_policy = if depth == 0 {
            walk_policy
                .without(ValidationPolicy::CA_KEY_USAGE)
                .without(ValidationPolicy::CA_BASIC_CONSTRAINTS)
        } else {
            walk_policy.without(ValidationPolicy::SSL_KEY_USAGE)
        };

        if let Some(child) = previous {
            if !child.is_signed_by(current) {
                return Err(log_failure(
                    child,
                    CertError::InvalidSignature {
                        cert: cert_data(child),
                    },
                ));
            }
        }

        check_cert(cert_policy, current, None, date, depth).map_err(|e| log_failure(current, e))?;

        if store.contains(current) {
            debug!("{} is a trust anchor", current);
            store.cache_validation(leaf, policy);
            return Ok(());
        }

        if let Some(anchor) = store.find_cert(&issuer_predicates(current)).cloned() {
            check_cert(
                policy & ValidationPolicy::CA_BASIC_CONSTRAINTS,
                &anchor,
                None,
                date,
                depth,
            )
            .map_err(|e| log_failure(&anchor, e))?;
            if !current.is_signed_by(&anchor) {
                return Err(log_failure(
                    current,
                    CertError::InvalidSignature {
                        cert: cert_data(current),
                    },
                ));
            }
            debug!("{} issued by trust anchor {}", current, anchor);
            store.cache_validation(leaf, policy);
            return Ok(());
        }

        previous = Some(current);
    }

    if policy.contains(ValidationPolicy::TRUSTED) {
        let last = previous.unwrap_or(leaf);
        return Err(log_failure(
            last,
            CertError::ValidationTrust {
                cert: cert_data(last),
            },
        ));
    }
    store.cache_validation(leaf, policy);
    Ok(())
}

fn log_failure(cert: &Certificate, error: CertError) -> CertError {
    warn!("Certificate validation failed for {}: {}", cert, error);
    error
}
