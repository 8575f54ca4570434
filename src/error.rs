//! Error types for the trust engine
//!
//! Certificate errors carry the structured field record of the offending
//! certificate so callers can show diagnostics or decide whether a policy
//! violation is fatal. Protected data and trust store errors cover the two
//! persisted files.

use crate::certificate::{Certificate, CertificateFields};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Field record attached to a certificate error, when one is available
pub type CertData = Option<Box<CertificateFields>>;

#[derive(Error, Debug, Clone)]
pub enum CertError {
    #[error("invalid certificate: {reason}")]
    InvalidCertificate { reason: String, cert: CertData },

    #[error("certificate chain does not lead to a trusted certificate")]
    ValidationTrust { cert: CertData },

    #[error("certificate does not match hostname {hostname}")]
    ValidationHostname { hostname: String, cert: CertData },

    #[error("certificate is not valid at {date}")]
    ValidationExpiration { date: DateTime<Utc>, cert: CertData },

    #[error("certificate key usage does not permit this use")]
    KeyUsage { cert: CertData },

    #[error("certificate basic constraints violated")]
    BasicConstraints { cert: CertData },

    #[error("certificate signature is not valid for its issuer")]
    InvalidSignature { cert: CertData },

    #[error("certificate validation failed: {message}")]
    Validation { message: String, cert: CertData },
}

impl CertError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CertError::InvalidCertificate {
            reason: reason.into(),
            cert: None,
        }
    }

    pub(crate) fn invalid_cert(reason: impl Into<String>, cert: &Certificate) -> Self {
        CertError::InvalidCertificate {
            reason: reason.into(),
            cert: cert_data(cert),
        }
    }

    /// Field record of the certificate that caused the error
    pub fn cert_data(&self) -> Option<&CertificateFields> {
        let data = match self {
            CertError::InvalidCertificate { cert, .. }
            | CertError::ValidationTrust { cert }
            | CertError::ValidationHostname { cert, .. }
            | CertError::ValidationExpiration { cert, .. }
            | CertError::KeyUsage { cert }
            | CertError::BasicConstraints { cert }
            | CertError::InvalidSignature { cert }
            | CertError::Validation { cert, .. } => cert,
        };
        data.as_deref()
    }
}

pub(crate) fn cert_data(cert: &Certificate) -> CertData {
    Some(Box::new(cert.fields().clone()))
}

#[derive(Error, Debug)]
pub enum ProtectedDataError {
    #[error("protected data I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("protected data file is too short ({0} bytes)")]
    TooShort(usize),

    #[error("protected data file has an unrecognized format")]
    UnknownFormat,

    #[error("protected data cannot be decrypted")]
    Decrypt,

    #[error("protected data cannot be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("machine identifier unavailable: {0}")]
    MachineId(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("trust store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trust store has no backing file")]
    NoBackingFile,
}

/// Aggregate error returned by [`crate::sec_handler::SecHandler`]
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Certificate(#[from] CertError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ProtectedData(#[from] ProtectedDataError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
