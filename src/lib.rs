//! PKI Trust - X.509 certificate trust engine
//!
//! Decides whether a server's certificate chain is trustworthy and keeps the
//! secrets a client needs between runs.
//!
//! # Overview
//!
//! ```text
//! peer chain (leaf first) ──► CertificateChain ──► CertificateStore::validate
//!                                                     │  policy checks per certificate
//!                                                     │  signature of each link
//!                                                     └► trust anchor (bundled + user PEM)
//!
//! Credential ◄──► ProtectedStore (AES-256-GCM file keyed by the machine id)
//! ```
//!
//! [`sec_handler::SecHandler`] ties both halves together and is what an
//! application normally holds.
//!
//! # Example
//!
//! ```no_run
//! use pki_trust::chain::CertificateChain;
//! use pki_trust::configs::AppConfig;
//! use pki_trust::sec_handler::SecHandler;
//! use pki_trust::validation::{ValidationParams, ValidationPolicy};
//!
//! fn check(peer_pem: &str) -> anyhow::Result<()> {
//!     let sec = SecHandler::init(AppConfig::load()?)?;
//!     let chain = CertificateChain::from_pem_bundle(peer_pem);
//!     let params = ValidationParams::new().with_hostname("login.agni.example.com");
//!     sec.validate_chain(ValidationPolicy::SSL, &chain, &params)?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`certificate`]: parsed certificate and its field record
//! - [`cert_set`], [`chain`], [`cert_store`]: de-duplicated certificate collections
//! - [`validation`]: policies and the chain walk
//! - [`hostname`]: wildcard common-name matching
//! - [`protected_store`], [`encryption`], [`machine_id`]: encrypted secret storage
//! - [`credential`]: login credentials and the legacy password file
//! - [`configs`]: TOML configuration
//!
//! # Error Handling
//!
//! Library operations return the `thiserror` enums in [`error`]; certificate
//! errors carry the field record of the certificate at fault.

pub mod cert_set;
pub mod cert_store;
pub mod certificate;
pub mod chain;
pub mod configs;
pub mod credential;
pub mod encryption;
pub mod error;
pub mod hostname;
pub mod machine_id;
pub mod protected_store;
pub mod sec_handler;
pub mod storage;
pub mod validation;

#[cfg(test)]
mod pki_generator;

pub use certificate::Certificate;
pub use error::{CertError, Error};
pub use sec_handler::SecHandler;
