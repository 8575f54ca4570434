//! Process-wide security context
//!
//! [`SecHandler`] owns the trust store and the protected store and is the
//! entry point for certificate validation, protected data and credentials.
//! It is `Send + Sync`; share it behind an `Arc`.

use crate::cert_store::CertificateStore;
use crate::certificate::Certificate;
use crate::chain::CertificateChain;
use crate::configs::AppConfig;
use crate::credential::{load_legacy_password, Credential, CREDENTIAL_DATA_TYPE};
use crate::error::{CertError, Result};
use crate::machine_id::MachineId;
use crate::protected_store::ProtectedStore;
use crate::validation::{ValidationParams, ValidationPolicy};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct SecHandler {
    config: AppConfig,
    machine: Arc<MachineId>,
    store: Arc<Mutex<CertificateStore>>,
    protected: Mutex<ProtectedStore>,
}

impl SecHandler {
    /// Opens both stores, taking the machine id from the configuration or the host
    pub fn init(config: AppConfig) -> Result<Self> {
        let machine = match config.machine.id.as_deref() {
            Some(hex) => MachineId::from_hex(hex)?,
            None => MachineId::detect()?,
        };
        let legacy = config
            .machine
            .legacy_id
            .as_deref()
            .map(MachineId::from_hex)
            .transpose()?;
        Self::with_machine_id(config, machine, legacy)
    }

    pub fn with_machine_id(
        config: AppConfig,
        machine: MachineId,
        legacy: Option<MachineId>,
    ) -> Result<Self> {
        let machine = Arc::new(machine);
        let store =
            CertificateStore::open(&config.paths.app_ca_bundle, &config.paths.user_ca_store)?;
        let protected = ProtectedStore::open_with_fallback(
            config.paths.protected_data.clone(),
            machine.clone(),
            legacy.as_ref(),
        )?;
        info!(
            "Security handler ready (trust store {}, protected data {})",
            config.paths.user_ca_store.display(),
            config.paths.protected_data.display()
        );
        Ok(Self {
            config,
            machine,
            store: Arc::new(Mutex::new(store)),
            protected: Mutex::new(protected),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Parses PEM text or DER bytes
    pub fn get_certificate(&self, data: &[u8]) -> std::result::Result<Certificate, CertError> {
        let is_pem = data
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map_or(false, |start| data[start..].starts_with(b"-----BEGIN"));
        if is_pem {
            let text = std::str::from_utf8(data)
                .map_err(|e| CertError::invalid(format!("PEM is not valid UTF-8: {}", e)))?;
            Certificate::from_pem(text.trim_start())
        } else {
            Certificate::from_der(data)
        }
    }

    /// The trust store; every id names the same store
    pub fn certificate_store(&self, store_id: &str) -> Arc<Mutex<CertificateStore>> {
        debug!("Certificate store '{}' requested", store_id);
        self.store.clone()
    }

    pub fn validate_chain(
        &self,
        policy: ValidationPolicy,
        chain: &CertificateChain,
        params: &ValidationParams,
    ) -> std::result::Result<(), CertError> {
        if self.config.validation.no_verify_ssl_cert {
            warn!("Certificate verification is disabled; accepting chain unchecked");
            return Ok(());
        }
        self.store.lock().validate(policy, chain, params)
    }

    pub fn protected_data(&self, data_type: &str, data_id: &str) -> Option<Value> {
        self.protected.lock().get(data_type, data_id)
    }

    pub fn set_protected_data(&self, data_type: &str, data_id: &str, value: Value) {
        self.protected.lock().set(data_type, data_id, value);
    }

    pub fn delete_protected_data(&self, data_type: &str, data_id: &str) {
        self.protected.lock().delete(data_type, data_id);
    }

    pub fn save_protected_data(&self) -> std::result::Result<(), crate::error::ProtectedDataError> {
        self.protected.lock().save()
    }

    fn write_protected(protected: &mut ProtectedStore) {
        if let Err(e) = protected.save() {
            warn!("Failed to save protected data: {}", e);
        }
    }

    pub fn create_credential(
        &self,
        grid: &str,
        identifier: Value,
        authenticator: Value,
    ) -> Credential {
        Credential::with_data(grid, identifier, authenticator)
    }

    /// Stored credential for `grid`, else the legacy login, else an empty one
    pub fn load_credential(&self, grid: &str) -> Credential {
        if let Some(stored) = self.protected_data(CREDENTIAL_DATA_TYPE, grid) {
            if let Some(credential) = Credential::from_stored(grid, &stored) {
                return credential;
            }
        }

        let legacy = &self.config.legacy_login;
        if !legacy.first_name.is_empty() && !legacy.last_name.is_empty() {
            debug!("Using legacy login for {}", grid);
            let password = load_legacy_password(&self.config.paths.legacy_password, &self.machine);
            return Credential::agent(
                grid,
                &legacy.first_name,
                &legacy.last_name,
                password.as_deref(),
            );
        }
        Credential::new(grid)
    }

    pub fn save_credential(&self, credential: &Credential, save_authenticator: bool) {
        let mut protected = self.protected.lock();
        protected.set(
            CREDENTIAL_DATA_TYPE,
            credential.grid(),
            credential.to_stored(save_authenticator),
        );
        Self::write_protected(&mut protected);
    }

    pub fn delete_credential(&self, credential: &mut Credential) {
        let mut protected = self.protected.lock();
        protected.delete(CREDENTIAL_DATA_TYPE, credential.grid());
        credential.clear();
        Self::write_protected(&mut protected);
    }

    /// Remembers `credential` among the users of its grid under `storage`
    pub fn add_to_credential_map(
        &self,
        storage: &str,
        credential: &Credential,
        save_authenticator: bool,
    ) {
        let mut protected = self.protected.lock();
        protected.add_to_map(
            storage,
            credential.grid(),
            &credential.user_id(),
            credential.to_stored(save_authenticator),
        );
        Self::write_protected(&mut protected);
    }

    pub fn load_credential_map(&self, storage: &str, grid: &str) -> BTreeMap<String, Credential> {
        let Some(Value::Object(users)) = self.protected_data(storage, grid) else {
            return BTreeMap::new();
        };
        users
            .iter()
            .filter_map(|(user_id, stored)| {
                Credential::from_stored(grid, stored).map(|cred| (user_id.clone(), cred))
            })
            .collect()
    }

    /// Remembered credential of `user_id`, or an empty one
    pub fn load_from_credential_map(&self, storage: &str, grid: &str, user_id: &str) -> Credential {
        self.load_credential_map(storage, grid)
            .remove(user_id)
            .unwrap_or_else(|| Credential::new(grid))
    }

    pub fn remove_from_credential_map(&self, storage: &str, grid: &str, user_id: &str) {
        let mut protected = self.protected.lock();
        if protected.remove_from_map(storage, grid, user_id).is_some() {
            Self::write_protected(&mut protected);
        }
    }

    pub fn has_credential_map(&self, storage: &str, grid: &str) -> bool {
        matches!(
            self.protected_data(storage, grid),
            Some(Value::Object(users)) if !users.is_empty()
        )
    }

    pub fn remove_credential_map(&self, storage: &str, grid: &str) {
        let mut protected = self.protected.lock();
        if protected.delete(storage, grid).is_some() {
            Self::write_protected(&mut protected);
        }
    }
}
