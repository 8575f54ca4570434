//! Login credentials kept in the protected store
//!
//! A credential pairs an identifier (who) with an authenticator (the secret)
//! for one grid. Both are free-form JSON documents; the identifier `type`
//! field selects how the user id and login parameters are derived.

use crate::machine_id::MachineId;
use crate::storage::read_optional;
use log::{debug, warn};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;

pub const CREDENTIAL_DATA_TYPE: &str = "credential";
pub const IDENTIFIER_TYPE_AGENT: &str = "agent";
pub const IDENTIFIER_TYPE_ACCOUNT: &str = "account";
pub const AUTHENTICATOR_TYPE_HASH: &str = "hash";
pub const LEGACY_PASSWORD_LEN: usize = 32;

#[derive(Clone, PartialEq)]
pub struct Credential {
    grid: String,
    identifier: Value,
    authenticator: Value,
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

impl Credential {
    /// Credential with empty identifier and authenticator maps
    pub fn new(grid: impl Into<String>) -> Self {
        Self::with_data(
            grid,
            Value::Object(Map::new()),
            Value::Object(Map::new()),
        )
    }

    pub fn with_data(grid: impl Into<String>, identifier: Value, authenticator: Value) -> Self {
        Self {
            grid: grid.into(),
            identifier,
            authenticator,
        }
    }

    /// Agent identifier, with an md5 hash authenticator when `hashed_password` is set
    pub fn agent(
        grid: impl Into<String>,
        first_name: &str,
        last_name: &str,
        hashed_password: Option<&str>,
    ) -> Self {
        let identifier = json!({
            "type": IDENTIFIER_TYPE_AGENT,
            "first_name": first_name,
            "last_name": last_name,
        });
        let authenticator = hashed_password.map_or(Value::Null, |secret| {
            json!({
                "type": AUTHENTICATOR_TYPE_HASH,
                "algorithm": "md5",
                "secret": secret,
            })
        });
        Self::with_data(grid, identifier, authenticator)
    }

    pub fn grid(&self) -> &str {
        &self.grid
    }

    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    pub fn authenticator(&self) -> &Value {
        &self.authenticator
    }

    /// Drops identifier and authenticator
    pub fn clear(&mut self) {
        self.identifier = Value::Null;
        self.authenticator = Value::Null;
    }

    fn identifier_type(&self) -> Option<&str> {
        self.identifier.get("type").and_then(Value::as_str)
    }

    /// Stable lower-case key for this user on its grid
    pub fn user_id(&self) -> String {
        if !self.identifier.is_object() {
            return format!("{}(null)", self.grid);
        }
        match self.identifier_type() {
            Some(IDENTIFIER_TYPE_AGENT) => format!(
                "{}_{}",
                text(&self.identifier, "first_name"),
                text(&self.identifier, "last_name")
            )
            .to_lowercase(),
            Some(IDENTIFIER_TYPE_ACCOUNT) => text(&self.identifier, "account_name").to_lowercase(),
            _ => "unknown".to_string(),
        }
    }

    /// `grid:` followed by a display name for the identifier
    pub fn as_string(&self) -> String {
        if !self.identifier.is_object() {
            return format!("{}:(null)", self.grid);
        }
        match self.identifier_type() {
            Some(IDENTIFIER_TYPE_AGENT) => format!(
                "{}:{} {}",
                self.grid,
                text(&self.identifier, "first_name"),
                text(&self.identifier, "last_name")
            ),
            Some(IDENTIFIER_TYPE_ACCOUNT) => {
                format!("{}:{}", self.grid, text(&self.identifier, "account_name"))
            }
            _ => format!("{}:(unknown type)", self.grid),
        }
    }

    /// Parameters for a login request
    pub fn login_params(&self) -> Value {
        let secret = self.authenticator.get("secret").and_then(Value::as_str);
        let mut params = Map::new();
        match self.identifier_type() {
            Some(IDENTIFIER_TYPE_AGENT) => {
                params.insert("first".into(), json!(text(&self.identifier, "first_name")));
                params.insert("last".into(), json!(text(&self.identifier, "last_name")));
                if let Some(secret) = secret {
                    params.insert("passwd".into(), json!(format!("$1${}", secret)));
                }
            }
            Some(IDENTIFIER_TYPE_ACCOUNT) => {
                params.insert(
                    "username".into(),
                    json!(text(&self.identifier, "account_name")),
                );
                if let Some(secret) = secret {
                    params.insert("passwd".into(), json!(secret));
                }
            }
            _ => {}
        }
        Value::Object(params)
    }

    pub(crate) fn to_stored(&self, save_authenticator: bool) -> Value {
        let mut stored = Map::new();
        stored.insert("identifier".into(), self.identifier.clone());
        if save_authenticator {
            stored.insert("authenticator".into(), self.authenticator.clone());
        }
        Value::Object(stored)
    }

    /// Rebuilds a credential from its stored form; `None` without an identifier
    pub(crate) fn from_stored(grid: &str, stored: &Value) -> Option<Self> {
        let identifier = stored.get("identifier")?.clone();
        let authenticator = stored.get("authenticator").cloned().unwrap_or(Value::Null);
        Some(Self::with_data(grid, identifier, authenticator))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authenticator = if self.authenticator.is_null() {
            "<none>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Credential")
            .field("grid", &self.grid)
            .field("identifier", &self.identifier)
            .field("authenticator", &authenticator)
            .finish()
    }
}

/// Reads the fixed-size, machine-id obfuscated password file of older installs
pub fn load_legacy_password(path: &Path, machine: &MachineId) -> Option<String> {
    let mut bytes = match read_optional(path) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read legacy password file {}: {}", path.display(), e);
            return None;
        }
    };
    if bytes.len() != LEGACY_PASSWORD_LEN {
        debug!(
            "Ignoring legacy password file of {} bytes",
            bytes.len()
        );
        return None;
    }
    machine.xor_in_place(&mut bytes);
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::fs;

    const LEGACY_PASSWORD_FIXTURE: &str = "fSQcLG03eyIWJmkzfyYaKm81dSweLmsxeSAYKGE7fSQ=";
    const LEGACY_MACHINE_ID: [u8; 6] = [77, 21, 46, 31, 89, 2];

    #[test]
    fn test_agent_credential() {
        let cred = Credential::agent("my_grid", "Test", "Resident", Some("abcdef"));
        assert_eq!(cred.user_id(), "test_resident");
        assert_eq!(cred.as_string(), "my_grid:Test Resident");
        assert_eq!(cred.to_string(), "my_grid:Test Resident");
        assert_eq!(
            cred.login_params(),
            json!({"first": "Test", "last": "Resident", "passwd": "$1$abcdef"})
        );
    }

    #[test]
    fn test_account_credential() {
        let cred = Credential::with_data(
            "my_grid",
            json!({"type": "account", "account_name": "FooBar"}),
            json!({"type": "password", "secret": "hunter2"}),
        );
        assert_eq!(cred.user_id(), "foobar");
        assert_eq!(cred.as_string(), "my_grid:FooBar");
        assert_eq!(
            cred.login_params(),
            json!({"username": "FooBar", "passwd": "hunter2"})
        );
    }

    #[test]
    fn test_unknown_and_null_identifiers() {
        let mut cred = Credential::new("my_grid");
        assert_eq!(cred.user_id(), "unknown");
        assert_eq!(cred.as_string(), "my_grid:(unknown type)");
        assert_eq!(cred.login_params(), json!({}));

        cred.clear();
        assert!(cred.identifier().is_null());
        assert!(cred.authenticator().is_null());
        assert_eq!(cred.user_id(), "my_grid(null)");
        assert_eq!(cred.as_string(), "my_grid:(null)");
    }

    #[test]
    fn test_stored_form() {
        let cred = Credential::agent("my_grid", "Test", "Resident", Some("abcdef"));
        let without = cred.to_stored(false);
        assert!(without.get("authenticator").is_none());
        let restored = Credential::from_stored("my_grid", &without).unwrap();
        assert_eq!(restored.identifier(), cred.identifier());
        assert!(restored.authenticator().is_null());

        let with = Credential::from_stored("my_grid", &cred.to_stored(true)).unwrap();
        assert_eq!(with, cred);
        assert!(Credential::from_stored("my_grid", &json!({"other": 1})).is_none());
    }

    #[test]
    fn test_debug_no_leak() {
        let cred = Credential::agent("my_grid", "Test", "Resident", Some("abcdef"));
        let debug_str = format!("{:?}", cred);
        assert!(!debug_str.contains("abcdef"));
        assert!(debug_str.contains("redacted"));
    }

    #[test]
    fn test_legacy_password_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("password.dat");
        let machine = MachineId::from_bytes(LEGACY_MACHINE_ID.to_vec()).unwrap();
        assert_eq!(load_legacy_password(&path, &machine), None);

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(LEGACY_PASSWORD_FIXTURE)
            .unwrap();
        fs::write(&path, &bytes).unwrap();
        assert_eq!(
            load_legacy_password(&path, &machine).as_deref(),
            Some("01234567890123456789012345678901")
        );

        fs::write(&path, &bytes[..31]).unwrap();
        assert_eq!(load_legacy_password(&path, &machine), None);
    }
}
