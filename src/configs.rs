use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "pki-trust.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub legacy_login: LegacyLogin,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Paths {
    /// Read-only trust anchors shipped with the application
    #[serde(default = "default_app_ca_bundle")]
    pub app_ca_bundle: PathBuf,
    /// Writable trust store; additions are saved here
    #[serde(default = "default_user_ca_store")]
    pub user_ca_store: PathBuf,
    #[serde(default = "default_protected_data")]
    pub protected_data: PathBuf,
    #[serde(default = "default_legacy_password")]
    pub legacy_password: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            app_ca_bundle: default_app_ca_bundle(),
            user_ca_store: default_user_ca_store(),
            protected_data: default_protected_data(),
            legacy_password: default_legacy_password(),
        }
    }
}

fn default_app_ca_bundle() -> PathBuf {
    PathBuf::from("app_settings/ca-bundle.crt")
}

fn default_user_ca_store() -> PathBuf {
    PathBuf::from("user_settings/CA.pem")
}

fn default_protected_data() -> PathBuf {
    PathBuf::from("user_settings/bin_conf.dat")
}

fn default_legacy_password() -> PathBuf {
    PathBuf::from("user_settings/password.dat")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MachineConfig {
    /// Hex machine id; detected from the host when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Hex id the protected data may still be keyed with
    #[serde(default)]
    pub legacy_id: Option<String>,
}

/// Remembered login of older installs, used when no credential is stored
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LegacyLogin {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ValidationConfig {
    /// Accept every chain without checking it
    #[serde(default)]
    pub no_verify_ssl_cert: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(config_str).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with default path (pki-trust.toml)
    pub fn load() -> Result<Self> {
        Self::from_file(DEFAULT_CONFIG_PATH)
    }

    /// Resolves relative paths against `base`
    pub fn rooted_at(mut self, base: &Path) -> Self {
        for path in [
            &mut self.paths.app_ca_bundle,
            &mut self.paths.user_ca_store,
            &mut self.paths.protected_data,
            &mut self.paths.legacy_password,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.paths.user_ca_store, PathBuf::from("user_settings/CA.pem"));
        assert!(config.machine.id.is_none());
        assert!(!config.validation.no_verify_ssl_cert);
        assert!(config.legacy_login.first_name.is_empty());
    }

    #[test]
    fn test_parse_all_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [paths]
            protected_data = "/var/lib/pki-trust/bin_conf.dat"

            [machine]
            id = "00112233"
            legacy_id = "4d152e1f5902"

            [legacy_login]
            first_name = "Test"
            last_name = "Resident"

            [validation]
            no_verify_ssl_cert = true
            "#,
        )
        .unwrap();
        assert_eq!(
            config.paths.protected_data,
            PathBuf::from("/var/lib/pki-trust/bin_conf.dat")
        );
        assert_eq!(config.paths.app_ca_bundle, PathBuf::from("app_settings/ca-bundle.crt"));
        assert_eq!(config.machine.legacy_id.as_deref(), Some("4d152e1f5902"));
        assert_eq!(config.legacy_login.last_name, "Resident");
        assert!(config.validation.no_verify_ssl_cert);
    }

    #[test]
    fn test_rooted_at_keeps_absolute_paths() {
        let mut config = AppConfig::default();
        config.paths.protected_data = PathBuf::from("/abs/bin_conf.dat");
        let config = config.rooted_at(Path::new("/base"));
        assert_eq!(config.paths.user_ca_store, PathBuf::from("/base/user_settings/CA.pem"));
        assert_eq!(config.paths.protected_data, PathBuf::from("/abs/bin_conf.dat"));
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(AppConfig::from_toml_str("[paths\n").is_err());
    }
}
