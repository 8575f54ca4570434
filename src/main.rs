//! pki-trust - certificate trust store and credential tool
//!
//! Inspects certificates, validates PEM chains against the configured trust
//! store, edits the store and manages stored credentials. Paths and the
//! machine id come from `pki-trust.toml` (see [`pki_trust::configs`]).
//! Set `RUST_LOG=debug` for a trace of chain building and validation.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::info;
use pki_trust::cert_set::{CertPredicate, CertificateCollection, CertificateSet};
use pki_trust::certificate::{parse_pem_bundle, Certificate};
use pki_trust::chain::CertificateChain;
use pki_trust::configs::{AppConfig, DEFAULT_CONFIG_PATH};
use pki_trust::sec_handler::SecHandler;
use pki_trust::validation::{ValidationParams, ValidationPolicy};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pki-trust", version, about = "Certificate trust store and credential tool")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the field record of every certificate in a PEM file
    Show { pem: PathBuf },
    /// Validate a PEM chain (leaf first, intermediates in any order)
    Validate {
        chain: PathBuf,
        #[arg(long)]
        hostname: Option<String>,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        date: Option<String>,
        /// `ssl`, `none` or a list such as `time|trusted`
        #[arg(long, default_value = "ssl")]
        policy: String,
    },
    #[command(subcommand)]
    Store(StoreCommand),
    #[command(subcommand)]
    Credential(CredentialCommand),
}

#[derive(Subcommand)]
enum StoreCommand {
    /// List trust anchors
    List,
    /// Add every certificate of a PEM file and save
    Add { pem: PathBuf },
    /// Remove the anchor with this SHA1 fingerprint and save
    Remove { sha1: String },
    /// Rewrite the user trust store file
    Save,
}

#[derive(Subcommand)]
enum CredentialCommand {
    /// Print the credential stored for a grid
    Show { grid: String },
    /// Delete the credential stored for a grid
    Forget { grid: String },
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::from_file(path)
    } else {
        info!("{} not found, using default configuration", path.display());
        Ok(AppConfig::default())
    }
}

fn read_pem_file(path: &Path) -> Result<Vec<Certificate>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let certs = parse_pem_bundle(&text);
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in {}", path.display()));
    }
    Ok(certs)
}

fn print_certificate(cert: &Certificate) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(cert.fields())?);
    Ok(())
}

fn validate(
    sec: &SecHandler,
    chain_path: &Path,
    hostname: Option<String>,
    date: Option<String>,
    policy: &str,
) -> Result<()> {
    let policy: ValidationPolicy = policy.parse().map_err(|e: String| anyhow!(e))?;
    let mut certs = read_pem_file(chain_path)?.into_iter();
    let leaf = certs
        .next()
        .ok_or_else(|| anyhow!("Empty chain file {}", chain_path.display()))?;
    let untrusted: CertificateSet = certs.collect();
    let chain = CertificateChain::from_untrusted(leaf, &untrusted);

    let mut params = ValidationParams::new();
    if let Some(hostname) = hostname {
        params = params.with_hostname(hostname);
    }
    if let Some(date) = date {
        let date = DateTime::parse_from_rfc3339(&date)
            .with_context(|| format!("Invalid date '{}'", date))?;
        params = params.at(date.with_timezone(&Utc));
    }

    println!("Chain of {} certificates, policy {}", chain.len(), policy);
    for cert in chain.iter() {
        println!("  {}", cert);
    }
    match sec.validate_chain(policy, &chain, &params) {
        Ok(()) => {
            println!("✓ Chain is trusted");
            Ok(())
        }
        Err(e) => {
            println!("✗ {}", e);
            if let Some(fields) = e.cert_data() {
                println!("  certificate: {}", fields.subject_name_string);
                println!("  sha1: {}", fields.sha1_digest);
            }
            Err(e.into())
        }
    }
}

fn store_command(sec: &SecHandler, command: StoreCommand) -> Result<()> {
    let store = sec.certificate_store("default");
    let mut store = store.lock();
    match command {
        StoreCommand::List => {
            for cert in store.iter() {
                println!("{}  {}", cert.sha1(), cert);
            }
            println!("{} trust anchors", store.len());
        }
        StoreCommand::Add { pem } => {
            for cert in read_pem_file(&pem)? {
                if store.add(cert.clone()) {
                    println!("✓ Added {}", cert);
                } else {
                    println!("  Already present: {}", cert);
                }
            }
            store.save()?;
        }
        StoreCommand::Remove { sha1 } => {
            let index = store
                .find(&[CertPredicate::Sha1Digest(sha1.to_lowercase())])
                .ok_or_else(|| anyhow!("No certificate with SHA1 {}", sha1))?;
            if let Some(cert) = store.erase(index) {
                println!("✓ Removed {}", cert);
            }
            store.save()?;
        }
        StoreCommand::Save => {
            store.save()?;
            println!("✓ Trust store saved");
        }
    }
    Ok(())
}

fn credential_command(sec: &SecHandler, command: CredentialCommand) -> Result<()> {
    match command {
        CredentialCommand::Show { grid } => {
            let credential = sec.load_credential(&grid);
            println!("{}", credential);
            println!("  user id: {}", credential.user_id());
            let secret = if credential.authenticator().get("secret").is_some() {
                "stored"
            } else {
                "not stored"
            };
            println!("  authenticator: {}", secret);
        }
        CredentialCommand::Forget { grid } => {
            let mut credential = sec.load_credential(&grid);
            sec.delete_credential(&mut credential);
            println!("✓ Credential for {} removed", grid);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Command::Show { pem } = &cli.command {
        for cert in read_pem_file(pem)? {
            print_certificate(&cert)?;
        }
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let sec = SecHandler::init(config).context("Failed to initialize security handler")?;
    match cli.command {
        Command::Show { .. } => Ok(()),
        Command::Validate {
            chain,
            hostname,
            date,
            policy,
        } => validate(&sec, &chain, hostname, date, &policy),
        Command::Store(command) => store_command(&sec, command),
        Command::Credential(command) => credential_command(&sec, command),
    }
}
