//! Credential administration commands

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Subcommand};
use serde::Serialize;
use serde_json::Value;
use zeroize::Zeroize;

use super::output::{print_json, print_table_header, truncate, OutputFormat};
use crate::domain::{CredentialMetadata, CredentialRecord, ProviderKey, DEFAULT_KEY_TYPE};
use crate::secrets::SecretString;
use crate::services::KeyManager;

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Show the active credential for a provider
    Get {
        /// Provider identifier (e.g. hubspot)
        provider: String,

        /// Credential slot within the provider
        #[arg(long, default_value = DEFAULT_KEY_TYPE)]
        key_type: String,

        /// Print the full plaintext instead of a masked preview
        #[arg(long)]
        reveal: bool,
    },

    /// Store a new credential version and retire the current one
    #[command(group(
        ArgGroup::new("secret_source").required(true).args(["secret_env", "secret_stdin"])
    ))]
    Rotate {
        /// Provider identifier (e.g. hubspot)
        provider: String,

        /// Credential slot within the provider
        #[arg(long, default_value = DEFAULT_KEY_TYPE)]
        key_type: String,

        /// Read the new secret from this environment variable
        #[arg(long, value_name = "VAR")]
        secret_env: Option<String>,

        /// Read the new secret from the first line of stdin
        #[arg(long)]
        secret_stdin: bool,

        /// Metadata to attach to the new version (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// List every stored version of a credential
    History {
        /// Provider identifier (e.g. hubspot)
        provider: String,

        /// Credential slot within the provider
        #[arg(long, default_value = DEFAULT_KEY_TYPE)]
        key_type: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Retire stale active versions left by an interrupted rotation
    Repair {
        /// Provider identifier (e.g. hubspot)
        provider: String,

        /// Credential slot within the provider
        #[arg(long, default_value = DEFAULT_KEY_TYPE)]
        key_type: String,
    },
}

/// Version summary printed by `keys history`; never includes the envelope
#[derive(Debug, Serialize)]
struct VersionSummary {
    version: i64,
    status: String,
    created_at: String,
    rotated_at: Option<String>,
    metadata: CredentialMetadata,
}

impl From<CredentialRecord> for VersionSummary {
    fn from(record: CredentialRecord) -> Self {
        Self {
            version: record.version,
            status: record.status.to_string(),
            created_at: record.created_at.to_rfc3339(),
            rotated_at: record.rotated_at.map(|t| t.to_rfc3339()),
            metadata: record.metadata,
        }
    }
}

pub async fn handle_keys_command(command: KeyCommands, manager: &KeyManager) -> Result<()> {
    match command {
        KeyCommands::Get { provider, key_type, reveal } => {
            let key = ProviderKey::new(provider, key_type);
            let secret = manager.get_active_key_for(&key).await?;
            if reveal {
                println!("{}", secret.expose_secret());
            } else {
                println!("{}  {}", key, secret.masked());
            }
        }

        KeyCommands::Rotate { provider, key_type, secret_env, secret_stdin, meta } => {
            let key = ProviderKey::new(provider, key_type);
            let secret = read_secret(secret_env.as_deref(), secret_stdin)?;
            let metadata = build_metadata(meta);

            let record = manager.rotate_key_for(&key, secret.expose_secret(), metadata).await?;
            println!("Rotated {} to version {}", key, record.version);
        }

        KeyCommands::History { provider, key_type, output } => {
            let key = ProviderKey::new(provider, key_type);
            let versions: Vec<VersionSummary> =
                manager.history(&key).await?.into_iter().map(VersionSummary::from).collect();

            match output {
                OutputFormat::Json => print_json(&versions)?,
                OutputFormat::Table => print_history_table(&key, &versions),
            }
        }

        KeyCommands::Repair { provider, key_type } => {
            let key = ProviderKey::new(provider, key_type);
            let retired = manager.repair(&key).await?;
            if retired == 0 {
                println!("{} has at most one active version; nothing to repair", key);
            } else {
                println!("Retired {} stale active version(s) of {}", retired, key);
            }
        }
    }

    Ok(())
}

fn read_secret(secret_env: Option<&str>, secret_stdin: bool) -> Result<SecretString> {
    if let Some(var) = secret_env {
        let value = std::env::var(var)
            .with_context(|| format!("Environment variable {} is not set", var))?;
        return Ok(SecretString::new(value));
    }

    if secret_stdin {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).context("Failed to read secret from stdin")?;
        let secret = SecretString::new(line.trim_end_matches(['\r', '\n']));
        line.zeroize();
        return Ok(secret);
    }

    bail!("Provide the new secret with --secret-env or --secret-stdin")
}

/// `--meta` values as string metadata, tagged with `source=cli` unless overridden
fn build_metadata(pairs: Vec<(String, String)>) -> CredentialMetadata {
    let mut metadata = CredentialMetadata::new();
    metadata.insert("source".to_string(), Value::String("cli".to_string()));
    for (key, value) in pairs {
        metadata.insert(key, Value::String(value));
    }
    metadata
}

fn parse_meta(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid metadata '{}': expected KEY=VALUE", raw)),
    }
}

fn print_history_table(key: &ProviderKey, versions: &[VersionSummary]) {
    if versions.is_empty() {
        println!("No stored versions for {}", key);
        return;
    }

    print_table_header(&[
        ("Version", 8),
        ("Status", 8),
        ("Created", 25),
        ("Rotated", 25),
        ("Metadata", 30),
    ]);
    for version in versions {
        let metadata = Value::Object(version.metadata.clone()).to_string();
        println!(
            "{:<8} {:<8} {:<25} {:<25} {}",
            version.version,
            version.status,
            version.created_at,
            version.rotated_at.as_deref().unwrap_or("-"),
            truncate(&metadata, 30)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        assert_eq!(parse_meta("ticket=OPS-12").unwrap(), ("ticket".into(), "OPS-12".into()));
        assert_eq!(parse_meta("note=a=b").unwrap(), ("note".into(), "a=b".into()));
        assert!(parse_meta("missing").is_err());
        assert!(parse_meta("=value").is_err());
    }

    #[test]
    fn test_build_metadata_defaults_source() {
        let metadata = build_metadata(vec![]);
        assert_eq!(metadata["source"], "cli");

        let metadata = build_metadata(vec![("source".into(), "admin".into())]);
        assert_eq!(metadata["source"], "admin");
    }

    #[test]
    fn test_read_secret_from_env() {
        std::env::set_var("CREDVAULT_CLI_TEST_SECRET", "pat-from-cli");
        let secret = read_secret(Some("CREDVAULT_CLI_TEST_SECRET"), false).unwrap();
        assert_eq!(secret, "pat-from-cli");
        std::env::remove_var("CREDVAULT_CLI_TEST_SECRET");

        assert!(read_secret(Some("CREDVAULT_CLI_TEST_UNSET"), false).is_err());
        assert!(read_secret(None, false).is_err());
    }

    #[test]
    fn test_version_summary_omits_envelope() {
        let record = CredentialRecord {
            id: 1,
            provider: "hubspot".into(),
            key_type: DEFAULT_KEY_TYPE.into(),
            version: 3,
            status: crate::domain::KeyStatus::Active,
            encrypted_secret: "nonce.cipher.tag".into(),
            metadata: CredentialMetadata::new(),
            created_at: chrono::Utc::now(),
            rotated_at: None,
        };

        let json = serde_json::to_string(&VersionSummary::from(record)).unwrap();
        assert!(json.contains("\"status\":\"active\""));
        assert!(!json.contains("nonce.cipher.tag"));
    }
}
