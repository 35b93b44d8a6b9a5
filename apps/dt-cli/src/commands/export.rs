// export.rs — Compliance export subcommands: list, verify.
//
// `verify` lets an auditor who holds the compliance secret check that an
// export body they were handed is exactly what the daemon signed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use dt_audit::{ComplianceExporter, Signer};
use serde::Deserialize;
use uuid::Uuid;

use crate::DataPaths;

const ENV_COMPLIANCE_SECRET: &str = "COMPLIANCE_SECRET";
const DEFAULT_SECRET: &str = "dev-secret";

#[derive(Subcommand)]
pub enum ExportCommands {
    /// List compliance exports for a tenant, newest first.
    List {
        #[arg(long)]
        tenant: Uuid,
    },
    /// Check an export body against its signature.
    Verify {
        /// The CSV body as returned by the daemon.
        file: PathBuf,
        /// Hex HMAC-SHA256 signature; defaults to the stored signature of `--export`.
        #[arg(long)]
        signature: Option<String>,
        /// Look the signature up from this export record.
        #[arg(long)]
        export: Option<Uuid>,
        /// Signing secret; falls back to COMPLIANCE_SECRET, then daemon.toml.
        #[arg(long)]
        secret: Option<String>,
    },
}

pub fn execute(cmd: &ExportCommands, paths: &DataPaths) -> anyhow::Result<()> {
    match cmd {
        ExportCommands::List { tenant } => {
            let exporter = ComplianceExporter::open(&paths.exports, "")?;
            let exports = exporter.list(*tenant)?;
            if exports.is_empty() {
                println!("No compliance exports.");
                return Ok(());
            }
            println!("{:<38} {:<20} {:<8} SIGNATURE", "EXPORT ID", "CREATED", "ACTIONS");
            println!("{}", "-".repeat(100));
            for export in exports {
                println!(
                    "{:<38} {:<20} {:<8} {}",
                    export.id,
                    export.created_at.format("%Y-%m-%d %H:%M:%S"),
                    export.action_count,
                    export.signature_hash,
                );
            }
        }

        ExportCommands::Verify {
            file,
            signature,
            export,
            secret,
        } => {
            let body = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let signature = match (signature, export) {
                (Some(signature), _) => signature.clone(),
                (None, Some(id)) => ComplianceExporter::open(&paths.exports, "")?
                    .get(*id)?
                    .map(|e| e.signature_hash)
                    .with_context(|| format!("no export record {}", id))?,
                (None, None) => anyhow::bail!("pass --signature or --export"),
            };
            let secret = resolve_secret(
                secret.as_deref(),
                std::env::var(ENV_COMPLIANCE_SECRET).ok(),
                &paths.config_file,
            )?;

            if Signer::new(&secret).verify(body.as_bytes(), &signature) {
                println!("Signature valid: {} is unaltered.", file.display());
            } else {
                println!("SIGNATURE MISMATCH for {}", file.display());
                println!("The export body was modified or signed with a different secret.");
                anyhow::bail!("Compliance export verification failed");
            }
        }
    }

    Ok(())
}

#[derive(Deserialize)]
struct DaemonFile {
    #[serde(default)]
    compliance: Option<ComplianceSection>,
}

#[derive(Deserialize)]
struct ComplianceSection {
    secret: Option<String>,
}

/// Flag, then environment, then the daemon's config file, then the
/// daemon's built-in default.
fn resolve_secret(
    flag: Option<&str>,
    env: Option<String>,
    config_file: &Path,
) -> anyhow::Result<String> {
    if let Some(secret) = flag {
        return Ok(secret.to_string());
    }
    if let Some(secret) = env {
        return Ok(secret);
    }
    if config_file.exists() {
        let content = std::fs::read_to_string(config_file)
            .with_context(|| format!("failed to read {}", config_file.display()))?;
        let parsed: DaemonFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", config_file.display()))?;
        if let Some(secret) = parsed.compliance.and_then(|c| c.secret) {
            return Ok(secret);
        }
    }
    Ok(DEFAULT_SECRET.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("daemon.toml");

        assert_eq!(resolve_secret(None, None, &config).unwrap(), "dev-secret");

        std::fs::write(&config, "[compliance]\nsecret = \"from-file\"\n").unwrap();
        assert_eq!(resolve_secret(None, None, &config).unwrap(), "from-file");
        assert_eq!(
            resolve_secret(None, Some("from-env".into()), &config).unwrap(),
            "from-env"
        );
        assert_eq!(
            resolve_secret(Some("from-flag"), Some("from-env".into()), &config).unwrap(),
            "from-flag"
        );
    }

    #[test]
    fn verify_accepts_signed_body_and_rejects_edits() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::for_data_dir(dir.path());
        let body = "\"Action ID\",\"Timestamp\"\n\"a\",\"b\"\n";
        let file = dir.path().join("export.csv");
        std::fs::write(&file, body).unwrap();
        let signature = Signer::new("s3cret").sign(body.as_bytes());

        let verify = |signature: &str| {
            execute(
                &ExportCommands::Verify {
                    file: file.clone(),
                    signature: Some(signature.to_string()),
                    export: None,
                    secret: Some("s3cret".into()),
                },
                &paths,
            )
        };
        assert!(verify(&signature).is_ok());

        std::fs::write(&file, body.replace("\"a\"", "\"z\"")).unwrap();
        assert!(verify(&signature).is_err());
    }

    #[test]
    fn verify_needs_a_signature_source() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::for_data_dir(dir.path());
        let file = dir.path().join("export.csv");
        std::fs::write(&file, "x").unwrap();
        let result = execute(
            &ExportCommands::Verify {
                file,
                signature: None,
                export: None,
                secret: None,
            },
            &paths,
        );
        assert!(result.is_err());
    }
}
