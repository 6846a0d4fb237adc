// audit.rs — Audit subcommands: verify, tail, export, attest, check-attestation.

use std::io::Write;
use std::path::{Path, PathBuf};

use adr_audit::{ActionLog, Attestation, AuditError, ChainAttestor};
use adr_daemon::DaemonConfig;
use anyhow::Context;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the action log hash chain integrity.
    Verify {
        /// Path to action log (defaults to .adr/actions.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent action log entries.
    Tail {
        #[arg(long)]
        log: Option<PathBuf>,
        /// Number of entries to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Export the audit records (action, intent, why, trust, risk, merkle_hash) as JSONL.
    Export {
        #[arg(long)]
        log: Option<PathBuf>,
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Sign the current chain head with the project's attestation key.
    Attest {
        #[arg(long)]
        log: Option<PathBuf>,
        /// PKCS#8 key (defaults to .adr/attestation.pk8; generated if missing).
        #[arg(long)]
        key: Option<PathBuf>,
        /// Write the attestation here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check an attestation's signature and that the log still contains its head.
    CheckAttestation {
        /// Attestation JSON written by `adr audit attest`.
        attestation: PathBuf,
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

pub fn execute(cmd: &AuditCommands, config: &DaemonConfig) -> anyhow::Result<()> {
    let log_path = |log: &Option<PathBuf>| log.clone().unwrap_or_else(|| config.action_log.clone());

    match cmd {
        AuditCommands::Verify { log } => {
            let path = log_path(log);
            if !path.exists() {
                println!("No action log found at {}", path.display());
                return Ok(());
            }
            match ActionLog::verify_file(&path) {
                Ok(count) => {
                    println!("Action log verified: {} entr(ies), hash chain intact.", count);
                }
                Err(AuditError::IntegrityViolation { position, detail }) => {
                    println!("INTEGRITY VIOLATION at entry {}:", position);
                    println!("  {}", detail);
                    println!();
                    println!("The action log may have been tampered with.");
                    anyhow::bail!("Action log integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditCommands::Tail { log, n } => {
            let path = log_path(log);
            if !path.exists() {
                println!("No action log found at {}", path.display());
                return Ok(());
            }
            let entries = ActionLog::read_all(&path)?;
            let start = entries.len().saturating_sub(*n);
            let recent = &entries[start..];
            if recent.is_empty() {
                println!("No action log entries.");
                return Ok(());
            }

            println!(
                "{:<6} {:<20} {:<18} {:<24} WHY",
                "SEQ", "TIMESTAMP", "KIND", "ACTION"
            );
            println!("{}", "-".repeat(90));
            for entry in recent {
                println!(
                    "{:<6} {:<20} {:<18} {:<24} {}",
                    entry.seq,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.kind.to_string(),
                    entry.action,
                    entry.why.summary,
                );
            }
        }

        AuditCommands::Export { log, out } => {
            let path = log_path(log);
            let count = ActionLog::verify_file(&path)
                .with_context(|| format!("verifying {}", path.display()))?;
            let entries = ActionLog::read_all(&path)?;
            let mut writer: Box<dyn Write> = match out {
                Some(out) => Box::new(std::io::BufWriter::new(
                    std::fs::File::create(out)
                        .with_context(|| format!("creating {}", out.display()))?,
                )),
                None => Box::new(std::io::stdout().lock()),
            };
            for entry in &entries {
                serde_json::to_writer(&mut writer, &entry.to_record())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            if let Some(out) = out {
                eprintln!("Exported {} record(s) to {}", count, out.display());
            }
        }

        AuditCommands::Attest { log, key, out } => {
            let path = log_path(log);
            if !path.exists() {
                anyhow::bail!("No action log found at {}", path.display());
            }
            let key_path = key.clone().unwrap_or_else(|| config.attestation_key.clone());
            let attestor = load_or_generate_key(&key_path)?;
            let action_log =
                ActionLog::open(&path).with_context(|| format!("opening {}", path.display()))?;
            let Some(attestation) = attestor.attest(&action_log) else {
                anyhow::bail!("{} is empty; nothing to attest", path.display());
            };
            let text = serde_json::to_string_pretty(&attestation)?;
            match out {
                Some(out) => {
                    std::fs::write(out, format!("{}\n", text))
                        .with_context(|| format!("writing {}", out.display()))?;
                    eprintln!(
                        "Attested entry {} ({}) to {}",
                        attestation.seq,
                        attestation.head_hash,
                        out.display()
                    );
                }
                None => println!("{}", text),
            }
        }

        AuditCommands::CheckAttestation { attestation, log } => {
            let text = std::fs::read_to_string(attestation)
                .with_context(|| format!("reading {}", attestation.display()))?;
            let attestation: Attestation = serde_json::from_str(&text)?;
            attestation.verify()?;

            let path = log_path(log);
            ActionLog::verify_file(&path)
                .with_context(|| format!("verifying {}", path.display()))?;
            let entries = ActionLog::read_all(&path)?;
            let covered = entries
                .get(attestation.seq as usize)
                .is_some_and(|e| e.merkle_hash == attestation.head_hash);
            if !covered {
                anyhow::bail!(
                    "attested head {} at entry {} is not in {}",
                    attestation.head_hash,
                    attestation.seq,
                    path.display()
                );
            }
            println!(
                "Attestation valid: entry {} signed at {}, {} entr(ies) in log.",
                attestation.seq,
                attestation.signed_at.format("%Y-%m-%d %H:%M:%S"),
                entries.len()
            );
        }
    }

    Ok(())
}

fn load_or_generate_key(path: &Path) -> anyhow::Result<ChainAttestor> {
    if path.exists() {
        let pkcs8 = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok(ChainAttestor::from_pkcs8(&pkcs8)?);
    }
    let (attestor, pkcs8) = ChainAttestor::generate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pkcs8).with_context(|| format!("writing {}", path.display()))?;
    tracing::warn!(path = %path.display(), "generated new attestation key");
    Ok(attestor)
}
