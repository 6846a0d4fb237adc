// config.rs — Daemon configuration.
//
// `DaemonConfig::for_project()` lays everything out under `.adr/` in the
// project root. A `.adr/daemon.toml` may override individual paths and
// intervals:
//
// ```toml
// policy = "/etc/adr/plant.yaml"
// tick_ms = 100
// gpio_root = "/sys/class/gpio"
// ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub project_root: PathBuf,

    /// Policy Constraint Set (YAML).
    pub policy: PathBuf,

    /// Append-only action log (JSONL).
    pub action_log: PathBuf,

    /// Where `adr audit attest` keeps the PKCS#8 signing key.
    pub attestation_key: PathBuf,

    /// sysfs GPIO root; `<gpio_root>/gpio<pin>/value` is polled.
    pub gpio_root: PathBuf,

    pub gpio_poll_ms: u64,

    /// Interval of the watchdog and anchor checks.
    pub tick_ms: u64,
}

/// The optional overrides file. Every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DaemonToml {
    policy: Option<PathBuf>,
    action_log: Option<PathBuf>,
    attestation_key: Option<PathBuf>,
    gpio_root: Option<PathBuf>,
    gpio_poll_ms: Option<u64>,
    tick_ms: Option<u64>,
}

impl DaemonConfig {
    /// Standard `.adr/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let adr_dir = root.join(".adr");
        Self {
            project_root: root,
            policy: adr_dir.join("policy.yaml"),
            action_log: adr_dir.join("actions.jsonl"),
            attestation_key: adr_dir.join("attestation.pk8"),
            gpio_root: PathBuf::from("/sys/class/gpio"),
            gpio_poll_ms: 20,
            tick_ms: 250,
        }
    }

    pub fn config_file(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(".adr").join("daemon.toml")
    }

    /// `for_project()` with `.adr/daemon.toml` applied when it exists.
    /// Relative paths in the file are resolved against the project root.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self> {
        let root = project_root.as_ref();
        let mut config = Self::for_project(root);
        let path = Self::config_file(root);
        if !path.exists() {
            return Ok(config);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let overrides: DaemonToml =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        let resolve = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };
        if let Some(p) = overrides.policy {
            config.policy = resolve(p);
        }
        if let Some(p) = overrides.action_log {
            config.action_log = resolve(p);
        }
        if let Some(p) = overrides.attestation_key {
            config.attestation_key = resolve(p);
        }
        if let Some(p) = overrides.gpio_root {
            config.gpio_root = resolve(p);
        }
        if let Some(ms) = overrides.gpio_poll_ms {
            config.gpio_poll_ms = ms.max(1);
        }
        if let Some(ms) = overrides.tick_ms {
            config.tick_ms = ms.max(1);
        }
        Ok(config)
    }
}
