pub mod audit;
pub mod graph;
pub mod kill;
pub mod policy;
pub mod run;

use adr_daemon::DaemonConfig;
use adr_policy::PolicyConstraintSet;
use anyhow::Context;

/// The project's policy, or the built-in default when none is configured.
pub fn load_policy(config: &DaemonConfig) -> anyhow::Result<PolicyConstraintSet> {
    if !config.policy.exists() {
        tracing::warn!(path = %config.policy.display(), "no policy file; using defaults");
        return Ok(PolicyConstraintSet::default());
    }
    PolicyConstraintSet::load(&config.policy)
        .with_context(|| format!("loading policy {}", config.policy.display()))
}
