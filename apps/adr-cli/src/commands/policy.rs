// policy.rs — Policy subcommands: show.

use adr_daemon::DaemonConfig;
use adr_killswitch::ChannelSpec;
use adr_policy::policy::MatchSpec;
use adr_policy::MerkleRootHolder;
use clap::Subcommand;

use super::load_policy;

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Summarize the active Policy Constraint Set.
    Show {
        /// Print the parsed policy as JSON instead.
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(cmd: &PolicyCommands, config: &DaemonConfig) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Show { json } => {
            let policy = load_policy(config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&policy)?);
                return Ok(());
            }

            println!("Domain:      {}", policy.domain);
            if !policy.version.is_empty() {
                println!("Version:     {}", policy.version);
            }
            println!("Policy hash: {}", policy.policy_hash());
            println!("Semantic threshold: {:.2}", policy.semantic_threshold());
            if let Some(ms) = policy.gate.node_timeout_ms {
                println!("Node timeout: {}ms", ms);
            }

            println!();
            println!("Trust overrides ({}):", policy.trust_overrides.len());
            for rule in &policy.trust_overrides {
                let matcher = match &rule.match_rule {
                    MatchSpec::Effect(prefix) => format!("effect {}", prefix),
                    MatchSpec::Rule(r) => {
                        let mut parts = Vec::new();
                        if let Some(e) = &r.effect {
                            parts.push(format!("effect {}", e));
                        }
                        if let Some(t) = r.node_type {
                            parts.push(format!("node_type {}", t));
                        }
                        if let Some(c) = &r.capability {
                            parts.push(format!("capability {}", c));
                        }
                        if let Some(x) = r.exec_class {
                            parts.push(format!("exec_class {}", x));
                        }
                        parts.join(" and ")
                    }
                };
                let lock = if rule.immutable {
                    " (immutable)"
                } else if rule.downgrade_forbidden {
                    " (downgrade forbidden)"
                } else {
                    ""
                };
                println!("  {} -> {}{}", matcher, rule.set_tier, lock);
            }
            println!("  every checkpoint -> human_required (immutable)");

            let triggers: Vec<String> =
                policy.freeze_triggers.iter().map(|t| t.to_string()).collect();
            println!("Freeze triggers: {}", list_or_none(&triggers));
            println!("Forbidden effects: {}", list_or_none(&policy.forbidden_effects));

            let ks = &policy.kill_switch;
            println!();
            println!(
                "Kill switch: cancellation bound {}ms, soft-stop grace {}ms, watchdog {}",
                ks.cancellation_bound_ms,
                ks.soft_stop_grace_ms,
                ks.watchdog_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_else(|| "off".to_string()),
            );
            if ks.require_physical_channel {
                println!("  physical channel required");
            }
            if ks.offline_capable {
                println!("  offline capable");
            }
            for channel in &ks.channels {
                let detail = match channel {
                    ChannelSpec::UnixSignal => String::new(),
                    ChannelSpec::HardwareGpio {
                        pin,
                        active_low,
                        on_assert,
                    } => format!(
                        "pin {}{}, asserts {}",
                        pin,
                        if *active_low { " (active low)" } else { "" },
                        on_assert.as_str()
                    ),
                    ChannelSpec::LocalNamedPipe { path } => path.display().to_string(),
                    ChannelSpec::LocalHttp { port } => format!("127.0.0.1:{}", port),
                };
                println!("  {:<18} {}", channel.kind().to_string(), detail);
            }

            let audit = &policy.audit;
            let holder = match &audit.merkle_root_holder {
                MerkleRootHolder::Local => "local".to_string(),
                MerkleRootHolder::Certifier { id } => format!("certifier {}", id),
                MerkleRootHolder::MultiParty { signers } => {
                    let roles: Vec<&str> = signers.iter().map(|s| s.role.as_str()).collect();
                    format!("multi-party ({})", roles.join(", "))
                }
            };
            println!();
            println!(
                "Audit: log level {:?}, time source {:?}, roots held by {}",
                audit.log_level, audit.time_source, holder
            );
        }
    }
    Ok(())
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
