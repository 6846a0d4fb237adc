// config.rs — Kill-switch channel configuration.
//
// Embedded in the policy document under `kill_switch:`:
//
// ```yaml
// kill_switch:
//   require_physical_channel: true
//   watchdog_ms: 5000
//   cancellation_bound_ms: 2000
//   soft_stop_grace_ms: 500
//   offline_capable: true
//   channels:
//     - kind: unix_signal
//     - kind: hardware_gpio
//       pin: 17
//     - kind: local_named_pipe
//       path: /run/adr/kill.sock
//     - kind: local_http
//       port: 7431
// ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::KillSwitchError;
use crate::state::KillCommand;

/// The class of a channel, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    UnixSignal,
    HardwareGpio,
    LocalNamedPipe,
    LocalHttp,
}

impl ChannelKind {
    /// A hardware signal line is the only physical channel.
    pub fn is_physical(self) -> bool {
        self == ChannelKind::HardwareGpio
    }

    /// Goes through the TCP stack, even if only on loopback.
    pub fn needs_network(self) -> bool {
        self == ChannelKind::LocalHttp
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::UnixSignal => write!(f, "unix_signal"),
            ChannelKind::HardwareGpio => write!(f, "hardware_gpio"),
            ChannelKind::LocalNamedPipe => write!(f, "local_named_pipe"),
            ChannelKind::LocalHttp => write!(f, "local_http"),
        }
    }
}

/// One configured channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelSpec {
    /// SIGTERM = soft_stop, SIGINT = hard_stop, SIGUSR1 = freeze, SIGUSR2 = resume.
    UnixSignal,
    /// A GPIO input line read through sysfs.
    HardwareGpio {
        pin: u32,
        #[serde(default)]
        active_low: bool,
        /// Command issued when the line is asserted.
        #[serde(default = "default_gpio_command")]
        on_assert: KillCommand,
    },
    /// A unix domain socket accepting one command per line.
    LocalNamedPipe { path: PathBuf },
    /// An HTTP endpoint bound to 127.0.0.1 only.
    LocalHttp { port: u16 },
}

fn default_gpio_command() -> KillCommand {
    KillCommand::HardStop
}

impl ChannelSpec {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelSpec::UnixSignal => ChannelKind::UnixSignal,
            ChannelSpec::HardwareGpio { .. } => ChannelKind::HardwareGpio,
            ChannelSpec::LocalNamedPipe { .. } => ChannelKind::LocalNamedPipe,
            ChannelSpec::LocalHttp { .. } => ChannelKind::LocalHttp,
        }
    }
}

/// Kill-switch requirements from the active policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    #[serde(default)]
    pub require_physical_channel: bool,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    /// Escalate to HardStopped when no heartbeat arrives within this window.
    #[serde(default)]
    pub watchdog_ms: Option<u64>,
    /// How long an in-flight node may take to reach a cancellation point.
    #[serde(default = "default_cancellation_bound")]
    pub cancellation_bound_ms: u64,
    /// After a soft stop has compensated in-flight nodes, how long a run
    /// waits for `resume` before terminating.
    #[serde(default)]
    pub soft_stop_grace_ms: u64,
    /// At least one channel must keep working with no network stack.
    #[serde(default)]
    pub offline_capable: bool,
}

fn default_cancellation_bound() -> u64 {
    2000
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            require_physical_channel: false,
            channels: Vec::new(),
            watchdog_ms: None,
            cancellation_bound_ms: default_cancellation_bound(),
            soft_stop_grace_ms: 0,
            offline_capable: false,
        }
    }
}

impl KillSwitchConfig {
    pub fn validate(&self) -> Result<(), KillSwitchError> {
        if self.require_physical_channel && !self.channels.iter().any(|c| c.kind().is_physical())
        {
            return Err(KillSwitchError::InvalidConfig(
                "require_physical_channel is set but no hardware_gpio channel is configured"
                    .to_string(),
            ));
        }
        if self.offline_capable && !self.channels.iter().any(|c| !c.kind().needs_network()) {
            return Err(KillSwitchError::InvalidConfig(
                "offline_capable needs a channel that does not use the network".to_string(),
            ));
        }
        for channel in &self.channels {
            match channel {
                ChannelSpec::LocalHttp { port: 0 } => {
                    return Err(KillSwitchError::InvalidConfig(
                        "local_http channel needs a fixed port".to_string(),
                    ))
                }
                ChannelSpec::HardwareGpio { on_assert, .. }
                    if *on_assert == KillCommand::Resume || *on_assert == KillCommand::Heartbeat =>
                {
                    return Err(KillSwitchError::InvalidConfig(format!(
                        "hardware_gpio on_assert must be a stop command, not {}",
                        on_assert
                    )))
                }
                _ => {}
            }
        }
        if self.watchdog_ms == Some(0) {
            return Err(KillSwitchError::InvalidConfig(
                "watchdog_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_physical_channel(&self) -> bool {
        self.channels.iter().any(|c| c.kind().is_physical())
    }
}
