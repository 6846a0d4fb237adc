// state.rs — Kill-switch states, commands and the transition table.
//
// Priority, highest first, never overridable:
//   EmergencyFrozen > HardStopped > SoftStopping > Running
//
// Channel commands can only move the switch up this order, with one
// exception: `resume` clears a soft stop. Leaving HardStopped or
// EmergencyFrozen takes an explicit operator action (see `switch.rs`), and
// unfreezing lands in HardStopped, never directly in Running.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Process-wide kill-switch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchState {
    Running,
    SoftStopping,
    HardStopped,
    EmergencyFrozen,
}

impl KillSwitchState {
    /// Rank in the priority order. Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            KillSwitchState::Running => 0,
            KillSwitchState::SoftStopping => 1,
            KillSwitchState::HardStopped => 2,
            KillSwitchState::EmergencyFrozen => 3,
        }
    }

    /// Only a running switch permits new side effects.
    pub fn permits_side_effects(self) -> bool {
        self == KillSwitchState::Running
    }

    /// Whether in-flight nodes must abort immediately.
    pub fn aborts_in_flight(self) -> bool {
        matches!(
            self,
            KillSwitchState::HardStopped | KillSwitchState::EmergencyFrozen
        )
    }

    /// Channel-driven transition. `None` means the command is a no-op here.
    pub fn on_command(self, command: KillCommand) -> Option<KillSwitchState> {
        use KillSwitchState::*;
        match (self, command) {
            (EmergencyFrozen, _) => None,
            (_, KillCommand::Freeze) => Some(EmergencyFrozen),
            (Running, KillCommand::SoftStop) => Some(SoftStopping),
            (Running | SoftStopping, KillCommand::HardStop) => Some(HardStopped),
            (SoftStopping, KillCommand::Resume) => Some(Running),
            _ => None,
        }
    }
}

impl fmt::Display for KillSwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillSwitchState::Running => write!(f, "running"),
            KillSwitchState::SoftStopping => write!(f, "soft_stopping"),
            KillSwitchState::HardStopped => write!(f, "hard_stopped"),
            KillSwitchState::EmergencyFrozen => write!(f, "emergency_frozen"),
        }
    }
}

/// The command vocabulary shared by every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillCommand {
    SoftStop,
    HardStop,
    Freeze,
    Resume,
    /// Liveness ping for the watchdog. Never changes state.
    Heartbeat,
}

impl KillCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            KillCommand::SoftStop => "soft_stop",
            KillCommand::HardStop => "hard_stop",
            KillCommand::Freeze => "freeze",
            KillCommand::Resume => "resume",
            KillCommand::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for KillCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse: one exact token, surrounding whitespace ignored. Anything
/// else is ambiguous.
impl FromStr for KillCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "soft_stop" => Ok(KillCommand::SoftStop),
            "hard_stop" => Ok(KillCommand::HardStop),
            "freeze" => Ok(KillCommand::Freeze),
            "resume" => Ok(KillCommand::Resume),
            "heartbeat" => Ok(KillCommand::Heartbeat),
            _ => Err(()),
        }
    }
}
