// error.rs — Error types for the kill switch.

use thiserror::Error;

use crate::config::ChannelKind;
use crate::state::KillSwitchState;

/// A channel or supervision failure. Every fault escalates the switch to
/// HardStopped before it is returned to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KillSwitchFault {
    /// A channel delivered something outside the command vocabulary.
    #[error("unknown or ambiguous command '{input}' on {channel} channel")]
    UnknownCommand { input: String, channel: ChannelKind },

    /// A configured channel could not be armed or stopped responding.
    #[error("{channel} channel unreachable: {detail}")]
    ChannelUnreachable { channel: ChannelKind, detail: String },

    /// Policy mandates a physical channel but none is armed.
    #[error("policy requires a physical kill-switch channel; none armed")]
    PhysicalChannelMissing,

    /// No heartbeat arrived within the watchdog window.
    #[error("watchdog expired after {timeout_ms}ms without heartbeat")]
    WatchdogExpired { timeout_ms: u64 },

    /// An in-flight node did not reach a cancellation point in time.
    #[error("node '{node}' ignored cancellation for {elapsed_ms}ms (bound {bound_ms}ms)")]
    CancellationBoundExceeded {
        node: String,
        bound_ms: u64,
        elapsed_ms: u64,
    },
}

/// Errors returned to callers of operator actions.
#[derive(Debug, Error)]
pub enum KillSwitchError {
    #[error(transparent)]
    Fault(#[from] KillSwitchFault),

    /// Operator actions must carry an identity.
    #[error("operator action '{action}' requires an operator identity")]
    AnonymousOperator { action: &'static str },

    /// The operator action does not apply in the current state.
    #[error("operator action '{action}' not valid in state {state}")]
    InvalidOperatorAction {
        action: &'static str,
        state: KillSwitchState,
    },

    /// The configuration is unusable.
    #[error("invalid kill-switch config: {0}")]
    InvalidConfig(String),
}

/// Why a cancellation token fired.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Cancelled {
    #[error("cancelled by hard stop")]
    HardStop,

    #[error("cancelled by emergency freeze")]
    Freeze,

    #[error("node timeout of {timeout_ms}ms elapsed")]
    Deadline { timeout_ms: u64 },
}
