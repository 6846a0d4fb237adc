//! # adr-killswitch
//!
//! The pre-emptive stop mechanism of the ADR safety core.
//!
//! A single [`KillSwitch`] is created at process start and shared by every
//! component that can cause a side effect. Its state follows a strict
//! priority order, `EmergencyFrozen > HardStopped > SoftStopping > Running`,
//! that no policy or agent code can override.
//!
//! All external channels (OS signal, GPIO line, local socket, loopback HTTP)
//! feed the same [`KillCommand`] vocabulary. Input outside the vocabulary is
//! a [`KillSwitchFault`] and escalates to `HardStopped`.
//!
//! ```rust
//! use adr_killswitch::{ChannelKind, KillSwitch, KillSwitchConfig, KillSwitchState};
//!
//! let ks = KillSwitch::init(KillSwitchConfig::default());
//! ks.submit("freeze", ChannelKind::LocalHttp).unwrap();
//! assert_eq!(ks.state(), KillSwitchState::EmergencyFrozen);
//!
//! // Unfreezing never returns straight to Running.
//! ks.operator_unfreeze("oncall").unwrap();
//! assert_eq!(ks.state(), KillSwitchState::HardStopped);
//! ```

pub mod config;
pub mod error;
pub mod state;
pub mod switch;
pub mod token;

pub use config::{ChannelKind, ChannelSpec, KillSwitchConfig};
pub use error::{Cancelled, KillSwitchError, KillSwitchFault};
pub use state::{KillCommand, KillSwitchState};
pub use switch::{KillSwitch, KillSwitchSnapshot, KillSwitchTransition, TransitionCause};
pub use token::CancelToken;
