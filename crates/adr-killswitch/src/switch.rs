// switch.rs — The process-wide kill switch.
//
// One `KillSwitch` is created at process start (`KillSwitch::init`) and
// shared as `Arc<KillSwitch>`. State lives behind a mutex; every transition
// bumps an epoch counter, wakes condvar waiters and is pushed to
// subscribers. Nothing resets the switch implicitly.
//
// Callers must read `state()` immediately before acting. A snapshot taken
// earlier is stale the moment the epoch moves.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::{ChannelKind, KillSwitchConfig};
use crate::error::{KillSwitchError, KillSwitchFault};
use crate::state::{KillCommand, KillSwitchState};
use crate::token::CancelToken;

/// What caused a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionCause {
    /// A command received on an external channel.
    Channel {
        channel: ChannelKind,
        command: KillCommand,
    },
    /// A policy freeze trigger fired.
    FreezeTrigger { trigger: String, detail: String },
    /// A channel or supervision fault.
    Fault(KillSwitchFault),
    /// An explicit operator action.
    Operator { operator: String, action: String },
    /// A request from inside the process.
    Internal { reason: String },
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::Channel { channel, command } => {
                write!(f, "{} via {} channel", command, channel)
            }
            TransitionCause::FreezeTrigger { trigger, detail } => {
                write!(f, "freeze trigger {}: {}", trigger, detail)
            }
            TransitionCause::Fault(fault) => write!(f, "fault: {}", fault),
            TransitionCause::Operator { operator, action } => {
                write!(f, "operator {} by {}", action, operator)
            }
            TransitionCause::Internal { reason } => write!(f, "{}", reason),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchTransition {
    pub epoch: u64,
    pub from: KillSwitchState,
    pub to: KillSwitchState,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

/// State plus the epoch it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillSwitchSnapshot {
    pub state: KillSwitchState,
    pub epoch: u64,
}

struct Inner {
    state: KillSwitchState,
    epoch: u64,
    armed: BTreeSet<ChannelKind>,
    last_heartbeat: Instant,
    history: Vec<KillSwitchTransition>,
    subscribers: Vec<Sender<KillSwitchTransition>>,
}

impl Inner {
    fn snapshot(&self) -> KillSwitchSnapshot {
        KillSwitchSnapshot {
            state: self.state,
            epoch: self.epoch,
        }
    }
}

pub struct KillSwitch {
    config: KillSwitchConfig,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("KillSwitch")
            .field("state", &snap.state)
            .field("epoch", &snap.epoch)
            .finish()
    }
}

impl KillSwitch {
    /// Create the switch in `Running`.
    pub fn init(config: KillSwitchConfig) -> Arc<Self> {
        tracing::info!(
            require_physical = config.require_physical_channel,
            channels = config.channels.len(),
            "kill switch initialised"
        );
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state: KillSwitchState::Running,
                epoch: 0,
                armed: BTreeSet::new(),
                last_heartbeat: Instant::now(),
                history: Vec::new(),
                subscribers: Vec::new(),
            }),
            changed: Condvar::new(),
        })
    }

    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    // A poisoned lock still holds a valid state; refusing to read it would
    // hide a stop.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> KillSwitchState {
        self.lock().state
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn snapshot(&self) -> KillSwitchSnapshot {
        self.lock().snapshot()
    }

    fn transition_locked(
        &self,
        inner: &mut Inner,
        to: KillSwitchState,
        cause: TransitionCause,
    ) -> KillSwitchTransition {
        let from = inner.state;
        inner.state = to;
        inner.epoch += 1;
        let transition = KillSwitchTransition {
            epoch: inner.epoch,
            from,
            to,
            cause,
            at: Utc::now(),
        };
        match to {
            KillSwitchState::EmergencyFrozen | KillSwitchState::HardStopped => {
                tracing::error!(%from, %to, cause = %transition.cause, epoch = inner.epoch, "kill switch transition")
            }
            _ => {
                tracing::warn!(%from, %to, cause = %transition.cause, epoch = inner.epoch, "kill switch transition")
            }
        }
        inner.history.push(transition.clone());
        inner
            .subscribers
            .retain(|tx| tx.send(transition.clone()).is_ok());
        self.changed.notify_all();
        transition
    }

    /// Move to `to` only if it outranks the current state.
    fn escalate_locked(
        &self,
        inner: &mut Inner,
        to: KillSwitchState,
        cause: TransitionCause,
    ) -> Option<KillSwitchTransition> {
        if to.priority() <= inner.state.priority() {
            return None;
        }
        Some(self.transition_locked(inner, to, cause))
    }

    /// Apply a command from a channel. Returns the transition, if any.
    pub fn command(
        &self,
        command: KillCommand,
        channel: ChannelKind,
    ) -> Option<KillSwitchTransition> {
        let mut inner = self.lock();
        if command == KillCommand::Heartbeat {
            inner.last_heartbeat = Instant::now();
            tracing::trace!(%channel, "heartbeat");
            return None;
        }
        let next = inner.state.on_command(command)?;
        Some(self.transition_locked(
            &mut inner,
            next,
            TransitionCause::Channel { channel, command },
        ))
    }

    /// Parse and apply raw channel input. Anything outside the vocabulary is
    /// a fault: the switch escalates to HardStopped and the fault is returned.
    pub fn submit(
        &self,
        raw: &str,
        channel: ChannelKind,
    ) -> Result<Option<KillSwitchTransition>, KillSwitchFault> {
        match raw.parse::<KillCommand>() {
            Ok(command) => Ok(self.command(command, channel)),
            Err(()) => {
                let fault = KillSwitchFault::UnknownCommand {
                    input: raw.trim().chars().take(64).collect(),
                    channel,
                };
                self.fault(fault.clone());
                Err(fault)
            }
        }
    }

    /// Escalate to HardStopped on a fault. Never lowers a frozen switch.
    pub fn fault(&self, fault: KillSwitchFault) -> Option<KillSwitchTransition> {
        tracing::error!(%fault, "kill switch fault");
        let mut inner = self.lock();
        self.escalate_locked(
            &mut inner,
            KillSwitchState::HardStopped,
            TransitionCause::Fault(fault),
        )
    }

    /// Enter EmergencyFrozen because a freeze trigger fired.
    pub fn freeze(
        &self,
        trigger: impl fmt::Display,
        detail: impl Into<String>,
    ) -> Option<KillSwitchTransition> {
        let mut inner = self.lock();
        self.escalate_locked(
            &mut inner,
            KillSwitchState::EmergencyFrozen,
            TransitionCause::FreezeTrigger {
                trigger: trigger.to_string(),
                detail: detail.into(),
            },
        )
    }

    /// Apply a command on behalf of in-process code (supervisors, tests).
    pub fn request(
        &self,
        command: KillCommand,
        reason: impl Into<String>,
    ) -> Option<KillSwitchTransition> {
        let mut inner = self.lock();
        let next = inner.state.on_command(command)?;
        Some(self.transition_locked(
            &mut inner,
            next,
            TransitionCause::Internal {
                reason: reason.into(),
            },
        ))
    }

    /// Leave EmergencyFrozen. Lands in HardStopped; a separate reset is
    /// needed to run again.
    pub fn operator_unfreeze(
        &self,
        operator: &str,
    ) -> Result<KillSwitchTransition, KillSwitchError> {
        self.operator_action(
            operator,
            "unfreeze",
            KillSwitchState::EmergencyFrozen,
            KillSwitchState::HardStopped,
        )
    }

    /// Leave HardStopped and accept work again.
    pub fn operator_reset(&self, operator: &str) -> Result<KillSwitchTransition, KillSwitchError> {
        self.operator_action(
            operator,
            "reset",
            KillSwitchState::HardStopped,
            KillSwitchState::Running,
        )
    }

    fn operator_action(
        &self,
        operator: &str,
        action: &'static str,
        from: KillSwitchState,
        to: KillSwitchState,
    ) -> Result<KillSwitchTransition, KillSwitchError> {
        if operator.trim().is_empty() {
            return Err(KillSwitchError::AnonymousOperator { action });
        }
        let mut inner = self.lock();
        if inner.state != from {
            return Err(KillSwitchError::InvalidOperatorAction {
                action,
                state: inner.state,
            });
        }
        if to == KillSwitchState::Running {
            inner.last_heartbeat = Instant::now();
        }
        Ok(self.transition_locked(
            &mut inner,
            to,
            TransitionCause::Operator {
                operator: operator.to_string(),
                action: action.to_string(),
            },
        ))
    }

    pub fn heartbeat(&self) {
        self.lock().last_heartbeat = Instant::now();
    }

    /// Escalate when the watchdog window passed without a heartbeat.
    pub fn check_watchdog(&self) -> Option<KillSwitchTransition> {
        self.check_watchdog_at(Instant::now())
    }

    pub fn check_watchdog_at(&self, now: Instant) -> Option<KillSwitchTransition> {
        let timeout_ms = self.config.watchdog_ms?;
        let mut inner = self.lock();
        if inner.state.aborts_in_flight() {
            return None;
        }
        let silent = now.saturating_duration_since(inner.last_heartbeat);
        if silent <= Duration::from_millis(timeout_ms) {
            return None;
        }
        let fault = KillSwitchFault::WatchdogExpired { timeout_ms };
        tracing::error!(%fault, "kill switch fault");
        self.escalate_locked(
            &mut inner,
            KillSwitchState::HardStopped,
            TransitionCause::Fault(fault),
        )
    }

    /// Record that a channel listener is live.
    pub fn arm_channel(&self, channel: ChannelKind) {
        tracing::info!(%channel, "kill switch channel armed");
        self.lock().armed.insert(channel);
    }

    /// A listener died. Losing a channel is a fault.
    pub fn channel_lost(
        &self,
        channel: ChannelKind,
        detail: impl Into<String>,
    ) -> Option<KillSwitchTransition> {
        self.lock().armed.remove(&channel);
        self.fault(KillSwitchFault::ChannelUnreachable {
            channel,
            detail: detail.into(),
        })
    }

    pub fn armed_channels(&self) -> Vec<ChannelKind> {
        self.lock().armed.iter().copied().collect()
    }

    /// Run-start check of the physical-channel mandate.
    pub fn verify_channels(&self) -> Result<(), KillSwitchFault> {
        if !self.config.require_physical_channel {
            return Ok(());
        }
        let armed = self.lock().armed.iter().any(|c| c.is_physical());
        if armed {
            return Ok(());
        }
        let fault = KillSwitchFault::PhysicalChannelMissing;
        self.fault(fault.clone());
        Err(fault)
    }

    /// Block until the epoch moves past `since_epoch` or `timeout` elapses.
    pub fn wait_for_change(&self, since_epoch: u64, timeout: Duration) -> KillSwitchSnapshot {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |inner| inner.epoch == since_epoch)
            .unwrap_or_else(PoisonError::into_inner);
        guard.snapshot()
    }

    /// Receive every future transition.
    pub fn subscribe(&self) -> Receiver<KillSwitchTransition> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn history(&self) -> Vec<KillSwitchTransition> {
        self.lock().history.clone()
    }

    pub fn transitions_since(&self, epoch: u64) -> Vec<KillSwitchTransition> {
        self.lock()
            .history
            .iter()
            .filter(|t| t.epoch > epoch)
            .cloned()
            .collect()
    }

    /// A cancellation token bound to this switch, with an optional deadline.
    pub fn token(self: &Arc<Self>, timeout: Option<Duration>) -> CancelToken {
        CancelToken::new(Arc::clone(self), timeout)
    }
}
