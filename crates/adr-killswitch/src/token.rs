// token.rs — Cooperative cancellation bound to the kill switch.
//
// Handlers call `check()` (or sleep through `sleep()`) at their
// cancellation points. A token fires on HardStopped, EmergencyFrozen, or
// when its node deadline passes. SoftStopping does not fire it: in-flight
// nodes finish and are compensated afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Cancelled;
use crate::state::KillSwitchState;
use crate::switch::KillSwitch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    switch: Arc<KillSwitch>,
    deadline: Option<(Instant, u64)>,
}

impl CancelToken {
    pub(crate) fn new(switch: Arc<KillSwitch>, timeout: Option<Duration>) -> Self {
        let deadline = timeout.map(|t| (Instant::now() + t, t.as_millis() as u64));
        Self { switch, deadline }
    }

    /// Return `Err` if the node must stop now.
    pub fn check(&self) -> Result<(), Cancelled> {
        match self.switch.state() {
            KillSwitchState::HardStopped => return Err(Cancelled::HardStop),
            KillSwitchState::EmergencyFrozen => return Err(Cancelled::Freeze),
            _ => {}
        }
        if let Some((at, timeout_ms)) = self.deadline {
            if Instant::now() >= at {
                return Err(Cancelled::Deadline { timeout_ms });
            }
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// True while a soft stop is pending. Handlers may use it to wrap up early.
    pub fn soft_stop_requested(&self) -> bool {
        self.switch.state() == KillSwitchState::SoftStopping
    }

    /// Sleep for `duration`, waking early on any kill-switch transition.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut wake = until;
            if let Some((at, _)) = self.deadline {
                wake = wake.min(at);
            }
            let epoch = self.switch.epoch();
            // Re-check after reading the epoch so a transition between the
            // two reads is not slept through.
            self.check()?;
            self.switch
                .wait_for_change(epoch, wake.saturating_duration_since(now));
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }
}
