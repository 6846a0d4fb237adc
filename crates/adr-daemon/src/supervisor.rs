// supervisor.rs — A supervised run inside the daemon.
//
// The run itself is synchronous, so it lives on a blocking thread. Kill
// switch transitions are forwarded into its event channel, and so is
// everything posted to the run inbox (approvals, grants) while it waits.
// Grants and approvals given on the command line are applied before the
// first pass.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use adr_audit::SharedActionLog;
use adr_graph::{NodeId, ValidatedGraph, ValidatedNode};
use adr_killswitch::{CancelToken, KillSwitch};
use adr_policy::{Capability, PolicyConstraintSet};
use adr_runtime::{
    forward_kill_switch, ActionHandler, FixedScore, HandlerError, Run, RunEvent, RunParts,
    RunReport,
};
use anyhow::Result;
use tokio::task::JoinHandle;

/// Performs no real effects. Each node holds for `step`, honouring the
/// cancellation token, and reports what it would have done.
pub struct DryRunHandler {
    pub step: Duration,
}

impl ActionHandler for DryRunHandler {
    fn execute(&self, node: &ValidatedNode, token: &CancelToken) -> Result<(), HandlerError> {
        let effects: Vec<&str> = node.effects.iter().map(|e| e.as_str()).collect();
        tracing::info!(node = %node.id, ?effects, "dry run: executing");
        token.sleep(self.step)?;
        Ok(())
    }

    fn compensate(
        &self,
        node: &ValidatedNode,
        compensation: &str,
        _token: &CancelToken,
    ) -> Result<(), HandlerError> {
        tracing::info!(node = %node.id, compensation, "dry run: compensating");
        Ok(())
    }
}

/// Outcome of posting an event to the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No run attached, or the run already finished.
    NoRun,
}

/// Operator events for the supervised run. Empty until a run is attached
/// and again once it has finished.
#[derive(Clone, Default)]
pub struct RunInbox {
    sender: Arc<Mutex<Option<Sender<RunEvent>>>>,
}

impl RunInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Sender<RunEvent>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn attach(&self, sender: Sender<RunEvent>) {
        *self.slot() = Some(sender);
    }

    pub fn detach(&self) {
        self.slot().take();
    }

    pub fn is_attached(&self) -> bool {
        self.slot().is_some()
    }

    pub fn send(&self, event: RunEvent) -> Delivery {
        let mut slot = self.slot();
        let Some(sender) = slot.as_ref() else {
            return Delivery::NoRun;
        };
        if sender.send(event).is_err() {
            slot.take();
            return Delivery::NoRun;
        }
        Delivery::Delivered
    }
}

pub struct Supervised {
    pub graph: Arc<ValidatedGraph>,
    pub policy: Arc<PolicyConstraintSet>,
    pub switch: Arc<KillSwitch>,
    pub log: SharedActionLog,
    pub semantic_score: f64,
    pub step: Duration,
    pub grants: Vec<Capability>,
    pub approvals: Vec<String>,
    pub operator: Option<String>,
}

/// Start the run on a blocking thread and attach it to `inbox`. Resolves
/// when the run reaches a terminal state.
pub fn spawn(supervised: Supervised, inbox: RunInbox) -> JoinHandle<Result<RunReport>> {
    tokio::task::spawn_blocking(move || {
        let Supervised {
            graph,
            policy,
            switch,
            log,
            semantic_score,
            step,
            grants,
            approvals,
            operator,
        } = supervised;

        let mut run = Run::start(RunParts {
            graph,
            policy,
            switch: Arc::clone(&switch),
            log,
            handler: Arc::new(DryRunHandler { step }),
            scorer: Arc::new(FixedScore(semantic_score)),
        })?;
        tracing::info!(run_id = %run.id(), context = run.context(), "supervised run started");

        for capability in grants {
            run.grant(capability)?;
        }
        match operator {
            Some(operator) => {
                for node in approvals {
                    run.approve(
                        &NodeId::new(node),
                        &operator,
                        Some("approved at daemon start".to_string()),
                    )?;
                }
            }
            None if !approvals.is_empty() => {
                tracing::warn!("approvals given without --operator; ignored");
            }
            None => {}
        }

        let (tx, rx) = mpsc::channel();
        let _forwarder = forward_kill_switch(&switch, tx.clone());
        inbox.attach(tx);
        let report = run.drive(&rx);
        inbox.detach();
        Ok(report?)
    })
}
