//! # adr-daemon
//!
//! Hosting for the kill switch: the `.adr/` project layout, the external
//! stop channels and supervised runs. The `adr-daemon` binary wires these
//! together; the `adr` CLI reuses [`config::DaemonConfig`] to find the
//! policy, the action log and the channel endpoints.

pub mod channels;
pub mod config;
pub mod supervisor;

pub use config::DaemonConfig;
pub use supervisor::{Delivery, DryRunHandler, RunInbox, Supervised};
