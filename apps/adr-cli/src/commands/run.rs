// run.rs — `adr approve` and `adr grant`: feed the daemon's supervised run.
//
// Both go over loopback HTTP. The daemon answers 409 when no run is
// attached, which is reported as an error rather than retried.

use adr_daemon::DaemonConfig;
use anyhow::{anyhow, bail, Context};
use clap::Args;
use serde_json::{json, Value};

use super::kill::{client, configured_endpoint, Endpoint, Via};
use super::load_policy;

#[derive(Args)]
pub struct ApproveArgs {
    /// Node awaiting approval.
    pub node: String,
    /// Identity recorded on the approval.
    #[arg(long)]
    pub operator: String,
    /// Free-text note stored with the approval.
    #[arg(long)]
    pub note: Option<String>,
    /// Port of the loopback HTTP channel.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct GrantArgs {
    /// Capability to add to the run's context, e.g. `fs.write:out/**`.
    pub capability: String,
    /// Port of the loopback HTTP channel.
    #[arg(long)]
    pub port: Option<u16>,
}

pub fn approve(args: &ApproveArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let operator = args.operator.trim();
    if operator.is_empty() {
        bail!("--operator must name who approves");
    }
    let port = http_port(args.port, config)?;
    let mut body = json!({ "operator": operator });
    if let Some(note) = &args.note {
        body["note"] = json!(note);
    }
    post(port, &format!("/run/approve/{}", args.node), &body)?;
    println!("Approval for '{}' by {} delivered.", args.node, operator);
    Ok(())
}

pub fn grant(args: &GrantArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    if args.capability.trim().is_empty() {
        bail!("capability must not be empty");
    }
    let port = http_port(args.port, config)?;
    post(port, "/run/grant", &json!({ "capability": args.capability }))?;
    println!("Grant of '{}' delivered.", args.capability);
    Ok(())
}

fn http_port(port: Option<u16>, config: &DaemonConfig) -> anyhow::Result<u16> {
    if let Some(port) = port {
        return Ok(port);
    }
    let policy = load_policy(config)?;
    match configured_endpoint(&policy.kill_switch.channels, Some(Via::Http), config)? {
        Endpoint::Http(port) => Ok(port),
        Endpoint::Pipe(_) => bail!("run events need the local_http channel"),
    }
}

fn post(port: u16, path: &str, body: &Value) -> anyhow::Result<()> {
    let response = client()?
        .post(format!("http://127.0.0.1:{}{}", port, path))
        .json(body)
        .send()
        .with_context(|| format!("connecting to 127.0.0.1:{}", port))?;
    let code = response.status();
    if code.is_success() {
        return Ok(());
    }
    let reply: Value = response.json().unwrap_or(Value::Null);
    let reason = reply
        .get("error")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("daemon refused {} ({})", path, code))?;
    bail!("daemon refused {} ({}): {}", path, code, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blank_operator_is_rejected_before_sending() {
        let dir = tempdir().unwrap();
        let args = ApproveArgs {
            node: "write".to_string(),
            operator: "  ".to_string(),
            note: None,
            port: Some(1),
        };
        let err = approve(&args, &DaemonConfig::for_project(dir.path())).unwrap_err();
        assert!(err.to_string().contains("--operator"));
    }

    #[test]
    fn port_comes_from_the_http_channel() {
        let dir = tempdir().unwrap();
        // No policy file: the defaults configure loopback HTTP.
        let config = DaemonConfig::for_project(dir.path());
        let policy = load_policy(&config).unwrap();
        let expected = policy.kill_switch.channels.iter().find_map(|c| match c {
            adr_killswitch::ChannelSpec::LocalHttp { port } => Some(*port),
            _ => None,
        });
        match expected {
            Some(port) => assert_eq!(http_port(None, &config).unwrap(), port),
            None => assert!(http_port(None, &config).is_err()),
        }
        assert_eq!(http_port(Some(9), &config).unwrap(), 9);
    }
}
