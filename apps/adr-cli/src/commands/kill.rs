// kill.rs — `adr kill` and `adr status`: talk to a running daemon.
//
// The endpoint comes from the flags when given, otherwise from the channels
// the project's policy configures: the named pipe first, then loopback HTTP.
// Commands are checked against the vocabulary before anything is sent, since
// the daemon treats an unknown command as a fault and hard-stops.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adr_daemon::DaemonConfig;
use adr_killswitch::{ChannelSpec, KillCommand};
use anyhow::{anyhow, bail, Context};
use clap::{Args, ValueEnum};
use serde_json::Value;

use super::load_policy;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Via {
    Pipe,
    Http,
}

#[derive(Args)]
pub struct KillArgs {
    /// One of: soft_stop, hard_stop, freeze, resume, heartbeat.
    pub command: String,
    /// Channel to use (defaults to the first one the policy configures).
    #[arg(long, value_enum)]
    pub via: Option<Via>,
    /// Unix socket of the named-pipe channel.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Port of the loopback HTTP channel.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Port of the loopback HTTP channel.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Endpoint {
    Pipe(PathBuf),
    Http(u16),
}

pub fn kill(args: &KillArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let command: KillCommand = args.command.parse().map_err(|_| {
        anyhow!(
            "unknown command '{}'; expected soft_stop, hard_stop, freeze, resume or heartbeat",
            args.command
        )
    })?;

    let endpoint = match (&args.socket, args.port) {
        (Some(path), _) => Endpoint::Pipe(path.clone()),
        (None, Some(port)) => Endpoint::Http(port),
        (None, None) => {
            let policy = load_policy(config)?;
            configured_endpoint(&policy.kill_switch.channels, args.via, config)?
        }
    };

    let (state, epoch) = match &endpoint {
        Endpoint::Pipe(path) => send_pipe(path, command)?,
        Endpoint::Http(port) => send_http(*port, command)?,
    };
    println!("{} sent. Kill switch: {} (epoch {})", command.as_str(), state, epoch);
    Ok(())
}

pub fn status(args: &StatusArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let port = match args.port {
        Some(port) => port,
        None => {
            let policy = load_policy(config)?;
            match configured_endpoint(&policy.kill_switch.channels, Some(Via::Http), config)? {
                Endpoint::Http(port) => port,
                Endpoint::Pipe(_) => bail!("status needs the local_http channel"),
            }
        }
    };
    let body: Value = client()?
        .get(format!("http://127.0.0.1:{}/status", port))
        .send()
        .with_context(|| format!("connecting to 127.0.0.1:{}", port))?
        .json()?;
    let (state, epoch) = state_of(&body)?;
    println!("Kill switch: {} (epoch {})", state, epoch);
    Ok(())
}

pub(super) fn configured_endpoint(
    channels: &[ChannelSpec],
    via: Option<Via>,
    config: &DaemonConfig,
) -> anyhow::Result<Endpoint> {
    let pipe = channels.iter().find_map(|c| match c {
        ChannelSpec::LocalNamedPipe { path } if path.is_absolute() => {
            Some(Endpoint::Pipe(path.clone()))
        }
        ChannelSpec::LocalNamedPipe { path } => {
            Some(Endpoint::Pipe(config.project_root.join(path)))
        }
        _ => None,
    });
    let http = channels.iter().find_map(|c| match c {
        ChannelSpec::LocalHttp { port } => Some(Endpoint::Http(*port)),
        _ => None,
    });
    let found = match via {
        Some(Via::Pipe) => pipe,
        Some(Via::Http) => http,
        None => pipe.or(http),
    };
    found.ok_or_else(|| {
        anyhow!(
            "policy {} configures no matching kill-switch channel; pass --socket or --port",
            config.policy.display()
        )
    })
}

fn send_pipe(path: &Path, command: KillCommand) -> anyhow::Result<(String, u64)> {
    let mut stream = UnixStream::connect(path)
        .with_context(|| format!("connecting to {}", path.display()))?;
    stream.set_read_timeout(Some(TIMEOUT))?;
    stream.write_all(format!("{}\n", command.as_str()).as_bytes())?;
    let mut reply = String::new();
    BufReader::new(&stream).read_line(&mut reply)?;
    parse_pipe_reply(&reply)
}

/// `ok <state> <epoch>` or `fault <reason>`.
fn parse_pipe_reply(reply: &str) -> anyhow::Result<(String, u64)> {
    let reply = reply.trim();
    if let Some(reason) = reply.strip_prefix("fault ") {
        bail!("kill switch fault: {}", reason);
    }
    let mut parts = reply.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("ok"), Some(state), Some(epoch), None) => Ok((
            state.to_string(),
            epoch
                .parse()
                .with_context(|| format!("bad epoch in reply '{}'", reply))?,
        )),
        _ => bail!("unexpected reply from daemon: '{}'", reply),
    }
}

fn send_http(port: u16, command: KillCommand) -> anyhow::Result<(String, u64)> {
    let response = client()?
        .post(format!("http://127.0.0.1:{}/kill/{}", port, command.as_str()))
        .send()
        .with_context(|| format!("connecting to 127.0.0.1:{}", port))?;
    let code = response.status();
    let body: Value = response.json()?;
    if !code.is_success() {
        let reason = body
            .get("fault")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("no detail");
        bail!("daemon refused {} ({}): {}", command.as_str(), code, reason);
    }
    state_of(&body)
}

fn state_of(body: &Value) -> anyhow::Result<(String, u64)> {
    let state = body
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("reply has no state: {}", body))?;
    let epoch = body.get("epoch").and_then(Value::as_u64).unwrap_or(0);
    Ok((state.to_string(), epoch))
}

pub(super) fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder().timeout(TIMEOUT).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    fn channels() -> Vec<ChannelSpec> {
        vec![
            ChannelSpec::UnixSignal,
            ChannelSpec::LocalHttp { port: 7431 },
            ChannelSpec::LocalNamedPipe {
                path: PathBuf::from("run/kill.sock"),
            },
        ]
    }

    #[test]
    fn pipe_is_preferred_and_resolved_against_root() {
        let config = DaemonConfig::for_project("/plant");
        let endpoint = configured_endpoint(&channels(), None, &config).unwrap();
        assert_eq!(endpoint, Endpoint::Pipe(PathBuf::from("/plant/run/kill.sock")));
    }

    #[test]
    fn via_selects_channel() {
        let config = DaemonConfig::for_project("/plant");
        let endpoint = configured_endpoint(&channels(), Some(Via::Http), &config).unwrap();
        assert_eq!(endpoint, Endpoint::Http(7431));
    }

    #[test]
    fn missing_channel_is_an_error() {
        let config = DaemonConfig::for_project("/plant");
        assert!(configured_endpoint(&[ChannelSpec::UnixSignal], None, &config).is_err());
    }

    #[test]
    fn pipe_replies_parse() {
        assert_eq!(
            parse_pipe_reply("ok hard_stopped 3\n").unwrap(),
            ("hard_stopped".to_string(), 3)
        );
        let err = parse_pipe_reply("fault unknown kill command 'stop'\n").unwrap_err();
        assert!(err.to_string().contains("unknown kill command"));
        assert!(parse_pipe_reply("ok").is_err());
    }

    #[test]
    fn unknown_command_is_rejected_before_sending() {
        let dir = tempdir().unwrap();
        let args = KillArgs {
            command: "stop".to_string(),
            via: None,
            socket: Some(dir.path().join("missing.sock")),
            port: None,
        };
        let err = kill(&args, &DaemonConfig::for_project(dir.path())).unwrap_err();
        assert!(err.to_string().contains("unknown command 'stop'"));
    }

    #[test]
    fn sends_over_named_pipe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kill.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(&stream).read_line(&mut line).unwrap();
            (&stream).write_all(b"ok emergency_frozen 1\n").unwrap();
            line
        });

        let (state, epoch) = send_pipe(&path, KillCommand::Freeze).unwrap();
        assert_eq!(state, "emergency_frozen");
        assert_eq!(epoch, 1);
        assert_eq!(server.join().unwrap(), "freeze\n");
    }
}
