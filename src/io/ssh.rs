//! Remote command execution over SSH.
//!
//! Mirrors the `ssh` CLI's credential behavior: every private key under
//! `~/.ssh/id_*` is offered in turn, public-key files are skipped, and keys
//! the library cannot use are skipped with a warning rather than failing the
//! attempt. Host keys are checked against `~/.ssh/known_hosts` unless the
//! session explicitly opts out.
//!
//! Like local execution, every call yields a result string; connection,
//! authentication, and command failures are folded into the text so one bad
//! target never aborts sibling commands.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use tracing::{debug, info, warn};

use crate::core::remote::RemoteTarget;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SSH_PORT: u16 = 22;

/// How a remote session authenticates and whether it trusts unknown hosts.
#[derive(Debug, Clone)]
pub struct SshAuth {
    /// Candidate private key files, tried in order.
    pub private_keys: Vec<PathBuf>,
    /// Skip known_hosts verification. Only for short-lived diagnostics
    /// against hosts you already trust.
    pub accept_unknown_hosts: bool,
}

impl SshAuth {
    /// Discover private keys on the default credential search path
    /// (`~/.ssh/id_*`, excluding `*.pub`).
    pub fn discover(accept_unknown_hosts: bool) -> Self {
        let private_keys = default_private_keys();
        debug!(count = private_keys.len(), "discovered candidate ssh keys");
        Self {
            private_keys,
            accept_unknown_hosts,
        }
    }
}

fn default_private_keys() -> Vec<PathBuf> {
    let Some(ssh_dir) = dirs::home_dir().map(|home| home.join(".ssh")) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(&ssh_dir) else {
        return Vec::new();
    };
    let mut keys: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.starts_with("id_") && path.extension().and_then(|e| e.to_str()) != Some("pub")
        })
        .collect();
    keys.sort();
    keys
}

/// Run `command` on `target`, returning captured output with any failure
/// folded in as text.
pub fn run_remote_command(
    target: &RemoteTarget,
    auth: &SshAuth,
    command: &str,
    timeout: Duration,
) -> String {
    info!(target = %target, command, "running remote command");
    match run_remote_command_inner(target, auth, command, timeout) {
        Ok(output) => output,
        Err(err) => {
            warn!(target = %target, command, %err, "remote command failed");
            format!("[{}] {err:#}", target.host)
        }
    }
}

fn run_remote_command_inner(
    target: &RemoteTarget,
    auth: &SshAuth,
    command: &str,
    timeout: Duration,
) -> Result<String> {
    let session = connect(target, auth, timeout)?;

    let mut channel = session
        .channel_session()
        .context("failed to create session")?;
    channel.exec(command).context("failed to run command")?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .context("read remote stdout")?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .context("read remote stderr")?;
    output.push_str(&stderr);

    channel.wait_close().context("close remote channel")?;
    let exit_status = channel.exit_status().context("read remote exit status")?;
    if exit_status != 0 {
        return Ok(format!(
            "[{}] {}\n[ERROR] exited with status {exit_status}",
            target.host,
            output.trim_end()
        ));
    }
    Ok(output)
}

fn connect(target: &RemoteTarget, auth: &SshAuth, timeout: Duration) -> Result<Session> {
    // The parsed port is carried on the target but the transport still dials
    // the standard port; see core::remote::RemoteTarget.
    let addr = (target.host.as_str(), SSH_PORT)
        .to_socket_addrs()
        .with_context(|| format!("failed to connect: resolve {}", target.host))?
        .next()
        .ok_or_else(|| anyhow!("failed to connect: no address for {}", target.host))?;
    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("failed to connect to {}", target.host))?;

    let mut session = Session::new().context("failed to create session")?;
    session.set_timeout(timeout.as_millis().min(u128::from(u32::MAX)) as u32);
    session.set_tcp_stream(tcp);
    session.handshake().context("ssh handshake failed")?;

    if auth.accept_unknown_hosts {
        warn!(host = %target.host, "host-key verification disabled for this session");
    } else {
        verify_host_key(&session, &target.host)?;
    }

    authenticate(&session, &target.user, &auth.private_keys)?;
    Ok(session)
}

fn verify_host_key(session: &Session, host: &str) -> Result<()> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| anyhow!("server offered no host key"))?;

    let mut known_hosts = session.known_hosts().context("init known_hosts")?;
    let path = dirs::home_dir()
        .map(|home| home.join(".ssh").join("known_hosts"))
        .ok_or_else(|| anyhow!("cannot locate known_hosts (no home directory)"))?;
    known_hosts
        .read_file(&path, KnownHostFileKind::OpenSSH)
        .with_context(|| format!("read {}", path.display()))?;

    match known_hosts.check(host, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(anyhow!(
            "host key mismatch for {host}: possible man-in-the-middle, refusing"
        )),
        CheckResult::NotFound => Err(anyhow!(
            "{host} is not in known_hosts; connect once with ssh, or opt in to accept-unknown-hosts"
        )),
        CheckResult::Failure => Err(anyhow!("host key check failed for {host}")),
    }
}

fn authenticate(session: &Session, user: &str, keys: &[PathBuf]) -> Result<()> {
    for key in keys {
        match session.userauth_pubkey_file(user, None, key, None) {
            Ok(()) => {
                debug!(key = %key.display(), user, "authenticated with key");
                return Ok(());
            }
            Err(err) => {
                warn!(key = %key.display(), %err, "key not accepted, trying next");
            }
        }
    }
    if session.authenticated() {
        return Ok(());
    }
    Err(anyhow!(
        "authentication failed for {user}: none of {} local keys were accepted",
        keys.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connection failures come back as result text, not panics or errors.
    #[test]
    fn unreachable_host_folds_into_result_text() {
        let target: RemoteTarget = "nobody@192.0.2.1".parse().expect("parse");
        let auth = SshAuth {
            private_keys: Vec::new(),
            accept_unknown_hosts: true,
        };
        let out = run_remote_command(&target, &auth, "uptime", Duration::from_millis(200));
        assert!(out.starts_with("[192.0.2.1]"));
    }

    #[test]
    fn discover_skips_missing_ssh_dir_gracefully() {
        // Discovery must never fail, whatever the host looks like.
        let auth = SshAuth::discover(false);
        assert!(auth.private_keys.iter().all(|k| {
            k.extension().and_then(|e| e.to_str()) != Some("pub")
        }));
    }
}
