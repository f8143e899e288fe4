use async_trait::async_trait;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

use crate::facts::HostTarget;

/// Failures running a command on a host
#[derive(Debug, Error)]
pub enum ExecError {
    /// The host could not be reached or refused our credentials
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// The session was fine but the command itself failed
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("executor task failed: {0}")]
    Join(String),
}

/// Runs a shell command on a remote host and returns its standard output
#[async_trait]
pub trait HostExecutor: Send + Sync {
    async fn execute(&self, host: &HostTarget, command: &str, timeout: Duration) -> Result<String, ExecError>;
}

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// SSH login used for every host in a run
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub user: String,
    pub pass: String,
    pub port: u16,
}

/// HostExecutor over SSH (libssh2). Each command opens its own session,
/// so concurrent hosts never share a channel.
pub struct SshExecutor {
    credentials: SshCredentials,
    connect_timeout_secs: u64,
}

impl SshExecutor {
    pub fn new(credentials: SshCredentials, connect_timeout_secs: u64) -> Self {
        Self {
            credentials,
            connect_timeout_secs,
        }
    }
}

#[async_trait]
impl HostExecutor for SshExecutor {
    async fn execute(&self, host: &HostTarget, command: &str, timeout: Duration) -> Result<String, ExecError> {
        let addr = host.ip.clone();
        let creds = self.credentials.clone();
        let cmd = command.to_string();
        let connect_timeout = self.connect_timeout_secs;

        let task = tokio::task::spawn_blocking(move || {
            let session = ssh_connect(&addr, &creds, connect_timeout)?;
            ssh_exec(&session, &cmd)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ExecError::Join(e.to_string())),
            Err(_) => Err(ExecError::Timeout {
                command: command.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }
}

/// libssh2 takes its blocking timeout in milliseconds as a `u32`; 0 means none
fn session_timeout_ms(timeout_secs: u64) -> u32 {
    u32::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// This is blocking, so call from a spawn_blocking context.
fn ssh_connect(host: &str, creds: &SshCredentials, timeout_secs: u64) -> Result<ssh2::Session, ExecError> {
    let unreachable = |reason: String| ExecError::Unreachable {
        host: host.to_string(),
        reason,
    };

    let addr = (host, creds.port)
        .to_socket_addrs()
        .map_err(|e| unreachable(format!("Invalid address {}: {}", host, e)))?
        .next()
        .ok_or_else(|| unreachable(format!("No address for {}", host)))?;

    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout_secs))
        .map_err(|e| unreachable(format!("TCP connection failed: {}", e)))?;

    tcp.set_read_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();
    tcp.set_write_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| unreachable(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(session_timeout_ms(timeout_secs));
    session.handshake()
        .map_err(|e| unreachable(format!("SSH handshake failed: {}", e)))?;

    // Try password auth first
    match session.userauth_password(&creds.user, &creds.pass) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    let mut prompter = PasswordPrompt { password: creds.pass.clone() };
    let _ = session.userauth_keyboard_interactive(&creds.user, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(unreachable("SSH authentication failed: all methods exhausted".to_string()))
    }
}

/// Run a single command on an authenticated session
fn ssh_exec(session: &ssh2::Session, command: &str) -> Result<String, ExecError> {
    let failed = |message: String| ExecError::Command {
        command: command.to_string(),
        message,
    };

    let mut channel = session.channel_session()
        .map_err(|e| failed(format!("Failed to open channel: {}", e)))?;

    channel.exec(command)
        .map_err(|e| failed(format!("Failed to execute command: {}", e)))?;

    let mut output = String::new();
    channel.read_to_string(&mut output)
        .map_err(|e| failed(format!("Failed to read output: {}", e)))?;

    let mut stderr = String::new();
    let _ = channel.stderr().read_to_string(&mut stderr);

    channel.wait_close()
        .map_err(|e| failed(format!("Failed to close channel: {}", e)))?;

    match channel.exit_status() {
        Ok(0) => Ok(output),
        Ok(code) => Err(failed(format!("exit status {}: {}", code, stderr.trim()))),
        Err(e) => Err(failed(format!("Failed to read exit status: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_timeout_saturates() {
        assert_eq!(session_timeout_ms(30), 30_000);
        assert_eq!(session_timeout_ms(4_294_967), 4_294_967_000);
        assert_eq!(session_timeout_ms(4_294_968), u32::MAX);
        assert_eq!(session_timeout_ms(u64::MAX), u32::MAX);
    }
}
