//! Channels to the backup authority.
//!
//! Every authority command runs as a child process whose stdin and stdout
//! form the two directions of the channel. The child's stderr goes straight
//! to the operator. The process either runs locally or behind `ssh` on the
//! configured host.

pub mod privilege;

use crate::config::ServerConfig;
use crate::utils::errors::{AgentError, Result};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Environment inherited from an SSH login that must not leak into children
const SESSION_ENV: [&str; 2] = ["SSH_CLIENT", "SSH_CONNECTION"];

/// How authority commands are launched.
pub trait Transport: Send + Sync {
    /// Build the invocation of `subcommand` with its arguments.
    fn command(&self, subcommand: &str, args: &[String]) -> Command;

    /// Spawn `subcommand` with stdin and stdout captured.
    fn open(&self, subcommand: &str, args: &[String]) -> Result<Session> {
        let mut command = self.command(subcommand, args);
        for key in SESSION_ENV {
            command.env_remove(key);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(command = ?command.as_std(), "Opening session");
        let child = command.spawn().map_err(|source| AgentError::Spawn {
            command: subcommand.to_string(),
            source,
        })?;

        Ok(Session {
            name: subcommand.to_string(),
            child,
        })
    }
}

/// A running authority command
#[derive(Debug)]
pub struct Session {
    name: String,
    child: Child,
}

impl Session {
    /// Write side of the channel. Dropping it signals end of input.
    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child
            .stdin
            .take()
            .ok_or_else(|| not_captured(&self.name, "stdin"))
    }

    /// Read side of the channel.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| not_captured(&self.name, "stdout"))
    }

    /// Wait for the command to exit. Anything but a clean exit is an error.
    pub async fn wait(mut self) -> Result<()> {
        let status = self.child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(AgentError::ExitStatus {
                command: self.name,
                status,
            })
        }
    }
}

fn not_captured(name: &str, stream: &str) -> AgentError {
    AgentError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("{} of {} is not available", stream, name),
    ))
}

/// Runs the authority as a local child process.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl LocalTransport {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the subcommand, for programs started through
    /// an interpreter or launcher.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Transport for LocalTransport {
    fn command(&self, subcommand: &str, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args).arg(subcommand).args(args);
        command
    }
}

/// Runs the authority on a remote host through `ssh`.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub program: String,
    /// Passed as `-protocol` when nonzero
    pub protocol: u32,
}

impl SshTransport {
    fn ssh_options(&self) -> Vec<String> {
        let mut options: Vec<String> = [
            "-q",
            "-C",
            "-oBatchMode=yes",
            "-oStrictHostKeyChecking=no",
            "-oUserKnownHostsFile=/dev/null",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(user) = &self.user {
            options.push("-l".to_string());
            options.push(user.clone());
        }
        if let Some(port) = self.port.filter(|p| *p > 0) {
            options.push("-p".to_string());
            options.push(port.to_string());
        }
        options
    }
}

impl Transport for SshTransport {
    fn command(&self, subcommand: &str, args: &[String]) -> Command {
        let mut command = Command::new("ssh");
        command
            .args(self.ssh_options())
            .arg(&self.host)
            .arg(&self.program)
            .arg(subcommand);
        if self.protocol > 0 {
            command.arg("-protocol").arg(self.protocol.to_string());
        }
        command.args(args);
        command
    }
}

/// Pick the transport the configuration asks for.
pub fn from_config(server: &ServerConfig) -> Result<Box<dyn Transport>> {
    match &server.host {
        Some(host) => Ok(Box::new(SshTransport {
            host: host.clone(),
            user: server.user.clone(),
            port: server.port,
            program: server.program.clone(),
            protocol: server.protocol,
        })),
        None => match &server.local_program {
            Some(program) => Ok(Box::new(LocalTransport::new(program))),
            None => Err(AgentError::Config(
                "server.local_program must be set when no server host is configured".to_string(),
            )),
        },
    }
}

/// Arguments for installing the operator's key on the authority host.
pub fn copy_id_args(server: &ServerConfig) -> Result<Vec<String>> {
    let host = server
        .host
        .as_deref()
        .ok_or_else(|| AgentError::Config("copy-id needs a server host".to_string()))?;

    let mut args: Vec<String> = ["-i", "-oStrictHostKeyChecking=no", "-oUserKnownHostsFile=/dev/null"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(port) = server.port.filter(|p| *p > 0) {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    args.push(match &server.user {
        Some(user) => format!("{}@{}", user, host),
        None => host.to_string(),
    });
    Ok(args)
}

/// Run `ssh-copy-id` against the configured host with the terminal attached.
pub async fn copy_id(server: &ServerConfig) -> Result<()> {
    let args = copy_id_args(server)?;
    let status = Command::new("ssh-copy-id")
        .args(&args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| AgentError::Spawn {
            command: "ssh-copy-id".to_string(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(AgentError::ExitStatus {
            command: "ssh-copy-id".to_string(),
            status,
        })
    }
}
