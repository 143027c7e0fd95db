//! Process capability used by a connection attempt.
//!
//! The attempt and shutdown logic only talk to [`ClientProcess`] and
//! [`ClientLauncher`]. Everything platform-specific (which OS signal means
//! "interrupt", how a child is spawned and reaped) lives in the OpenVPN
//! implementation at the bottom of this file.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::buffer::OutputBuffer;
use crate::error::{ProbeError, ProbeResult};
use crate::outcome::EndpointConfig;

/// Default client binary, resolved through `PATH`.
pub const DEFAULT_BINARY: &str = "openvpn";

/// Upper bound on waiting for the pipes to drain once the child has exited.
const PUMP_DRAIN: Duration = Duration::from_secs(2);

/// Polite termination steps, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalLevel {
    /// First request to disconnect (SIGINT on Unix).
    Interrupt,
    /// Second, firmer request (SIGTERM on Unix).
    Terminate,
}

impl fmt::Display for SignalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

/// How a client process ended. `code` is `None` when it died from a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientExit {
    pub code: Option<i32>,
}

impl ClientExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ClientExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ClientExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "termination by signal"),
        }
    }
}

/// A running client owned by exactly one attempt.
#[async_trait]
pub trait ClientProcess: Send {
    /// OS process id while the child is still known to the runtime.
    fn id(&self) -> Option<u32>;

    /// The buffer the child's stdout and stderr are written into.
    fn output(&self) -> OutputBuffer;

    /// Deliver a polite termination request.
    fn signal(&mut self, level: SignalLevel) -> io::Result<()>;

    /// Non-blocking liveness check.
    fn try_wait(&mut self) -> io::Result<Option<ClientExit>>;

    /// Wait for exit. Must be cancel-safe: the attempt races it in `select!`.
    async fn wait(&mut self) -> io::Result<ClientExit>;

    /// Unconditional kill, then reap.
    async fn force_kill(&mut self) -> io::Result<()>;
}

/// Starts a client bound to one endpoint profile.
#[async_trait]
pub trait ClientLauncher: Send + Sync {
    type Process: ClientProcess;

    async fn launch(&self, config: &EndpointConfig) -> ProbeResult<Self::Process>;
}

/// Fixed argument set for a probe: no credential caching, one retry, verbose
/// logs for diagnosis, and never take over the default route.
pub fn client_args(config: &EndpointConfig) -> Vec<std::ffi::OsString> {
    let mut args: Vec<std::ffi::OsString> = vec!["--config".into(), config.path.clone().into()];
    args.extend(
        [
            "--auth-nocache",
            "--connect-retry",
            "1",
            "--connect-retry-max",
            "1",
            "--verb",
            "4",
            "--pull-filter",
            "ignore",
            "redirect-gateway",
        ]
        .into_iter()
        .map(Into::into),
    );
    args
}

/// Launches the system OpenVPN client.
#[derive(Debug, Clone)]
pub struct OpenVpnLauncher {
    binary: PathBuf,
}

impl Default for OpenVpnLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl OpenVpnLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }
}

#[async_trait]
impl ClientLauncher for OpenVpnLauncher {
    type Process = OpenVpnProcess;

    async fn launch(&self, config: &EndpointConfig) -> ProbeResult<OpenVpnProcess> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(client_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProbeError::spawn(self.binary.display().to_string(), e))?;

        let output = OutputBuffer::new();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(output.clone().pump(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(output.clone().pump(stderr)));
        }

        debug!(pid = ?child.id(), binary = %self.binary.display(), "client spawned");
        Ok(OpenVpnProcess {
            child,
            output,
            pumps,
            drain_deadline: None,
        })
    }
}

/// A spawned OpenVPN child and the tasks copying its output.
#[derive(Debug)]
pub struct OpenVpnProcess {
    child: Child,
    output: OutputBuffer,
    pumps: Vec<JoinHandle<()>>,
    /// Fixed the first time the child is seen gone; later waits share it.
    drain_deadline: Option<Instant>,
}

impl OpenVpnProcess {
    /// Wait for the pipe pumps so the buffer holds everything the child wrote.
    ///
    /// Cancel-safe: a pump is only removed after it has completed, and the
    /// drain window does not restart when a dropped wait is polled again.
    async fn drain_pumps(&mut self) {
        let deadline = *self
            .drain_deadline
            .get_or_insert_with(|| Instant::now() + PUMP_DRAIN);
        let drain = async {
            while let Some(pump) = self.pumps.last_mut() {
                let _ = pump.await;
                self.pumps.pop();
            }
        };
        if tokio::time::timeout_at(deadline, drain).await.is_err() {
            // A grandchild may still hold the pipe open.
            warn!("output pumps did not drain after client exit");
            for pump in self.pumps.drain(..) {
                pump.abort();
            }
        }
    }
}

impl Drop for OpenVpnProcess {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

#[async_trait]
impl ClientProcess for OpenVpnProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn output(&self) -> OutputBuffer {
        self.output.clone()
    }

    #[cfg(unix)]
    fn signal(&mut self, level: SignalLevel) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = self
            .child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already reaped"))?;
        let sig = match level {
            SignalLevel::Interrupt => Signal::SIGINT,
            SignalLevel::Terminate => Signal::SIGTERM,
        };
        #[allow(clippy::cast_possible_wrap)]
        kill(Pid::from_raw(pid as i32), sig).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn signal(&mut self, level: SignalLevel) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{level} signal not supported on this platform"),
        ))
    }

    fn try_wait(&mut self) -> io::Result<Option<ClientExit>> {
        Ok(self.child.try_wait()?.map(ClientExit::from))
    }

    async fn wait(&mut self) -> io::Result<ClientExit> {
        let status = self.child.wait().await?;
        self.drain_pumps().await;
        Ok(status.into())
    }

    async fn force_kill(&mut self) -> io::Result<()> {
        self.child.kill().await?;
        self.drain_pumps().await;
        Ok(())
    }
}
