use std::os::unix::process::ExitStatusExt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::broker::BrokerEndpoint;
use crate::error::{LaunchError, Result};
use crate::session::transport::{batch_script, Transport};

/// How long output is still collected after a session's shell has exited.
/// Background workers of the same batch may keep the pipes open.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Exit of a batch's shell and everything it printed after the pgid line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionExit {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub output: String,
}

impl SessionExit {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Shell-style status: the exit code, or 128 + signal number.
    pub fn status_code(&self) -> i32 {
        match (self.exit_code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

/// One shell invocation carrying the worker batch for one host.
#[derive(Debug)]
pub struct RemoteSession {
    pub host: String,
    pub worker_ids: Vec<usize>,
    pub started_at: DateTime<Utc>,
    pgid: Option<i32>,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<ChildStderr>,
    torn_down: bool,
}

impl RemoteSession {
    /// Start `command` without waiting for it.
    pub fn spawn(host: impl Into<String>, worker_ids: Vec<usize>, mut command: Command) -> Result<Self> {
        let host = host.into();
        let mut child = command.spawn().map_err(|source| LaunchError::SessionSpawn {
            host: host.clone(),
            source,
        })?;
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take();

        Ok(Self {
            host,
            worker_ids,
            started_at: Utc::now(),
            pgid: None,
            child: Some(child),
            stdout,
            stderr,
            torn_down: false,
        })
    }

    /// A session whose process never started. It has no pgid and cannot be cleaned up.
    pub fn failed(host: impl Into<String>, worker_ids: Vec<usize>) -> Self {
        Self {
            host: host.into(),
            worker_ids,
            started_at: Utc::now(),
            pgid: None,
            child: None,
            stdout: None,
            stderr: None,
            torn_down: false,
        }
    }

    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    pub fn is_started(&self) -> bool {
        self.child.is_some()
    }

    pub fn carries(&self, worker_id: usize) -> bool {
        self.worker_ids.contains(&worker_id)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Read the first output line as the process group id.
    ///
    /// Reads at most once; later calls return the stored value. A missing or
    /// malformed line leaves the session without a pgid.
    pub async fn read_pgid(&mut self) -> Option<i32> {
        if self.pgid.is_some() {
            return self.pgid;
        }
        let stdout = self.stdout.as_mut()?;

        let mut line = String::new();
        match stdout.read_line(&mut line).await {
            Ok(0) => {
                tracing::warn!(host = %self.host, "Session closed before reporting its pgid");
            }
            Ok(_) => match parse_pgid(&line) {
                Some(pgid) => {
                    tracing::debug!(host = %self.host, pgid, "Captured session pgid");
                    self.pgid = Some(pgid);
                }
                None => {
                    tracing::warn!(host = %self.host, line = %line.trim(), "Unparseable pgid line");
                }
            },
            Err(e) => {
                tracing::warn!(host = %self.host, error = %e, "Failed to read session pgid");
            }
        }
        self.pgid
    }

    /// Wait for the session's shell to exit and collect its combined output.
    pub async fn wait(&mut self) -> Result<SessionExit> {
        let host = self.host.clone();
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| LaunchError::OriginUnavailable(host.clone()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = self.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = self.stderr.take() {
            tokio::spawn(forward_lines(BufReader::new(stderr), tx.clone()));
        }
        drop(tx);

        let status = child.wait().await?;

        let mut output = String::new();
        let deadline = tokio::time::Instant::now() + OUTPUT_GRACE;
        while let Ok(Some(line)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            output.push_str(&line);
            output.push('\n');
        }

        let exit = SessionExit {
            exit_code: status.code(),
            signal: status.signal(),
            output,
        };
        tracing::info!(
            host = %host,
            exit_code = ?exit.exit_code,
            signal = ?exit.signal,
            "Session exited"
        );
        Ok(exit)
    }

    /// Log the rest of the session's output at debug level so the remote
    /// side never blocks on a full pipe.
    pub fn drain_output(&mut self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = self.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = self.stderr.take() {
            tokio::spawn(forward_lines(BufReader::new(stderr), tx.clone()));
        }
        drop(tx);

        let host = self.host.clone();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                tracing::debug!(host = %host, "{}", line);
            }
        });
    }

    /// Returns `true` the first time only.
    pub fn mark_torn_down(&mut self) -> bool {
        !std::mem::replace(&mut self.torn_down, true)
    }

    /// Kill the local end of the session (the shell or ssh client).
    pub fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(host = %self.host, error = %e, "Session process already gone");
            }
        }
    }
}

/// ESRCH as reported by the `kill` of dash, bash or procps.
fn is_no_such_process(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such process")
}

fn parse_pgid(line: &str) -> Option<i32> {
    line.trim().parse().ok().filter(|pgid| *pgid > 0)
}

async fn forward_lines<R>(reader: BufReader<R>, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// How a process group kill ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Killed,
    /// The group had no members left; its batch had already finished.
    AlreadyGone,
}

/// Starts worker batches and terminates their process groups.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    transport: Transport,
    tunnel: bool,
}

impl SessionTracker {
    pub fn new(transport: Transport, tunnel: bool) -> Self {
        Self { transport, tunnel }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Start one session running every command of the batch concurrently.
    ///
    /// The session is fired and not awaited; its pgid line and exit are read
    /// later by the coordinator.
    pub fn launch_batch(
        &self,
        host: &str,
        worker_ids: Vec<usize>,
        commands: &[String],
        broker: &BrokerEndpoint,
    ) -> Result<RemoteSession> {
        let script = batch_script(commands);
        let tunnel = (self.tunnel && !self.transport.is_local(host)).then_some(broker);
        let command = self.transport.session_command(host, &script, tunnel);

        tracing::info!(
            host,
            workers = commands.len(),
            tunnel = tunnel.is_some(),
            local = self.transport.is_local(host),
            "Launching worker batch"
        );
        RemoteSession::spawn(host, worker_ids, command)
    }

    /// Send SIGKILL to every process of group `pgid` on `host`.
    ///
    /// A group that no longer exists is not an error.
    pub async fn terminate(&self, host: &str, pgid: i32) -> Result<Termination> {
        let output = self
            .transport
            .kill_command(host, pgid)
            .output()
            .await
            .map_err(|e| LaunchError::Terminate {
                host: host.to_string(),
                pgid,
                reason: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            tracing::info!(host, pgid, "Process group terminated");
            Ok(Termination::Killed)
        } else if is_no_such_process(&stderr) {
            tracing::debug!(host, pgid, "Process group already gone");
            Ok(Termination::AlreadyGone)
        } else {
            Err(LaunchError::Terminate {
                host: host.to_string(),
                pgid,
                reason: if stderr.is_empty() {
                    format!("Exit code: {:?}", output.status.code())
                } else {
                    stderr
                },
            })
        }
    }
}
