use std::collections::HashSet;
use std::process::Stdio;

use tokio::process::Command;

use crate::broker::BrokerEndpoint;
use crate::config::TransportConfig;

/// Prints the process group id of the shell running the batch. Falls back to
/// procfs on hosts without `ps`.
pub const PGID_PROBE: &str = "{ ps -o pgid= -p $$ 2>/dev/null || cut -d' ' -f5 /proc/$$/stat; }";

/// Options for a non-interactive session with no pty, no stdin and no
/// host-key prompts. Hosts inside the cluster are trusted.
const SSH_OPTIONS: &[&str] = &[
    "-x",
    "-T",
    "-n",
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

/// Join worker command lines into one batch.
///
/// Every worker runs in the background; the shell then waits for the last one
/// and exits with its status.
pub fn batch_script(commands: &[String]) -> String {
    let mut script = format!("{}; ", PGID_PROBE);
    for command in commands {
        script.push_str(command);
        script.push_str(" & ");
    }
    script.push_str("wait $!");
    script
}

/// Decides how each host is reached and builds the process for it.
#[derive(Debug, Clone)]
pub struct Transport {
    ssh_program: String,
    local_hostnames: HashSet<String>,
    hostname: String,
}

impl Transport {
    /// Local names are `localhost`, `127.0.0.1`, this machine's hostname and
    /// the configured extras.
    pub fn new(config: &TransportConfig) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        let mut local_hostnames: HashSet<String> = ["localhost", "127.0.0.1"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        local_hostnames.insert(hostname.clone());
        if let Some(short) = hostname.split('.').next() {
            local_hostnames.insert(short.to_string());
        }
        local_hostnames.extend(config.local_hostnames.iter().cloned());

        Self {
            ssh_program: config.ssh_program.clone(),
            local_hostnames,
            hostname,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_local(&self, host: &str) -> bool {
        self.local_hostnames.contains(host)
    }

    /// Process running `script` on `host` in a fresh process group.
    ///
    /// With `tunnel`, a remote session also forwards both broker ports back
    /// to this machine.
    pub fn session_command(
        &self,
        host: &str,
        script: &str,
        tunnel: Option<&BrokerEndpoint>,
    ) -> Command {
        let mut cmd = if self.is_local(host) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        } else {
            let mut cmd = Command::new(&self.ssh_program);
            cmd.args(SSH_OPTIONS);
            if let Some(broker) = tunnel {
                for port in [broker.task_port, broker.info_port] {
                    cmd.arg("-R").arg(format!("{}:127.0.0.1:{}", port, port));
                }
            }
            cmd.arg(host).arg(script);
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }

    /// Process sending SIGKILL to every member of process group `pgid` on `host`.
    pub fn kill_command(&self, host: &str, pgid: i32) -> Command {
        // No `--`: dash's builtin kill rejects it
        let script = format!("kill -9 -{}", pgid);
        let mut cmd = if self.is_local(host) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        } else {
            let mut cmd = Command::new(&self.ssh_program);
            cmd.args(SSH_OPTIONS).arg(host).arg(script);
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}
