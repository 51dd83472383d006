use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default broker name passed to every worker.
pub const BROKER_NAME: &str = "broker";

/// Configuration for the in-process coordination broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Externally routable broker hostname. `None` means the local hostname.
    pub host: Option<String>,
    /// Address the broker's two listeners bind to.
    pub bind_addr: IpAddr,
    /// How long to wait for both ports to be bound.
    pub start_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: None,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            start_timeout_ms: 5000,
        }
    }
}

/// How batches reach their hosts.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Remote shell client.
    pub ssh_program: String,
    /// Request reverse port forwards for the broker ports on every remote session.
    pub tunnel: bool,
    /// Host names treated as this machine in addition to the detected ones.
    pub local_hostnames: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            tunnel: false,
            local_hostnames: Vec::new(),
        }
    }
}

/// What every worker runs: the bootstrap invocation and the user program.
#[derive(Debug, Clone)]
pub struct WorkerProgram {
    /// Interpreter used to run the bootstrap module.
    pub interpreter: PathBuf,
    /// Module passed to `<interpreter> -m`.
    pub bootstrap_module: String,
    /// User executable (a script, or a logical worker-module argument).
    pub executable: String,
    pub args: Vec<String>,
    /// Directory workers change into on start.
    pub start_dir: PathBuf,
    pub nice: i32,
    pub debug: bool,
    pub profile: bool,
    /// Opaque process-control mode forwarded to the bootstrap.
    pub processcontrol: Option<String>,
    /// Affinity algorithm name; combined with per-host placement into a descriptor.
    pub affinity: Option<String>,
    /// Names of environment variables exported to every worker when set here.
    pub pass_variables: Vec<String>,
}

impl Default for WorkerProgram {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python"),
            bootstrap_module: "scoop.bootstrap".to_string(),
            executable: String::new(),
            args: Vec::new(),
            start_dir: PathBuf::from("."),
            nice: 0,
            debug: false,
            profile: false,
            processcontrol: None,
            affinity: None,
            pass_variables: Vec::new(),
        }
    }
}

/// Immutable configuration for one run, handed to the coordinator at construction.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Ordered host list; consecutive repeats express several slots on one node.
    pub hosts: Vec<String>,
    /// Total number of workers to start.
    pub size: usize,
    /// Upper bound of workers per host. `None` uses the host list entry counts.
    pub capacity_per_host: Option<usize>,
    /// Logical worker module used when the executable is not a script.
    pub worker_module: String,
    /// Directory holding the predefined worker modules.
    pub worker_dir: PathBuf,
    pub broker: BrokerConfig,
    pub transport: TransportConfig,
    pub program: WorkerProgram,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            size: 0,
            capacity_per_host: None,
            worker_module: "simple_shell".to_string(),
            worker_dir: PathBuf::from("scoop/worker"),
            broker: BrokerConfig::default(),
            transport: TransportConfig::default(),
            program: WorkerProgram::default(),
        }
    }
}

impl LaunchConfig {
    pub fn new(hosts: Vec<String>, size: usize) -> Self {
        Self {
            hosts,
            size,
            ..Default::default()
        }
    }

    pub fn with_program(mut self, executable: impl Into<String>, args: Vec<String>) -> Self {
        self.program.executable = executable.into();
        self.program.args = args;
        self
    }

    pub fn with_capacity_per_host(mut self, capacity: usize) -> Self {
        self.capacity_per_host = Some(capacity);
        self
    }

    pub fn with_broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker.host = Some(host.into());
        self
    }

    pub fn with_tunnel(mut self, tunnel: bool) -> Self {
        self.transport.tunnel = tunnel;
        self
    }
}

/// Host list from text: one host per line or comma separated. Blank entries
/// and `#` comments are skipped; repeats are kept.
pub fn parse_hosts(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read a host file such as a batch system node file.
pub fn read_hostfile(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_hosts(&text))
}
