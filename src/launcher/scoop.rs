use async_trait::async_trait;

use crate::broker::{BrokerEndpoint, BrokerSupervisor};
use crate::command::{CommandBuilder, WorkerRegistry, SIMPLE_SHELL};
use crate::config::LaunchConfig;
use crate::error::{LaunchError, Result};
use crate::launcher::Launcher;
use crate::placement::{plan, HostGroup};
use crate::session::{RemoteSession, SessionTracker, Termination, Transport};
use crate::worker_env::{parse_worker_range, WorkerRange};

/// Launches SCOOP bootstrap workers over ssh (or a local shell) with an
/// in-process broker.
pub struct ScoopLauncher {
    config: LaunchConfig,
    broker_host: String,
    builder: CommandBuilder,
    broker: BrokerSupervisor,
    tracker: SessionTracker,
}

impl ScoopLauncher {
    pub fn new(config: LaunchConfig) -> Result<Self> {
        let registry = WorkerRegistry::with_defaults(&config.worker_dir);
        Self::with_registry(config, &registry)
    }

    /// Resolves the worker program against `registry` once, up front.
    pub fn with_registry(config: LaunchConfig, registry: &WorkerRegistry) -> Result<Self> {
        let transport = Transport::new(&config.transport);
        let (executable, args) = registry.resolve_program(
            &config.program.executable,
            &config.program.args,
            &config.worker_module,
        )?;
        let through_module = executable != config.program.executable;
        if through_module && config.worker_module == SIMPLE_SHELL {
            let range = check_task_range(&args)?;
            tracing::info!(
                start = range.start,
                stop = range.stop,
                step = range.step,
                tasks = range.task_count(),
                "Shell command task range"
            );
        }
        let mut program = config.program.clone();
        program.executable = executable;
        program.args = args;

        let broker_host = config
            .broker
            .host
            .clone()
            .unwrap_or_else(|| transport.hostname().to_string());

        tracing::debug!(
            broker_host = %broker_host,
            executable = %program.executable,
            size = config.size,
            "Launcher configured"
        );

        Ok(Self {
            builder: CommandBuilder::new(program, config.size),
            broker: BrokerSupervisor::new(config.broker.clone(), broker_host.clone()),
            tracker: SessionTracker::new(transport, config.transport.tunnel),
            broker_host,
            config,
        })
    }

    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }
}

/// The `[start:]stop[:step]` range leading a shell module's arguments, which
/// must be followed by a command.
fn check_task_range(args: &[String]) -> Result<WorkerRange> {
    let (range, command) = parse_worker_range(args);
    if command.is_empty() {
        return Err(LaunchError::InvalidWorkerRange(
            "no command follows the range".to_string(),
        ));
    }
    if range.step == 0 {
        return Err(LaunchError::InvalidWorkerRange(format!(
            "{}:{}:{} has a zero step",
            range.start, range.stop, range.step
        )));
    }
    Ok(range)
}

#[async_trait]
impl Launcher for ScoopLauncher {
    fn plan(&self) -> Result<Vec<HostGroup>> {
        plan(
            &self.config.hosts,
            self.config.size,
            self.config.capacity_per_host,
        )
    }

    async fn start_broker(&mut self) -> Result<BrokerEndpoint> {
        let local = self.tracker.transport().is_local(&self.broker_host);
        self.broker.start(local, self.config.program.debug).await
    }

    fn build_commands(
        &self,
        group: &HostGroup,
        broker: &BrokerEndpoint,
        origin_worker: usize,
    ) -> Result<Vec<String>> {
        let remote = !self.tracker.transport().is_local(&group.host);
        let endpoint = if self.config.transport.tunnel && remote {
            broker.via_tunnel()
        } else {
            broker.clone()
        };
        group
            .workers
            .iter()
            .map(|worker| {
                self.builder
                    .build(worker, &endpoint, worker.id == origin_worker)
                    .map(|cmd| cmd.to_shell())
            })
            .collect()
    }

    fn launch_batch(
        &self,
        group: &HostGroup,
        commands: &[String],
        broker: &BrokerEndpoint,
    ) -> Result<RemoteSession> {
        self.tracker
            .launch_batch(&group.host, group.worker_ids(), commands, broker)
    }

    async fn terminate(&self, host: &str, pgid: i32) -> Result<Termination> {
        self.tracker.terminate(host, pgid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(hosts: &[&str], size: usize) -> LaunchConfig {
        LaunchConfig::new(hosts.iter().map(|h| h.to_string()).collect(), size)
            .with_program("job.py", vec!["5".to_string()])
            .with_broker_host("localhost")
    }

    fn endpoint() -> BrokerEndpoint {
        BrokerEndpoint {
            host: "head".to_string(),
            task_port: 7000,
            info_port: 7001,
        }
    }

    #[test]
    fn plans_with_host_counts() {
        let launcher = ScoopLauncher::new(config(&["nodeA", "nodeA", "nodeB"], 3)).unwrap();
        let groups = launcher.plan().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].worker_ids(), vec![0, 1]);
        assert_eq!(groups[1].worker_ids(), vec![2]);
    }

    #[test]
    fn hosts_listed_once_get_one_slot() {
        let launcher = ScoopLauncher::new(config(&["a", "b", "b", "b"], 4)).unwrap();
        let groups = launcher.plan().unwrap();
        assert_eq!(groups[0].host, "a");
        assert_eq!(groups[0].worker_ids(), vec![0]);
        assert_eq!(groups[1].host, "b");
        assert_eq!(groups[1].worker_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn only_the_origin_worker_gets_origin_flag() {
        let launcher = ScoopLauncher::new(config(&["nodeA", "nodeA", "nodeB"], 3)).unwrap();
        let groups = launcher.plan().unwrap();
        let first = launcher.build_commands(&groups[0], &endpoint(), 2).unwrap();
        let last = launcher.build_commands(&groups[1], &endpoint(), 2).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|c| !c.contains("--origin")));
        assert_eq!(last.len(), 1);
        assert!(last[0].contains("--origin"));
        assert!(last[0].contains("--workerName worker00002"));
    }

    #[test]
    fn tunnelled_remote_workers_use_loopback_broker() {
        let cfg = config(&["nodeA"], 1).with_tunnel(true);
        let launcher = ScoopLauncher::new(cfg).unwrap();
        let groups = launcher.plan().unwrap();
        let cmds = launcher.build_commands(&groups[0], &endpoint(), 0).unwrap();
        assert!(cmds[0].contains("--brokerAddress tcp://127.0.0.1:7000"));
        assert!(cmds[0].contains("--metaAddress tcp://127.0.0.1:7001"));
    }

    #[test]
    fn non_script_executable_goes_through_worker_module() {
        let mut cfg = config(&["localhost"], 1).with_program("hostname", Vec::new());
        cfg.worker_dir = Path::new("/opt/workers").to_path_buf();
        let launcher = ScoopLauncher::new(cfg).unwrap();
        let groups = launcher.plan().unwrap();
        let cmds = launcher.build_commands(&groups[0], &endpoint(), 0).unwrap();
        assert!(cmds[0].ends_with("/opt/workers/simple_shell.py hostname"));
    }

    #[test]
    fn unknown_worker_module_is_rejected() {
        let mut cfg = config(&["localhost"], 1).with_program("hostname", Vec::new());
        cfg.worker_module = "missing".to_string();
        assert!(matches!(
            ScoopLauncher::new(cfg),
            Err(LaunchError::UnknownWorkerModule(name)) if name == "missing"
        ));
    }

    #[test]
    fn shell_module_accepts_leading_task_range() {
        let cfg = config(&["localhost"], 1).with_program("0:100:5", vec!["hostname".to_string()]);
        let launcher = ScoopLauncher::new(cfg).unwrap();
        let groups = launcher.plan().unwrap();
        let cmds = launcher.build_commands(&groups[0], &endpoint(), 0).unwrap();
        assert!(cmds[0].ends_with("simple_shell.py 0:100:5 hostname"));
    }

    #[test]
    fn shell_module_rejects_bad_task_range() {
        let zero_step = config(&["localhost"], 1).with_program("0:10:0", vec!["hostname".to_string()]);
        assert!(matches!(
            ScoopLauncher::new(zero_step),
            Err(LaunchError::InvalidWorkerRange(_))
        ));

        let no_command = config(&["localhost"], 1).with_program("1:5", Vec::new());
        assert!(matches!(
            ScoopLauncher::new(no_command),
            Err(LaunchError::InvalidWorkerRange(_))
        ));
    }

    #[test]
    fn other_modules_skip_range_check() {
        let mut cfg = config(&["localhost"], 1).with_program("1:5", Vec::new());
        cfg.worker_module = "sanity".to_string();
        assert!(ScoopLauncher::new(cfg).is_ok());
    }

    #[tokio::test]
    async fn remote_broker_host_is_unsupported() {
        let cfg = config(&["nodeA"], 1).with_broker_host("broker.elsewhere.example");
        let mut launcher = ScoopLauncher::new(cfg).unwrap();
        assert!(matches!(
            launcher.start_broker().await,
            Err(LaunchError::UnsupportedRemoteBroker(_))
        ));
    }
}
