use crate::broker::BrokerEndpoint;
use crate::config::{WorkerProgram, BROKER_NAME};
use crate::error::Result;
use crate::placement::WorkerSlot;
use crate::worker_env::worker_env_pairs;

/// A fully resolved worker launch: exported variables plus argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
}

impl WorkerCommand {
    /// Render as one shell line: `export K='v' && ... <argv>`.
    pub fn to_shell(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("export {}={} &&", k, shell_quote(v)))
            .collect();
        parts.extend(self.argv.iter().map(|t| shell_quote(t)));
        parts.join(" ")
    }
}

/// Quote a token for a POSIX shell. Plain words pass through untouched.
pub fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Builds bootstrap commands for every worker of a run.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: WorkerProgram,
    size: usize,
    passthrough: Vec<(String, String)>,
}

impl CommandBuilder {
    /// Captures the values of `program.pass_variables` from the current environment.
    pub fn new(program: WorkerProgram, size: usize) -> Self {
        let passthrough = program
            .pass_variables
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
            .collect();
        Self::with_passthrough(program, size, passthrough)
    }

    pub fn with_passthrough(
        program: WorkerProgram,
        size: usize,
        passthrough: Vec<(String, String)>,
    ) -> Self {
        Self {
            program,
            size,
            passthrough,
        }
    }

    /// Bootstrap invocation for one worker. Flags whose value is empty are omitted.
    pub fn build(
        &self,
        worker: &WorkerSlot,
        broker: &BrokerEndpoint,
        is_origin: bool,
    ) -> Result<WorkerCommand> {
        let name = worker.name()?;
        let program = &self.program;
        let mut argv: Vec<String> = Vec::new();

        push(&mut argv, &program.interpreter.to_string_lossy());
        push(&mut argv, "-m");
        push(&mut argv, &program.bootstrap_module);
        if is_origin {
            push(&mut argv, "--origin");
        }
        push_flag(&mut argv, "--workerName", Some(&name));
        push_flag(&mut argv, "--brokerName", Some(BROKER_NAME));
        push_flag(&mut argv, "--brokerAddress", Some(&broker.task_address()));
        push_flag(&mut argv, "--metaAddress", Some(&broker.meta_address()));
        push_flag(&mut argv, "--size", Some(&self.size.to_string()));
        if program.debug {
            push(&mut argv, "--debug");
        }
        if program.profile {
            push(&mut argv, "--profile");
        }
        push_flag(
            &mut argv,
            "--startfrom",
            Some(&program.start_dir.to_string_lossy()),
        );
        push_flag(&mut argv, "--nice", Some(&program.nice.to_string()));
        push_flag(&mut argv, "--processcontrol", program.processcontrol.as_deref());
        push_flag(
            &mut argv,
            "--affinity",
            worker.affinity(program.affinity.as_deref()).as_deref(),
        );
        push(&mut argv, &program.executable);
        for arg in &program.args {
            push(&mut argv, arg);
        }

        let mut env = self.passthrough.clone();
        env.extend(worker_env_pairs(&name, is_origin));

        tracing::debug!(worker = %name, host = %worker.host, is_origin, "Built worker command");
        Ok(WorkerCommand { env, argv })
    }
}

fn push(argv: &mut Vec<String>, token: &str) {
    if !token.is_empty() {
        argv.push(token.to_string());
    }
}

fn push_flag(argv: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        argv.push(flag.to_string());
        argv.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use std::path::PathBuf;

    fn endpoint() -> BrokerEndpoint {
        BrokerEndpoint {
            host: "head".to_string(),
            task_port: 5555,
            info_port: 5556,
        }
    }

    fn slot(id: usize) -> WorkerSlot {
        WorkerSlot {
            id,
            host: "nodeA".to_string(),
            host_index: 1,
            host_total: 2,
        }
    }

    fn program() -> WorkerProgram {
        WorkerProgram {
            interpreter: PathBuf::from("/usr/bin/python"),
            executable: "job.py".to_string(),
            args: vec!["10".to_string()],
            start_dir: PathBuf::from("/scratch/run"),
            ..Default::default()
        }
    }

    fn value_of<'a>(argv: &'a [String], flag: &str) -> Option<&'a str> {
        argv.iter()
            .position(|t| t == flag)
            .and_then(|i| argv.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn builds_bootstrap_invocation() {
        let builder = CommandBuilder::with_passthrough(program(), 3, Vec::new());
        let cmd = builder.build(&slot(7), &endpoint(), false).unwrap();
        let argv = &cmd.argv;

        assert_eq!(&argv[..3], &["/usr/bin/python", "-m", "scoop.bootstrap"]);
        assert_eq!(value_of(argv, "--workerName"), Some("worker00007"));
        assert_eq!(value_of(argv, "--brokerName"), Some("broker"));
        assert_eq!(value_of(argv, "--brokerAddress"), Some("tcp://head:5555"));
        assert_eq!(value_of(argv, "--metaAddress"), Some("tcp://head:5556"));
        assert_eq!(value_of(argv, "--size"), Some("3"));
        assert_eq!(value_of(argv, "--startfrom"), Some("/scratch/run"));
        assert_eq!(value_of(argv, "--nice"), Some("0"));
        assert_eq!(&argv[argv.len() - 2..], &["job.py", "10"]);
        assert!(!argv.contains(&"--origin".to_string()));
        assert!(!argv.contains(&"--debug".to_string()));
    }

    #[test]
    fn omits_unset_optional_flags() {
        let builder = CommandBuilder::with_passthrough(program(), 1, Vec::new());
        let cmd = builder.build(&slot(0), &endpoint(), false).unwrap();
        let line = cmd.to_shell();
        assert!(!line.contains("--affinity"));
        assert!(!line.contains("--processcontrol"));
        assert!(!line.contains("--profile"));
        assert!(cmd.argv.iter().all(|t| !t.is_empty()));
    }

    #[test]
    fn empty_values_are_dropped_with_their_flag() {
        let mut p = program();
        p.start_dir = PathBuf::new();
        p.processcontrol = Some(String::new());
        p.affinity = Some(String::new());
        p.args = vec![String::new(), "x".to_string()];
        let builder = CommandBuilder::with_passthrough(p, 1, Vec::new());
        let cmd = builder.build(&slot(0), &endpoint(), false).unwrap();
        assert!(!cmd.argv.contains(&"--startfrom".to_string()));
        assert!(!cmd.argv.contains(&"--processcontrol".to_string()));
        assert!(!cmd.argv.contains(&"--affinity".to_string()));
        assert_eq!(cmd.argv.last().map(String::as_str), Some("x"));
        assert!(cmd.argv.iter().all(|t| !t.is_empty()));
    }

    #[test]
    fn origin_debug_and_affinity_flags() {
        let mut p = program();
        p.debug = true;
        p.profile = true;
        p.processcontrol = Some("VSC".to_string());
        p.affinity = Some("basiccore".to_string());
        let builder = CommandBuilder::with_passthrough(p, 2, Vec::new());
        let cmd = builder.build(&slot(1), &endpoint(), true).unwrap();
        assert!(cmd.argv.contains(&"--origin".to_string()));
        assert!(cmd.argv.contains(&"--debug".to_string()));
        assert!(cmd.argv.contains(&"--profile".to_string()));
        assert_eq!(value_of(&cmd.argv, "--processcontrol"), Some("VSC"));
        assert_eq!(value_of(&cmd.argv, "--affinity"), Some("basiccore:2:1"));
    }

    #[test]
    fn worker_environment_is_exported() {
        let passthrough = vec![("OMP_NUM_THREADS".to_string(), "1".to_string())];
        let builder = CommandBuilder::with_passthrough(program(), 1, passthrough);
        let cmd = builder.build(&slot(3), &endpoint(), true).unwrap();
        let line = cmd.to_shell();
        assert!(line.starts_with("export OMP_NUM_THREADS=1 && "));
        assert!(line.contains("export SCOOP_WORKER_NAME=worker00003 && "));
        assert!(line.contains("export SCOOP_WORKER_ORIGIN=1 && "));
    }

    #[test]
    fn worker_id_overflow() {
        let builder = CommandBuilder::with_passthrough(program(), 1, Vec::new());
        let err = builder.build(&slot(100_000), &endpoint(), false).unwrap_err();
        assert!(matches!(err, LaunchError::WorkerIdOverflow(100_000, 5)));
    }

    #[test]
    fn shell_quoting() {
        assert_eq!(shell_quote("plain-word_1.py"), "plain-word_1.py");
        assert_eq!(shell_quote("tcp://h:1"), "tcp://h:1");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
        assert_eq!(shell_quote(""), "''");
    }
}
