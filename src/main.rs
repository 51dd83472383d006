use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use scoop_launcher::config::{parse_hosts, read_hostfile, LaunchConfig};
use scoop_launcher::launcher::{AppRunner, Coordinator, RunReport, ScoopLauncher};
use scoop_launcher::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "scoop-launch")]
#[command(version)]
#[command(about = "Start a broker and a pool of SCOOP workers across cluster hosts")]
struct Args {
    /// Hosts to run on, comma separated; repeat a host to give it more slots
    #[arg(long, conflicts_with = "hostfile")]
    hosts: Option<String>,

    /// File with one host per line
    #[arg(long)]
    hostfile: Option<PathBuf>,

    /// Total number of workers (defaults to one per host entry)
    #[arg(long, short = 'n')]
    size: Option<usize>,

    /// Maximum workers per host (defaults to how often each host is listed)
    #[arg(long)]
    capacity_per_host: Option<usize>,

    /// Externally routable broker hostname (defaults to the local hostname)
    #[arg(long)]
    broker: Option<String>,

    /// Route broker traffic through reverse ssh tunnels
    #[arg(long)]
    tunnel: bool,

    /// Remote shell client
    #[arg(long, default_value = "ssh")]
    ssh: String,

    /// Interpreter running the worker bootstrap
    #[arg(long, default_value = "python")]
    python: PathBuf,

    /// Bootstrap module run with `<python> -m`
    #[arg(long, default_value = "scoop.bootstrap")]
    bootstrap: String,

    /// Worker module used when the executable is not a script
    #[arg(long, default_value = "simple_shell")]
    module: String,

    /// Directory with the predefined worker modules
    #[arg(long, default_value = "scoop/worker")]
    worker_dir: PathBuf,

    /// Directory workers start in (defaults to the current directory)
    #[arg(long)]
    path: Option<PathBuf>,

    /// Nice level for workers
    #[arg(long, default_value = "0")]
    nice: i32,

    /// Process control mode forwarded to workers
    #[arg(long)]
    processcontrol: Option<String>,

    /// CPU affinity algorithm forwarded to workers
    #[arg(long)]
    affinity: Option<String>,

    /// Environment variables to pass to workers (comma separated)
    #[arg(long, default_value = "")]
    pass_env: String,

    /// Enable worker profiling
    #[arg(long)]
    profile: bool,

    /// Debug logging for the launcher and workers
    #[arg(long)]
    debug: bool,

    /// Output format for the run report
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    /// Executable and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn build_config(args: Args) -> Result<(LaunchConfig, OutputFormat), Box<dyn std::error::Error>> {
    let hosts = match (&args.hosts, &args.hostfile) {
        (Some(list), _) => parse_hosts(list),
        (None, Some(path)) => read_hostfile(path)?,
        (None, None) => vec!["localhost".to_string()],
    };
    let size = args.size.unwrap_or(hosts.len());

    let mut command = args.command.into_iter();
    let executable = command.next().unwrap_or_default();

    let mut config = LaunchConfig::new(hosts, size).with_program(executable, command.collect());
    config.capacity_per_host = args.capacity_per_host;
    config.worker_module = args.module;
    config.worker_dir = args.worker_dir;
    config.broker.host = args.broker;
    config.transport.tunnel = args.tunnel;
    config.transport.ssh_program = args.ssh;
    config.program.interpreter = args.python;
    config.program.bootstrap_module = args.bootstrap;
    config.program.start_dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    config.program.nice = args.nice;
    config.program.processcontrol = args.processcontrol;
    config.program.affinity = args.affinity;
    config.program.pass_variables = args
        .pass_env
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    config.program.profile = args.profile;
    config.program.debug = args.debug;

    Ok((config, args.output))
}

fn print_report(report: &RunReport, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            println!("Run ID:      {}", report.run_id);
            if let Some(outcome) = report.outcome {
                println!("Outcome:     {}", outcome);
            }
            if let Some(code) = report.exit_code {
                println!("Exit Code:   {}", code);
            }
            if let Some(ms) = report.duration_ms() {
                println!("Duration:    {}ms", ms);
            }
            if let Some(broker) = &report.broker {
                println!("Broker:      {}", broker.task_address());
            }
            if let Some(error) = &report.error {
                println!("Error:       {}", error);
            }
            println!();
            println!("{:<24} {:<10} {:<8} WORKERS", "HOST", "PGID", "ORIGIN");
            println!("{}", "-".repeat(56));
            for session in &report.sessions {
                let pgid = session
                    .pgid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let origin = if session.origin { "yes" } else { "" };
                println!(
                    "{:<24} {:<10} {:<8} {:?}",
                    session.host, pgid, origin, session.worker_ids
                );
            }
            println!();
            println!(
                "Teardown:    {} terminated, {} already gone, {} zombie, {} failed",
                report.teardown.terminated,
                report.teardown.already_gone,
                report.teardown.zombies.len(),
                report.teardown.failures.len()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "scoop_launcher=debug"
    } else {
        "scoop_launcher=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let (config, output) = build_config(args)?;
    tracing::info!(
        hosts = config.hosts.len(),
        size = config.size,
        tunnel = config.transport.tunnel,
        "Starting worker pool"
    );

    let launcher = ScoopLauncher::new(config)?;
    let shutdown = install_shutdown_handler();
    let mut coordinator = Coordinator::with_shutdown(launcher, shutdown);

    let result = coordinator.run().await;
    if let Ok(exit) = &result {
        print!("{}", exit.output);
    }
    let report = coordinator.report(&result);
    print_report(&report, &output)?;

    std::process::exit(report.process_exit_code());
}
