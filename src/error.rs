use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Not enough capacity: requested {requested} workers, placed {placed}")]
    CapacityExhausted { requested: usize, placed: usize },

    #[error("Worker id {0} does not fit in {1} digits")]
    WorkerIdOverflow(usize, usize),

    #[error("Broker failed to start: {0}")]
    BrokerStartFailure(String),

    #[error("Broker host {0} is not local to this run; remote brokers are not supported")]
    UnsupportedRemoteBroker(String),

    #[error("No remote session was started")]
    NoSessionStarted,

    #[error("Unknown worker module: {0}")]
    UnknownWorkerModule(String),

    #[error("Invalid worker task range: {0}")]
    InvalidWorkerRange(String),

    #[error("Failed to start session on {host}: {source}")]
    SessionSpawn {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate process group {pgid} on {host}: {reason}")]
    Terminate {
        host: String,
        pgid: i32,
        reason: String,
    },

    #[error("Origin session on {0} has no running process")]
    OriginUnavailable(String),

    #[error("Run interrupted by shutdown signal")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LaunchError>;
