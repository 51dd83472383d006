pub mod broker;
pub mod command;
pub mod config;
pub mod error;
pub mod launcher;
pub mod placement;
pub mod session;
pub mod shutdown;
pub mod worker_env;
