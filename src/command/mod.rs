//! Worker command construction.
//!
//! - [`CommandBuilder`]: turns a [`WorkerSlot`](crate::placement::WorkerSlot)
//!   into the bootstrap invocation a remote shell runs
//! - [`WorkerRegistry`]: resolves logical worker-module names to executables

pub mod builder;
pub mod registry;

pub use builder::{shell_quote, CommandBuilder, WorkerCommand};
pub use registry::{WorkerRegistry, SIMPLE_SHELL};
