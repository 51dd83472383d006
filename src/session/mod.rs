//! Remote sessions: one shell invocation per host carrying a batch of workers.
//!
//! # Components
//!
//! - [`Transport`]: how a host is reached (`ssh` or a local `sh -c`)
//! - [`SessionTracker`]: starts batches and terminates process groups
//! - [`RemoteSession`]: the running batch, its captured pgid and output
//!
//! # Output contract
//!
//! Every batch starts with a process-group probe, so the first line a session
//! prints is the decimal pgid of the remote shell. Teardown kills that whole
//! group with one signal.

pub mod tracker;
pub mod transport;

pub use tracker::{RemoteSession, SessionExit, SessionTracker, Termination};
pub use transport::{batch_script, Transport, PGID_PROBE};
