//! Launch and teardown of a distributed worker pool.
//!
//! A run moves through `Idle → BrokerStarting → BrokerReady → Launching →
//! AwaitingOrigin → {Completed, Failed} → TearingDown → Done`. Teardown runs on
//! every exit path and visits each tracked session once.
//!
//! - [`Launcher`]: the per-runtime capabilities (plan, broker, batches, kill)
//! - [`AppRunner`]: drives one run to completion
//! - [`Coordinator`]: the state machine, generic over a [`Launcher`]
//! - [`LaunchPlan`]: host groups and broker endpoint, fixed before launch
//! - [`ScoopLauncher`]: the concrete launcher for SCOOP workers

pub mod coordinator;
pub mod plan;
pub mod report;
pub mod scoop;

use async_trait::async_trait;

use crate::broker::BrokerEndpoint;
use crate::error::Result;
use crate::placement::HostGroup;
use crate::session::{RemoteSession, SessionExit, Termination};

pub use coordinator::{Coordinator, CoordinatorState, TeardownReport};
pub use plan::LaunchPlan;
pub use report::{RunReport, SessionSummary};
pub use scoop::ScoopLauncher;

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Ordered host groups for the run. Pure; no side effects.
    fn plan(&self) -> Result<Vec<HostGroup>>;

    /// Start the coordination broker and return its bound ports.
    async fn start_broker(&mut self) -> Result<BrokerEndpoint>;

    /// Shell command lines for every worker of `group`.
    fn build_commands(
        &self,
        group: &HostGroup,
        broker: &BrokerEndpoint,
        origin_worker: usize,
    ) -> Result<Vec<String>>;

    /// Start one session for `group` without waiting for it.
    fn launch_batch(
        &self,
        group: &HostGroup,
        commands: &[String],
        broker: &BrokerEndpoint,
    ) -> Result<RemoteSession>;

    /// Kill process group `pgid` on `host`.
    async fn terminate(&self, host: &str, pgid: i32) -> Result<Termination>;
}

#[async_trait]
pub trait AppRunner {
    /// Run to a terminal state. Resolves to the origin session's exit.
    async fn run(&mut self) -> Result<SessionExit>;
}
