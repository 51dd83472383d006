use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{LaunchError, Result};
use crate::launcher::plan::LaunchPlan;
use crate::launcher::report::{RunReport, SessionSummary};
use crate::launcher::{AppRunner, Launcher};
use crate::session::{RemoteSession, SessionExit, Termination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    BrokerStarting,
    BrokerReady,
    Launching,
    AwaitingOrigin,
    Completed,
    Failed,
    TearingDown,
    Done,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Idle => write!(f, "idle"),
            CoordinatorState::BrokerStarting => write!(f, "broker_starting"),
            CoordinatorState::BrokerReady => write!(f, "broker_ready"),
            CoordinatorState::Launching => write!(f, "launching"),
            CoordinatorState::AwaitingOrigin => write!(f, "awaiting_origin"),
            CoordinatorState::Completed => write!(f, "completed"),
            CoordinatorState::Failed => write!(f, "failed"),
            CoordinatorState::TearingDown => write!(f, "tearing_down"),
            CoordinatorState::Done => write!(f, "done"),
        }
    }
}

/// What teardown did with the tracked sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Process groups killed successfully.
    pub terminated: usize,
    /// Process groups that had already exited on their own.
    pub already_gone: usize,
    /// Hosts whose session never reported a pgid; their processes leak.
    pub zombies: Vec<String>,
    /// Kill attempts that failed.
    pub failures: Vec<String>,
}

/// Drives one run: plan, broker, batches, origin wait, teardown.
///
/// The coordinator is the sole owner of the tracked sessions. Sessions are
/// registered the moment they start, so whatever happens afterwards, teardown
/// still sees them.
pub struct Coordinator<L: Launcher> {
    launcher: L,
    shutdown: CancellationToken,
    run_id: Uuid,
    state: CoordinatorState,
    history: Vec<CoordinatorState>,
    outcome: Option<CoordinatorState>,
    plan: Option<LaunchPlan>,
    sessions: Vec<RemoteSession>,
    teardown: TeardownReport,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<L: Launcher> Coordinator<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_shutdown(launcher, CancellationToken::new())
    }

    /// Cancelling `shutdown` interrupts the run; teardown still happens.
    pub fn with_shutdown(launcher: L, shutdown: CancellationToken) -> Self {
        Self {
            launcher,
            shutdown,
            run_id: Uuid::new_v4(),
            state: CoordinatorState::Idle,
            history: vec![CoordinatorState::Idle],
            outcome: None,
            plan: None,
            sessions: Vec::new(),
            teardown: TeardownReport::default(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[CoordinatorState] {
        &self.history
    }

    /// `Completed` or `Failed` once the run has ended.
    pub fn outcome(&self) -> Option<CoordinatorState> {
        self.outcome
    }

    /// The plan, once the broker is up.
    pub fn plan(&self) -> Option<&LaunchPlan> {
        self.plan.as_ref()
    }

    pub fn sessions(&self) -> &[RemoteSession] {
        &self.sessions
    }

    pub fn teardown_report(&self) -> &TeardownReport {
        &self.teardown
    }

    pub fn report(&self, result: &Result<SessionExit>) -> RunReport {
        let origin = self.sessions.len().checked_sub(1);
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            outcome: self.outcome,
            exit_code: result.as_ref().ok().map(SessionExit::status_code),
            error: result.as_ref().err().map(|e| e.to_string()),
            broker: self.plan.as_ref().map(|p| p.broker.clone()),
            sessions: self
                .sessions
                .iter()
                .enumerate()
                .map(|(i, s)| SessionSummary {
                    host: s.host.clone(),
                    worker_ids: s.worker_ids.clone(),
                    pgid: s.pgid(),
                    started_at: s.started_at,
                    origin: Some(i) == origin,
                })
                .collect(),
            teardown: self.teardown.clone(),
        }
    }

    fn transition(&mut self, next: CoordinatorState) {
        tracing::debug!(run_id = %self.run_id, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.history.push(next);
    }

    async fn drive(&mut self) -> Result<SessionExit> {
        let groups = self.launcher.plan()?;

        self.transition(CoordinatorState::BrokerStarting);
        let broker = self.launcher.start_broker().await.map_err(|e| match e {
            LaunchError::BrokerStartFailure(_) | LaunchError::UnsupportedRemoteBroker(_) => e,
            other => LaunchError::BrokerStartFailure(other.to_string()),
        })?;
        let plan = LaunchPlan::new(groups, broker);
        self.transition(CoordinatorState::BrokerReady);

        self.transition(CoordinatorState::Launching);
        let launched = self.launch(&plan);
        self.plan = Some(plan);
        launched?;

        if self.sessions.is_empty() {
            return Err(LaunchError::NoSessionStarted);
        }

        self.transition(CoordinatorState::AwaitingOrigin);
        // Not raced against shutdown: a session interrupted here would leak
        for session in self.sessions.iter_mut() {
            if session.read_pgid().await.is_none() && session.is_started() {
                tracing::warn!(host = %session.host, "Session has no pgid; it cannot be torn down");
            }
        }

        let (origin, others) = self
            .sessions
            .split_last_mut()
            .ok_or(LaunchError::NoSessionStarted)?;
        for session in others {
            session.drain_output();
        }

        tracing::info!(
            run_id = %self.run_id,
            host = %origin.host,
            pgid = ?origin.pgid(),
            "Waiting for origin session"
        );
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(LaunchError::Interrupted),
            exit = origin.wait() => exit,
        }
    }

    /// Start one batch per host group, registering each session immediately.
    fn launch(&mut self, plan: &LaunchPlan) -> Result<()> {
        let origin_worker = plan.origin_worker().unwrap_or(0);
        let mut free = plan.total_workers();

        for group in &plan.groups {
            if free == 0 {
                break;
            }

            let commands = self.launcher.build_commands(group, &plan.broker, origin_worker)?;
            let session = match self.launcher.launch_batch(group, &commands, &plan.broker) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(host = %group.host, error = %e, "Worker batch failed to start");
                    RemoteSession::failed(group.host.clone(), group.worker_ids())
                }
            };
            self.sessions.push(session);
            free = free.saturating_sub(group.slot_count());
        }

        tracing::info!(
            run_id = %self.run_id,
            sessions = self.sessions.len(),
            origin_worker,
            "All batches issued"
        );
        Ok(())
    }

    /// Kill the process group of every tracked session not yet torn down.
    ///
    /// Failures are logged and recorded, never returned: one stuck host does
    /// not keep the others alive.
    pub async fn teardown(&mut self) -> &TeardownReport {
        for session in self.sessions.iter_mut() {
            if !session.mark_torn_down() {
                continue;
            }
            match session.pgid() {
                None => {
                    tracing::error!(
                        host = %session.host,
                        workers = ?session.worker_ids,
                        "Zombie session: no pgid captured, remote processes cannot be cleaned up"
                    );
                    self.teardown.zombies.push(session.host.clone());
                }
                Some(pgid) => match self.launcher.terminate(&session.host, pgid).await {
                    Ok(Termination::Killed) => self.teardown.terminated += 1,
                    Ok(Termination::AlreadyGone) => self.teardown.already_gone += 1,
                    Err(e) => {
                        tracing::warn!(host = %session.host, pgid, error = %e, "Teardown failed");
                        self.teardown.failures.push(e.to_string());
                    }
                },
            }
            session.reap();
        }
        &self.teardown
    }
}

#[async_trait]
impl<L: Launcher> AppRunner for Coordinator<L> {
    async fn run(&mut self) -> Result<SessionExit> {
        self.started_at = Some(Utc::now());
        tracing::info!(run_id = %self.run_id, "Run starting");

        let result = self.drive().await;
        let outcome = match &result {
            Ok(exit) => {
                tracing::info!(
                    run_id = %self.run_id,
                    exit_code = exit.status_code(),
                    "Origin session finished"
                );
                CoordinatorState::Completed
            }
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "Run failed");
                CoordinatorState::Failed
            }
        };
        self.outcome = Some(outcome);
        self.transition(outcome);

        self.transition(CoordinatorState::TearingDown);
        let report = self.teardown().await;
        tracing::info!(
            terminated = report.terminated,
            already_gone = report.already_gone,
            zombies = report.zombies.len(),
            failures = report.failures.len(),
            "Teardown finished"
        );
        self.transition(CoordinatorState::Done);
        self.finished_at = Some(Utc::now());

        result
    }
}
