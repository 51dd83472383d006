use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::broker::BrokerEndpoint;
use crate::launcher::coordinator::{CoordinatorState, TeardownReport};

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub host: String,
    pub worker_ids: Vec<usize>,
    pub pgid: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub origin: bool,
}

/// Summary of a finished run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<CoordinatorState>,
    /// Origin session status; `None` when the run failed before it finished.
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub broker: Option<BrokerEndpoint>,
    pub sessions: Vec<SessionSummary>,
    pub teardown: TeardownReport,
}

impl RunReport {
    /// Process exit status for the launcher itself.
    pub fn process_exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(1)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(exit_code: Option<i32>) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: None,
            finished_at: None,
            outcome: None,
            exit_code,
            error: None,
            broker: None,
            sessions: Vec::new(),
            teardown: TeardownReport::default(),
        }
    }

    #[test]
    fn process_exit_code_defaults_to_failure() {
        assert_eq!(report(Some(0)).process_exit_code(), 0);
        assert_eq!(report(Some(7)).process_exit_code(), 7);
        assert_eq!(report(None).process_exit_code(), 1);
    }

    #[test]
    fn duration_needs_both_timestamps() {
        let mut r = report(Some(0));
        assert!(r.duration_ms().is_none());
        let start = Utc::now();
        r.started_at = Some(start);
        r.finished_at = Some(start + chrono::Duration::milliseconds(1500));
        assert_eq!(r.duration_ms(), Some(1500));
    }

    #[test]
    fn serializes_outcome_in_snake_case() {
        let mut r = report(Some(0));
        r.outcome = Some(CoordinatorState::Completed);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["exit_code"], 0);
    }
}
