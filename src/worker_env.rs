//! Helpers shared with worker programs.
//!
//! Workers learn about their place in the pool through `SCOOP_<NAME>`
//! environment variables. Values are always strings.
//!
//! The launcher itself only uses [`worker_env_pairs`] and
//! [`parse_worker_range`]. [`set_scoop_env`] and [`get_scoop_env`] are the
//! worker-side half, for worker programs written in Rust.

use std::fmt::Display;

pub const ENV_PREFIX: &str = "SCOOP";
pub const ENV_SEPARATOR: &str = "_";

/// `SCOOP_<NAME>` for a lower- or mixed-case name.
pub fn scoop_env_name(name: &str) -> String {
    format!("{}{}{}", ENV_PREFIX, ENV_SEPARATOR, name.to_uppercase())
}

/// Set a `SCOOP_<NAME>` variable in the current process.
///
/// Must not race with other threads reading the environment; call it before
/// spawning tasks.
pub fn set_scoop_env(name: &str, value: impl Display) {
    std::env::set_var(scoop_env_name(name), value.to_string());
}

pub fn get_scoop_env(name: &str) -> Option<String> {
    std::env::var(scoop_env_name(name)).ok()
}

/// Variables every launched worker receives.
pub fn worker_env_pairs(worker_name: &str, is_origin: bool) -> Vec<(String, String)> {
    vec![
        (scoop_env_name("worker_name"), worker_name.to_string()),
        (
            scoop_env_name("worker_origin"),
            u8::from(is_origin).to_string(),
        ),
    ]
}

/// Iteration range handed to a worker program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRange {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl WorkerRange {
    /// Number of values the range yields; zero for a zero step.
    pub fn task_count(&self) -> usize {
        let (span, step) = match self.step {
            0 => return 0,
            s if s > 0 => (self.stop - self.start, s),
            s => (self.start - self.stop, -s),
        };
        if span <= 0 {
            0
        } else {
            ((span + step - 1) / step) as usize
        }
    }
}

impl Default for WorkerRange {
    fn default() -> Self {
        Self {
            start: 0,
            stop: 10,
            step: 1,
        }
    }
}

/// Split worker arguments into an optional `[start:]stop[:step]` range and the
/// remaining command.
///
/// When the first argument is not a range it stays part of the command and
/// the default range `0:10:1` applies.
pub fn parse_worker_range(args: &[String]) -> (WorkerRange, &[String]) {
    let Some(first) = args.first() else {
        return (WorkerRange::default(), args);
    };

    let parts: Vec<&str> = first.split(':').collect();
    let parsed: Option<Vec<i64>> = parts.iter().map(|p| p.parse().ok()).collect();
    let range = match parsed.as_deref() {
        Some([stop]) => WorkerRange {
            stop: *stop,
            ..Default::default()
        },
        Some([start, stop]) => WorkerRange {
            start: *start,
            stop: *stop,
            ..Default::default()
        },
        Some([start, stop, step]) => WorkerRange {
            start: *start,
            stop: *stop,
            step: *step,
        },
        _ => return (WorkerRange::default(), args),
    };
    (range, &args[1..])
}
