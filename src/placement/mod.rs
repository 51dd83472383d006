//! Worker placement across cluster hosts.
//!
//! Turns an ordered host list (repeats express several slots on one node) and
//! a total worker count into one [`HostGroup`] per host that receives work.
//! Worker ids are handed out as a contiguous `0..N` range in host order, so the
//! last group always carries the highest id: the origin worker.

pub mod planner;

pub use planner::{group_hosts, plan, worker_name, HostGroup, WorkerSlot, MAX_WORKERS, WORKER_ID_DIGITS};
