use serde::Serialize;

use crate::error::{LaunchError, Result};

/// Digits used for the zero-padded worker id in worker names.
pub const WORKER_ID_DIGITS: usize = 5;

/// Largest run size whose ids still fit in [`WORKER_ID_DIGITS`].
pub const MAX_WORKERS: usize = 100_000;

/// One worker to be launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSlot {
    /// Global 0-based id, increasing in launch order.
    pub id: usize,
    pub host: String,
    /// Position within its host's batch.
    pub host_index: usize,
    /// Number of workers placed on the same host.
    pub host_total: usize,
}

impl WorkerSlot {
    pub fn name(&self) -> Result<String> {
        worker_name(self.id)
    }

    /// Affinity descriptor `<algorithm>:<workers_on_host>:<index_on_host>`.
    pub fn affinity(&self, algorithm: Option<&str>) -> Option<String> {
        match algorithm {
            Some(algo) if !algo.is_empty() => {
                Some(format!("{}:{}:{}", algo, self.host_total, self.host_index))
            }
            _ => None,
        }
    }
}

/// `worker<zero-padded id>`, failing when the id needs more than [`WORKER_ID_DIGITS`].
pub fn worker_name(id: usize) -> Result<String> {
    if id >= MAX_WORKERS {
        return Err(LaunchError::WorkerIdOverflow(id, WORKER_ID_DIGITS));
    }
    Ok(format!("worker{:0width$}", id, width = WORKER_ID_DIGITS))
}

/// One physical node and the workers assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostGroup {
    pub host: String,
    pub workers: Vec<WorkerSlot>,
}

impl HostGroup {
    pub fn slot_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.id).collect()
    }
}

/// Collapse repeated host entries into `(host, count)` pairs, keeping the order
/// of first appearance. Non-consecutive repeats are folded into the earlier
/// entry so no host is ever visited twice.
pub fn group_hosts(hosts: &[String]) -> Vec<(String, usize)> {
    let mut groups: Vec<(String, usize)> = Vec::new();
    for host in hosts {
        match groups.last_mut() {
            Some((last, count)) if last == host => *count += 1,
            _ => match groups.iter_mut().find(|(h, _)| h == host) {
                Some((_, count)) => *count += 1,
                None => groups.push((host.clone(), 1)),
            },
        }
    }
    groups
}

/// Assign `total_workers` worker ids to hosts.
///
/// Each host takes at most `capacity_per_host` workers. With `None`, a host's
/// limit is the number of times it appears in `hosts`. Allocation stops as soon as every worker is placed, leaving trailing hosts
/// unused. A run of zero workers yields no groups.
pub fn plan(
    hosts: &[String],
    total_workers: usize,
    capacity_per_host: Option<usize>,
) -> Result<Vec<HostGroup>> {
    if total_workers == 0 {
        return Ok(Vec::new());
    }
    if total_workers > MAX_WORKERS {
        return Err(LaunchError::WorkerIdOverflow(
            total_workers - 1,
            WORKER_ID_DIGITS,
        ));
    }

    let mut groups = Vec::new();
    let mut next_id = 0;
    let mut free = total_workers;

    for (host, listed) in group_hosts(hosts) {
        if free == 0 {
            break;
        }
        let count = free.min(capacity_per_host.unwrap_or(listed));
        if count == 0 {
            continue;
        }
        let workers = (0..count)
            .map(|host_index| WorkerSlot {
                id: next_id + host_index,
                host: host.clone(),
                host_index,
                host_total: count,
            })
            .collect();
        next_id += count;
        free -= count;
        groups.push(HostGroup { host, workers });
    }

    if free > 0 {
        return Err(LaunchError::CapacityExhausted {
            requested: total_workers,
            placed: total_workers - free,
        });
    }

    tracing::debug!(
        hosts = groups.len(),
        workers = total_workers,
        capacity_per_host = ?capacity_per_host,
        "Placement planned"
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn worker_name_is_zero_padded() {
        assert_eq!(worker_name(7).unwrap(), "worker00007");
        assert_eq!(worker_name(99_999).unwrap(), "worker99999");
    }

    #[test]
    fn worker_name_overflow() {
        assert!(matches!(
            worker_name(100_000),
            Err(LaunchError::WorkerIdOverflow(100_000, 5))
        ));
    }

    #[test]
    fn group_hosts_run_length() {
        let groups = group_hosts(&hosts(&["a", "a", "b", "c", "c", "c"]));
        assert_eq!(
            groups,
            vec![
                ("a".to_string(), 2),
                ("b".to_string(), 1),
                ("c".to_string(), 3)
            ]
        );
    }

    #[test]
    fn group_hosts_folds_non_consecutive_repeats() {
        let groups = group_hosts(&hosts(&["a", "b", "a"]));
        assert_eq!(groups, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn plan_two_hosts_three_workers() {
        let groups = plan(&hosts(&["nodeA", "nodeA", "nodeB"]), 3, Some(2)).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].host, "nodeA");
        assert_eq!(groups[0].worker_ids(), vec![0, 1]);
        assert_eq!(groups[1].host, "nodeB");
        assert_eq!(groups[1].worker_ids(), vec![2]);
    }

    #[test]
    fn plan_per_host_index_and_total() {
        let groups = plan(&hosts(&["a", "b"]), 3, Some(2)).unwrap();
        let a = &groups[0].workers;
        assert_eq!((a[0].host_index, a[0].host_total), (0, 2));
        assert_eq!((a[1].host_index, a[1].host_total), (1, 2));
        let b = &groups[1].workers;
        assert_eq!((b[0].id, b[0].host_index, b[0].host_total), (2, 0, 1));
    }

    #[test]
    fn plan_stops_when_all_placed() {
        let groups = plan(&hosts(&["a", "b", "c", "d"]), 4, Some(2)).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].host, "b");
    }

    #[test]
    fn plan_zero_workers_is_empty() {
        assert!(plan(&hosts(&["a"]), 0, Some(4)).unwrap().is_empty());
        assert!(plan(&[], 0, None).unwrap().is_empty());
    }

    #[test]
    fn plan_empty_hosts_exhausts_capacity() {
        assert!(matches!(
            plan(&[], 2, Some(4)),
            Err(LaunchError::CapacityExhausted {
                requested: 2,
                placed: 0
            })
        ));
    }

    #[test]
    fn plan_insufficient_capacity() {
        assert!(matches!(
            plan(&hosts(&["a", "b"]), 5, Some(2)),
            Err(LaunchError::CapacityExhausted {
                requested: 5,
                placed: 4
            })
        ));
    }

    #[test]
    fn plan_rejects_oversized_run() {
        assert!(matches!(
            plan(&hosts(&["a"]), MAX_WORKERS + 1, Some(MAX_WORKERS + 1)),
            Err(LaunchError::WorkerIdOverflow(_, 5))
        ));
    }

    #[test]
    fn plan_ids_are_contiguous_for_many_shapes() {
        let host_lists = [
            hosts(&["a"]),
            hosts(&["a", "a", "b", "b", "c"]),
            hosts(&["x", "y", "z", "w"]),
        ];
        for list in &host_lists {
            for capacity in 1..4 {
                let max = group_hosts(list).len() * capacity;
                for n in 0..=max {
                    let groups = plan(list, n, Some(capacity)).unwrap();
                    let ids: Vec<usize> = groups.iter().flat_map(|g| g.worker_ids()).collect();
                    assert_eq!(ids, (0..n).collect::<Vec<_>>());
                    let total: usize = groups.iter().map(|g| g.slot_count()).sum();
                    assert_eq!(total, n);
                    assert!(groups.iter().all(|g| g.slot_count() > 0));
                }
            }
            for n in 0..=list.len() {
                let groups = plan(list, n, None).unwrap();
                let ids: Vec<usize> = groups.iter().flat_map(|g| g.worker_ids()).collect();
                assert_eq!(ids, (0..n).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn plan_without_capacity_uses_listed_slots() {
        let groups = plan(&hosts(&["a", "b", "b", "b"]), 4, None).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].host, "a");
        assert_eq!(groups[0].worker_ids(), vec![0]);
        assert_eq!(groups[1].host, "b");
        assert_eq!(groups[1].worker_ids(), vec![1, 2, 3]);
        assert_eq!(groups[1].workers[2].host_total, 3);
    }

    #[test]
    fn plan_without_capacity_counts_folded_repeats() {
        let groups = plan(&hosts(&["a", "b", "a"]), 3, None).unwrap();
        assert_eq!(groups[0].host, "a");
        assert_eq!(groups[0].worker_ids(), vec![0, 1]);
        assert_eq!(groups[1].worker_ids(), vec![2]);
    }

    #[test]
    fn plan_without_capacity_exhausts_listed_slots() {
        assert!(matches!(
            plan(&hosts(&["a", "b", "b"]), 4, None),
            Err(LaunchError::CapacityExhausted {
                requested: 4,
                placed: 3
            })
        ));
    }

    #[test]
    fn explicit_capacity_overrides_listed_slots() {
        let groups = plan(&hosts(&["a", "b", "b", "b"]), 4, Some(2)).unwrap();
        assert_eq!(groups[0].worker_ids(), vec![0, 1]);
        assert_eq!(groups[1].worker_ids(), vec![2, 3]);
    }

    #[test]
    fn affinity_descriptor() {
        let slot = WorkerSlot {
            id: 3,
            host: "a".to_string(),
            host_index: 1,
            host_total: 4,
        };
        assert_eq!(slot.affinity(Some("basiccore")).as_deref(), Some("basiccore:4:1"));
        assert!(slot.affinity(None).is_none());
        assert!(slot.affinity(Some("")).is_none());
    }
}
