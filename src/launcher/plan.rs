use serde::Serialize;

use crate::broker::BrokerEndpoint;
use crate::placement::HostGroup;

/// Everything fixed before the first batch starts: the host groups that
/// received work, in launch order, and the broker they connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub groups: Vec<HostGroup>,
    pub broker: BrokerEndpoint,
}

impl LaunchPlan {
    /// Groups without workers are dropped; they never get a session.
    pub fn new(groups: Vec<HostGroup>, broker: BrokerEndpoint) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| g.slot_count() > 0).collect(),
            broker,
        }
    }

    pub fn total_workers(&self) -> usize {
        self.groups.iter().map(HostGroup::slot_count).sum()
    }

    /// The highest worker id. It always sits in the last group.
    pub fn origin_worker(&self) -> Option<usize> {
        self.groups.last()?.workers.last().map(|w| w.id)
    }

    pub fn origin_host(&self) -> Option<&str> {
        self.groups.last().map(|g| g.host.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
