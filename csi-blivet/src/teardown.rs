// SPDX-License-Identifier: GPL-3.0-only

//! Removal of a device together with the stack it was built on.
//!
//! The target is removed first, then its ancestors leaf by leaf: a device is
//! only removed once every child it had is gone, and disks are released
//! rather than removed. Ancestors that still back devices outside the
//! target's stack (a disk shared with another volume, for instance) are left
//! in place together with everything beneath them.

use std::collections::{HashMap, HashSet, VecDeque};

use csi_contracts::{DeviceHandle, ProvisioningBackend, property_keys};
use tracing::{debug, info, instrument, warn};

use crate::error::TeardownError;
use crate::provision::rollback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIndex(usize);

#[derive(Debug, Clone)]
struct DeviceNode {
    handle: DeviceHandle,
    is_disk: bool,
    parents: Vec<DeviceIndex>,
    children: Vec<DeviceIndex>,
    /// Children that are not part of the loaded graph
    foreign_children: usize,
    removed: bool,
}

/// Snapshot of the dependency graph between a device and its ancestors
#[derive(Debug, Clone)]
pub struct DeviceGraph {
    nodes: Vec<DeviceNode>,
    index: HashMap<DeviceHandle, DeviceIndex>,
}

/// What a teardown did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Removed devices, in removal order (target first)
    pub removed: Vec<DeviceHandle>,
    /// Disks released once nothing was left on them
    pub released_disks: Vec<DeviceHandle>,
    /// Ancestors kept because other devices still depend on them
    pub retained: Vec<DeviceHandle>,
}

impl DeviceGraph {
    /// Load `target` and every device reachable through `Parents`.
    pub async fn load<B>(backend: &B, target: &DeviceHandle) -> Result<Self, TeardownError>
    where
        B: ProvisioningBackend + ?Sized,
    {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        };
        let mut child_handles: Vec<Vec<DeviceHandle>> = Vec::new();
        let mut queue = VecDeque::from([graph.intern(target)]);

        while let Some(current) = queue.pop_front() {
            let handle = graph.nodes[current.0].handle.clone();
            graph.nodes[current.0].is_disk = backend.is_disk(&handle).await?;

            for parent in backend.parents(&handle).await? {
                let known = graph.index.contains_key(&parent);
                let parent_index = graph.intern(&parent);
                if !graph.nodes[current.0].parents.contains(&parent_index) {
                    graph.nodes[current.0].parents.push(parent_index);
                }
                if !known {
                    queue.push_back(parent_index);
                }
            }

            if child_handles.len() <= current.0 {
                child_handles.resize(current.0 + 1, Vec::new());
            }
            child_handles[current.0] = backend.children(&handle).await?;
        }

        for (position, children) in child_handles.into_iter().enumerate() {
            for child in children {
                match graph.index.get(&child).copied() {
                    Some(child_index) => graph.nodes[position].children.push(child_index),
                    None => graph.nodes[position].foreign_children += 1,
                }
            }
        }

        Ok(graph)
    }

    fn intern(&mut self, handle: &DeviceHandle) -> DeviceIndex {
        if let Some(existing) = self.index.get(handle) {
            return *existing;
        }
        let index = DeviceIndex(self.nodes.len());
        self.nodes.push(DeviceNode {
            handle: handle.clone(),
            is_disk: false,
            parents: Vec::new(),
            children: Vec::new(),
            foreign_children: 0,
            removed: false,
        });
        self.index.insert(handle.clone(), index);
        index
    }

    pub fn index_of(&self, handle: &DeviceHandle) -> Option<DeviceIndex> {
        self.index.get(handle).copied()
    }

    pub fn handle(&self, index: DeviceIndex) -> &DeviceHandle {
        &self.nodes[index.0].handle
    }

    /// Ancestors of `start`, nearest first
    pub fn ancestors(&self, start: DeviceIndex) -> Vec<DeviceIndex> {
        let mut seen = HashSet::from([start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for &parent in &self.nodes[current.0].parents {
                if seen.insert(parent) {
                    order.push(parent);
                    queue.push_back(parent);
                }
            }
        }
        order
    }

    /// Devices that back something outside the graph, plus everything below them
    fn pinned(&self) -> HashSet<DeviceIndex> {
        let mut pinned = HashSet::new();
        let mut queue: VecDeque<DeviceIndex> = (0..self.nodes.len())
            .map(DeviceIndex)
            .filter(|index| self.nodes[index.0].foreign_children > 0)
            .collect();

        while let Some(current) = queue.pop_front() {
            if pinned.insert(current) {
                queue.extend(self.nodes[current.0].parents.iter().copied());
            }
        }
        pinned
    }

    fn is_leaf(&self, index: DeviceIndex) -> bool {
        let node = &self.nodes[index.0];
        node.foreign_children == 0
            && node
                .children
                .iter()
                .all(|child| self.nodes[child.0].removed)
    }
}

/// Remove `target` and the stack beneath it, then commit.
///
/// On failure the backend is reset so no staged removal survives.
#[instrument(skip_all, fields(target = %target))]
pub async fn destroy_device<B>(
    backend: &B,
    target: &DeviceHandle,
) -> Result<TeardownReport, TeardownError>
where
    B: ProvisioningBackend + ?Sized,
{
    let result = async {
        let report = tear_down(backend, target).await?;
        backend.commit().await?;
        Ok::<_, TeardownError>(report)
    }
    .await;

    match &result {
        Ok(report) => info!(
            removed = report.removed.len(),
            released_disks = report.released_disks.len(),
            retained = report.retained.len(),
            "device stack torn down"
        ),
        Err(err) => {
            warn!("teardown failed: {err}");
            rollback(backend).await;
        }
    }
    result
}

async fn tear_down<B>(backend: &B, target: &DeviceHandle) -> Result<TeardownReport, TeardownError>
where
    B: ProvisioningBackend + ?Sized,
{
    if let Ok(value) = backend.get_property(target, property_keys::MOUNTPOINT).await
        && let Some(mountpoint) = value.as_str().filter(|m| !m.is_empty())
    {
        warn!(mountpoint, "removing a device that is still mounted");
    }

    let mut graph = DeviceGraph::load(backend, target).await?;
    let mut report = TeardownReport::default();
    let target_index = graph.intern(target);

    backend.remove(target).await?;
    graph.nodes[target_index.0].removed = true;
    report.removed.push(target.clone());

    let pinned = graph.pinned();
    let mut remaining: Vec<DeviceIndex> = Vec::new();
    for ancestor in graph.ancestors(target_index) {
        if pinned.contains(&ancestor) {
            report.retained.push(graph.handle(ancestor).clone());
        } else {
            remaining.push(ancestor);
        }
    }

    while !remaining.is_empty() {
        let (leaves, blocked): (Vec<_>, Vec<_>) =
            remaining.iter().copied().partition(|&index| graph.is_leaf(index));

        if leaves.is_empty() {
            return Err(TeardownError::Cycle {
                target: target.clone(),
                remaining: blocked.iter().map(|&index| graph.handle(index).clone()).collect(),
            });
        }

        for leaf in leaves {
            let node = &graph.nodes[leaf.0];
            let handle = node.handle.clone();
            if node.is_disk {
                debug!(disk = %handle, "releasing disk");
                backend.deprovision_disk(&handle).await?;
                report.released_disks.push(handle);
            } else {
                debug!(device = %handle, "removing device");
                backend.remove(&handle).await?;
                report.removed.push(handle);
            }
            graph.nodes[leaf.0].removed = true;
        }
        remaining = blocked;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use csi_contracts::BackendError;
    use csi_contracts::testing::{BackendCall, FailPoint, FakeBackend};

    use super::*;

    struct Stack {
        backend: FakeBackend,
        disk1: DeviceHandle,
        disk2: DeviceHandle,
        vg: DeviceHandle,
        lv: DeviceHandle,
        fs: DeviceHandle,
    }

    /// fs -> lv -> vg -> {disk1, disk2}
    fn stack() -> Stack {
        let backend = FakeBackend::default();
        let disk1 = backend.add_disk("/dev/vdb", 1 << 30);
        let disk2 = backend.add_disk("/dev/vdc", 1 << 30);
        let vg = backend.add_device("vg0", &[disk1.clone(), disk2.clone()]);
        let lv = backend.add_device("lv0", &[vg.clone()]);
        let fs = backend.add_device("fs0", &[lv.clone()]);
        Stack {
            backend,
            disk1,
            disk2,
            vg,
            lv,
            fs,
        }
    }

    #[tokio::test]
    async fn removes_stack_leaf_first_and_releases_disks_last() {
        let s = stack();

        let report = destroy_device(&s.backend, &s.fs)
            .await
            .expect("teardown should succeed");

        assert_eq!(
            s.backend.mutating_calls(),
            vec![
                BackendCall::Remove(s.fs.clone()),
                BackendCall::Remove(s.lv.clone()),
                BackendCall::Remove(s.vg.clone()),
                BackendCall::DeprovisionDisk(s.disk1.clone()),
                BackendCall::DeprovisionDisk(s.disk2.clone()),
                BackendCall::Commit,
            ]
        );
        assert_eq!(report.removed, vec![s.fs.clone(), s.lv, s.vg]);
        assert_eq!(report.released_disks, vec![s.disk1, s.disk2]);
        assert!(report.retained.is_empty());
        assert!(s.backend.is_removed(&s.fs));
    }

    #[tokio::test]
    async fn ancestors_are_ordered_by_distance() {
        let s = stack();
        let graph = DeviceGraph::load(&s.backend, &s.fs).await.expect("load graph");
        let fs = graph.index_of(&s.fs).expect("target indexed");

        let handles: Vec<DeviceHandle> = graph
            .ancestors(fs)
            .into_iter()
            .map(|index| graph.handle(index).clone())
            .collect();
        assert_eq!(handles, vec![s.lv, s.vg, s.disk1, s.disk2]);
    }

    #[tokio::test]
    async fn mutual_parents_fail_fast_as_cycle() {
        let backend = FakeBackend::default();
        let a = backend.add_device("a", &[]);
        let b = backend.add_device("b", &[a.clone()]);
        backend.set_parents(&a, &[b.clone()]);
        let target = backend.add_device("target", &[a.clone()]);

        let err = destroy_device(&backend, &target).await.unwrap_err();
        match err {
            TeardownError::Cycle { remaining, .. } => {
                assert_eq!(remaining.len(), 2);
                assert!(remaining.contains(&a) && remaining.contains(&b));
            }
            other => panic!("expected cycle, got {other:?}"),
        }

        let calls = backend.calls();
        assert!(!calls.contains(&BackendCall::Commit));
        assert_eq!(calls.last(), Some(&BackendCall::Reset));
    }

    #[tokio::test]
    async fn shared_ancestors_are_retained() {
        let s = stack();
        let other_lv = s.backend.add_device("lv1", &[s.vg.clone()]);

        let report = destroy_device(&s.backend, &s.fs)
            .await
            .expect("teardown should succeed");

        assert_eq!(report.removed, vec![s.fs.clone(), s.lv.clone()]);
        assert!(report.released_disks.is_empty());
        assert_eq!(report.retained, vec![s.vg.clone(), s.disk1, s.disk2]);
        assert!(!s.backend.is_removed(&s.vg));
        assert!(!s.backend.is_removed(&other_lv));
    }

    #[tokio::test]
    async fn backend_failure_resets_without_commit() {
        let s = stack();
        s.backend
            .fail(FailPoint::DeprovisionDisk, BackendError::call("RemoveDevice", "busy"));

        let err = destroy_device(&s.backend, &s.fs).await.unwrap_err();
        assert!(matches!(err, TeardownError::Backend(_)));

        let calls = s.backend.calls();
        assert!(!calls.contains(&BackendCall::Commit));
        assert_eq!(calls.last(), Some(&BackendCall::Reset));
    }
}
