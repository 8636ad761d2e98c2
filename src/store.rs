// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{collections::BTreeMap, time::SystemTime};

use tracing::debug;

pub type GroupId = u64;
pub type SnapshotId = u64;

/// A recorded device state: the control changes that reproduce it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub group: GroupId,
    pub timestamp: SystemTime,
    pub midi: Vec<u8>,
    pub tags: Vec<String>,
}

/// A named collection of snapshots, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchGroup {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no patch group with id {0}")]
    NoGroup(GroupId),

    #[error("no snapshot with id {0}")]
    NoSnapshot(SnapshotId),
}

/// Storage for patch groups and their snapshots. Calls are synchronous.
pub trait SnapshotStore: Send {
    /// Creates an empty group.
    fn create_group(&mut self, name: &str, description: Option<&str>) -> Result<GroupId, StoreError>;

    /// Adds a snapshot to a group.
    fn create_snapshot(
        &mut self,
        group: GroupId,
        midi: &[u8],
        tags: &[String],
    ) -> Result<SnapshotId, StoreError>;

    fn fetch_snapshot(&self, id: SnapshotId) -> Result<Snapshot, StoreError>;

    fn list_snapshots(&self, group: GroupId) -> Result<Vec<Snapshot>, StoreError>;

    fn list_groups(&self) -> Result<Vec<PatchGroup>, StoreError>;

    fn rename_group(&mut self, group: GroupId, name: &str) -> Result<(), StoreError>;

    fn describe_group(&mut self, group: GroupId, description: Option<&str>) -> Result<(), StoreError>;

    /// Deletes a group along with its snapshots.
    fn delete_group(&mut self, group: GroupId) -> Result<(), StoreError>;
}

struct GroupEntry {
    name: String,
    description: Option<String>,
    snapshots: Vec<SnapshotId>,
}

/// A store that lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    groups: BTreeMap<GroupId, GroupEntry>,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn group_mut(&mut self, group: GroupId) -> Result<&mut GroupEntry, StoreError> {
        self.groups.get_mut(&group).ok_or(StoreError::NoGroup(group))
    }
}

impl SnapshotStore for MemoryStore {
    fn create_group(&mut self, name: &str, description: Option<&str>) -> Result<GroupId, StoreError> {
        let id = self.allocate();
        self.groups.insert(
            id,
            GroupEntry {
                name: name.to_string(),
                description: description.map(str::to_string),
                snapshots: Vec::new(),
            },
        );
        debug!(id, name, "Created patch group.");
        Ok(id)
    }

    fn create_snapshot(
        &mut self,
        group: GroupId,
        midi: &[u8],
        tags: &[String],
    ) -> Result<SnapshotId, StoreError> {
        // Check the group first so a failed call allocates nothing.
        self.group_mut(group)?;
        let id = self.allocate();
        self.group_mut(group)?.snapshots.push(id);
        self.snapshots.insert(
            id,
            Snapshot {
                id,
                group,
                timestamp: SystemTime::now(),
                midi: midi.to_vec(),
                tags: tags.to_vec(),
            },
        );
        debug!(id, group, bytes = midi.len(), "Stored snapshot.");
        Ok(id)
    }

    fn fetch_snapshot(&self, id: SnapshotId) -> Result<Snapshot, StoreError> {
        self.snapshots
            .get(&id)
            .cloned()
            .ok_or(StoreError::NoSnapshot(id))
    }

    fn list_snapshots(&self, group: GroupId) -> Result<Vec<Snapshot>, StoreError> {
        let entry = self.groups.get(&group).ok_or(StoreError::NoGroup(group))?;
        entry
            .snapshots
            .iter()
            .map(|id| self.fetch_snapshot(*id))
            .collect()
    }

    fn list_groups(&self) -> Result<Vec<PatchGroup>, StoreError> {
        self.groups
            .iter()
            .map(|(id, entry)| {
                Ok(PatchGroup {
                    id: *id,
                    name: entry.name.clone(),
                    description: entry.description.clone(),
                    snapshots: self.list_snapshots(*id)?,
                })
            })
            .collect()
    }

    fn rename_group(&mut self, group: GroupId, name: &str) -> Result<(), StoreError> {
        self.group_mut(group)?.name = name.to_string();
        Ok(())
    }

    fn describe_group(&mut self, group: GroupId, description: Option<&str>) -> Result<(), StoreError> {
        self.group_mut(group)?.description = description.map(str::to_string);
        Ok(())
    }

    fn delete_group(&mut self, group: GroupId) -> Result<(), StoreError> {
        let entry = self.groups.remove(&group).ok_or(StoreError::NoGroup(group))?;
        for id in entry.snapshots {
            self.snapshots.remove(&id);
        }
        debug!(group, "Deleted patch group.");
        Ok(())
    }
}
