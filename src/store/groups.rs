//! Connection groups
//!
//! Per-user named sets of connections. Batch membership changes report an
//! outcome per item instead of stopping (or going quiet) at the first failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::repository::ConnectionRepository;
use super::types::{ConnectionId, Group, GroupId, GroupSummary, UserId};
use crate::error::CoreError;

/// One requested membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    pub connection_id: ConnectionId,
    /// `true` adds the connection to the group, `false` removes it
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub status: ItemStatus,
}

/// Per-item result of a batch membership update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub items: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Succeeded)
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed { .. }))
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}

#[derive(Clone)]
pub struct GroupStore {
    repo: Arc<dyn ConnectionRepository>,
}

impl GroupStore {
    pub fn new(repo: Arc<dyn ConnectionRepository>) -> Self {
        Self { repo }
    }

    pub fn new_group(&self, owner: UserId, name: &str) -> Result<Group, CoreError> {
        let name = checked_name(name)?;
        let group = self.repo.insert_group(owner, name)?;
        info!("Created group {} for user {}", group.id, owner);
        Ok(group)
    }

    pub fn edit_group(&self, id: GroupId, caller: UserId, name: &str) -> Result<Group, CoreError> {
        let mut group = self.owned(id, caller)?;
        group.name = checked_name(name)?.to_string();
        self.repo.update_group(&group)?;
        Ok(group)
    }

    pub fn delete_group(&self, id: GroupId, caller: UserId) -> Result<(), CoreError> {
        self.owned(id, caller)?;
        self.repo.delete_group(id)?;
        info!("Deleted group {} for user {}", id, caller);
        Ok(())
    }

    /// The caller's groups with their member ids, ordered by id
    pub fn get_groups(&self, caller: UserId) -> Result<Vec<GroupSummary>, CoreError> {
        let mut groups = self.repo.list_groups(caller)?;
        groups.sort_by_key(|g| g.id);

        groups
            .into_iter()
            .map(|g| {
                Ok(GroupSummary {
                    connections: self.repo.group_members(g.id)?,
                    id: g.id,
                    name: g.name,
                })
            })
            .collect()
    }

    /// Add or remove several connections. Group ownership is checked up
    /// front; after that every item is attempted and reported.
    pub fn save_group_connections(
        &self,
        id: GroupId,
        caller: UserId,
        changes: &[MembershipChange],
    ) -> Result<BatchReport, CoreError> {
        self.owned(id, caller)?;

        let mut report = BatchReport::default();
        for change in changes {
            let status = match self.apply_change(id, caller, change) {
                Ok(()) => ItemStatus::Succeeded,
                Err(e) => {
                    warn!(
                        "Group {} membership change for connection {} failed: {}",
                        id, change.connection_id, e
                    );
                    ItemStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.items.push(ItemOutcome {
                connection_id: change.connection_id,
                status,
            });
        }

        info!(
            "Group {} membership update: {}/{} succeeded",
            id,
            report.succeeded(),
            report.items.len()
        );
        Ok(report)
    }

    fn apply_change(
        &self,
        group: GroupId,
        caller: UserId,
        change: &MembershipChange,
    ) -> Result<(), CoreError> {
        let connection = self
            .repo
            .get_connection(change.connection_id)?
            .ok_or_else(|| CoreError::NotFound(format!("connection {}", change.connection_id)))?;

        if connection.owner != caller && !connection.public {
            return Err(CoreError::NotFound(format!("connection {}", connection.id)));
        }

        if change.selected {
            self.repo.add_member(group, connection.id)?;
        } else if !self.repo.remove_member(group, connection.id)? {
            return Err(CoreError::validation(format!(
                "Connection {} is not in this group.",
                connection.id
            )));
        }
        Ok(())
    }

    fn owned(&self, id: GroupId, caller: UserId) -> Result<Group, CoreError> {
        let group = self
            .repo
            .get_group(id)?
            .ok_or_else(|| CoreError::NotFound(format!("group {}", id)))?;
        if group.owner != caller {
            return Err(CoreError::Ownership("group"));
        }
        Ok(group)
    }
}

fn checked_name(name: &str) -> Result<&str, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("Group name can not be empty."));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::descriptors::DescriptorStore;
    use crate::store::repository::MemoryRepository;
    use crate::store::types::{ConnectionInput, Technology};
    use crate::vault::UserKey;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    fn fixture() -> (GroupStore, DescriptorStore) {
        let repo: Arc<dyn ConnectionRepository> = Arc::new(MemoryRepository::new());
        (GroupStore::new(repo.clone()), DescriptorStore::new(repo))
    }

    fn connection(store: &DescriptorStore, owner: UserId, public: bool) -> ConnectionId {
        let mut input = ConnectionInput::new(Technology::Mysql);
        input.host = "db1".into();
        input.public = public;
        store.create(owner, &input, &UserKey::generate()).unwrap().id
    }

    #[test]
    fn test_group_crud() {
        let (groups, _) = fixture();

        assert!(matches!(
            groups.new_group(ALICE, "  "),
            Err(CoreError::Validation(_))
        ));

        let group = groups.new_group(ALICE, "prod").unwrap();
        let renamed = groups.edit_group(group.id, ALICE, "production").unwrap();
        assert_eq!(renamed.name, "production");

        assert!(matches!(
            groups.edit_group(group.id, BOB, "mine now"),
            Err(CoreError::Ownership("group"))
        ));
        assert!(matches!(
            groups.delete_group(group.id, BOB),
            Err(CoreError::Ownership("group"))
        ));
        assert!(groups.get_groups(BOB).unwrap().is_empty());

        groups.delete_group(group.id, ALICE).unwrap();
        assert!(groups.get_groups(ALICE).unwrap().is_empty());
    }

    #[test]
    fn test_batch_reports_each_item() {
        let (groups, descriptors) = fixture();
        let own = connection(&descriptors, ALICE, false);
        let shared = connection(&descriptors, BOB, true);
        let private = connection(&descriptors, BOB, false);
        let group = groups.new_group(ALICE, "mixed").unwrap();

        let report = groups
            .save_group_connections(
                group.id,
                ALICE,
                &[
                    MembershipChange { connection_id: own, selected: true },
                    MembershipChange { connection_id: shared, selected: true },
                    MembershipChange { connection_id: private, selected: true },
                    MembershipChange { connection_id: ConnectionId(999), selected: true },
                    MembershipChange { connection_id: own, selected: false },
                    MembershipChange { connection_id: own, selected: false },
                ],
            )
            .unwrap();

        assert_eq!(report.items.len(), 6);
        assert_eq!(report.succeeded(), 3);
        let failed: Vec<_> = report.failed().map(|i| i.connection_id).collect();
        assert_eq!(failed, vec![private, ConnectionId(999), own]);
        assert!(!report.all_succeeded());

        let listed = groups.get_groups(ALICE).unwrap();
        assert_eq!(listed[0].connections, vec![shared]);
    }

    #[test]
    fn test_batch_on_foreign_group_is_rejected() {
        let (groups, descriptors) = fixture();
        let conn = connection(&descriptors, BOB, false);
        let group = groups.new_group(ALICE, "alice only").unwrap();

        assert!(matches!(
            groups.save_group_connections(
                group.id,
                BOB,
                &[MembershipChange { connection_id: conn, selected: true }],
            ),
            Err(CoreError::Ownership("group"))
        ));
    }

    #[test]
    fn test_deleting_connection_leaves_group() {
        let (groups, descriptors) = fixture();
        let conn = connection(&descriptors, ALICE, false);
        let group = groups.new_group(ALICE, "g").unwrap();
        groups
            .save_group_connections(
                group.id,
                ALICE,
                &[MembershipChange { connection_id: conn, selected: true }],
            )
            .unwrap();

        descriptors.delete(conn, ALICE).unwrap();
        assert!(groups.get_groups(ALICE).unwrap()[0].connections.is_empty());
    }

    #[test]
    fn test_report_serialization() {
        let report = BatchReport {
            items: vec![ItemOutcome {
                connection_id: ConnectionId(3),
                status: ItemStatus::Failed { reason: "nope".into() },
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["items"][0]["connection_id"], 3);
        assert_eq!(json["items"][0]["status"], "failed");
        assert_eq!(json["items"][0]["reason"], "nope");
    }
}
