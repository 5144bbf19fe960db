//! Resource status state machine.
//!
//! The transition table is the single source of truth: an operation is legal
//! only if `(current status, operation)` appears in [`TRANSITIONS`]. A
//! `None` status means the row does not exist. A target of
//! [`ResourceStatus::Deleted`] means the row is removed physically.

use gantry_common::{GantryError, OperationType, ResourceStatus, Result};
use gantry_persistence::DraftRow;

use OperationType::{Create, Delete, OneClickManaged, Publish, Revert, Update};
use ResourceStatus::{CreateDraft, DeleteDraft, Deleted, Success, UpdateDraft};

pub const TRANSITIONS: [(Option<ResourceStatus>, OperationType, ResourceStatus); 13] = [
    (None, Create, CreateDraft),
    (None, OneClickManaged, Success),
    (Some(Success), Update, UpdateDraft),
    (Some(CreateDraft), Update, CreateDraft),
    (Some(UpdateDraft), Update, UpdateDraft),
    (Some(CreateDraft), Delete, Deleted),
    (Some(Success), Delete, DeleteDraft),
    (Some(UpdateDraft), Delete, DeleteDraft),
    (Some(CreateDraft), Publish, Success),
    (Some(UpdateDraft), Publish, Success),
    (Some(DeleteDraft), Publish, Deleted),
    (Some(UpdateDraft), Revert, Success),
    (Some(DeleteDraft), Revert, Success),
];

pub fn transition(current: Option<ResourceStatus>, op: OperationType) -> Option<ResourceStatus> {
    TRANSITIONS
        .iter()
        .find(|(from, operation, _)| *from == current && *operation == op)
        .map(|(_, _, to)| *to)
}

/// Status a bulk edit leaves a row in: unpublished rows stay CreateDraft.
pub fn edit_status(current: ResourceStatus) -> ResourceStatus {
    match current {
        CreateDraft => CreateDraft,
        _ => UpdateDraft,
    }
}

/// Guards one resource's transitions.
#[derive(Debug, Clone, Copy)]
pub struct StatusMachine<'a> {
    resource_id: &'a str,
    current: Option<ResourceStatus>,
}

impl<'a> StatusMachine<'a> {
    pub fn new(resource_id: &'a str, current: Option<ResourceStatus>) -> Self {
        Self {
            resource_id,
            current,
        }
    }

    pub fn for_row(row: &'a DraftRow) -> Self {
        Self::new(&row.id, Some(row.status))
    }

    /// A resource with no draft row yet.
    pub fn absent(resource_id: &'a str) -> Self {
        Self::new(resource_id, None)
    }

    pub fn can_do(&self, op: OperationType) -> Result<()> {
        self.next_status(op).map(|_| ())
    }

    pub fn next_status(&self, op: OperationType) -> Result<ResourceStatus> {
        transition(self.current, op).ok_or_else(|| GantryError::IllegalTransition {
            resource_id: self.resource_id.to_string(),
            current: self.current,
            operation: op,
        })
    }
}

/// Checks `op` on every row, failing on the first illegal one.
pub fn ensure_all(rows: &[DraftRow], op: OperationType) -> Result<()> {
    rows.iter()
        .try_for_each(|row| StatusMachine::for_row(row).can_do(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = Option<ResourceStatus>> {
        prop_oneof![
            Just(None),
            proptest::sample::select(ResourceStatus::ALL.to_vec()).prop_map(Some),
        ]
    }

    fn any_operation() -> impl Strategy<Value = OperationType> {
        proptest::sample::select(OperationType::ALL.to_vec())
    }

    #[test]
    fn test_documented_transitions() {
        let m = StatusMachine::new("r1", Some(Success));
        assert_eq!(m.next_status(Update).unwrap(), UpdateDraft);
        assert_eq!(m.next_status(Delete).unwrap(), DeleteDraft);
        assert!(m.can_do(Publish).is_err());
        assert!(m.can_do(Revert).is_err());

        let m = StatusMachine::new("r1", Some(CreateDraft));
        assert_eq!(m.next_status(Update).unwrap(), CreateDraft);
        assert_eq!(m.next_status(Delete).unwrap(), Deleted);
        assert_eq!(m.next_status(Publish).unwrap(), Success);
        assert!(m.can_do(Revert).is_err());

        let m = StatusMachine::new("r1", Some(DeleteDraft));
        assert_eq!(m.next_status(Publish).unwrap(), Deleted);
        assert_eq!(m.next_status(Revert).unwrap(), Success);
        assert!(m.can_do(Update).is_err());
        assert!(m.can_do(Delete).is_err());

        let m = StatusMachine::absent("r9");
        assert_eq!(m.next_status(Create).unwrap(), CreateDraft);
        assert_eq!(m.next_status(OneClickManaged).unwrap(), Success);
        assert!(m.can_do(Publish).is_err());
    }

    #[test]
    fn test_deleted_rows_accept_nothing() {
        let m = StatusMachine::new("r1", Some(Deleted));
        for op in OperationType::ALL {
            assert!(m.can_do(op).is_err(), "{op} accepted on deleted row");
        }
    }

    #[test]
    fn test_illegal_transition_carries_context() {
        let err = StatusMachine::new("r7", Some(Success))
            .next_status(Revert)
            .unwrap_err();
        match err {
            GantryError::IllegalTransition {
                resource_id,
                current,
                operation,
            } => {
                assert_eq!(resource_id, "r7");
                assert_eq!(current, Some(Success));
                assert_eq!(operation, Revert);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_edit_status() {
        assert_eq!(edit_status(CreateDraft), CreateDraft);
        assert_eq!(edit_status(Success), UpdateDraft);
        assert_eq!(edit_status(DeleteDraft), UpdateDraft);
    }

    proptest! {
        #[test]
        fn prop_only_table_transitions_succeed(current in any_status(), op in any_operation()) {
            let listed = TRANSITIONS
                .iter()
                .find(|(from, operation, _)| *from == current && *operation == op);
            let result = StatusMachine::new("id", current).next_status(op);
            match listed {
                Some((_, _, to)) => prop_assert_eq!(result.unwrap(), *to),
                None => {
                    let is_illegal = matches!(result, Err(GantryError::IllegalTransition { .. }));
                    prop_assert!(is_illegal);
                }
            }
        }

        #[test]
        fn prop_table_has_no_duplicate_keys(current in any_status(), op in any_operation()) {
            let matches = TRANSITIONS
                .iter()
                .filter(|(from, operation, _)| *from == current && *operation == op)
                .count();
            prop_assert!(matches <= 1);
        }
    }
}
