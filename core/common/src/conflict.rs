//! Last-write-wins conflict resolution.
//!
//! The same rule runs wherever a write is accepted: in the server-side write
//! acceptor and in any client-side simulation of it. The server copy is
//! authoritative, and equal timestamps always favour the existing record so
//! that duplicate retries carrying identical stamps never oscillate.

use crate::entity::Entity;
use crate::types::Timestamp;

/// Outcome of offering an upsert to the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome<E> {
    /// The incoming record was stored exactly as sent.
    Accepted,
    /// The write lost; the caller must adopt the current record.
    RejectedWithCurrent(E),
}

/// Outcome of offering a deletion to the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome<E> {
    /// The record is now soft-deleted (or was never known).
    Accepted,
    /// The record was already deleted; a second delete is a no-op.
    AlreadyDeleted,
    /// A later edit beats the delete; the caller must adopt the current record.
    RejectedWithCurrent(E),
}

/// Last-write-wins resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `incoming` may overwrite `existing`.
    ///
    /// A missing row is always an insert. A deleted row is terminal and
    /// rejects every upsert, whatever its stamp.
    pub fn resolve_upsert<E: Entity>(&self, existing: Option<&E>, incoming: &E) -> UpsertOutcome<E> {
        let Some(existing) = existing else {
            return UpsertOutcome::Accepted;
        };

        if existing.is_deleted() || existing.sync_timestamp() >= incoming.updated_at() {
            UpsertOutcome::RejectedWithCurrent(existing.clone())
        } else {
            UpsertOutcome::Accepted
        }
    }

    /// Decide whether a deletion stamped `deleted_at` applies to `existing`.
    pub fn resolve_delete<E: Entity>(
        &self,
        existing: Option<&E>,
        deleted_at: Timestamp,
    ) -> DeleteOutcome<E> {
        match existing {
            None => DeleteOutcome::Accepted,
            Some(existing) if existing.is_deleted() => DeleteOutcome::AlreadyDeleted,
            Some(existing) if existing.updated_at() >= deleted_at => {
                DeleteOutcome::RejectedWithCurrent(existing.clone())
            }
            Some(_) => DeleteOutcome::Accepted,
        }
    }

    /// Apply an upsert to a stored slot, returning the outcome.
    pub fn apply_upsert<E: Entity>(&self, slot: &mut Option<E>, incoming: E) -> UpsertOutcome<E> {
        let outcome = self.resolve_upsert(slot.as_ref(), &incoming);
        if outcome == UpsertOutcome::Accepted {
            *slot = Some(incoming);
        }
        outcome
    }

    /// Apply a deletion to a stored slot, returning the outcome.
    pub fn apply_delete<E: Entity>(
        &self,
        slot: &mut Option<E>,
        deleted_at: Timestamp,
    ) -> DeleteOutcome<E> {
        let outcome = self.resolve_delete(slot.as_ref(), deleted_at);
        if outcome == DeleteOutcome::Accepted {
            if let Some(existing) = slot.as_mut() {
                existing.set_deleted_at(deleted_at);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Memo {
        id: EntityId,
        body: String,
        updated_at: Timestamp,
        deleted_at: Option<Timestamp>,
    }

    impl Entity for Memo {
        const TYPE_ID: &'static str = "memos";

        fn id(&self) -> &EntityId {
            &self.id
        }
        fn updated_at(&self) -> Timestamp {
            self.updated_at
        }
        fn set_updated_at(&mut self, at: Timestamp) {
            self.updated_at = at;
        }
        fn deleted_at(&self) -> Option<Timestamp> {
            self.deleted_at
        }
        fn set_deleted_at(&mut self, at: Timestamp) {
            self.deleted_at = Some(at);
        }
    }

    fn memo(body: &str, updated_at: i64) -> Memo {
        Memo {
            id: EntityId::from("x"),
            body: body.to_string(),
            updated_at: Timestamp::from_millis(updated_at),
            deleted_at: None,
        }
    }

    #[test]
    fn test_new_record_is_inserted() {
        let resolver = ConflictResolver::new();
        let mut slot = None;
        assert_eq!(resolver.apply_upsert(&mut slot, memo("a", 10)), UpsertOutcome::Accepted);
        assert_eq!(slot, Some(memo("a", 10)));
    }

    #[test]
    fn test_newer_upsert_wins() {
        let resolver = ConflictResolver::new();
        let mut slot = Some(memo("old", 10));
        assert_eq!(resolver.apply_upsert(&mut slot, memo("new", 20)), UpsertOutcome::Accepted);
        assert_eq!(slot.unwrap().body, "new");
    }

    #[test]
    fn test_older_upsert_gets_current_back() {
        let resolver = ConflictResolver::new();
        let mut slot = Some(memo("winner", 20));
        let outcome = resolver.apply_upsert(&mut slot, memo("loser", 15));
        assert_eq!(outcome, UpsertOutcome::RejectedWithCurrent(memo("winner", 20)));
        assert_eq!(slot.unwrap().body, "winner");
    }

    #[test]
    fn test_identical_retry_is_rejected_without_change() {
        let resolver = ConflictResolver::new();
        let mut slot = None;
        resolver.apply_upsert(&mut slot, memo("a", 10));
        let outcome = resolver.apply_upsert(&mut slot, memo("a", 10));
        assert_eq!(outcome, UpsertOutcome::RejectedWithCurrent(memo("a", 10)));
        assert_eq!(slot.unwrap().updated_at, Timestamp::from_millis(10));
    }

    #[test]
    fn test_deletion_is_terminal() {
        let resolver = ConflictResolver::new();
        let mut slot = Some(memo("a", 100));
        assert_eq!(
            resolver.apply_delete(&mut slot, Timestamp::from_millis(200)),
            DeleteOutcome::Accepted
        );

        let outcome = resolver.apply_upsert(&mut slot, memo("revived", 250));
        let UpsertOutcome::RejectedWithCurrent(current) = outcome else {
            panic!("upsert after delete must be rejected");
        };
        assert_eq!(current.deleted_at, Some(Timestamp::from_millis(200)));
        assert_eq!(current.body, "a");
    }

    #[test]
    fn test_second_delete_is_noop() {
        let resolver = ConflictResolver::new();
        let mut slot = Some(memo("a", 100));
        resolver.apply_delete(&mut slot, Timestamp::from_millis(200));
        assert_eq!(
            resolver.apply_delete(&mut slot, Timestamp::from_millis(300)),
            DeleteOutcome::AlreadyDeleted
        );
        assert_eq!(slot.unwrap().deleted_at, Some(Timestamp::from_millis(200)));
    }

    #[test]
    fn test_later_edit_beats_earlier_delete() {
        let resolver = ConflictResolver::new();
        let mut slot = Some(memo("edited", 300));
        let outcome = resolver.apply_delete(&mut slot, Timestamp::from_millis(300));
        assert_eq!(outcome, DeleteOutcome::RejectedWithCurrent(memo("edited", 300)));
        assert!(slot.unwrap().deleted_at.is_none());
    }

    #[test]
    fn test_delete_of_unknown_record_is_accepted() {
        let resolver = ConflictResolver::new();
        let mut slot: Option<Memo> = None;
        assert_eq!(
            resolver.apply_delete(&mut slot, Timestamp::from_millis(5)),
            DeleteOutcome::Accepted
        );
        assert!(slot.is_none());
    }

    proptest! {
        #[test]
        fn prop_upsert_accepted_iff_strictly_newer(existing in 0i64..1_000, incoming in 0i64..1_000) {
            let resolver = ConflictResolver::new();
            let current = memo("current", existing);
            let outcome = resolver.resolve_upsert(Some(&current), &memo("incoming", incoming));
            prop_assert_eq!(outcome == UpsertOutcome::Accepted, incoming > existing);
        }

        #[test]
        fn prop_deleted_rejects_every_upsert(deleted in 0i64..1_000, incoming in 0i64..2_000) {
            let resolver = ConflictResolver::new();
            let mut current = memo("current", 0);
            current.set_deleted_at(Timestamp::from_millis(deleted));
            let outcome = resolver.resolve_upsert(Some(&current), &memo("incoming", incoming));
            prop_assert!(matches!(outcome, UpsertOutcome::RejectedWithCurrent(_)));
        }

        #[test]
        fn prop_order_of_arrival_converges(a in 1i64..1_000, b in 1i64..1_000) {
            prop_assume!(a != b);
            let resolver = ConflictResolver::new();

            let mut first = None;
            resolver.apply_upsert(&mut first, memo("a", a));
            resolver.apply_upsert(&mut first, memo("b", b));

            let mut second = None;
            resolver.apply_upsert(&mut second, memo("b", b));
            resolver.apply_upsert(&mut second, memo("a", a));

            prop_assert_eq!(first, second);
        }
    }
}
