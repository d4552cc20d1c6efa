//! Human review of batch-generated records.
//!
//! A [`ReviewSession`] holds one [`ReviewItem`] per generated record. Each
//! item moves through its own small state machine:
//!
//! ```text
//! pending --approve--> approved
//! pending --reject---> rejected
//! pending --regenerate--> regenerating --finish--> pending
//! ```
//!
//! Items are independent: nothing done to one item reads or writes another.
//! Approved items are stored only when the caller asks via
//! [`ReviewSession::persist_approved`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::GenerationError;
use crate::generate::{BatchFlow, BatchKind};
use crate::records::{DomainRecord, GeneratedRecord};
use crate::storage::{self, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Regenerating,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Regenerating => "regenerating",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    Regenerate,
    FinishRegeneration,
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Regenerate => "regenerate",
            Self::FinishRegeneration => "finish regeneration",
        })
    }
}

impl ReviewAction {
    /// Status an item in `from` moves to under this action, if allowed.
    pub fn apply(self, from: ReviewStatus) -> Option<ReviewStatus> {
        match (self, from) {
            (Self::Approve, ReviewStatus::Pending) => Some(ReviewStatus::Approved),
            (Self::Reject, ReviewStatus::Pending) => Some(ReviewStatus::Rejected),
            (Self::Regenerate, ReviewStatus::Pending) => Some(ReviewStatus::Regenerating),
            (Self::FinishRegeneration, ReviewStatus::Regenerating) => Some(ReviewStatus::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("review item {item} not found")]
    ItemNotFound { item: Uuid },

    #[error("cannot {action} review item {item}: it is {from}")]
    InvalidTransition {
        item: Uuid,
        from: ReviewStatus,
        action: ReviewAction,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Transient id, unrelated to any storage id.
    pub id: Uuid,
    pub status: ReviewStatus,
    pub record: GeneratedRecord,
    /// Regeneration feedback applied so far, oldest first.
    pub feedback: Vec<String>,
    /// Set once the approved record has been stored.
    pub persisted_id: Option<Uuid>,
}

/// Proof that an item entered `regenerating`. Carries what the provider call
/// needs so no lock on the session has to be held while it runs.
#[derive(Debug, Clone)]
pub struct RegenerationTicket {
    pub item: Uuid,
    pub original: GeneratedRecord,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub regenerating: usize,
    pub persisted: usize,
}

#[derive(Debug, Serialize)]
pub struct PersistFailure {
    pub item: Uuid,
    pub error: String,
}

/// Outcome of [`ReviewSession::persist_approved`].
#[derive(Debug, Default, Serialize)]
pub struct PersistReport {
    pub persisted: Vec<DomainRecord>,
    pub failures: Vec<PersistFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSession {
    id: Uuid,
    kind: BatchKind,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
    items: Vec<ReviewItem>,
}

impl ReviewSession {
    pub fn new(kind: BatchKind, owner_id: Uuid, records: Vec<GeneratedRecord>) -> Self {
        let items = records
            .into_iter()
            .map(|record| ReviewItem {
                id: Uuid::new_v4(),
                status: ReviewStatus::Pending,
                record,
                feedback: Vec::new(),
                persisted_id: None,
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            kind,
            owner_id,
            created_at: Utc::now(),
            items,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn items(&self) -> &[ReviewItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn item_mut(&mut self, item: Uuid) -> Result<&mut ReviewItem, ReviewError> {
        self.items
            .iter_mut()
            .find(|i| i.id == item)
            .ok_or(ReviewError::ItemNotFound { item })
    }

    fn transition(&mut self, item: Uuid, action: ReviewAction) -> Result<&mut ReviewItem, ReviewError> {
        let entry = self.item_mut(item)?;
        let next = action
            .apply(entry.status)
            .ok_or(ReviewError::InvalidTransition {
                item,
                from: entry.status,
                action,
            })?;
        tracing::debug!(%item, from = %entry.status, to = %next, "review transition");
        entry.status = next;
        Ok(entry)
    }

    pub fn approve(&mut self, item: Uuid) -> Result<&ReviewItem, ReviewError> {
        Ok(self.transition(item, ReviewAction::Approve)?)
    }

    pub fn reject(&mut self, item: Uuid) -> Result<&ReviewItem, ReviewError> {
        Ok(self.transition(item, ReviewAction::Reject)?)
    }

    /// Move a pending item to `regenerating` and hand back what the provider
    /// call needs.
    pub fn begin_regeneration(
        &mut self,
        item: Uuid,
        feedback: impl Into<String>,
    ) -> Result<RegenerationTicket, ReviewError> {
        let entry = self.transition(item, ReviewAction::Regenerate)?;
        Ok(RegenerationTicket {
            item,
            original: entry.record.clone(),
            feedback: feedback.into(),
        })
    }

    /// Return a regenerating item to `pending`. On success the record is
    /// replaced and the feedback recorded; on failure the content is left
    /// as it was and the error is passed back.
    pub fn finish_regeneration(
        &mut self,
        ticket: RegenerationTicket,
        outcome: Result<GeneratedRecord, GenerationError>,
    ) -> Result<&ReviewItem, ReviewError> {
        let entry = self.transition(ticket.item, ReviewAction::FinishRegeneration)?;
        match outcome {
            Ok(record) => {
                entry.record = record;
                entry.feedback.push(ticket.feedback);
                Ok(entry)
            }
            Err(e) => {
                tracing::warn!(item = %ticket.item, error = %e, "regeneration failed, keeping original");
                Err(ReviewError::Generation(e))
            }
        }
    }

    /// Regenerate one item with feedback. The item is `pending` afterwards
    /// whether or not the provider call succeeded.
    pub async fn regenerate(
        &mut self,
        item: Uuid,
        feedback: impl Into<String>,
        flow: &BatchFlow,
    ) -> Result<&ReviewItem, ReviewError> {
        let ticket = self.begin_regeneration(item, feedback)?;
        let outcome = flow.regenerate(&ticket.original, &ticket.feedback).await;
        self.finish_regeneration(ticket, outcome)
    }

    pub fn view_details(&self, item: Uuid) -> Result<&ReviewItem, ReviewError> {
        self.items
            .iter()
            .find(|i| i.id == item)
            .ok_or(ReviewError::ItemNotFound { item })
    }

    /// Store every approved item not stored yet. Safe to call repeatedly:
    /// stored items are skipped, failed ones are retried on the next call.
    pub async fn persist_approved(&mut self, storage: &dyn Storage) -> PersistReport {
        let mut report = PersistReport::default();
        for entry in self
            .items
            .iter_mut()
            .filter(|i| i.status == ReviewStatus::Approved && i.persisted_id.is_none())
        {
            match storage::create_record(storage, &entry.record).await {
                Ok(stored) => {
                    entry.persisted_id = Some(stored.id());
                    report.persisted.push(stored);
                }
                Err(e) => {
                    tracing::warn!(item = %entry.id, error = %e, "failed to persist approved item");
                    report.failures.push(PersistFailure {
                        item: entry.id,
                        error: format!("{e:#}"),
                    });
                }
            }
        }
        report
    }

    pub fn summary(&self) -> ReviewSummary {
        let mut summary = ReviewSummary::default();
        for item in &self.items {
            match item.status {
                ReviewStatus::Pending => summary.pending += 1,
                ReviewStatus::Approved => summary.approved += 1,
                ReviewStatus::Rejected => summary.rejected += 1,
                ReviewStatus::Regenerating => summary.regenerating += 1,
            }
            if item.persisted_id.is_some() {
                summary.persisted += 1;
            }
        }
        summary
    }

    /// No item is waiting on a decision or a provider call.
    pub fn is_resolved(&self) -> bool {
        self.items
            .iter()
            .all(|i| matches!(i.status, ReviewStatus::Approved | ReviewStatus::Rejected))
    }

    /// Approved items that still need saving.
    pub fn has_unsaved_approvals(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.status == ReviewStatus::Approved && i.persisted_id.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use testmaster_db::models::NewTestCase;

    fn case(title: &str) -> GeneratedRecord {
        GeneratedRecord::Case(NewTestCase {
            title: title.into(),
            generated_by_ai: true,
            ..Default::default()
        })
    }

    fn session(n: usize) -> ReviewSession {
        ReviewSession::new(
            BatchKind::Cases,
            Uuid::new_v4(),
            (0..n).map(|i| case(&format!("case {i}"))).collect(),
        )
    }

    #[test]
    fn transition_table() {
        use ReviewAction::*;
        use ReviewStatus::*;
        assert_eq!(Approve.apply(Pending), Some(Approved));
        assert_eq!(Reject.apply(Pending), Some(Rejected));
        assert_eq!(Regenerate.apply(Pending), Some(Regenerating));
        assert_eq!(FinishRegeneration.apply(Regenerating), Some(Pending));

        for from in [Approved, Rejected, Regenerating] {
            assert_eq!(Approve.apply(from), None);
            assert_eq!(Reject.apply(from), None);
            assert_eq!(Regenerate.apply(from), None);
        }
        assert_eq!(FinishRegeneration.apply(Pending), None);
    }

    #[test]
    fn new_session_items_are_pending_with_fresh_ids() {
        let s = session(3);
        assert_eq!(s.summary().pending, 3);
        assert!(!s.is_resolved());
        let mut ids: Vec<Uuid> = s.items().iter().map(|i| i.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert!(s.items().iter().all(|i| i.persisted_id.is_none()));
    }

    #[test]
    fn operations_touch_only_their_item() {
        let mut s = session(3);
        let ids: Vec<Uuid> = s.items().iter().map(|i| i.id).collect();
        let before = s.items().to_vec();

        s.approve(ids[1]).unwrap();
        assert_eq!(s.items()[0], before[0]);
        assert_eq!(s.items()[2], before[2]);

        s.reject(ids[0]).unwrap();
        assert_eq!(s.items()[2], before[2]);
        assert_eq!(s.items()[1].status, ReviewStatus::Approved);
    }

    #[test]
    fn invalid_transitions_are_reported() {
        let mut s = session(1);
        let id = s.items()[0].id;
        s.approve(id).unwrap();

        match s.reject(id).unwrap_err() {
            ReviewError::InvalidTransition { from, action, .. } => {
                assert_eq!(from, ReviewStatus::Approved);
                assert_eq!(action, ReviewAction::Reject);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            s.approve(Uuid::new_v4()),
            Err(ReviewError::ItemNotFound { .. })
        ));
    }

    #[test]
    fn failed_regeneration_keeps_content_and_returns_to_pending() {
        let mut s = session(1);
        let id = s.items()[0].id;
        let original = s.items()[0].record.clone();

        let ticket = s.begin_regeneration(id, "more edge cases").unwrap();
        assert_eq!(s.view_details(id).unwrap().status, ReviewStatus::Regenerating);
        // A second regeneration cannot start while one is in flight.
        assert!(s.begin_regeneration(id, "again").is_err());

        let err = s
            .finish_regeneration(ticket, Err(GenerationError::Cancelled))
            .unwrap_err();
        assert!(matches!(err, ReviewError::Generation(GenerationError::Cancelled)));

        let item = s.view_details(id).unwrap();
        assert_eq!(item.status, ReviewStatus::Pending);
        assert_eq!(item.record, original);
        assert!(item.feedback.is_empty());
    }

    #[test]
    fn successful_regeneration_replaces_record_and_logs_feedback() {
        let mut s = session(1);
        let id = s.items()[0].id;

        let ticket = s.begin_regeneration(id, "cover lockout").unwrap();
        let item = s
            .finish_regeneration(ticket, Ok(case("lockout after 5 tries")))
            .unwrap();
        assert_eq!(item.status, ReviewStatus::Pending);
        assert_eq!(item.record.title(), "lockout after 5 tries");
        assert_eq!(item.feedback, vec!["cover lockout".to_string()]);
    }

    #[tokio::test]
    async fn persist_approved_is_idempotent_and_skips_rejected() {
        let storage = MemoryStorage::new();
        let mut s = session(3);
        let ids: Vec<Uuid> = s.items().iter().map(|i| i.id).collect();
        s.approve(ids[1]).unwrap();
        s.reject(ids[0]).unwrap();
        s.reject(ids[2]).unwrap();
        assert!(s.is_resolved());
        assert!(s.has_unsaved_approvals());

        let report = s.persist_approved(&storage).await;
        assert_eq!(report.persisted.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(s.items()[1].persisted_id, Some(report.persisted[0].id()));

        let again = s.persist_approved(&storage).await;
        assert!(again.persisted.is_empty());
        assert_eq!(s.summary().persisted, 1);
        assert!(!s.has_unsaved_approvals());
    }

    #[tokio::test]
    async fn persist_failures_are_retried_later() {
        let storage = MemoryStorage::new();
        let mut s = session(1);
        let id = s.items()[0].id;
        s.approve(id).unwrap();

        storage.set_unavailable(true);
        let report = s.persist_approved(&storage).await;
        assert!(report.persisted.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(s.items()[0].persisted_id, None);

        storage.set_unavailable(false);
        let report = s.persist_approved(&storage).await;
        assert_eq!(report.persisted.len(), 1);
    }

    #[test]
    fn empty_session_is_resolved() {
        let s = session(0);
        assert!(s.is_empty());
        assert!(s.is_resolved());
        assert_eq!(s.summary(), ReviewSummary::default());
    }
}
