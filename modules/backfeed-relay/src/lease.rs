// Comment lease manager.
//
// State machine: new → processing → complete; processing → error;
// error → processing (retry). A second lease while processing and unexpired
// is rejected; complete is terminal. Every operation is one atomic
// read-modify-write against the store, and complete/release re-read the
// record fresh so a lease stolen after expiry is detected instead of
// clobbered.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use backfeed_common::{BackfeedError, Clock, Comment, CommentId, CommentStatus};
use backfeed_store::EntityStore;

/// Exceeds the deadline of one processing attempt, with padding.
pub fn lease_length() -> Duration {
    Duration::minutes(12)
}

/// Result of a lease attempt that didn't error.
pub enum LeaseOutcome {
    /// The caller owns the comment for one processing pass.
    Acquired(Comment),
    /// A previous invocation already finished this comment. Finish without
    /// reprocessing.
    AlreadyComplete,
}

pub struct LeaseManager {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Attempt to acquire the lease.
    ///
    /// Errors: `LeaseContention` while another worker's lease is live,
    /// `RecordVanished` if the record is gone.
    pub async fn lease(&self, id: &CommentId) -> Result<LeaseOutcome, BackfeedError> {
        let now = self.clock.now();
        let leased_until = now + lease_length();

        let txn_id = id.clone();
        let final_state = self
            .store
            .update_comment(
                id,
                Box::new(move |current| {
                    let mut comment = current.ok_or_else(|| {
                        BackfeedError::RecordVanished(format!("no comment entity {txn_id}"))
                    })?;

                    match comment.status {
                        CommentStatus::Complete => Ok(None),
                        CommentStatus::Processing
                            if comment.lease_expiry.is_some_and(|until| now < until) =>
                        {
                            Err(BackfeedError::LeaseContention)
                        }
                        // New, Error, or Processing with an expired lease.
                        _ => {
                            comment.status = CommentStatus::Processing;
                            comment.lease_expiry = Some(leased_until);
                            Ok(Some(comment))
                        }
                    }
                }),
            )
            .await;

        match final_state {
            Ok(Some(comment)) if comment.status == CommentStatus::Complete => {
                warn!(comment = %id, "Duplicate task, comment already propagated");
                Ok(LeaseOutcome::AlreadyComplete)
            }
            Ok(Some(comment)) => {
                info!(comment = %id, until = %leased_until, "Lease acquired");
                Ok(LeaseOutcome::Acquired(comment))
            }
            Ok(None) => Err(BackfeedError::RecordVanished(format!(
                "no comment entity {id}"
            ))),
            Err(e) => {
                if e.is_contention() {
                    warn!(comment = %id, "Lease denied, another worker is processing");
                }
                Err(e)
            }
        }
    }

    /// Mark the comment complete, persisting the worker's reconciled target
    /// sets. Duplicate completion is a no-op; completing a never-leased or
    /// stolen-and-released comment is an invariant violation.
    pub async fn complete(&self, comment: &Comment) -> Result<(), BackfeedError> {
        let id = comment.id.clone();
        let mut updated = comment.clone();
        updated.status = CommentStatus::Complete;
        updated.lease_expiry = None;

        self.store
            .update_comment(
                &comment.id,
                Box::new(move |current| {
                    let existing = current.ok_or_else(|| {
                        BackfeedError::RecordVanished(format!("comment entity {id} disappeared"))
                    })?;

                    match existing.status {
                        CommentStatus::Complete => {
                            warn!(comment = %id, "Comment stolen and finished, lease expired?");
                            Ok(None)
                        }
                        CommentStatus::New => Err(BackfeedError::InvariantViolation(format!(
                            "comment {id} went backward from processing to new"
                        ))),
                        CommentStatus::Error => Err(BackfeedError::InvariantViolation(format!(
                            "comment {id} was stolen and released while we held the lease"
                        ))),
                        CommentStatus::Processing => Ok(Some(updated)),
                    }
                }),
            )
            .await?;

        info!(comment = %comment.id, sent = comment.targets_sent.len(), "Comment complete");
        Ok(())
    }

    /// Release the lease, persisting the worker's reconciled target sets. A
    /// no-op if another worker already resolved the record.
    pub async fn release_with(
        &self,
        comment: &Comment,
        new_status: CommentStatus,
    ) -> Result<(), BackfeedError> {
        let mut updated = comment.clone();
        updated.status = new_status;
        updated.lease_expiry = None;

        self.store
            .update_comment(
                &comment.id,
                Box::new(move |current| match current {
                    Some(existing) if existing.status == CommentStatus::Processing => {
                        Ok(Some(updated))
                    }
                    _ => Ok(None),
                }),
            )
            .await?;

        info!(comment = %comment.id, status = %new_status, "Comment released");
        Ok(())
    }

    /// Release by id with no set changes, for failure paths that never got a
    /// comment in hand.
    pub async fn release(
        &self,
        id: &CommentId,
        new_status: CommentStatus,
    ) -> Result<(), BackfeedError> {
        self.store
            .update_comment(
                id,
                Box::new(move |current| match current {
                    Some(mut existing) if existing.status == CommentStatus::Processing => {
                        existing.status = new_status;
                        existing.lease_expiry = None;
                        Ok(Some(existing))
                    }
                    _ => Ok(None),
                }),
            )
            .await?;
        Ok(())
    }
}
