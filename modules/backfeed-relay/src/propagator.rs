// Propagate handler: one delivery pass over a leased comment.
//
// The working set is pending ∪ failed; sent targets are excluded by
// construction, which is what makes re-delivery idempotent. The pass builds
// fresh result sets and commits them in the same transaction as the final
// status transition.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use backfeed_common::{
    parse_tag_uri, Activity, BackfeedError, Comment, CommentId, CommentStatus, Source,
};
use backfeed_store::EntityStore;

use crate::filter;
use crate::lease::{LeaseManager, LeaseOutcome};
use crate::webmention::{WebmentionClient, WebmentionOutcome};

/// Delivery attempts per target before it is dropped as undeliverable.
pub const MAX_TARGET_ATTEMPTS: u32 = 8;

pub struct Propagator {
    store: Arc<dyn EntityStore>,
    lease: LeaseManager,
    webmention: Arc<dyn WebmentionClient>,
    /// Public base URL for the local comment permalinks webmentions are sent
    /// from.
    base_url: String,
}

impl Propagator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        lease: LeaseManager,
        webmention: Arc<dyn WebmentionClient>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lease,
            webmention,
            base_url: base_url.into(),
        }
    }

    /// Handle one Propagate job. Safe to invoke any number of times for the
    /// same comment.
    pub async fn propagate(&self, id: &CommentId) -> Result<(), BackfeedError> {
        let mut comment = match self.lease.lease(id).await {
            Ok(LeaseOutcome::Acquired(comment)) => comment,
            Ok(LeaseOutcome::AlreadyComplete) => return Ok(()),
            // Another worker owns the lease: fail without mutating state and
            // let the queue's backoff space out the duplicates.
            Err(e) if e.is_contention() => return Err(e),
            Err(e) => {
                error!(comment = %id, error = %e, "Could not lease comment");
                self.lease.release(id, CommentStatus::Error).await?;
                return Err(e);
            }
        };

        match self.deliver_pass(&mut comment).await {
            Ok(()) if comment.targets_failed.is_empty() => self.lease.complete(&comment).await,
            Ok(()) => {
                warn!(
                    comment = %id,
                    failed = comment.targets_failed.len(),
                    "Propagate pass left failed targets, will retry"
                );
                self.lease.release_with(&comment, CommentStatus::Error).await?;
                Err(BackfeedError::Http(format!(
                    "{} targets failed delivery",
                    comment.targets_failed.len()
                )))
            }
            Err(e) => {
                error!(comment = %id, error = %e, "Propagate pass failed");
                self.lease.release_with(&comment, CommentStatus::Error).await?;
                Err(e)
            }
        }
    }

    /// One delivery pass. Reconciles the comment's target sets in place; the
    /// caller commits them with the final status transition.
    async fn deliver_pass(&self, comment: &mut Comment) -> Result<(), BackfeedError> {
        let source_url = self.local_comment_url(comment).await?;

        // Failed targets get one more try each time the comment is processed.
        let working: BTreeSet<String> = comment
            .targets_pending
            .union(&comment.targets_failed)
            .cloned()
            .collect();

        let mut sent = BTreeSet::new();
        let mut failed = BTreeSet::new();

        for target in &working {
            if !filter::is_eligible(target) {
                info!(target = target.as_str(), "Skipping target, domain doesn't support webmentions");
                continue;
            }

            let attempts = comment.attempt_counts.get(target).copied().unwrap_or(0);
            if attempts >= MAX_TARGET_ATTEMPTS {
                warn!(target = target.as_str(), attempts, "Giving up target, delivery attempts exhausted");
                continue;
            }

            info!(source = source_url.as_str(), target = target.as_str(), "Sending webmention");
            match self.webmention.send(&source_url, target).await {
                Ok(WebmentionOutcome::Accepted) => {
                    info!(target = target.as_str(), "Webmention accepted");
                    sent.insert(target.clone());
                }
                Ok(WebmentionOutcome::NoEndpoint) => {
                    info!(target = target.as_str(), "Giving up target, no webmention endpoint");
                }
                Ok(WebmentionOutcome::Failed { detail }) => {
                    warn!(target = target.as_str(), detail = detail.as_str(), "Webmention rejected");
                    *comment.attempt_counts.entry(target.clone()).or_insert(0) += 1;
                    failed.insert(target.clone());
                }
                Err(e) => {
                    warn!(target = target.as_str(), error = %e, "Webmention send failed");
                    *comment.attempt_counts.entry(target.clone()).or_insert(0) += 1;
                    failed.insert(target.clone());
                }
            }
        }

        // Every working target is now accounted for exactly once; the rest
        // were dropped as ineligible, endpointless, or exhausted.
        comment.targets_pending.clear();
        comment.targets_sent.extend(sent);
        comment.targets_failed = failed;
        Ok(())
    }

    /// Local permalink for the comment, the webmention source:
    /// `{base}/comment/{platform}/{source}/{post id}/{comment id}`.
    async fn local_comment_url(&self, comment: &Comment) -> Result<String, BackfeedError> {
        let source: Source = self
            .store
            .get_source(&comment.source)
            .await?
            .ok_or_else(|| {
                BackfeedError::InvariantViolation(format!(
                    "source {} of comment {} disappeared",
                    comment.source, comment.id
                ))
            })?;

        let activity: Activity = serde_json::from_str(&comment.activity_json)
            .map_err(|e| BackfeedError::Store(format!("bad activity payload: {e}")))?;

        let (_, post_id) = parse_tag_uri(&activity.id).ok_or_else(|| {
            BackfeedError::Store(format!("bad activity id {}", activity.id))
        })?;
        let (_, comment_id) = parse_tag_uri(comment.id.as_str()).ok_or_else(|| {
            BackfeedError::Store(format!("bad comment id {}", comment.id))
        })?;

        Ok(format!(
            "{}/comment/{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            source.platform.short_name(),
            source.id,
            post_id,
            comment_id
        ))
    }
}
