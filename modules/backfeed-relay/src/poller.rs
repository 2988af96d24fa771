// Poll handler: bring one source's comment set up to date and schedule the
// next poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use backfeed_common::{
    BackfeedError, Clock, Comment, CommentId, PlatformKind, Source, SourceId, SourceStatus,
};
use backfeed_silo::Silo;
use backfeed_store::EntityStore;

use crate::queue::{Job, JobQueue};

/// Delay before a source's next poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Activities fetched per poll.
pub const FETCH_LIMIT: u32 = 20;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub new_comments: usize,
}

pub struct Poller {
    store: Arc<dyn EntityStore>,
    silos: HashMap<PlatformKind, Arc<dyn Silo>>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(
        store: Arc<dyn EntityStore>,
        silos: HashMap<PlatformKind, Arc<dyn Silo>>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            silos,
            queue,
            clock,
        }
    }

    /// Handle one Poll job. `expected_last_polled` is the de-duplication
    /// token: a mismatch means a duplicate delivery already superseded this
    /// job, and the handler aborts without side effects.
    pub async fn poll(
        &self,
        source_id: &SourceId,
        expected_last_polled: chrono::DateTime<chrono::Utc>,
    ) -> Result<PollOutcome, BackfeedError> {
        let mut source = match self.store.get_source(source_id).await? {
            Some(source) => source,
            None => {
                warn!(source = %source_id, "Source not found, dropping task");
                return Ok(PollOutcome::default());
            }
        };

        if source.status == SourceStatus::Disabled {
            info!(source = %source_id, "Source is disabled, dropping task");
            return Ok(PollOutcome::default());
        }

        if source.last_polled != expected_last_polled {
            warn!(source = %source_id, "Duplicate poll task, deferring to the other task");
            return Ok(PollOutcome::default());
        }

        match self.do_poll(&source).await {
            Ok(outcome) => {
                source.last_polled = self.clock.now();
                source.status = SourceStatus::Enabled;
                self.store.put_source(&source).await?;
                self.queue.enqueue(
                    Job::Poll {
                        source_id: source.id.clone(),
                        last_polled: source.last_polled,
                    },
                    POLL_INTERVAL,
                );
                Ok(outcome)
            }
            Err(BackfeedError::Deauthorized) => {
                // The user deauthorized us. Let the task complete successfully
                // so it is never retried; the source just stops being polled.
                error!(source = %source_id, "Disabling source");
                source.status = SourceStatus::Disabled;
                self.store.put_source(&source).await?;
                Ok(PollOutcome::default())
            }
            Err(e) => {
                source.status = SourceStatus::Error;
                self.store.put_source(&source).await?;
                Err(e)
            }
        }
    }

    async fn do_poll(&self, source: &Source) -> Result<PollOutcome, BackfeedError> {
        let silo = self.silos.get(&source.platform).ok_or_else(|| {
            BackfeedError::Config(format!("no silo configured for {}", source.platform))
        })?;

        info!(source = %source.id, label = silo.label(source).as_str(), "Polling");
        let activities = silo.fetch_new_comments(source, FETCH_LIMIT).await?;
        info!(source = %source.id, activities = activities.len(), "Found activities");

        let mut new_comments = 0;
        for activity in activities {
            let targets = activity.article_targets();
            info!(
                activity = activity.id.as_str(),
                ?targets,
                "Discovered original post URLs"
            );

            // Persist each comment with its own reply plus the surrounding
            // activity context, not the whole reply list once per reply.
            let activity_json = serde_json::to_string(&activity.without_replies())
                .map_err(|e| BackfeedError::Store(e.to_string()))?;

            for reply in &activity.replies {
                let comment = Comment::new(
                    CommentId::new(reply.id.clone()),
                    source.id.clone(),
                    activity_json.clone(),
                    serde_json::to_string(reply)
                        .map_err(|e| BackfeedError::Store(e.to_string()))?,
                    targets.iter().cloned(),
                    self.clock.now(),
                );

                if self.store.create_comment_if_absent(&comment).await? {
                    new_comments += 1;
                    self.queue.enqueue(
                        Job::Propagate {
                            comment_id: comment.id.clone(),
                        },
                        Duration::ZERO,
                    );
                }
            }
        }

        Ok(PollOutcome { new_comments })
    }
}
