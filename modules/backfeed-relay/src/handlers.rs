use async_trait::async_trait;

use crate::poller::Poller;
use crate::propagator::Propagator;
use crate::queue::{Job, JobHandler};

/// Dispatches queue jobs to the two pipeline handlers.
pub struct RelayHandler {
    poller: Poller,
    propagator: Propagator,
}

impl RelayHandler {
    pub fn new(poller: Poller, propagator: Propagator) -> Self {
        Self { poller, propagator }
    }
}

#[async_trait]
impl JobHandler for RelayHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        match job {
            Job::Poll {
                source_id,
                last_polled,
            } => {
                self.poller.poll(source_id, *last_polled).await?;
                Ok(())
            }
            Job::Propagate { comment_id } => {
                self.propagator.propagate(comment_id).await?;
                Ok(())
            }
        }
    }
}
