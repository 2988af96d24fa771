// Test mocks for the relay pipeline.
//
// MockWebmention scripts per-target outcomes and records every attempt, so
// tests can assert both what was sent and what was never re-attempted.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use backfeed_common::{
    tag_uri, Activity, ActivityTag, Author, BackfeedError, PlatformKind, Reply, Source, SourceId,
    SourceStatus,
};

use crate::webmention::{WebmentionClient, WebmentionOutcome};

enum SendScript {
    Outcome(WebmentionOutcome),
    TransportError(String),
}

/// Scripted webmention transport. Unscripted targets are accepted.
pub struct MockWebmention {
    scripts: Mutex<HashMap<String, VecDeque<SendScript>>>,
    attempts: Mutex<Vec<(String, String)>>,
}

impl MockWebmention {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Script the next outcome for a target. Multiple calls queue up.
    pub fn on(&self, target: &str, outcome: WebmentionOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .push_back(SendScript::Outcome(outcome));
    }

    /// Script a transport-level error for a target.
    pub fn on_transport_error(&self, target: &str, detail: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .push_back(SendScript::TransportError(detail.to_string()));
    }

    /// All (source, target) attempts, in order.
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self, target: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t == target)
            .count()
    }
}

impl Default for MockWebmention {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebmentionClient for MockWebmention {
    async fn send(
        &self,
        source_url: &str,
        target_url: &str,
    ) -> Result<WebmentionOutcome, BackfeedError> {
        self.attempts
            .lock()
            .unwrap()
            .push((source_url.to_string(), target_url.to_string()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(target_url)
            .and_then(|q| q.pop_front());

        match script {
            Some(SendScript::Outcome(outcome)) => Ok(outcome),
            Some(SendScript::TransportError(detail)) => Err(BackfeedError::Http(detail)),
            None => Ok(WebmentionOutcome::Accepted),
        }
    }
}

// --- Fixture helpers ---

pub fn test_source(id: &str) -> Source {
    Source {
        id: SourceId::new(id),
        platform: PlatformKind::Facebook,
        name: "fake".to_string(),
        credential: "token".to_string(),
        last_polled: Utc.with_ymd_and_hms(2013, 2, 1, 0, 0, 0).unwrap(),
        status: SourceStatus::Enabled,
    }
}

/// An activity on fa.ke with the given targets and one reply per reply id.
pub fn test_activity(post_id: &str, targets: &[&str], reply_ids: &[&str]) -> Activity {
    Activity {
        id: tag_uri("fa.ke", 2013, post_id),
        url: Some(format!("http://fa.ke/post/{post_id}")),
        actor: Some(Author {
            name: Some("fake".to_string()),
            url: Some("http://fa.ke/fake".to_string()),
        }),
        content: format!("foo {} bar", targets.join(" ")),
        tags: targets
            .iter()
            .map(|t| ActivityTag {
                object_type: "article".to_string(),
                url: Some(t.to_string()),
            })
            .collect(),
        replies: reply_ids
            .iter()
            .map(|id| Reply {
                id: tag_uri("fa.ke", 2013, id),
                url: Some(format!("http://fa.ke/comment/{id}")),
                author: Some(Author {
                    name: Some("commenter".to_string()),
                    url: Some("http://fa.ke/commenter".to_string()),
                }),
                content: "foo bar".to_string(),
                published: Some(Utc.with_ymd_and_hms(2013, 2, 1, 12, 0, 0).unwrap()),
            })
            .collect(),
    }
}
