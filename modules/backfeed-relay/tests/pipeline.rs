// End-to-end poll → propagate scenarios over the in-memory store, the fake
// silo, and the scripted webmention transport.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use backfeed_common::{
    BackfeedError, Clock, Comment, CommentId, CommentStatus, FixedClock, PlatformKind, SourceId,
    SourceStatus,
};
use backfeed_silo::{FakeSilo, Silo};
use backfeed_store::{EntityStore, MemoryStore};

use backfeed_relay::lease::{LeaseManager, LeaseOutcome};
use backfeed_relay::poller::Poller;
use backfeed_relay::propagator::{Propagator, MAX_TARGET_ATTEMPTS};
use backfeed_relay::queue::{Job, JobQueue, JobReceiver};
use backfeed_relay::testing::{test_activity, test_source, MockWebmention};
use backfeed_relay::webmention::WebmentionOutcome;

const BASE_URL: &str = "http://localhost";

struct Rig {
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
    silo: Arc<FakeSilo>,
    webmention: Arc<MockWebmention>,
    poller: Poller,
    propagator: Propagator,
    receiver: JobReceiver,
}

async fn rig() -> Rig {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let silo = Arc::new(FakeSilo::new());
    let webmention = Arc::new(MockWebmention::new());

    let (queue, receiver) = JobQueue::new();
    let mut silos: HashMap<PlatformKind, Arc<dyn Silo>> = HashMap::new();
    silos.insert(PlatformKind::Facebook, silo.clone());

    let poller = Poller::new(
        store.clone(),
        silos,
        queue.clone(),
        clock.clone(),
    );
    let lease = LeaseManager::new(store.clone(), clock.clone());
    let propagator = Propagator::new(store.clone(), lease, webmention.clone(), BASE_URL);

    Rig {
        store,
        clock,
        silo,
        webmention,
        poller,
        propagator,
        receiver,
    }
}

impl Rig {
    async fn seed_source(&self, id: &str) -> SourceId {
        let source = test_source(id);
        self.store.put_source(&source).await.unwrap();
        source.id
    }

    /// Insert a comment directly, as if a previous poll created it.
    async fn seed_comment(&self, id: &str, targets: &[&str]) -> CommentId {
        let source_id = self.seed_source("2468").await;
        let activity = test_activity("a", targets, &[]);
        let comment = Comment::new(
            CommentId::new(id),
            source_id,
            serde_json::to_string(&activity).unwrap(),
            "{}".to_string(),
            targets.iter().map(|t| t.to_string()),
            self.clock.now(),
        );
        self.store.create_comment_if_absent(&comment).await.unwrap();
        comment.id
    }

    async fn comment(&self, id: &CommentId) -> Comment {
        self.store.get_comment(id).await.unwrap().unwrap()
    }

    fn drain_jobs(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Some(job) = self.receiver.try_next() {
            jobs.push(job);
        }
        jobs
    }
}

// --- Poll ---

#[tokio::test]
async fn poll_creates_comments_and_schedules_propagation() {
    let mut rig = rig().await;
    let source_id = rig.seed_source("2468").await;
    let before = rig.store.get_source(&source_id).await.unwrap().unwrap();

    rig.silo.set_activities(
        "2468",
        vec![test_activity("a", &["http://target1/post"], &["a_1", "a_2"])],
    );

    let outcome = rig.poller.poll(&source_id, before.last_polled).await.unwrap();
    assert_eq!(outcome.new_comments, 2);

    // One Propagate job per new comment, delivered immediately.
    let jobs = rig.drain_jobs();
    assert_eq!(
        jobs,
        vec![
            Job::Propagate {
                comment_id: CommentId::new("tag:fa.ke,2013:a_1")
            },
            Job::Propagate {
                comment_id: CommentId::new("tag:fa.ke,2013:a_2")
            },
        ]
    );

    let comment = rig.comment(&CommentId::new("tag:fa.ke,2013:a_1")).await;
    assert_eq!(comment.status, CommentStatus::New);
    assert!(comment.targets_pending.contains("http://target1/post"));
    assert!(comment.sets_disjoint());

    // The stored activity context no longer carries the reply list.
    assert!(!comment.activity_json.contains("a_2"));

    let after = rig.store.get_source(&source_id).await.unwrap().unwrap();
    assert_eq!(after.status, SourceStatus::Enabled);
    assert!(after.last_polled > before.last_polled);
}

#[tokio::test]
async fn repolling_creates_no_duplicates() {
    let mut rig = rig().await;
    let source_id = rig.seed_source("2468").await;
    rig.silo.set_activities(
        "2468",
        vec![test_activity("a", &["http://target1/post"], &["a_1"])],
    );

    let token = rig.store.get_source(&source_id).await.unwrap().unwrap().last_polled;
    rig.poller.poll(&source_id, token).await.unwrap();
    rig.drain_jobs();

    // Same activities come back on the next poll; the comment already exists.
    let token = rig.store.get_source(&source_id).await.unwrap().unwrap().last_polled;
    let outcome = rig.poller.poll(&source_id, token).await.unwrap();
    assert_eq!(outcome.new_comments, 0);
    assert!(rig
        .drain_jobs()
        .iter()
        .all(|j| !matches!(j, Job::Propagate { .. })));
}

#[tokio::test]
async fn repolling_leaves_in_flight_work_untouched() {
    let mut rig = rig().await;
    let source_id = rig.seed_source("2468").await;
    rig.silo.set_activities(
        "2468",
        vec![test_activity("a", &["http://target1/post"], &["a_1"])],
    );

    let token = rig.store.get_source(&source_id).await.unwrap().unwrap().last_polled;
    rig.poller.poll(&source_id, token).await.unwrap();
    rig.drain_jobs();

    // Deliver the comment, then re-poll with the same raw reply present.
    let id = CommentId::new("tag:fa.ke,2013:a_1");
    rig.propagator.propagate(&id).await.unwrap();
    assert_eq!(rig.comment(&id).await.status, CommentStatus::Complete);

    let token = rig.store.get_source(&source_id).await.unwrap().unwrap().last_polled;
    rig.poller.poll(&source_id, token).await.unwrap();

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Complete);
    assert!(comment.targets_sent.contains("http://target1/post"));
}

#[tokio::test]
async fn stale_poll_token_aborts_without_fetching() {
    let rig = rig().await;
    let source_id = rig.seed_source("2468").await;

    let stale = Utc::now() - Duration::days(1);
    let outcome = rig.poller.poll(&source_id, stale).await.unwrap();
    assert_eq!(outcome.new_comments, 0);
    assert_eq!(rig.silo.fetch_count(), 0);
}

#[tokio::test]
async fn deauthorized_source_is_disabled_and_poll_succeeds() {
    let mut rig = rig().await;
    let source_id = rig.seed_source("2468").await;
    rig.silo.revoke("2468");

    let token = rig.store.get_source(&source_id).await.unwrap().unwrap().last_polled;
    let outcome = rig.poller.poll(&source_id, token).await.unwrap();
    assert_eq!(outcome.new_comments, 0);

    let source = rig.store.get_source(&source_id).await.unwrap().unwrap();
    assert_eq!(source.status, SourceStatus::Disabled);
    // No continuation or propagate jobs for a disabled source.
    assert!(rig.drain_jobs().is_empty());

    // A later delivery of the same job drops without fetching.
    let fetches = rig.silo.fetch_count();
    rig.poller.poll(&source_id, token).await.unwrap();
    assert_eq!(rig.silo.fetch_count(), fetches);
}

#[tokio::test]
async fn fetch_failure_marks_source_error_and_reraises() {
    let rig = rig().await;
    let source_id = rig.seed_source("2468").await;
    // No activities registered: FakeSilo returns empty, so force an error by
    // polling a platform with no silo configured instead.
    let mut source = rig.store.get_source(&source_id).await.unwrap().unwrap();
    source.platform = PlatformKind::Twitter;
    rig.store.put_source(&source).await.unwrap();

    let result = rig.poller.poll(&source_id, source.last_polled).await;
    assert!(result.is_err());
    let source = rig.store.get_source(&source_id).await.unwrap().unwrap();
    assert_eq!(source.status, SourceStatus::Error);
}

// --- Propagate ---

#[tokio::test]
async fn partial_failure_then_retry_completes() {
    let rig = rig().await;
    let id = rig
        .seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post", "http://site-b/post"])
        .await;

    rig.webmention.on("http://site-a/post", WebmentionOutcome::Accepted);
    rig.webmention.on(
        "http://site-b/post",
        WebmentionOutcome::Failed {
            detail: "500: oops".to_string(),
        },
    );

    // First pass: A delivered, B failed, comment parked in error.
    let result = rig.propagator.propagate(&id).await;
    assert!(result.is_err());

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Error);
    assert!(comment.targets_pending.is_empty());
    assert_eq!(
        comment.targets_sent.iter().collect::<Vec<_>>(),
        vec!["http://site-a/post"]
    );
    assert_eq!(
        comment.targets_failed.iter().collect::<Vec<_>>(),
        vec!["http://site-b/post"]
    );
    assert!(comment.sets_disjoint());
    assert_eq!(comment.lease_expiry, None);

    // Second pass: B now succeeds; A must not be re-attempted.
    rig.webmention.on("http://site-b/post", WebmentionOutcome::Accepted);
    rig.propagator.propagate(&id).await.unwrap();

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Complete);
    assert_eq!(comment.targets_sent.len(), 2);
    assert!(comment.targets_failed.is_empty());
    assert_eq!(rig.webmention.attempt_count("http://site-a/post"), 1);
    assert_eq!(rig.webmention.attempt_count("http://site-b/post"), 2);
}

#[tokio::test]
async fn propagate_on_complete_comment_is_noop() {
    let rig = rig().await;
    let id = rig.seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post"]).await;

    rig.propagator.propagate(&id).await.unwrap();
    assert_eq!(rig.comment(&id).await.status, CommentStatus::Complete);
    let attempts = rig.webmention.attempts().len();

    // Duplicate task delivery after completion: no attempts, no changes.
    rig.propagator.propagate(&id).await.unwrap();
    assert_eq!(rig.webmention.attempts().len(), attempts);
    assert_eq!(rig.comment(&id).await.status, CommentStatus::Complete);
}

#[tokio::test]
async fn webmention_source_is_the_local_comment_permalink() {
    let rig = rig().await;
    let id = rig.seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post"]).await;

    rig.propagator.propagate(&id).await.unwrap();

    let attempts = rig.webmention.attempts();
    assert_eq!(
        attempts,
        vec![(
            "http://localhost/comment/fb/2468/a/a_1".to_string(),
            "http://site-a/post".to_string()
        )]
    );
}

#[tokio::test]
async fn blacklisted_target_is_dropped_without_attempt() {
    let rig = rig().await;
    let id = rig
        .seed_comment(
            "tag:fa.ke,2013:a_1",
            &["http://www.facebook.com/2468/posts/135", "http://site-a/post"],
        )
        .await;

    rig.propagator.propagate(&id).await.unwrap();

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Complete);
    assert_eq!(
        comment.targets_sent.iter().collect::<Vec<_>>(),
        vec!["http://site-a/post"]
    );
    assert!(comment.targets_pending.is_empty());
    assert!(comment.targets_failed.is_empty());
    assert_eq!(rig.webmention.attempt_count("http://www.facebook.com/2468/posts/135"), 0);
}

#[tokio::test]
async fn target_without_endpoint_is_dropped_permanently() {
    let rig = rig().await;
    let id = rig.seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post"]).await;
    rig.webmention.on("http://site-a/post", WebmentionOutcome::NoEndpoint);

    rig.propagator.propagate(&id).await.unwrap();

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Complete);
    assert!(comment.targets_sent.is_empty());
    assert!(comment.targets_failed.is_empty());
    assert_eq!(rig.webmention.attempt_count("http://site-a/post"), 1);
}

#[tokio::test]
async fn transport_error_is_retried_as_failed_target() {
    let rig = rig().await;
    let id = rig.seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post"]).await;
    rig.webmention.on_transport_error("http://site-a/post", "connection refused");

    assert!(rig.propagator.propagate(&id).await.is_err());

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Error);
    assert!(comment.targets_failed.contains("http://site-a/post"));
    assert_eq!(comment.attempt_counts.get("http://site-a/post"), Some(&1));
}

#[tokio::test]
async fn exhausted_target_is_dropped_and_comment_completes() {
    let rig = rig().await;
    let id = rig.seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post"]).await;

    // Simulate a comment that already burned through its attempts.
    rig.store
        .update_comment(
            &id,
            Box::new(|current| {
                let mut comment = current.unwrap();
                comment
                    .attempt_counts
                    .insert("http://site-a/post".to_string(), MAX_TARGET_ATTEMPTS);
                comment.targets_pending.remove("http://site-a/post");
                comment.targets_failed.insert("http://site-a/post".to_string());
                comment.status = CommentStatus::Error;
                Ok(Some(comment))
            }),
        )
        .await
        .unwrap();

    rig.propagator.propagate(&id).await.unwrap();

    let comment = rig.comment(&id).await;
    assert_eq!(comment.status, CommentStatus::Complete);
    assert!(comment.targets_failed.is_empty());
    assert_eq!(rig.webmention.attempt_count("http://site-a/post"), 0);
}

#[tokio::test]
async fn contended_lease_fails_without_mutation() {
    let rig = rig().await;
    let id = rig.seed_comment("tag:fa.ke,2013:a_1", &["http://site-a/post"]).await;

    // Another worker holds the lease.
    let other = LeaseManager::new(
        rig.store.clone() as Arc<dyn EntityStore>,
        rig.clock.clone() as Arc<dyn Clock>,
    );
    let held = match other.lease(&id).await.unwrap() {
        LeaseOutcome::Acquired(c) => c,
        LeaseOutcome::AlreadyComplete => panic!("expected acquisition"),
    };

    let err = rig.propagator.propagate(&id).await.err().expect("must contend");
    assert!(matches!(err, BackfeedError::LeaseContention));
    assert!(rig.webmention.attempts().is_empty());

    let stored = rig.comment(&id).await;
    assert_eq!(stored.status, CommentStatus::Processing);
    assert_eq!(stored.lease_expiry, held.lease_expiry);

    // Once the lease expires, a retry takes over and finishes the job.
    rig.clock.advance(Duration::minutes(13));
    rig.propagator.propagate(&id).await.unwrap();
    assert_eq!(rig.comment(&id).await.status, CommentStatus::Complete);
}

#[tokio::test]
async fn vanished_comment_fails_loudly() {
    let rig = rig().await;
    rig.seed_source("2468").await;

    let err = rig
        .propagator
        .propagate(&CommentId::new("tag:fa.ke,2013:gone"))
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, BackfeedError::RecordVanished(_)));
}
