// Scripted silo for tests. Returns a fixed activity list per source, or the
// deauthorized condition, and counts fetches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use backfeed_common::{Activity, PlatformKind, Source};

use crate::{Result, Silo, SiloError};

#[derive(Default)]
pub struct FakeSilo {
    activities: Mutex<HashMap<String, Vec<Activity>>>,
    deauthorized: Mutex<HashMap<String, bool>>,
    fetches: AtomicUsize,
}

impl FakeSilo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_activities(&self, source_id: &str, activities: Vec<Activity>) {
        self.activities
            .lock()
            .unwrap()
            .insert(source_id.to_string(), activities);
    }

    /// Make the next fetches for this source fail with Deauthorized.
    pub fn revoke(&self, source_id: &str) {
        self.deauthorized
            .lock()
            .unwrap()
            .insert(source_id.to_string(), true);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Silo for FakeSilo {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    fn short_name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_new_comments(&self, source: &Source, _limit: u32) -> Result<Vec<Activity>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self
            .deauthorized
            .lock()
            .unwrap()
            .get(source.id.as_str())
            .copied()
            .unwrap_or(false)
        {
            return Err(SiloError::Deauthorized);
        }

        Ok(self
            .activities
            .lock()
            .unwrap()
            .get(source.id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}
