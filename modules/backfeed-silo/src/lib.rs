// Social platform capability. One implementation per silo, all satisfying
// the same fetch contract; the poller depends only on the trait.

pub mod facebook;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod twitter;

use async_trait::async_trait;

use backfeed_common::{Activity, PlatformKind, Source};

pub use facebook::FacebookSilo;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeSilo;
pub use twitter::TwitterSilo;

pub type Result<T> = std::result::Result<T, SiloError>;

#[derive(Debug, thiserror::Error)]
pub enum SiloError {
    /// The user revoked our authorization. Callers disable the source and let
    /// the job succeed — retrying can never help.
    #[error("Source deauthorized us")]
    Deauthorized,

    /// Transient fetch failure. Callers surface it so the job is retried.
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

impl From<reqwest::Error> for SiloError {
    fn from(e: reqwest::Error) -> Self {
        SiloError::Fetch(e.to_string())
    }
}

impl From<SiloError> for backfeed_common::BackfeedError {
    fn from(e: SiloError) -> Self {
        match e {
            SiloError::Deauthorized => backfeed_common::BackfeedError::Deauthorized,
            SiloError::Fetch(detail) => backfeed_common::BackfeedError::Http(detail),
        }
    }
}

#[async_trait]
pub trait Silo: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Short name used in comment permalinks, e.g. "fb".
    fn short_name(&self) -> &'static str;

    fn label(&self, source: &Source) -> String {
        format!("{} {}", self.short_name(), source.name)
    }

    /// Fetch up to `limit` recent activities for the source, with reply
    /// comments and `article` tags (original-post discovery) populated.
    async fn fetch_new_comments(&self, source: &Source, limit: u32) -> Result<Vec<Activity>>;
}
