use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identifiers ---

/// Stable identifier of a configured source account, e.g. "facebook:2468".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a comment record: the platform-native tag URI of the reply.
/// Identical across duplicate poll runs, so it doubles as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub String);

impl CommentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Tag URIs ---

/// Build a tag URI: `tag:facebook.com,2013:123_456`.
pub fn tag_uri(domain: &str, year: i32, id: &str) -> String {
    format!("tag:{domain},{year}:{id}")
}

/// Parse a tag URI into (domain, id). Returns None for anything malformed.
pub fn parse_tag_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("tag:")?;
    let (authority, id) = rest.split_once(':')?;
    let domain = match authority.split_once(',') {
        Some((domain, _year)) => domain,
        None => authority,
    };
    if domain.is_empty() || id.is_empty() {
        return None;
    }
    Some((domain, id))
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    Facebook,
    Twitter,
}

impl PlatformKind {
    /// Short name used in local comment permalinks.
    pub fn short_name(&self) -> &'static str {
        match self {
            PlatformKind::Facebook => "fb",
            PlatformKind::Twitter => "tw",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::Facebook => write!(f, "facebook"),
            PlatformKind::Twitter => write!(f, "twitter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Enabled,
    Disabled,
    Error,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Enabled => write!(f, "enabled"),
            SourceStatus::Disabled => write!(f, "disabled"),
            SourceStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    New,
    Processing,
    Complete,
    Error,
}

impl std::fmt::Display for CommentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommentStatus::New => write!(f, "new"),
            CommentStatus::Processing => write!(f, "processing"),
            CommentStatus::Complete => write!(f, "complete"),
            CommentStatus::Error => write!(f, "error"),
        }
    }
}

// --- Source ---

/// A configured social-media account being polled. Mutated only by the poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub platform: PlatformKind,
    /// Display name, e.g. the account's full name or handle.
    pub name: String,
    /// Opaque platform access token. Acquired out of band.
    pub credential: String,
    pub last_polled: DateTime<Utc>,
    pub status: SourceStatus,
}

impl Source {
    /// Human-readable label for log events.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.platform)
    }
}

// --- Activities ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// A tagged reference carried by an activity. `article` tags are the
/// original-post candidates used as webmention targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTag {
    pub object_type: String,
    pub url: Option<String>,
}

/// One reply/comment embedded in an activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Tag URI of the reply itself.
    pub id: String,
    pub url: Option<String>,
    pub author: Option<Author>,
    pub content: String,
    pub published: Option<DateTime<Utc>>,
}

/// A transient unit fetched from a source: one social post with its replies
/// and reference tags. Never persisted standalone; serialized (with replies
/// stripped) onto each Comment for replay and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Tag URI of the post.
    pub id: String,
    pub url: Option<String>,
    pub actor: Option<Author>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<ActivityTag>,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

impl Activity {
    /// URLs of `article` tags: the original posts this activity claims to be
    /// syndicated from.
    pub fn article_targets(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.object_type == "article")
            .filter_map(|t| t.url.clone())
            .filter(|u| !u.is_empty())
            .collect()
    }

    /// Copy of this activity with the reply list stripped, for persisting on
    /// each Comment without storing the full reply list once per reply.
    pub fn without_replies(&self) -> Activity {
        Activity {
            replies: Vec::new(),
            ..self.clone()
        }
    }
}

// --- Comment ---

/// The durable, leasable unit of work: one reply awaiting webmention delivery
/// to the targets of its parent post. Never deleted — the target sets are the
/// delivery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub source: SourceId,
    /// Activity context (replies stripped), captured once at creation.
    pub activity_json: String,
    /// The reply itself, captured once at creation.
    pub comment_json: String,
    /// Targets not yet attempted.
    pub targets_pending: BTreeSet<String>,
    /// Targets successfully delivered. Never re-attempted.
    pub targets_sent: BTreeSet<String>,
    /// Targets that failed delivery and are eligible for retry.
    pub targets_failed: BTreeSet<String>,
    /// Delivery attempts per target, for the per-target retry bound.
    #[serde(default)]
    pub attempt_counts: BTreeMap<String, u32>,
    pub status: CommentStatus,
    /// Meaningful only while status is Processing.
    pub lease_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        id: CommentId,
        source: SourceId,
        activity_json: String,
        comment_json: String,
        targets: impl IntoIterator<Item = String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source,
            activity_json,
            comment_json,
            targets_pending: targets.into_iter().collect(),
            targets_sent: BTreeSet::new(),
            targets_failed: BTreeSet::new(),
            attempt_counts: BTreeMap::new(),
            status: CommentStatus::New,
            lease_expiry: None,
            created_at,
        }
    }

    /// The three target sets must be pairwise disjoint at rest.
    pub fn sets_disjoint(&self) -> bool {
        self.targets_pending.is_disjoint(&self.targets_sent)
            && self.targets_pending.is_disjoint(&self.targets_failed)
            && self.targets_sent.is_disjoint(&self.targets_failed)
    }
}
