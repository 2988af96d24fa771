pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::BackfeedError;
pub use types::{
    parse_tag_uri, tag_uri, Activity, ActivityTag, Author, Comment, CommentId, CommentStatus,
    PlatformKind, Reply, Source, SourceId, SourceStatus,
};
