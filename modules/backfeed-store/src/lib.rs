// Transactional entity store for sources and comments.
//
// The pipeline needs exactly three guarantees from storage: get-by-id,
// create-if-absent, and an atomic read-modify-write on a single comment
// record. Everything the lease manager does flows through `update_comment`;
// two concurrent calls on the same id must serialize.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use backfeed_common::{BackfeedError, Comment, CommentId, Source, SourceId};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Result<T> = std::result::Result<T, BackfeedError>;

/// One atomic read-modify-write step. Sees the fresh record (None if absent)
/// and returns the record to persist, or None for a read-only no-op. An Err
/// aborts the transaction without writing.
pub type CommentTxn = Box<dyn FnOnce(Option<Comment>) -> Result<Option<Comment>> + Send>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>>;

    async fn put_source(&self, source: &Source) -> Result<()>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn get_comment(&self, id: &CommentId) -> Result<Option<Comment>>;

    /// Idempotent insert. Returns true if the record was created, false if a
    /// record with that id already existed (left untouched).
    async fn create_comment_if_absent(&self, comment: &Comment) -> Result<bool>;

    /// Run `txn` as a single atomic transaction against the record with the
    /// given id. Concurrent calls on the same id serialize; the closure always
    /// sees the latest committed state. Returns the record as of the end of
    /// the transaction: the written record, the unchanged record for a
    /// read-only step, or None if absent.
    async fn update_comment(&self, id: &CommentId, txn: CommentTxn) -> Result<Option<Comment>>;
}
