// In-memory EntityStore. Used by the test suites and by single-process
// deployments that don't need durability across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use backfeed_common::{Comment, CommentId, Source, SourceId};

use crate::{CommentTxn, EntityStore, Result};

#[derive(Default)]
struct MemoryStoreInner {
    sources: HashMap<SourceId, Source>,
    comments: HashMap<CommentId, Comment>,
}

/// HashMap store behind a single async mutex. Holding the lock across an
/// `update_comment` closure is what serializes concurrent read-modify-writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>> {
        Ok(self.inner.lock().await.sources.get(id).cloned())
    }

    async fn put_source(&self, source: &Source) -> Result<()> {
        self.inner
            .lock()
            .await
            .sources
            .insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.inner.lock().await.sources.values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn get_comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        Ok(self.inner.lock().await.comments.get(id).cloned())
    }

    async fn create_comment_if_absent(&self, comment: &Comment) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.comments.contains_key(&comment.id) {
            return Ok(false);
        }
        inner.comments.insert(comment.id.clone(), comment.clone());
        Ok(true)
    }

    async fn update_comment(&self, id: &CommentId, txn: CommentTxn) -> Result<Option<Comment>> {
        let mut inner = self.inner.lock().await;
        let current = inner.comments.get(id).cloned();
        match txn(current.clone())? {
            Some(updated) => {
                inner.comments.insert(id.clone(), updated.clone());
                Ok(Some(updated))
            }
            None => Ok(current),
        }
    }
}
