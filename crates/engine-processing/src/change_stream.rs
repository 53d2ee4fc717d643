use engine_core::{
    backend::{ChangeBatch, ChangeCursor, ChangeStreamSpec, ChangeStreamStart, SyncClient},
    error::SyncError,
};
use model::core::{identifiers::Namespace, mark::HighWaterMark};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct StreamState {
    mark: HighWaterMark,
    cursor: Option<Box<dyn ChangeCursor>>,
    closed: bool,
}

/// Change stream over one synonym source collection that can be repositioned.
///
/// The underlying cursor is opened lazily from the current high-water mark
/// and reopened after a reset or an error. After every batch the mark moves
/// to the batch's post-batch resume token, so resetting to the mark a sync
/// just returned keeps the open cursor.
pub struct ResettableChangeStream {
    client: Arc<dyn SyncClient>,
    namespace: Namespace,
    batch_size: Option<u32>,
    state: Mutex<StreamState>,
}

impl ResettableChangeStream {
    pub fn new(client: Arc<dyn SyncClient>, namespace: Namespace, batch_size: Option<u32>) -> Self {
        Self {
            client,
            namespace,
            batch_size,
            state: Mutex::new(StreamState {
                mark: HighWaterMark::Empty,
                cursor: None,
                closed: false,
            }),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub async fn high_water_mark(&self) -> HighWaterMark {
        self.state.lock().await.mark.clone()
    }

    /// Fetches the next batch of change events.
    pub async fn next_batch(&self) -> Result<ChangeBatch, SyncError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SyncError::shutdown());
        }

        if state.cursor.is_none() {
            let start = ChangeStreamStart::from_mark(&state.mark).ok_or_else(|| {
                SyncError::transient("cannot open a change stream without a high-water mark")
            })?;
            let spec = ChangeStreamSpec {
                namespace: self.namespace.clone(),
                start,
                batch_size: self.batch_size,
            };
            let cursor = self.client.open_change_cursor(spec).await?;
            debug!(namespace = %self.namespace, mark = %state.mark, "Opened change stream");
            state.cursor = Some(cursor);
        }

        let Some(cursor) = state.cursor.as_mut() else {
            return Err(SyncError::transient("change stream cursor unavailable"));
        };

        let fetched = cursor.next_batch().await;
        match fetched {
            Ok(batch) => {
                state.mark = HighWaterMark::ResumeToken(batch.post_batch_resume_token.clone());
                Ok(batch)
            }
            Err(e) => {
                close_quietly(state.cursor.take(), &self.namespace).await;
                Err(e.into())
            }
        }
    }

    /// Repositions the stream. Resetting to the current mark is a no-op.
    pub async fn reset(&self, mark: HighWaterMark) {
        let mut state = self.state.lock().await;
        if state.closed || state.mark == mark {
            return;
        }

        close_quietly(state.cursor.take(), &self.namespace).await;

        debug!(namespace = %self.namespace, from = %state.mark, to = %mark, "Reset change stream");
        state.mark = mark;
    }

    /// Closes the stream for good. Later fetches fail with a shutdown error.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        close_quietly(state.cursor.take(), &self.namespace).await;
    }
}

async fn close_quietly(cursor: Option<Box<dyn ChangeCursor>>, namespace: &Namespace) {
    if let Some(mut cursor) = cursor
        && let Err(e) = cursor.close().await
    {
        warn!(namespace = %namespace, error = %e, "Failed to close change stream");
    }
}
