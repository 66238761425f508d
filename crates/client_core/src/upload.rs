use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::{Stream, StreamExt};
use shared::domain::AvatarReference;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;

#[derive(Clone)]
pub struct FileBlob {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl std::fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlob")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadFailure {
    #[error("upload transport error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid blob store response: {0}")]
    Decode(String),
    #[error("upload superseded by a newer file")]
    Superseded,
    #[error("upload cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for UploadFailure {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout;
        }
        if value.is_decode() {
            return Self::Decode(value.to_string());
        }
        Self::Transport(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(u8),
    Failure(UploadFailure),
    Completed(AvatarReference),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    InProgress,
    Failed(UploadFailure),
    Completed(AvatarReference),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadState {
    pub generation: u64,
    pub progress_percent: u8,
    pub outcome: UploadOutcome,
}

pub fn progress_percent(acked: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let acked = acked.min(total);
    ((acked as f64 / total as f64) * 100.0).round() as u8
}

/// `{unix_millis}-{random}-{filename}`. The random part keeps two uploads of the
/// same file in the same millisecond apart.
pub fn storage_key(filename: &str, unix_millis: i64) -> String {
    let name: String = filename
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let name = if name.is_empty() { "upload".to_string() } else { name };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{unix_millis}-{}-{name}", &suffix[..8])
}

struct ActiveUpload {
    generation: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
    last_percent: Option<u8>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct CoordinatorInner {
    generation: u64,
    state: Option<UploadState>,
    active: Option<ActiveUpload>,
}

#[derive(Clone)]
struct SharedInner(Arc<Mutex<CoordinatorInner>>);

impl SharedInner {
    fn lock(&self) -> MutexGuard<'_, CoordinatorInner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `event` for `generation`. Returns `false` when the event was
    /// dropped as stale, as a repeated percentage, or after a terminal event.
    fn emit(&self, generation: u64, event: ProgressEvent) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(active) = inner
            .active
            .as_mut()
            .filter(|active| active.generation == generation)
        else {
            debug!(generation, ?event, "upload: dropped stale event");
            return false;
        };

        if let ProgressEvent::Progress(percent) = event {
            if active.last_percent.is_some_and(|last| percent <= last) {
                return false;
            }
            active.last_percent = Some(percent);
        }

        let _ = active.tx.send(event.clone());
        if let Some(state) = inner
            .state
            .as_mut()
            .filter(|state| state.generation == generation)
        {
            match &event {
                ProgressEvent::Progress(percent) => state.progress_percent = *percent,
                ProgressEvent::Failure(failure) => {
                    state.outcome = UploadOutcome::Failed(failure.clone())
                }
                ProgressEvent::Completed(reference) => {
                    state.progress_percent = 100;
                    state.outcome = UploadOutcome::Completed(reference.clone());
                }
            }
        }

        if event.is_terminal() {
            inner.active = None;
        }
        true
    }

    fn stop_active(&self, inner: &mut CoordinatorInner, failure: UploadFailure) {
        let Some(mut active) = inner.active.take() else {
            return;
        };
        if let Some(task) = active.task.take() {
            task.abort();
        }
        let _ = active.tx.send(ProgressEvent::Failure(failure.clone()));
        if let Some(state) = inner
            .state
            .as_mut()
            .filter(|state| state.generation == active.generation)
        {
            state.outcome = UploadOutcome::Failed(failure.clone());
        }
        warn!(generation = active.generation, %failure, "upload: stopped");
    }

    fn cancel(&self, generation: u64) -> bool {
        let mut guard = self.lock();
        let is_active = guard
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);
        if is_active {
            self.stop_active(&mut guard, UploadFailure::Cancelled);
        }
        is_active
    }
}

/// Handle to one upload generation. Yields progress events, then exactly one
/// `Failure` or `Completed`, then ends.
pub struct UploadHandle {
    generation: u64,
    events: UnboundedReceiverStream<ProgressEvent>,
    inner: SharedInner,
}

impl UploadHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) -> bool {
        self.inner.cancel(self.generation)
    }

    pub async fn finish(mut self) -> Result<AvatarReference, UploadFailure> {
        while let Some(event) = self.next().await {
            match event {
                ProgressEvent::Progress(_) => {}
                ProgressEvent::Failure(failure) => return Err(failure),
                ProgressEvent::Completed(reference) => return Ok(reference),
            }
        }
        Err(UploadFailure::Cancelled)
    }
}

impl Stream for UploadHandle {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

pub struct UploadCoordinator {
    store: Arc<dyn BlobStore>,
    chunk_bytes: usize,
    timeout: Duration,
    inner: SharedInner,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn BlobStore>, chunk_bytes: usize, timeout: Duration) -> Self {
        Self {
            store,
            chunk_bytes: chunk_bytes.max(1),
            timeout,
            inner: SharedInner(Arc::new(Mutex::new(CoordinatorInner::default()))),
        }
    }

    pub fn begin_upload(&self, blob: FileBlob) -> UploadHandle {
        let key = storage_key(&blob.filename, chrono::Utc::now().timestamp_millis());
        let (tx, rx) = mpsc::unbounded_channel();

        let mut guard = self.inner.lock();
        self.inner.stop_active(&mut guard, UploadFailure::Superseded);
        guard.generation += 1;
        let generation = guard.generation;

        let _ = tx.send(ProgressEvent::Progress(0));
        guard.state = Some(UploadState {
            generation,
            progress_percent: 0,
            outcome: UploadOutcome::InProgress,
        });
        info!(generation, %key, size = blob.size(), "upload: started");

        let task = tokio::spawn(run_upload(
            Arc::clone(&self.store),
            self.inner.clone(),
            generation,
            key,
            blob,
            self.chunk_bytes,
            self.timeout,
        ));
        guard.active = Some(ActiveUpload {
            generation,
            tx,
            last_percent: Some(0),
            task: Some(task),
        });
        drop(guard);

        UploadHandle {
            generation,
            events: UnboundedReceiverStream::new(rx),
            inner: self.inner.clone(),
        }
    }

    pub fn state(&self) -> Option<UploadState> {
        self.inner.lock().state.clone()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    /// Cancels anything in flight and forgets the last upload state. Events still
    /// buffered in older handles no longer count as current.
    pub fn reset(&self) {
        let mut guard = self.inner.lock();
        self.inner.stop_active(&mut guard, UploadFailure::Cancelled);
        guard.generation += 1;
        guard.state = None;
    }
}

impl Drop for UploadCoordinator {
    fn drop(&mut self) {
        self.reset();
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, UploadFailure>>,
) -> Result<T, UploadFailure> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(UploadFailure::Timeout))
}

async fn run_upload(
    store: Arc<dyn BlobStore>,
    inner: SharedInner,
    generation: u64,
    key: String,
    blob: FileBlob,
    chunk_bytes: usize,
    timeout: Duration,
) {
    let result = transfer(&*store, &inner, generation, &key, &blob, chunk_bytes, timeout).await;
    let event = match result {
        Ok(reference) => {
            info!(generation, %reference, "upload: completed");
            ProgressEvent::Completed(reference)
        }
        Err(failure) => {
            warn!(generation, %failure, "upload: failed");
            ProgressEvent::Failure(failure)
        }
    };
    inner.emit(generation, event);
}

async fn transfer(
    store: &dyn BlobStore,
    inner: &SharedInner,
    generation: u64,
    key: &str,
    blob: &FileBlob,
    chunk_bytes: usize,
    timeout: Duration,
) -> Result<AvatarReference, UploadFailure> {
    let total = blob.size();
    let session_id = with_timeout(timeout, store.open(key, blob)).await?;

    let mut acked = 0u64;
    while acked < total {
        let start = acked as usize;
        let end = (start + chunk_bytes).min(blob.bytes.len());
        let received = with_timeout(
            timeout,
            store.put_chunk(&session_id, acked, &blob.bytes[start..end], total),
        )
        .await?;
        if received <= acked || received > total {
            return Err(UploadFailure::Decode(format!(
                "blob store acknowledged {received} bytes after {acked} of {total}"
            )));
        }
        acked = received;
        debug!(generation, acked, total, "upload: chunk acknowledged");
        inner.emit(generation, ProgressEvent::Progress(progress_percent(acked, total)));
    }
    if total == 0 {
        inner.emit(generation, ProgressEvent::Progress(100));
    }

    with_timeout(timeout, store.finalize(&session_id)).await
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
