use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};
use upqueue_transfer::{
    EventEmitter, FileHandle, ProgressEvent, Subscription, TransferEvent, TransferItem, Transport,
    UploadError, UploadOptions,
};

use crate::QueueOptions;

struct QueueEntry {
    item: TransferItem,
    /// Exactly the handlers the queue attached to `item`.
    subscriptions: Vec<Subscription>,
    marked_to_upload: bool,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    progress: f64,
    uploading: bool,
}

impl QueueState {
    fn items(&self) -> Vec<TransferItem> {
        self.entries.iter().map(|e| e.item.clone()).collect()
    }

    fn position(&self, item: &TransferItem) -> Option<usize> {
        self.entries.iter().position(|e| e.item.id() == item.id())
    }

    /// Entries with none of uploaded, uploading, error or paused set, in
    /// insertion order. With `marked_only`, stops at the first entry that
    /// was not marked by `upload_all`.
    fn upload_candidates(&self, marked_only: bool) -> Vec<TransferItem> {
        self.entries
            .iter()
            .filter(|entry| {
                let flags = entry.item.status();
                !flags.uploaded && !flags.uploading && !flags.error && !flags.paused
            })
            .take_while(|entry| !marked_only || entry.marked_to_upload)
            .map(|entry| entry.item.clone())
            .collect()
    }
}

struct QueueInner {
    options: QueueOptions,
    transport: Arc<dyn Transport>,
    state: Mutex<QueueState>,
    item_uploaded: EventEmitter<TransferEvent>,
    item_error: EventEmitter<TransferEvent>,
    item_pause: EventEmitter<TransferEvent>,
    item_cancel: EventEmitter<TransferEvent>,
    item_progress: EventEmitter<ProgressEvent>,
}

/// Coordinates many [`TransferItem`]s under one scheduling policy.
///
/// Cloning yields another handle to the same queue. Item methods are never
/// called while the queue lock is held, so transports may fire callbacks
/// synchronously from `upload`, `cancel` or `pause`.
#[derive(Clone)]
pub struct QueueController {
    inner: Arc<QueueInner>,
}

impl QueueController {
    pub fn new(options: QueueOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                options,
                transport,
                state: Mutex::new(QueueState::default()),
                item_uploaded: EventEmitter::new(),
                item_error: EventEmitter::new(),
                item_pause: EventEmitter::new(),
                item_cancel: EventEmitter::new(),
                item_progress: EventEmitter::new(),
            }),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    pub fn on_item_uploaded(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.item_uploaded
    }

    pub fn on_item_error(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.item_error
    }

    pub fn on_item_pause(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.item_pause
    }

    pub fn on_item_cancel(&self) -> &EventEmitter<TransferEvent> {
        &self.inner.item_cancel
    }

    pub fn on_item_progress(&self) -> &EventEmitter<ProgressEvent> {
        &self.inner.item_progress
    }

    /// Aggregate progress in percent, rounded to two decimals.
    pub fn progress(&self) -> f64 {
        self.inner.lock_state().progress
    }

    /// `true` while any queued item is uploading.
    pub fn is_uploading(&self) -> bool {
        self.inner.lock_state().uploading
    }

    /// Queued items in insertion order.
    pub fn items(&self) -> Vec<TransferItem> {
        self.inner.lock_state().items()
    }

    pub fn get_queue_length(&self) -> usize {
        self.inner.lock_state().entries.len()
    }

    pub fn get_not_uploaded_items(&self) -> Vec<TransferItem> {
        self.inner
            .lock_state()
            .entries
            .iter()
            .filter(|e| !e.item.is_uploaded())
            .map(|e| e.item.clone())
            .collect()
    }

    /// Wraps each file in a new item and queues it.
    ///
    /// Each item is registered before it is validated, so an item that
    /// fails validation stays queued; the error is returned and the
    /// remaining files are not added. Items whose options set
    /// `auto_upload` are started right away.
    pub fn add_files_to_queue(
        &self,
        files: impl IntoIterator<Item = FileHandle>,
        options: &UploadOptions,
        validate: bool,
    ) -> Result<Vec<TransferItem>, UploadError> {
        let items = files.into_iter().map(|file| {
            TransferItem::new(file, options.clone(), Arc::clone(&self.inner.transport))
        });
        self.enqueue(items, validate)
    }

    /// Queues items built elsewhere, with the same bridging, validation and
    /// auto-upload handling as [`add_files_to_queue`](Self::add_files_to_queue).
    pub fn add_file_items_to_queue(
        &self,
        items: impl IntoIterator<Item = TransferItem>,
        validate: bool,
    ) -> Result<Vec<TransferItem>, UploadError> {
        self.enqueue(items, validate)
    }

    fn enqueue(
        &self,
        items: impl IntoIterator<Item = TransferItem>,
        validate: bool,
    ) -> Result<Vec<TransferItem>, UploadError> {
        let mut added = Vec::new();
        for item in items {
            self.inner.register(&item);
            if validate {
                item.validate_file()?;
            }
            if item.options().auto_upload && !item.is_uploading() && !item.is_uploaded() {
                self.inner.start(&item)?;
            }
            added.push(item);
        }
        Ok(added)
    }

    /// Detaches `item`, cancelling it first if it is uploading. Unknown
    /// items are ignored.
    pub fn remove_from_queue(&self, item: &TransferItem) {
        self.inner.remove(item);
    }

    /// Starts uploads according to the queue policy.
    ///
    /// Parallel: every item that is neither uploading nor uploaded starts
    /// now. Sequential: every item is marked and the first eligible one
    /// starts; the rest follow one by one as their predecessor succeeds.
    /// Items whose `upload()` is refused (empty working file) are passed
    /// over in both cases.
    pub fn upload_all(&self) -> Result<(), UploadError> {
        if self.inner.options.parallel {
            let items = self.items();
            debug!(count = items.len(), "starting queue in parallel");
            for item in items {
                if !item.is_uploading() && !item.is_uploaded() {
                    self.inner.start(&item)?;
                }
            }
            return Ok(());
        }

        {
            let mut state = self.inner.lock_state();
            for entry in &mut state.entries {
                entry.marked_to_upload = true;
            }
        }
        debug!("starting queue sequentially");
        self.inner.start_next(false)
    }

    /// Requests cancellation of every item and resets aggregate progress.
    pub fn cancel_all(&self) {
        for item in self.items() {
            item.cancel();
        }
        self.inner.lock_state().progress = 0.0;
    }

    /// Detaches and cancels every item, leaving the queue empty.
    pub fn clear_queue(&self) {
        let entries = {
            let mut state = self.inner.lock_state();
            state.progress = 0.0;
            state.uploading = false;
            std::mem::take(&mut state.entries)
        };
        info!(count = entries.len(), "clearing queue");
        for entry in entries {
            for subscription in entry.subscriptions {
                subscription.unsubscribe();
            }
            entry.item.cancel();
        }
    }
}

impl std::fmt::Debug for QueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("QueueController")
            .field("options", &self.inner.options)
            .field("len", &state.entries.len())
            .field("progress", &state.progress)
            .field("uploading", &state.uploading)
            .finish()
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(self: &Arc<Self>, item: &TransferItem) {
        if self.lock_state().position(item).is_some() {
            debug!(item = %item.id(), "item already queued");
            return;
        }

        let success = {
            let queue = Arc::downgrade(self);
            item.on_success().subscribe(move |event: &TransferEvent| {
                if let Some(queue) = queue.upgrade() {
                    queue.handle_success(event);
                }
            })
        };
        let subscriptions = vec![
            item.on_progress().subscribe(relay(self, &self.item_progress)),
            item.on_cancel().subscribe(relay(self, &self.item_cancel)),
            item.on_error().subscribe(relay(self, &self.item_error)),
            item.on_pause().subscribe(relay(self, &self.item_pause)),
            success,
        ];

        debug!(item = %item.id(), name = %item.descriptor().name, "item queued");
        self.lock_state().entries.push(QueueEntry {
            item: item.clone(),
            subscriptions,
            marked_to_upload: false,
        });
    }

    fn remove(&self, item: &TransferItem) {
        let entry = {
            let mut state = self.lock_state();
            match state.position(item) {
                Some(index) => state.entries.remove(index),
                None => return,
            }
        };
        for subscription in entry.subscriptions {
            subscription.unsubscribe();
        }
        if entry.item.is_uploading() {
            entry.item.cancel();
        }
        debug!(item = %item.id(), "item removed");
        self.refresh();
    }

    fn start(&self, item: &TransferItem) -> Result<(), UploadError> {
        let result = item.upload();
        self.refresh_uploading();
        result
    }

    /// Starts the first upload candidate, passing over items that refuse to
    /// upload. Returns the first refusal when nothing could be started.
    fn start_next(&self, marked_only: bool) -> Result<(), UploadError> {
        let candidates = self.lock_state().upload_candidates(marked_only);
        let mut refused = None;
        for item in candidates {
            match self.start(&item) {
                Ok(()) => {
                    debug!(item = %item.id(), "next queued item started");
                    return Ok(());
                }
                Err(err) => {
                    warn!(item = %item.id(), error = %err, "skipping item that cannot be uploaded");
                    refused.get_or_insert(err);
                }
            }
        }
        refused.map_or(Ok(()), Err)
    }

    fn handle_success(&self, event: &TransferEvent) {
        self.item_uploaded.emit(event);
        self.recalculate_progress();

        if let Err(err) = self.start_next(true) {
            warn!(error = %err, "no queued item could be continued");
        }

        if self.options.remove_after_upload {
            self.remove(&event.item);
        }
        self.refresh_uploading();
    }

    fn refresh(&self) {
        self.recalculate_progress();
        self.refresh_uploading();
    }

    fn recalculate_progress(&self) {
        let mut state = self.lock_state();
        let (total, sent) = state.entries.iter().fold((0u64, 0u64), |(total, sent), e| {
            (total + e.item.descriptor().size, sent + e.item.bytes_sent())
        });
        state.progress = aggregate_progress(sent, total);
        debug!(sent, total, progress = state.progress, "queue progress");
    }

    fn refresh_uploading(&self) {
        let mut state = self.lock_state();
        state.uploading = state.entries.iter().any(|e| e.item.is_uploading());
    }
}

/// Re-emits an item event on a queue stream and refreshes the aggregates.
fn relay<T: 'static>(
    queue: &Arc<QueueInner>,
    stream: &EventEmitter<T>,
) -> impl Fn(&T) + Send + Sync + 'static + use<T> {
    let queue: Weak<QueueInner> = Arc::downgrade(queue);
    let stream = stream.clone();
    move |event: &T| {
        if let Some(queue) = queue.upgrade() {
            stream.emit(event);
            queue.refresh();
        }
    }
}

/// `sent / total` in percent, rounded to two decimals. An empty queue or
/// one holding only empty files reports 0.
fn aggregate_progress(sent: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = sent as f64 * 100.0 / total as f64;
    (percent * 100.0).round() / 100.0
}
