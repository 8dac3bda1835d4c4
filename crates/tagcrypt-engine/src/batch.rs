//! Concurrent batch processing with partial-failure accounting
//!
//! Records are split into chunks that run one after another; within a
//! chunk every record is spawned onto a `JoinSet` and admitted by a
//! semaphore sized to the worker count. Counters, the failure list and the
//! first error live behind a single mutex. Completion order is unspecified;
//! failures carry their input index.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tagcrypt_core::config::BatchConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{FieldCryptError, FieldResult};
use crate::processor::RecordProcessor;
use crate::record::Record;

/// Snapshot handed to the progress callback after each item settles.
pub struct BatchProgress<'a, R> {
    /// Items settled so far, this one included.
    pub processed: usize,
    pub total: usize,
    pub index: usize,
    pub record: Option<&'a R>,
    pub error: Option<&'a FieldCryptError>,
}

pub type ProgressFn<R> = Arc<dyn Fn(BatchProgress<'_, R>) + Send + Sync>;

pub struct BatchOptions<R> {
    /// Worker count; 0 means available parallelism.
    pub max_concurrency: usize,
    /// Records per chunk; 0 derives it from the input size.
    pub batch_size: usize,
    pub stop_on_first_error: bool,
    pub progress: Option<ProgressFn<R>>,
}

impl<R> Default for BatchOptions<R> {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            batch_size: 0,
            stop_on_first_error: false,
            progress: None,
        }
    }
}

impl<R> Clone for BatchOptions<R> {
    fn clone(&self) -> Self {
        Self {
            max_concurrency: self.max_concurrency,
            batch_size: self.batch_size,
            stop_on_first_error: self.stop_on_first_error,
            progress: self.progress.clone(),
        }
    }
}

impl<R> BatchOptions<R> {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            batch_size: config.batch_size,
            stop_on_first_error: config.stop_on_first_error,
            progress: None,
        }
    }

    pub fn with_progress(mut self, f: impl Fn(BatchProgress<'_, R>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    pub fn workers(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn effective_batch_size(&self, total: usize, workers: usize) -> usize {
        if self.batch_size > 0 {
            return self.batch_size;
        }
        auto_batch_size(total, workers)
    }
}

/// All items when there are at most 100, otherwise about three chunks per
/// worker, clamped to `[10, 1000]`.
pub fn auto_batch_size(total: usize, workers: usize) -> usize {
    if total <= 100 {
        return total.max(1);
    }
    (total / (workers.max(1) * 3)).clamp(10, 1000)
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub index: usize,
    pub error: FieldCryptError,
}

pub struct BatchResult<R> {
    /// Every input slot, in input order.
    pub records: Vec<Option<R>>,
    pub processed: usize,
    pub failed: usize,
    /// Items never dispatched because the batch was cancelled.
    pub skipped: usize,
    /// In completion order.
    pub errors: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl<R> BatchResult<R> {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// `(index, record, error)` for every failed item.
    pub fn failures(&self) -> impl Iterator<Item = (usize, Option<&R>, &FieldCryptError)> + '_ {
        self.errors.iter().map(|f| {
            let record = self.records.get(f.index).and_then(Option::as_ref);
            (f.index, record, &f.error)
        })
    }
}

impl<R> std::fmt::Debug for BatchResult<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResult")
            .field("records", &self.records.len())
            .field("processed", &self.processed)
            .field("failed", &self.failed)
            .field("skipped", &self.skipped)
            .field("errors", &self.errors)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// A stop-on-first-error batch that saw a failure.
pub struct BatchAborted<R> {
    /// First failure, by completion order.
    pub error: FieldCryptError,
    pub result: BatchResult<R>,
}

impl<R> std::fmt::Debug for BatchAborted<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAborted")
            .field("error", &self.error)
            .field("result", &self.result)
            .finish()
    }
}

impl<R> std::fmt::Display for BatchAborted<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch aborted after {} failure(s): {}",
            self.result.failed, self.error
        )
    }
}

impl<R> std::error::Error for BatchAborted<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Process,
    Decrypt,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Process => "process",
            Direction::Decrypt => "decrypt",
        })
    }
}

#[derive(Default)]
struct Tally {
    processed: usize,
    failed: usize,
    settled: usize,
    errors: Vec<ItemFailure>,
    first_error: Option<FieldCryptError>,
}

struct Shared<R> {
    tally: Mutex<Tally>,
    total: usize,
    stop_on_first_error: bool,
    progress: Option<ProgressFn<R>>,
    token: CancellationToken,
}

impl<R> Shared<R> {
    /// Account for one finished item, then report it outside the lock.
    fn settle(&self, index: usize, record: Option<&R>, result: FieldResult<()>) {
        let settled = {
            let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
            tally.settled += 1;
            match &result {
                Ok(()) => tally.processed += 1,
                Err(error) => {
                    tally.failed += 1;
                    tally.errors.push(ItemFailure {
                        index,
                        error: error.clone(),
                    });
                    if tally.first_error.is_none() {
                        tally.first_error = Some(error.clone());
                    }
                }
            }
            tally.settled
        };

        if let Err(error) = &result {
            tracing::debug!(index, error = %error, "batch item failed");
            if self.stop_on_first_error {
                self.token.cancel();
            }
        }
        if let Some(progress) = &self.progress {
            progress(BatchProgress {
                processed: settled,
                total: self.total,
                index,
                record,
                error: result.as_ref().err(),
            });
        }
    }
}

impl RecordProcessor {
    /// Process many records concurrently.
    ///
    /// Absent (`None`) items fail with `InvalidItem` without taking a worker.
    /// With `stop_on_first_error`, the first failure cancels everything not
    /// yet started and the call returns [`BatchAborted`].
    pub async fn process_batch<R: Record>(
        &self,
        cancel: &CancellationToken,
        records: Vec<Option<R>>,
        options: BatchOptions<R>,
    ) -> Result<BatchResult<R>, BatchAborted<R>> {
        self.run_batch(cancel, records, options, Direction::Process)
            .await
    }

    /// Decrypt many records concurrently; same policy as [`Self::process_batch`].
    pub async fn decrypt_batch<R: Record>(
        &self,
        cancel: &CancellationToken,
        records: Vec<Option<R>>,
        options: BatchOptions<R>,
    ) -> Result<BatchResult<R>, BatchAborted<R>> {
        self.run_batch(cancel, records, options, Direction::Decrypt)
            .await
    }

    async fn run_batch<R: Record>(
        &self,
        cancel: &CancellationToken,
        records: Vec<Option<R>>,
        options: BatchOptions<R>,
        direction: Direction,
    ) -> Result<BatchResult<R>, BatchAborted<R>> {
        let started = Instant::now();
        let total = records.len();
        let workers = options.workers();
        let chunk_size = options.effective_batch_size(total, workers);
        tracing::info!(%direction, total, workers, chunk_size, "batch started");

        let token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(workers));
        let shared = Arc::new(Shared {
            tally: Mutex::new(Tally::default()),
            total,
            stop_on_first_error: options.stop_on_first_error,
            progress: options.progress.clone(),
            token: token.clone(),
        });

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut skipped = 0usize;
        let mut pending = records.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            let mut set = JoinSet::new();
            for (index, item) in pending.by_ref().take(chunk_size) {
                if token.is_cancelled() {
                    slots[index] = item;
                    skipped += 1;
                    continue;
                }
                let Some(mut record) = item else {
                    shared.settle(index, None, Err(FieldCryptError::InvalidItem { index }));
                    continue;
                };
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    slots[index] = Some(record);
                    skipped += 1;
                    continue;
                };

                let processor = self.clone();
                let shared = Arc::clone(&shared);
                // In-flight items stop only for the caller's token; the batch
                // token gates dispatch.
                let upstream = cancel.clone();
                set.spawn(async move {
                    let _permit = permit;
                    let result = match direction {
                        Direction::Process => processor.process(&upstream, &mut record).await,
                        Direction::Decrypt => processor.decrypt(&upstream, &mut record).await,
                    };
                    shared.settle(index, Some(&record), result);
                    (index, record)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, record)) => slots[index] = Some(record),
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(e) => tracing::warn!(error = %e, "batch task cancelled"),
                }
            }
        }

        let tally = std::mem::take(&mut *shared.tally.lock().unwrap_or_else(PoisonError::into_inner));
        let result = BatchResult {
            records: slots,
            processed: tally.processed,
            failed: tally.failed,
            skipped,
            errors: tally.errors,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            %direction,
            processed = result.processed,
            failed = result.failed,
            skipped = result.skipped,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "batch finished"
        );

        match tally.first_error {
            Some(error) if options.stop_on_first_error => {
                tracing::warn!(%direction, error = %error, "batch aborted on first error");
                Err(BatchAborted { error, result })
            }
            _ => Ok(result),
        }
    }
}
