//! Background thumbnail generation.
//!
//! Jobs go through a de-duplicating queue to a fixed set of worker threads.
//! Each worker consults the cache, falls back to the extractor, writes the
//! cache back, and sends the outcome over a bounded channel. Workers never
//! touch registry state.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbaImage;
use log::{debug, warn};

use crate::cache::ThumbCache;
use crate::error::ThumbError;
use crate::source::{ContentSignature, ExtractRequest, Extractor, ImageId, Keywords};

/// Results buffered between workers and the control loop.
const RESULT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub ticket: u64,
    pub id: ImageId,
}

#[derive(Debug)]
pub struct Generated {
    pub signature: ContentSignature,
    pub raster: RgbaImage,
    pub keywords: Keywords,
    pub from_cache: bool,
}

#[derive(Debug)]
pub struct GenerationResult {
    pub ticket: u64,
    pub id: ImageId,
    pub outcome: Result<Generated, ThumbError>,
    /// Cache read or write failure encountered along the way. Never stops
    /// the raster from being delivered.
    pub cache_error: Option<ThumbError>,
}

#[derive(Clone, Debug)]
pub struct JobQueue {
    inner: Arc<JobQueueInner>,
}

#[derive(Debug)]
struct JobQueueInner {
    state: Mutex<JobQueueState>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct JobQueueState {
    order: VecDeque<Job>,
    members: HashSet<ImageId>,
    closed: bool,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(JobQueueInner {
                state: Mutex::new(JobQueueState::default()),
                condvar: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobQueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `job` unless one for the same image is already waiting.
    pub fn enqueue(&self, job: Job) -> bool {
        let mut state = self.lock();
        if state.closed || !state.members.insert(job.id.clone()) {
            return false;
        }
        state.order.push_back(job);
        self.inner.condvar.notify_one();
        true
    }

    /// Drops a job that no worker has picked up yet.
    pub fn remove(&self, id: &ImageId) -> bool {
        let mut state = self.lock();
        if !state.members.remove(id) {
            return false;
        }
        state.order.retain(|j| &j.id != id);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until a job is available or the queue is closed.
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.order.pop_front() {
                state.members.remove(&job.id);
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state = self
                .inner
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Reorders waiting jobs by ascending `priority`.
    pub fn reprioritize<F>(&self, mut priority: F)
    where
        F: FnMut(&ImageId) -> f32,
    {
        let mut state = self.lock();
        if state.order.len() <= 1 {
            return;
        }
        let mut scored: Vec<(Job, f32)> = state
            .order
            .drain(..)
            .map(|job| {
                let p = priority(&job.id);
                (job, p)
            })
            .collect();
        scored.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        state.order.extend(scored.into_iter().map(|(job, _)| job));
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.inner.condvar.notify_all();
    }
}

/// Everything a worker needs to turn a job into a result.
#[derive(Clone)]
pub struct WorkerContext {
    pub extractor: Arc<dyn Extractor>,
    pub cache: ThumbCache,
    pub request: ExtractRequest,
}

/// Runs one job to completion on the calling thread.
pub fn generate(ctx: &WorkerContext, job: Job) -> GenerationResult {
    let Job { ticket, id } = job;
    let mut cache_error = None;

    let signature = match ctx.extractor.signature(&id) {
        Ok(sig) => sig,
        Err(err) => {
            return GenerationResult {
                ticket,
                id,
                outcome: Err(err),
                cache_error,
            }
        }
    };

    match ctx.cache.lookup(&id, &signature) {
        Ok(Some(hit)) => {
            debug!("worker: cache hit for {id}");
            return GenerationResult {
                ticket,
                id,
                outcome: Ok(Generated {
                    signature,
                    raster: hit.raster,
                    keywords: hit.keywords,
                    from_cache: true,
                }),
                cache_error,
            };
        }
        Ok(None) => {}
        Err(err) => {
            warn!("worker: cache lookup for {id} failed: {err}");
            cache_error = Some(err);
        }
    }

    let outcome = ctx.extractor.extract(&id, &ctx.request).map(|extracted| {
        if let Err(err) = ctx
            .cache
            .store(&id, &signature, &extracted.raster, &extracted.keywords)
        {
            warn!("worker: cache store for {id} failed: {err}");
            cache_error = Some(err);
        }
        Generated {
            signature,
            raster: extracted.raster,
            keywords: extracted.keywords,
            from_cache: false,
        }
    });
    GenerationResult {
        ticket,
        id,
        outcome,
        cache_error,
    }
}

fn run_worker(ctx: WorkerContext, queue: JobQueue, result_tx: Sender<GenerationResult>) {
    while let Some(job) = queue.pop() {
        let result = generate(&ctx, job);
        if result_tx.send(result).is_err() {
            break;
        }
    }
}

/// Worker threads plus the receiving end of their result channel.
pub struct GenerationPool {
    queue: JobQueue,
    result_rx: Receiver<GenerationResult>,
}

impl GenerationPool {
    pub fn start(workers: usize, ctx: WorkerContext) -> anyhow::Result<Self> {
        let queue = JobQueue::new();
        let (result_tx, result_rx) = bounded::<GenerationResult>(RESULT_CAPACITY);
        for worker_idx in 0..workers.max(1) {
            let ctx = ctx.clone();
            let queue = queue.clone();
            let tx = result_tx.clone();
            thread::Builder::new()
                .name(format!("thumb-worker-{worker_idx}"))
                .spawn(move || run_worker(ctx, queue, tx))
                .context("failed to spawn thumbnail worker thread")?;
        }
        Ok(Self { queue, result_rx })
    }

    pub fn submit(&self, job: Job) -> bool {
        self.queue.enqueue(job)
    }

    /// Withdraws a job that has not started yet.
    pub fn withdraw(&self, id: &ImageId) -> bool {
        self.queue.remove(id)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn reprioritize<F>(&self, priority: F)
    where
        F: FnMut(&ImageId) -> f32,
    {
        self.queue.reprioritize(priority);
    }

    pub fn try_recv(&self) -> Option<GenerationResult> {
        self.result_rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<GenerationResult> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(r) => Some(r),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for GenerationPool {
    fn drop(&mut self) {
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Extractor for Fixed {
        fn signature(&self, _id: &ImageId) -> Result<ContentSignature> {
            Ok(ContentSignature::new(7, 7))
        }

        fn extract(&self, id: &ImageId, _request: &ExtractRequest) -> Result<crate::source::Extracted> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ThumbError::extraction(id, "corrupt"));
            }
            let mut keywords = Keywords::new();
            keywords.insert("NAME".into(), id.display_name());
            Ok(crate::source::Extracted {
                raster: RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255])),
                keywords,
            })
        }
    }

    fn ctx(extractor: Arc<Fixed>, cache: ThumbCache) -> WorkerContext {
        WorkerContext {
            extractor,
            cache,
            request: ExtractRequest {
                thumb_length: 16,
                keywords: vec!["NAME".into()],
            },
        }
    }

    fn job(ticket: u64, path: &str) -> Job {
        Job {
            ticket,
            id: ImageId::from(path),
        }
    }

    // ── queue ───────────────────────────────────────────────────────────

    #[test]
    fn queue_drops_duplicate_ids() {
        let q = JobQueue::new();
        assert!(q.enqueue(job(1, "/a")));
        assert!(!q.enqueue(job(2, "/a")));
        assert!(q.enqueue(job(3, "/b")));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(job(1, "/a")));
        assert!(q.enqueue(job(4, "/a")), "popped ids can be queued again");
    }

    #[test]
    fn queue_remove_and_close() {
        let q = JobQueue::new();
        q.enqueue(job(1, "/a"));
        q.enqueue(job(2, "/b"));
        assert!(q.remove(&ImageId::from("/a")));
        assert!(!q.remove(&ImageId::from("/a")));
        q.close();
        assert_eq!(q.pop(), Some(job(2, "/b")));
        assert_eq!(q.pop(), None);
        assert!(!q.enqueue(job(3, "/c")));
    }

    #[test]
    fn queue_reprioritize_sorts_ascending() {
        let q = JobQueue::new();
        for (t, p) in [(1, "/far"), (2, "/near"), (3, "/mid")] {
            q.enqueue(job(t, p));
        }
        q.reprioritize(|id| match id.display_name().as_str() {
            "near" => 0.0,
            "mid" => 1.0,
            _ => 9.0,
        });
        assert_eq!(q.pop().unwrap().id, ImageId::from("/near"));
        assert_eq!(q.pop().unwrap().id, ImageId::from("/mid"));
        assert_eq!(q.pop().unwrap().id, ImageId::from("/far"));
    }

    // ── generate ────────────────────────────────────────────────────────

    #[test]
    fn second_generation_hits_cache() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let ctx = ctx(extractor.clone(), ThumbCache::centralized(root.path().into()));

        let first = generate(&ctx, job(1, "/img/a.png"));
        let first = first.outcome.unwrap();
        assert!(!first.from_cache);
        let second = generate(&ctx, job(2, "/img/a.png")).outcome.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.raster, first.raster);
        assert_eq!(second.keywords, first.keywords);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_write_failure_still_delivers_raster() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let extractor = Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let ctx = ctx(extractor, ThumbCache::centralized(blocker.join("root")));
        let result = generate(&ctx, job(1, "/img/a.png"));
        assert!(result.outcome.is_ok());
        assert!(matches!(result.cache_error, Some(ThumbError::CacheIo { .. })));
    }

    #[test]
    fn extraction_failure_is_reported() {
        let extractor = Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let ctx = ctx(extractor, ThumbCache::disabled());
        let result = generate(&ctx, job(5, "/img/bad.png"));
        assert_eq!(result.ticket, 5);
        assert!(matches!(result.outcome, Err(ThumbError::Extraction { .. })));
    }

    // ── pool ────────────────────────────────────────────────────────────

    #[test]
    fn pool_delivers_every_job() {
        let extractor = Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let pool = GenerationPool::start(3, ctx(extractor, ThumbCache::disabled())).unwrap();
        for i in 0..10 {
            assert!(pool.submit(job(i, &format!("/img/{i}.png"))));
        }
        let mut tickets = Vec::new();
        while tickets.len() < 10 {
            let r = pool
                .recv_timeout(Duration::from_secs(5))
                .expect("result within timeout");
            tickets.push(r.ticket);
        }
        tickets.sort_unstable();
        assert_eq!(tickets, (0..10).collect::<Vec<_>>());
    }
}
