use async_trait::async_trait;
use relayrs_providers::RetryError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::request::{DispatchError, PendingRequest, Reply, ResultHandle};
use crate::stats::{DispatchStats, DispatchStatsSnapshot};

/// Executes one request. Called with a concurrency permit held.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: &PendingRequest) -> Result<String, RetryError>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum requests executing at once
    pub capacity: usize,
    /// Maximum requests waiting for admission
    pub queue_capacity: usize,
    /// How long the loop blocks on an empty queue before checking again
    pub idle_wait: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            queue_capacity: 1024,
            idle_wait: Duration::from_secs(1),
        }
    }
}

struct Job {
    request: PendingRequest,
    reply: Reply,
}

/// Submission side of the dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    semaphore: Arc<Semaphore>,
    stats: Arc<DispatchStats>,
}

/// The consuming side; drive it with [`DispatchLoop::run`].
pub struct DispatchLoop {
    rx: mpsc::Receiver<Job>,
    semaphore: Arc<Semaphore>,
    stats: Arc<DispatchStats>,
    handler: Arc<dyn RequestHandler>,
    idle_wait: Duration,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, handler: Arc<dyn RequestHandler>) -> (Self, DispatchLoop) {
        let capacity = config.capacity.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(capacity));
        let stats = Arc::new(DispatchStats::default());

        info!(
            "Dispatcher created: capacity={capacity}, queue_capacity={}",
            config.queue_capacity
        );

        let dispatcher = Self {
            tx,
            semaphore: semaphore.clone(),
            stats: stats.clone(),
        };
        let worker = DispatchLoop {
            rx,
            semaphore,
            stats,
            handler,
            idle_wait: config.idle_wait,
        };
        (dispatcher, worker)
    }

    /// Create a dispatcher and spawn its loop on the current runtime.
    pub fn start(
        config: DispatcherConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, worker) = Self::new(config, handler);
        let task = tokio::spawn(worker.run());
        (dispatcher, task)
    }

    /// Enqueue without waiting. A full queue rejects the request at once
    /// with [`DispatchError::QueueFull`].
    pub fn submit(&self, request: PendingRequest) -> ResultHandle {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            request,
            reply: Reply::new(tx),
        };

        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                DispatchStats::incr(&self.stats.rejected);
                warn!(
                    "Admission queue full, rejecting request from {}",
                    job.request.owner_id
                );
                job.reply.resolve(Err(DispatchError::QueueFull));
            }
            Err(TrySendError::Closed(job)) => {
                job.reply.resolve(Err(DispatchError::Closed));
            }
        }

        ResultHandle::new(rx)
    }

    /// Enqueue, waiting for queue space if necessary.
    pub async fn submit_wait(&self, request: PendingRequest) -> ResultHandle {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            request,
            reply: Reply::new(tx),
        };

        if let Err(mpsc::error::SendError(job)) = self.tx.send(job).await {
            job.reply.resolve(Err(DispatchError::Closed));
        }

        ResultHandle::new(rx)
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }
}

impl DispatchLoop {
    /// Run until every [`Dispatcher`] clone has been dropped and the queue
    /// is drained.
    pub async fn run(mut self) {
        info!("Dispatch loop started");
        loop {
            let first = match timeout(self.idle_wait, self.rx.recv()).await {
                Err(_) => {
                    trace!("Dispatch queue idle");
                    continue;
                }
                Ok(None) => break,
                Ok(Some(job)) => job,
            };

            let available = self.semaphore.available_permits().max(1);
            let mut batch = vec![first];
            while batch.len() < available {
                match self.rx.try_recv() {
                    Ok(job) => batch.push(job),
                    Err(_) => break,
                }
            }

            self.run_batch(batch).await;
        }
        info!("Dispatch loop stopped: queue closed");
    }

    async fn run_batch(&self, batch: Vec<Job>) {
        DispatchStats::incr(&self.stats.batches);
        debug!(
            "Dispatching batch of {} (available permits: {})",
            batch.len(),
            self.semaphore.available_permits()
        );

        let mut tasks = JoinSet::new();
        for job in batch {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                job.reply.resolve(Err(DispatchError::Closed));
                continue;
            };

            DispatchStats::incr(&self.stats.dispatched);
            let handler = self.handler.clone();
            let stats = self.stats.clone();
            tasks.spawn(async move {
                let Job { request, reply } = job;
                let result = handler.handle(&request).await;
                drop(permit);

                match result {
                    Ok(text) => {
                        DispatchStats::incr(&stats.completed);
                        reply.resolve(Ok(text));
                    }
                    Err(e) => {
                        DispatchStats::incr(&stats.failed);
                        warn!("Request from {} failed: {e}", request.owner_id);
                        reply.resolve(Err(DispatchError::Upstream(e)));
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                // The task's reply guard has already rejected its handle.
                DispatchStats::incr(&self.stats.failed);
                error!("Dispatch task aborted: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayrs_core::OwnerId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps briefly and records how many calls overlap.
    #[derive(Default)]
    struct TrackingHandler {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for TrackingHandler {
        async fn handle(&self, request: &PendingRequest) -> Result<String, RetryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match request.content.as_str() {
                "fail" => Err(RetryError::Exhausted {
                    attempts: 3,
                    source: anyhow::anyhow!("upstream down"),
                }),
                "panic" => panic!("handler blew up"),
                other => Ok(format!("echo: {other}")),
            }
        }
    }

    fn config(capacity: usize) -> DispatcherConfig {
        DispatcherConfig {
            capacity,
            queue_capacity: 64,
            idle_wait: Duration::from_millis(10),
        }
    }

    fn request(content: &str) -> PendingRequest {
        PendingRequest::new(OwnerId::from("alice"), content)
    }

    #[tokio::test]
    async fn five_requests_with_capacity_two_run_in_three_batches() {
        let handler = Arc::new(TrackingHandler::default());
        let (dispatcher, worker) = Dispatcher::new(config(2), handler.clone());

        let handles: Vec<ResultHandle> = (0..5)
            .map(|i| dispatcher.submit(request(&format!("m{i}"))))
            .collect();

        let loop_task = tokio::spawn(worker.run());

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), format!("echo: m{i}"));
        }

        let stats = dispatcher.stats();
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.dispatched, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.available_permits(), 2);

        drop(dispatcher);
        loop_task.await.unwrap();
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_capacity() {
        let handler = Arc::new(TrackingHandler::default());
        let (dispatcher, _task) = Dispatcher::start(config(3), handler.clone());

        let mut handles = Vec::new();
        for i in 0..20 {
            handles.push(dispatcher.submit(request(&format!("m{i}"))));
            if i % 4 == 0 {
                tokio::task::yield_now().await;
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(handler.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn failed_request_does_not_affect_its_batch() {
        let handler = Arc::new(TrackingHandler::default());
        let (dispatcher, _task) = Dispatcher::start(config(4), handler);

        let ok = dispatcher.submit(request("hello"));
        let bad = dispatcher.submit(request("fail"));
        let also_ok = dispatcher.submit(request("world"));

        assert_eq!(ok.await.unwrap(), "echo: hello");
        assert!(matches!(
            bad.await,
            Err(DispatchError::Upstream(RetryError::Exhausted { attempts: 3, .. }))
        ));
        assert_eq!(also_ok.await.unwrap(), "echo: world");
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn panicking_handler_still_resolves_handle() {
        let handler = Arc::new(TrackingHandler::default());
        let (dispatcher, _task) = Dispatcher::start(config(2), handler);

        let boom = dispatcher.submit(request("panic"));
        let fine = dispatcher.submit(request("fine"));

        assert!(matches!(boom.await, Err(DispatchError::Aborted(_))));
        assert_eq!(fine.await.unwrap(), "echo: fine");
        // Permits held by the panicked task are returned on unwind.
        assert_eq!(dispatcher.available_permits(), 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let handler = Arc::new(TrackingHandler::default());
        let mut cfg = config(1);
        cfg.queue_capacity = 1;
        let (dispatcher, _worker) = Dispatcher::new(cfg, handler);

        let _queued = dispatcher.submit(request("first"));
        let rejected = dispatcher.submit(request("second"));

        assert!(matches!(rejected.await, Err(DispatchError::QueueFull)));
        assert_eq!(dispatcher.stats().rejected, 1);
    }

    #[tokio::test]
    async fn submit_wait_blocks_until_space() {
        let handler = Arc::new(TrackingHandler::default());
        let mut cfg = config(1);
        cfg.queue_capacity = 1;
        let (dispatcher, worker) = Dispatcher::new(cfg, handler);

        let first = dispatcher.submit(request("first"));
        let waiter = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit_wait(request("second")).await.await })
        };
        tokio::spawn(worker.run());

        assert_eq!(first.await.unwrap(), "echo: first");
        assert_eq!(waiter.await.unwrap().unwrap(), "echo: second");
    }

    #[tokio::test]
    async fn stopped_dispatcher_rejects_as_closed() {
        let handler = Arc::new(TrackingHandler::default());
        let (dispatcher, worker) = Dispatcher::new(config(1), handler);
        drop(worker);

        assert!(matches!(
            dispatcher.submit(request("late")).await,
            Err(DispatchError::Closed)
        ));
        assert!(matches!(
            dispatcher.submit_wait(request("later")).await.await,
            Err(DispatchError::Closed)
        ));
    }
}
