//! The shared download pool for concurrent embedded-resource fetches.
//!
//! The pool is an explicitly constructed service object, injected into
//! every [`HttpSampler`](crate::request::HttpSampler) that wants concurrent
//! downloads; nothing here is process-global. Work arrives through a
//! zero-capacity rendezvous channel, so a submission completes only when a
//! worker has actually accepted the job. Workers are spawned lazily when a
//! submission finds none idle, stay alive to serve later batches, and can
//! be shrunk back to a configured minimum between pages.
//!
//! Jobs are type-erased futures so the pool neither knows nor cares how a
//! resource is fetched; batch concurrency is bounded by the caller through
//! the pipelining in [`download_all`](ResourcesDownloader::download_all),
//! not by capping the pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::control::cookie::Cookie;
use crate::request::Interrupter;
use crate::sample::SampleResult;

/// What one resource fetch produced: the sample result plus any cookies
/// discovered along the way, to be merged into the parent's jar after the
/// batch joins.
pub struct FetchOutcome {
    pub result: SampleResult,
    pub cookies: Vec<Cookie>,
}

/// A type-erased resource fetch.
pub type ResourceFetch = BoxFuture<'static, FetchOutcome>;

enum Job {
    Fetch {
        fetch: ResourceFetch,
        results: flume::Sender<FetchOutcome>,
        cancel: watch::Receiver<bool>,
    },
    Shutdown,
}

/// A lazily grown pool of download workers.
pub struct ResourcesDownloader {
    injector: flume::Sender<Job>,
    jobs: flume::Receiver<Job>,
    idle: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    /// Workers retained by [`shrink`](Self::shrink).
    minimum: usize,
}

impl ResourcesDownloader {
    /// Create a pool that [`shrink`](Self::shrink) reduces to `minimum`
    /// workers. No workers are spawned until work arrives.
    pub fn new(minimum: usize) -> Arc<ResourcesDownloader> {
        // Capacity zero: a send rendezvouses with a receiving worker.
        let (injector, jobs) = flume::bounded(0);
        Arc::new(ResourcesDownloader {
            injector,
            jobs,
            idle: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
            minimum,
        })
    }

    /// Run a batch of fetches with at most `width` in flight, returning
    /// outcomes in completion order.
    ///
    /// Interruption cancels the jobs still in flight but retains every
    /// outcome already completed.
    pub async fn download_all(
        &self,
        width: usize,
        batch: Vec<ResourceFetch>,
        interrupt: &Interrupter,
    ) -> Vec<FetchOutcome> {
        let width = width.max(1);
        let (result_tx, result_rx) = flume::unbounded();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut queue = batch.into_iter();
        let mut in_flight = 0;
        let mut completed = Vec::new();
        let mut interrupted = false;

        // Fill the window, then replace each completion with the next job.
        while in_flight < width {
            match queue.next() {
                Some(fetch) => {
                    self.submit(fetch, result_tx.clone(), cancel_rx.clone()).await;
                    in_flight += 1;
                }
                None => break,
            }
        }

        while in_flight > 0 {
            let outcome = tokio::select! {
                outcome = result_rx.recv_async() => outcome,
                _ = interrupt.wait() => {
                    debug!("interrupting {} in-flight resource fetch(es)", in_flight);
                    let _ = cancel_tx.send(true);
                    interrupted = true;
                    break;
                }
            };
            match outcome {
                Ok(outcome) => {
                    completed.push(outcome);
                    in_flight -= 1;
                }
                Err(_) => break,
            }
            if let Some(fetch) = queue.next() {
                self.submit(fetch, result_tx.clone(), cancel_rx.clone()).await;
                in_flight += 1;
            }
        }

        if interrupted {
            // Keep whatever finished before the cancel landed.
            while let Ok(outcome) = result_rx.try_recv() {
                completed.push(outcome);
            }
        }
        completed
    }

    // Hand one job to an idle worker, spawning a new worker when none is
    // waiting.
    async fn submit(
        &self,
        fetch: ResourceFetch,
        results: flume::Sender<FetchOutcome>,
        cancel: watch::Receiver<bool>,
    ) {
        if self.idle.load(Ordering::SeqCst) == 0 {
            self.spawn_worker();
        }
        match self
            .injector
            .send_async(Job::Fetch {
                fetch,
                results,
                cancel,
            })
            .await
        {
            // Idle accounting happens at the handoff, not in the worker,
            // so the next submission's spawn check never reads a count
            // the accepting worker has yet to update.
            Ok(()) => {
                self.idle.fetch_sub(1, Ordering::SeqCst);
            }
            Err(_) => {
                // All receivers gone; cannot happen while self holds one.
                warn!("download pool lost its job channel");
            }
        }
    }

    fn spawn_worker(&self) {
        let jobs = self.jobs.clone();
        let idle = self.idle.clone();
        let total = self.total.clone();
        let worker_number = total.fetch_add(1, Ordering::SeqCst);
        trace!("spawning download worker {}", worker_number);
        tokio::spawn(async move {
            loop {
                // The sender decrements this at the handoff.
                idle.fetch_add(1, Ordering::SeqCst);
                let job = jobs.recv_async().await;
                match job {
                    Ok(Job::Fetch {
                        fetch,
                        results,
                        mut cancel,
                    }) => {
                        tokio::select! {
                            outcome = fetch => {
                                let _ = results.send(outcome);
                            }
                            _ = cancel.changed() => {
                                trace!("download worker {} job cancelled", worker_number);
                            }
                        }
                    }
                    Ok(Job::Shutdown) | Err(_) => {
                        trace!("download worker {} exiting", worker_number);
                        total.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });
    }

    /// The number of live workers.
    pub fn pool_size(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Shut down idle workers beyond the configured minimum. Busy workers
    /// are untouched; they exit on a later shrink once idle.
    pub fn shrink(&self) {
        // Workers decrement the live count asynchronously, so count the
        // shutdowns sent here instead of re-reading it.
        let total = self.total.load(Ordering::SeqCst);
        let excess = total.saturating_sub(self.minimum);
        for _ in 0..excess {
            // A rendezvous try_send only reaches a worker already waiting.
            if self.injector.try_send(Job::Shutdown).is_err() {
                return;
            }
            self.idle.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use http::Method;
    use std::time::Duration;
    use url::Url;

    fn outcome(name: &str) -> FetchOutcome {
        let url = Url::parse(&format!("http://host/{}", name)).unwrap();
        FetchOutcome {
            result: SampleResult::new(url, Method::GET, name),
            cookies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn width_bounds_concurrency() {
        let downloader = ResourcesDownloader::new(0);
        let interrupt = Interrupter::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let batch: Vec<ResourceFetch> = (0..10)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    outcome(&format!("resource-{}", i))
                }
                .boxed()
            })
            .collect();

        let outcomes = downloader.download_all(3, batch, &interrupt).await;
        assert_eq!(outcomes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(downloader.pool_size() >= 1);
    }

    #[tokio::test]
    async fn interruption_retains_completed_outcomes() {
        let downloader = ResourcesDownloader::new(0);
        let interrupt = Interrupter::new();

        let mut batch: Vec<ResourceFetch> = Vec::new();
        for i in 0..2 {
            batch.push(async move { outcome(&format!("fast-{}", i)) }.boxed());
        }
        // The third job raises the interrupt and then never completes.
        let trigger = interrupt.clone();
        batch.push(
            async move {
                trigger.interrupt();
                futures::future::pending::<()>().await;
                unreachable!()
            }
            .boxed(),
        );

        let outcomes = downloader.download_all(1, batch, &interrupt).await;
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test]
    async fn pool_serves_consecutive_batches() {
        let downloader = ResourcesDownloader::new(0);
        let interrupt = Interrupter::new();

        // Reused workers must be counted idle again between batches, or a
        // later batch rendezvouses with nobody and never joins.
        for round in 0..3 {
            let batch: Vec<ResourceFetch> = (0..4)
                .map(|i| {
                    async move {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        outcome(&format!("round-{}-{}", round, i))
                    }
                    .boxed()
                })
                .collect();
            let outcomes = downloader.download_all(2, batch, &interrupt).await;
            assert_eq!(outcomes.len(), 4);
        }
    }

    #[tokio::test]
    async fn shrink_reduces_to_minimum() {
        let downloader = ResourcesDownloader::new(1);
        let interrupt = Interrupter::new();

        let batch: Vec<ResourceFetch> = (0..4)
            .map(|i| {
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    outcome(&format!("r-{}", i))
                }
                .boxed()
            })
            .collect();
        downloader.download_all(4, batch, &interrupt).await;
        assert!(downloader.pool_size() >= 1);

        // Workers are idle again once the batch joined.
        tokio::time::sleep(Duration::from_millis(20)).await;
        downloader.shrink();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(downloader.pool_size(), 1);
    }
}
