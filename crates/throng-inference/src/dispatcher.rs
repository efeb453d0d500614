//! Asynchronous submission of inference batches.
//!
//! The tick never awaits the inference service. [`InferenceDispatcher::submit`]
//! spawns the call on a tokio runtime handle, wrapped in
//! [`tokio::time::timeout`], and the outcome comes back on an unbounded
//! mpsc channel. The tick drains that channel with
//! [`InferenceDispatcher::drain_completions`] during its single-threaded
//! phase, which makes the drain the only writer of cache entries and
//! in-flight markers.

use std::sync::Arc;
use std::time::Duration;

use throng_types::{AgentProfile, AnalysisResult, BatchId, ContentDescriptor};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::content::ContentHash;
use crate::error::InferenceError;
use crate::service::InferenceService;

/// The outcome of one submitted batch.
#[derive(Debug)]
pub struct Completion {
    /// Batch identifier assigned at submission.
    pub batch_id: BatchId,
    /// Content hashes covered by the batch, in profile order.
    pub hashes: Vec<ContentHash>,
    /// One result per hash, or the error that failed the whole batch.
    pub outcome: Result<Vec<AnalysisResult>, InferenceError>,
    /// Wall time from spawn to completion.
    pub elapsed: Duration,
}

/// Cumulative dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DispatchStats {
    /// Batches submitted.
    pub submitted: u64,
    /// Batches completed successfully.
    pub succeeded: u64,
    /// Batches that failed (including timeouts).
    pub failed: u64,
    /// Batches that hit the request timeout.
    pub timed_out: u64,
    /// Running mean of completed batch latency, in milliseconds.
    pub avg_response_ms: f64,
}

/// Spawns inference calls and collects their completions.
#[derive(Debug)]
pub struct InferenceDispatcher<S> {
    service: Arc<S>,
    runtime: Handle,
    request_timeout: Duration,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    tasks: Vec<JoinHandle<()>>,
    /// Submitted batches whose completion has not been received.
    awaiting: usize,
    stats: DispatchStats,
}

impl<S: InferenceService> InferenceDispatcher<S> {
    /// Create a dispatcher that spawns calls on `runtime`.
    pub fn new(service: Arc<S>, runtime: Handle, request_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            service,
            runtime,
            request_timeout,
            tx,
            rx,
            tasks: Vec::new(),
            awaiting: 0,
            stats: DispatchStats::default(),
        }
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.service.name()
    }

    /// Spawn one analysis call covering `entries` under `batch_id`.
    ///
    /// The outcome arrives later through
    /// [`drain_completions`](Self::drain_completions).
    pub fn submit(
        &mut self,
        batch_id: BatchId,
        content: ContentDescriptor,
        entries: Vec<(ContentHash, AgentProfile)>,
    ) {
        let (hashes, profiles): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        let limit = self.request_timeout;

        debug!(
            batch_id = %batch_id,
            profiles = profiles.len(),
            backend = service.name(),
            "Submitting inference batch"
        );

        let handle = self.runtime.spawn(async move {
            let started = Instant::now();
            let expected = profiles.len();
            let outcome = match timeout(limit, service.analyze(&content, &profiles)).await {
                Ok(Ok(results)) if results.len() == expected => Ok(results),
                Ok(Ok(results)) => Err(InferenceError::ResultCount {
                    expected,
                    actual: results.len(),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(InferenceError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            // The receiver is gone only after shutdown; nothing left to notify.
            let _ = tx.send(Completion {
                batch_id,
                hashes,
                outcome,
                elapsed: started.elapsed(),
            });
        });

        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(handle);
        self.awaiting = self.awaiting.saturating_add(1);
        self.stats.submitted = self.stats.submitted.saturating_add(1);
    }

    /// Take every completion that has arrived, without waiting.
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            self.record(&completion);
            completions.push(completion);
        }
        completions
    }

    /// Wait for the next completion (used by shutdown and tests).
    pub async fn next_completion(&mut self) -> Option<Completion> {
        let completion = self.rx.recv().await?;
        self.record(&completion);
        Some(completion)
    }

    /// Number of submitted calls whose completion has not been received.
    pub const fn outstanding(&self) -> usize {
        self.awaiting
    }

    /// Cumulative counters.
    pub const fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Abort every outstanding call.
    ///
    /// Returns the number of calls aborted.
    pub fn abort_all(&mut self) -> usize {
        let mut aborted: usize = 0;
        for task in self.tasks.drain(..) {
            if !task.is_finished() {
                task.abort();
                aborted = aborted.saturating_add(1);
            }
        }
        // Completions that raced the abort are dropped unrecorded.
        while self.rx.try_recv().is_ok() {}
        self.awaiting = 0;
        aborted
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, completion: &Completion) {
        self.awaiting = self.awaiting.saturating_sub(1);
        match &completion.outcome {
            Ok(_) => {
                self.stats.succeeded = self.stats.succeeded.saturating_add(1);
            }
            Err(e) => {
                self.stats.failed = self.stats.failed.saturating_add(1);
                if matches!(e, InferenceError::Timeout { .. }) {
                    self.stats.timed_out = self.stats.timed_out.saturating_add(1);
                }
                warn!(batch_id = %completion.batch_id, error = %e, "Inference batch failed");
            }
        }
        let done = self.stats.succeeded.saturating_add(self.stats.failed);
        if done > 0 {
            let elapsed_ms = completion.elapsed.as_secs_f64() * 1000.0;
            let n = done as f64;
            self.stats.avg_response_ms += (elapsed_ms - self.stats.avg_response_ms) / n;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::future::Future;

    use throng_types::{AgentId, AgentRecord, ClusterKey, FeatureVector};

    use super::*;
    use crate::service::HeuristicInferenceService;

    /// Never answers.
    struct Stalled;

    impl InferenceService for Stalled {
        fn analyze(
            &self,
            _content: &ContentDescriptor,
            _profiles: &[AgentProfile],
        ) -> impl Future<Output = Result<Vec<AnalysisResult>, InferenceError>> + Send {
            std::future::pending()
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn entry(id: u64) -> (ContentHash, AgentProfile) {
        let record = AgentRecord::new(
            AgentId::new(id),
            FeatureVector {
                age: 30,
                education: 1,
                urban: false,
                economic_axis: 0.2,
                social_axis: -0.2,
            },
        );
        let content = ContentDescriptor::new("jobs", "text");
        (ContentHash::of(&content, &ClusterKey::of(&record)), record.profile())
    }

    #[tokio::test]
    async fn completion_arrives_on_channel() {
        let mut dispatcher = InferenceDispatcher::new(
            Arc::new(HeuristicInferenceService::new()),
            Handle::current(),
            Duration::from_secs(5),
        );
        let batch = BatchId::new();
        dispatcher.submit(batch, ContentDescriptor::new("jobs", "text"), vec![entry(1), entry(2)]);
        let completion = dispatcher.next_completion().await.unwrap();
        assert_eq!(completion.batch_id, batch);
        assert_eq!(completion.hashes.len(), 2);
        assert_eq!(completion.outcome.unwrap().len(), 2);
        assert_eq!(dispatcher.stats().succeeded, 1);
        assert_eq!(dispatcher.outstanding(), 0);
        assert!(dispatcher.drain_completions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out() {
        let mut dispatcher = InferenceDispatcher::new(
            Arc::new(Stalled),
            Handle::current(),
            Duration::from_millis(250),
        );
        dispatcher.submit(BatchId::new(), ContentDescriptor::new("jobs", "text"), vec![entry(1)]);
        let completion = dispatcher.next_completion().await.unwrap();
        assert!(matches!(
            completion.outcome,
            Err(InferenceError::Timeout { timeout_ms: 250 })
        ));
        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.timed_out, 1);
    }

    #[tokio::test]
    async fn abort_all_cancels_outstanding_calls() {
        let mut dispatcher =
            InferenceDispatcher::new(Arc::new(Stalled), Handle::current(), Duration::from_secs(60));
        dispatcher.submit(BatchId::new(), ContentDescriptor::new("jobs", "text"), vec![entry(1)]);
        dispatcher.submit(BatchId::new(), ContentDescriptor::new("jobs", "text"), vec![entry(2)]);
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.outstanding(), 2);
        assert_eq!(dispatcher.abort_all(), 2);
        assert_eq!(dispatcher.outstanding(), 0);
    }
}
