//! FIFO broadcast queue with a single consumer.
//!
//! The queue owns the "currently playing" slot. [`BroadcastQueue::run`] is
//! the only path that moves a job into that slot, so at most one job plays
//! at a time. Enqueueing wakes the consumer through a [`Notify`] permit;
//! there is no idle polling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BroadcastError, BroadcastResult};
use crate::services::model::{BroadcastJob, JobStatus};
use crate::utils::{now_millis, secs_f64_to_duration};

/// Runs one dequeued job to a terminal state.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Returns [`JobStatus::Completed`] or [`JobStatus::Failed`].
    async fn execute(&self, job: &BroadcastJob) -> JobStatus;
}

/// Result of enqueueing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTicket {
    /// 1-based position among jobs waiting to play.
    pub position: usize,
    /// Advisory Unix timestamp (ms) at which the job should start.
    pub estimated_start_millis: u64,
}

/// The job currently playing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentJob {
    pub job: BroadcastJob,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    /// Elapsed time against the estimated duration, clamped to 0..=100.
    pub progress_percent: f64,
}

/// A job waiting to play.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJob {
    pub position: usize,
    pub estimated_start_millis: u64,
    pub job: BroadcastJob,
}

/// The most recent job to reach a terminal state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedJob {
    /// The job with its terminal status (`completed` or `failed`).
    pub job: BroadcastJob,
    pub finished_at: u64,
}

/// Queue snapshot for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub is_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentJob>,
    pub pending: Vec<PendingJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_finished: Option<FinishedJob>,
}

struct Playing {
    job: BroadcastJob,
    started: Instant,
}

impl Playing {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn remaining(&self) -> Duration {
        secs_f64_to_duration(self.job.duration_secs).saturating_sub(self.elapsed())
    }

    fn progress_percent(&self) -> f64 {
        let total = self.job.duration_secs;
        if !(total.is_finite() && total > 0.0) {
            return 100.0;
        }
        (self.elapsed().as_secs_f64() / total * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<BroadcastJob>,
    current: Option<Playing>,
    last_finished: Option<FinishedJob>,
}

impl Inner {
    /// Start offsets (from now) for every pending job, in queue order.
    fn start_offsets(&self) -> impl Iterator<Item = Duration> + '_ {
        let head = self
            .current
            .as_ref()
            .map(Playing::remaining)
            .unwrap_or_default();
        self.pending.iter().scan(head, |ahead, job| {
            let start = *ahead;
            *ahead = ahead.saturating_add(secs_f64_to_duration(job.duration_secs));
            Some(start)
        })
    }
}

fn offset_to_millis(offset: Duration) -> u64 {
    let offset = u64::try_from(offset.as_millis()).unwrap_or(u64::MAX);
    now_millis().saturating_add(offset)
}

/// Ordered list of approved jobs plus the playing slot.
#[derive(Default)]
pub struct BroadcastQueue {
    inner: Mutex<Inner>,
    wake: Notify,
}

impl BroadcastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job and wakes the consumer.
    pub fn enqueue(&self, mut job: BroadcastJob) -> QueueTicket {
        job.status = JobStatus::Queued;
        let ticket = {
            let mut inner = self.inner.lock();
            inner.pending.push_back(job);
            let position = inner.pending.len();
            let offset = inner.start_offsets().last().unwrap_or_default();
            QueueTicket {
                position,
                estimated_start_millis: offset_to_millis(offset),
            }
        };
        self.wake.notify_one();
        ticket
    }

    pub fn peek_current(&self) -> Option<BroadcastJob> {
        self.inner.lock().current.as_ref().map(|p| p.job.clone())
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        let current = inner.current.as_ref().map(|playing| CurrentJob {
            job: playing.job.clone(),
            elapsed_secs: playing.elapsed().as_secs_f64(),
            remaining_secs: playing.remaining().as_secs_f64(),
            progress_percent: playing.progress_percent(),
        });
        let pending = inner
            .pending
            .iter()
            .zip(inner.start_offsets())
            .enumerate()
            .map(|(index, (job, offset))| PendingJob {
                position: index + 1,
                estimated_start_millis: offset_to_millis(offset),
                job: job.clone(),
            })
            .collect();
        QueueStatus {
            is_playing: current.is_some(),
            current,
            pending,
            last_finished: inner.last_finished.clone(),
        }
    }

    /// Removes a job that has not started playing.
    pub fn remove_queued(&self, job_id: &str) -> BroadcastResult<BroadcastJob> {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.pending.iter().position(|job| job.id == job_id) {
            if let Some(job) = inner.pending.remove(index) {
                return Ok(job);
            }
        }
        if inner
            .current
            .as_ref()
            .is_some_and(|playing| playing.job.id == job_id)
        {
            return Err(BroadcastError::InvalidState(format!(
                "job {} is already playing",
                job_id
            )));
        }
        Err(BroadcastError::NotFound(format!("job {}", job_id)))
    }

    /// Moves the head job into the playing slot, if idle.
    pub(crate) fn try_start(&self) -> Option<BroadcastJob> {
        let mut inner = self.inner.lock();
        if inner.current.is_some() {
            return None;
        }
        let mut job = inner.pending.pop_front()?;
        job.status = JobStatus::Playing;
        inner.current = Some(Playing {
            job: job.clone(),
            started: Instant::now(),
        });
        Some(job)
    }

    async fn next_job(&self) -> BroadcastJob {
        loop {
            if let Some(job) = self.try_start() {
                return job;
            }
            self.wake.notified().await;
        }
    }

    /// Empties the playing slot and records the job's terminal status.
    fn finish(&self, job_id: &str, status: JobStatus) {
        let mut inner = self.inner.lock();
        if !inner
            .current
            .as_ref()
            .is_some_and(|playing| playing.job.id == job_id)
        {
            return;
        }
        if let Some(Playing { mut job, .. }) = inner.current.take() {
            job.status = status;
            inner.last_finished = Some(FinishedJob {
                job,
                finished_at: now_millis(),
            });
        }
    }

    /// Drains the queue until `cancel` fires.
    ///
    /// A job that has started playing always runs to a terminal state;
    /// cancellation only takes effect between jobs.
    pub async fn run(self: Arc<Self>, executor: Arc<dyn JobExecutor>, cancel: CancellationToken) {
        log::info!("[Queue] Consumer started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.next_job() => job,
            };

            log::info!("[Queue] Starting job {} ({:.1}s)", job.id, job.duration_secs);
            let status = executor.execute(&job).await;
            log::info!("[Queue] Job {} finished: {:?}", job.id, status);
            self.finish(&job.id, status);

            if cancel.is_cancelled() {
                break;
            }
        }
        log::info!("[Queue] Consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioArtifact;
    use crate::devices::{DeviceId, DeviceSet};
    use crate::services::model::{JobParams, JobType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn job(id: &str, duration_secs: f64) -> BroadcastJob {
        let devices: DeviceSet = [DeviceId::new("1-1")].into_iter().collect();
        BroadcastJob {
            id: id.to_string(),
            preview_id: format!("preview_{}", id),
            job_type: JobType::Text,
            target_devices: devices.clone(),
            end_devices: devices,
            params: JobParams::Text {
                text: "test".into(),
                language: "en".into(),
            },
            artifact: AudioArtifact::new(format!("/tmp/{}.wav", id)),
            duration_secs,
            auto_restore: None,
            created_at: 0,
            status: JobStatus::Queued,
        }
    }

    /// Sleeps for the job's duration and reports ids in execution order.
    struct SleepingExecutor {
        done: mpsc::UnboundedSender<String>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for SleepingExecutor {
        async fn execute(&self, job: &BroadcastJob) -> JobStatus {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(secs_f64_to_duration(job.duration_secs)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            let _ = self.done.send(job.id.clone());
            JobStatus::Completed
        }
    }

    fn executor() -> (Arc<SleepingExecutor>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(SleepingExecutor {
                done: tx,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    fn approx(actual: u64, expected: u64, tolerance: u64) -> bool {
        actual.abs_diff(expected) <= tolerance
    }

    #[tokio::test(start_paused = true)]
    async fn drains_in_fifo_order_one_at_a_time() {
        let queue = Arc::new(BroadcastQueue::new());
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            let ticket = queue.enqueue(job(id, 1.0 + i as f64));
            assert_eq!(ticket.position, i + 1);
        }

        let (exec, mut done) = executor();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&queue).run(exec.clone(), cancel.clone()));

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(done.recv().await.unwrap());
        }
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(exec.max_active.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
        assert!(queue.peek_current().is_none());

        let last = queue.status().last_finished.unwrap();
        assert_eq!(last.job.id, "d");
        assert_eq!(last.job.status, JobStatus::Completed);
    }

    /// Fails every job it is handed.
    struct FailingExecutor;

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        async fn execute(&self, _job: &BroadcastJob) -> JobStatus {
            JobStatus::Failed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_last_terminal_job() {
        let queue = Arc::new(BroadcastQueue::new());
        assert!(queue.status().last_finished.is_none());

        queue.enqueue(job("broken", 1.0));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Arc::clone(&queue).run(Arc::new(FailingExecutor), cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = queue.status();
        assert!(!status.is_playing);
        let last = status.last_finished.unwrap();
        assert_eq!(last.job.id, "broken");
        assert_eq!(last.job.status, JobStatus::Failed);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn huge_duration_does_not_overflow_estimates() {
        let queue = BroadcastQueue::new();
        queue.enqueue(job("endless", 1e20));
        let ticket = queue.enqueue(job("after", 1.0));
        assert_eq!(ticket.position, 2);
        assert_eq!(ticket.estimated_start_millis, u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_wakes_on_enqueue() {
        let queue = Arc::new(BroadcastQueue::new());
        let (exec, mut done) = executor();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&queue).run(exec, cancel.clone()));

        tokio::task::yield_now().await;
        queue.enqueue(job("late", 0.5));
        assert_eq!(done.recv().await.unwrap(), "late");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn first_job_on_idle_queue_starts_now() {
        let queue = BroadcastQueue::new();
        let before = now_millis();
        let ticket = queue.enqueue(job("first", 8.5));
        assert_eq!(ticket.position, 1);
        assert!(approx(ticket.estimated_start_millis, before, 1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn estimate_accounts_for_remaining_playback() {
        let queue = BroadcastQueue::new();
        queue.enqueue(job("first", 10.0));
        assert_eq!(queue.try_start().unwrap().id, "first");

        tokio::time::advance(Duration::from_secs(4)).await;

        let ticket = queue.enqueue(job("second", 5.0));
        assert_eq!(ticket.position, 1);
        assert!(approx(ticket.estimated_start_millis, now_millis() + 6_000, 1_000));

        let third = queue.enqueue(job("third", 2.0));
        assert_eq!(third.position, 2);
        assert!(approx(third.estimated_start_millis, now_millis() + 11_000, 1_000));

        let status = queue.status();
        assert!(status.is_playing);
        let current = status.current.unwrap();
        assert!((current.progress_percent - 40.0).abs() < 0.5);
        assert_eq!(status.pending.len(), 2);
        assert_eq!(status.pending[1].job.id, "third");
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_clamped() {
        let queue = BroadcastQueue::new();
        queue.enqueue(job("long", 2.0));
        queue.try_start().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let current = queue.status().current.unwrap();
        assert_eq!(current.progress_percent, 100.0);
        assert_eq!(current.remaining_secs, 0.0);
    }

    #[test]
    fn only_one_job_enters_playing_slot() {
        let queue = BroadcastQueue::new();
        queue.enqueue(job("a", 1.0));
        queue.enqueue(job("b", 1.0));

        let started = queue.try_start().unwrap();
        assert_eq!(started.status, JobStatus::Playing);
        assert!(queue.try_start().is_none());

        queue.finish("b", JobStatus::Completed);
        assert!(queue.try_start().is_none());

        queue.finish("a", JobStatus::Completed);
        assert_eq!(queue.try_start().unwrap().id, "b");
    }

    #[test]
    fn remove_queued_job() {
        let queue = BroadcastQueue::new();
        queue.enqueue(job("a", 1.0));
        queue.enqueue(job("b", 1.0));
        queue.enqueue(job("c", 1.0));
        queue.try_start().unwrap();

        assert_eq!(queue.remove_queued("c").unwrap().id, "c");
        assert_eq!(queue.status().pending.len(), 1);
        assert!(matches!(
            queue.remove_queued("a"),
            Err(BroadcastError::InvalidState(_))
        ));
        assert!(matches!(
            queue.remove_queued("zzz"),
            Err(BroadcastError::NotFound(_))
        ));
    }
}
