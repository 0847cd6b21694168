//! Bounded worker lanes for long-running media jobs.
//!
//! Three independent FIFO lanes (flux, sdxl, tts), each drained by a single
//! worker task, so at most one job per lane is in flight while distinct
//! lanes run in parallel. Nothing here persists: a restart drops all queued
//! and in-flight jobs.

pub mod handlers;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::providers::SpeechParams;

/// An independent FIFO of jobs with its own single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Flux,
    Sdxl,
    Tts,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Flux => "flux",
            Lane::Sdxl => "sdxl",
            Lane::Tts => "tts",
        }
    }

    fn index(&self) -> usize {
        match self {
            Lane::Flux => 0,
            Lane::Sdxl => 1,
            Lane::Tts => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One enqueued media job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub lane: Lane,
    pub prompt: String,
    pub principal: i64,
    pub status: JobStatus,
    /// Worker-reported progress label shown in status edits.
    pub stage: Option<String>,
    /// Speech parameters; set only on TTS-lane jobs.
    pub speech: Option<SpeechParams>,
    pub result: Option<PathBuf>,
    pub error: Option<String>,
    pub enqueued_at: Instant,
}

/// Produces the artifact for one job; one handler per lane.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> Result<PathBuf>;
}

#[derive(Default)]
struct LaneState {
    order: VecDeque<String>,
    processing: Option<String>,
    jobs: HashMap<String, Job>,
}

/// All three lanes behind one lock; workers take jobs through
/// [`JobQueue::take_next`].
pub struct JobQueue {
    lanes: Mutex<HashMap<Lane, LaneState>>,
    wakeups: [Arc<Notify>; 3],
}

impl JobQueue {
    pub fn new() -> Self {
        let mut lanes = HashMap::new();
        lanes.insert(Lane::Flux, LaneState::default());
        lanes.insert(Lane::Sdxl, LaneState::default());
        lanes.insert(Lane::Tts, LaneState::default());
        Self {
            lanes: Mutex::new(lanes),
            wakeups: [
                Arc::new(Notify::new()),
                Arc::new(Notify::new()),
                Arc::new(Notify::new()),
            ],
        }
    }

    /// Add a job to its lane. Returns the job id.
    pub fn enqueue(&self, lane: Lane, prompt: &str, principal: i64) -> String {
        self.enqueue_inner(lane, prompt, principal, None)
    }

    /// Add a speech job with its validated parameters to the TTS lane.
    pub fn enqueue_speech(&self, text: &str, params: SpeechParams, principal: i64) -> String {
        self.enqueue_inner(Lane::Tts, text, principal, Some(params))
    }

    fn enqueue_inner(
        &self,
        lane: Lane,
        prompt: &str,
        principal: i64,
        speech: Option<SpeechParams>,
    ) -> String {
        let id = format!(
            "{}_{}",
            if lane == Lane::Tts { "tts" } else { "img" },
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let job = Job {
            id: id.clone(),
            lane,
            prompt: prompt.to_string(),
            principal,
            status: JobStatus::Pending,
            stage: None,
            speech,
            result: None,
            error: None,
            enqueued_at: Instant::now(),
        };

        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.get_mut(&lane).unwrap();
        state.order.push_back(id.clone());
        state.jobs.insert(id.clone(), job);
        info!(
            lane = lane.as_str(),
            job_id = %id,
            position = state.order.len(),
            "Job enqueued"
        );
        drop(lanes);

        self.wakeups[lane.index()].notify_one();
        id
    }

    /// 1-based position among pending jobs in the lane; `None` once the job
    /// left the pending state.
    pub fn position(&self, id: &str) -> Option<usize> {
        let lanes = self.lanes.lock().unwrap();
        for state in lanes.values() {
            if let Some(job) = state.jobs.get(id) {
                if job.status != JobStatus::Pending {
                    return None;
                }
                let mut position = 1;
                for queued_id in &state.order {
                    if queued_id == id {
                        return Some(position);
                    }
                    if state
                        .jobs
                        .get(queued_id)
                        .is_some_and(|j| j.status == JobStatus::Pending)
                    {
                        position += 1;
                    }
                }
            }
        }
        None
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.get(id).map(|job| job.status)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        let lanes = self.lanes.lock().unwrap();
        lanes
            .values()
            .find_map(|state| state.jobs.get(id))
            .cloned()
    }

    pub fn pending_count(&self, lane: Lane) -> usize {
        let lanes = self.lanes.lock().unwrap();
        lanes[&lane]
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    /// Pop the next pending job and mark it processing. Returns `None` when
    /// the lane is empty or already has a job in flight.
    fn take_next(&self, lane: Lane) -> Option<Job> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.get_mut(&lane).unwrap();
        if state.processing.is_some() {
            return None;
        }
        while let Some(id) = state.order.front().cloned() {
            match state.jobs.get_mut(&id) {
                Some(job) if job.status == JobStatus::Pending => {
                    job.status = JobStatus::Processing;
                    state.processing = Some(id.clone());
                    state.order.pop_front();
                    info!(lane = lane.as_str(), job_id = %id, "Job processing");
                    return Some(job.clone());
                }
                // Cleaned-up or terminal entries at the head just slide off.
                _ => {
                    state.order.pop_front();
                }
            }
        }
        None
    }

    /// Record worker progress for status-message edits.
    pub fn set_stage(&self, id: &str, stage: &str) {
        let mut lanes = self.lanes.lock().unwrap();
        for state in lanes.values_mut() {
            if let Some(job) = state.jobs.get_mut(id) {
                job.stage = Some(stage.to_string());
                return;
            }
        }
    }

    fn complete(&self, id: &str, result: PathBuf) {
        let mut lanes = self.lanes.lock().unwrap();
        for state in lanes.values_mut() {
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                if state.processing.as_deref() == Some(id) {
                    state.processing = None;
                }
                info!(job_id = %id, "Job completed");
                return;
            }
        }
    }

    fn fail(&self, id: &str, message: &str) {
        let mut lanes = self.lanes.lock().unwrap();
        for state in lanes.values_mut() {
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Failed;
                job.error = Some(message.to_string());
                if state.processing.as_deref() == Some(id) {
                    state.processing = None;
                }
                error!(job_id = %id, error = message, "Job failed");
                return;
            }
        }
    }

    /// Remove a job record after its result was delivered. The TTS lane owns
    /// its temp audio files and deletes them here.
    pub fn cleanup(&self, id: &str) {
        let mut lanes = self.lanes.lock().unwrap();
        for state in lanes.values_mut() {
            if let Some(job) = state.jobs.remove(id) {
                state.order.retain(|queued| queued != id);
                if job.lane == Lane::Tts {
                    if let Some(path) = &job.result {
                        if let Err(e) = std::fs::remove_file(path) {
                            if path.exists() {
                                warn!(path = %path.display(), error = %e, "Could not remove temp audio file");
                            }
                        }
                    }
                }
                return;
            }
        }
    }

    /// Spawn the single worker for one lane.
    pub fn spawn_worker(
        self: Arc<Self>,
        lane: Lane,
        handler: Arc<dyn JobHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let queue = self;
        let wakeup = Arc::clone(&queue.wakeups[lane.index()]);
        tokio::spawn(async move {
            loop {
                while let Some(job) = queue.take_next(lane) {
                    match handler.run(&job).await {
                        Ok(path) => queue.complete(&job.id, path),
                        Err(e) => queue.fail(&job.id, &e.to_string()),
                    }
                }
                tokio::select! {
                    _ = wakeup.notified() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(lane = lane.as_str(), "Job worker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct InstantHandler;

    #[async_trait]
    impl JobHandler for InstantHandler {
        async fn run(&self, job: &Job) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("/tmp/{}.bin", job.id)))
        }
    }

    struct SlowHandler {
        delay: Duration,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn run(&self, job: &Job) -> Result<PathBuf> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(job.prompt.clone());
            Ok(PathBuf::from(format!("/tmp/{}.bin", job.id)))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn run(&self, _job: &Job) -> Result<PathBuf> {
            Err(crate::error::SakaiError::Tool("boom".into()))
        }
    }

    async fn wait_terminal(queue: &JobQueue, id: &str) -> JobStatus {
        for _ in 0..200 {
            match queue.status(id) {
                Some(JobStatus::Completed) => return JobStatus::Completed,
                Some(JobStatus::Failed) => return JobStatus::Failed,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[test]
    fn test_enqueue_assigns_positions() {
        let queue = JobQueue::new();
        let a = queue.enqueue(Lane::Flux, "one", 1);
        let b = queue.enqueue(Lane::Flux, "two", 1);
        let c = queue.enqueue(Lane::Flux, "three", 2);
        assert_eq!(queue.position(&a), Some(1));
        assert_eq!(queue.position(&b), Some(2));
        assert_eq!(queue.position(&c), Some(3));
    }

    #[test]
    fn test_lanes_have_independent_positions() {
        let queue = JobQueue::new();
        let _f = queue.enqueue(Lane::Flux, "f", 1);
        let s = queue.enqueue(Lane::Sdxl, "s", 1);
        assert_eq!(queue.position(&s), Some(1));
    }

    #[test]
    fn test_take_next_marks_processing_and_blocks_lane() {
        let queue = JobQueue::new();
        let a = queue.enqueue(Lane::Flux, "one", 1);
        let b = queue.enqueue(Lane::Flux, "two", 1);

        let taken = queue.take_next(Lane::Flux).unwrap();
        assert_eq!(taken.id, a);
        assert_eq!(queue.status(&a), Some(JobStatus::Processing));
        // Position of the job behind the in-flight one decrements to 1.
        assert_eq!(queue.position(&b), Some(1));
        // Lane busy: nothing else comes out.
        assert!(queue.take_next(Lane::Flux).is_none());

        queue.complete(&a, PathBuf::from("/tmp/a"));
        assert_eq!(queue.take_next(Lane::Flux).unwrap().id, b);
    }

    #[test]
    fn test_position_none_after_terminal() {
        let queue = JobQueue::new();
        let a = queue.enqueue(Lane::Flux, "one", 1);
        queue.take_next(Lane::Flux);
        queue.fail(&a, "nope");
        assert_eq!(queue.position(&a), None);
        assert_eq!(queue.status(&a), Some(JobStatus::Failed));
        assert_eq!(queue.get(&a).unwrap().error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_cleanup_removes_record() {
        let queue = JobQueue::new();
        let a = queue.enqueue(Lane::Flux, "one", 1);
        queue.cleanup(&a);
        assert!(queue.get(&a).is_none());
        assert!(queue.take_next(Lane::Flux).is_none());
    }

    #[test]
    fn test_tts_cleanup_deletes_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("voice.ogg");
        std::fs::write(&audio, b"fake audio").unwrap();

        let queue = JobQueue::new();
        let id = queue.enqueue(Lane::Tts, "say hi", 1);
        queue.take_next(Lane::Tts);
        queue.complete(&id, audio.clone());
        queue.cleanup(&id);
        assert!(!audio.exists());
    }

    #[tokio::test]
    async fn test_worker_fifo_order() {
        let queue = Arc::new(JobQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&queue).spawn_worker(
            Lane::Flux,
            Arc::new(SlowHandler {
                delay: Duration::from_millis(10),
                log: Arc::clone(&log),
            }),
            rx,
        );

        let a = queue.enqueue(Lane::Flux, "first", 1);
        let b = queue.enqueue(Lane::Flux, "second", 1);
        let c = queue.enqueue(Lane::Flux, "third", 1);

        assert_eq!(wait_terminal(&queue, &a).await, JobStatus::Completed);
        assert_eq!(wait_terminal(&queue, &b).await, JobStatus::Completed);
        assert_eq!(wait_terminal(&queue, &c).await, JobStatus::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);

        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn test_lanes_process_concurrently() {
        let queue = Arc::new(JobQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = watch::channel(false);

        // Flux is slow; sdxl is instant and must finish first despite being
        // enqueued second.
        let _w1 = Arc::clone(&queue).spawn_worker(
            Lane::Flux,
            Arc::new(SlowHandler {
                delay: Duration::from_millis(80),
                log: Arc::clone(&log),
            }),
            rx.clone(),
        );
        let _w2 = Arc::clone(&queue).spawn_worker(Lane::Sdxl, Arc::new(InstantHandler), rx);

        let slow = queue.enqueue(Lane::Flux, "slow", 1);
        let fast = queue.enqueue(Lane::Sdxl, "fast", 2);

        assert_eq!(wait_terminal(&queue, &fast).await, JobStatus::Completed);
        assert_eq!(queue.status(&slow), Some(JobStatus::Processing));
        assert_eq!(wait_terminal(&queue, &slow).await, JobStatus::Completed);

        tx.send(true).unwrap();
    }

    #[test]
    fn test_enqueue_speech_carries_params() {
        let queue = JobQueue::new();
        let params = SpeechParams {
            voice: Some("fa-IR-FaridNeural".into()),
            rate: Some("+10%".into()),
            volume: None,
        };
        let id = queue.enqueue_speech("salam", params.clone(), 5);
        let job = queue.get(&id).unwrap();
        assert_eq!(job.lane, Lane::Tts);
        assert_eq!(job.speech, Some(params));
    }

    #[test]
    fn test_set_stage_visible_in_snapshot() {
        let queue = JobQueue::new();
        let id = queue.enqueue(Lane::Flux, "sunset", 1);
        queue.set_stage(&id, "enhancing prompt");
        assert_eq!(
            queue.get(&id).unwrap().stage.as_deref(),
            Some("enhancing prompt")
        );
    }

    #[tokio::test]
    async fn test_worker_survives_handler_failure() {
        let queue = Arc::new(JobQueue::new());
        let (tx, rx) = watch::channel(false);
        let _w = Arc::clone(&queue).spawn_worker(Lane::Sdxl, Arc::new(FailingHandler), rx);

        let a = queue.enqueue(Lane::Sdxl, "one", 1);
        let b = queue.enqueue(Lane::Sdxl, "two", 1);
        assert_eq!(wait_terminal(&queue, &a).await, JobStatus::Failed);
        // The lane advanced past the failure.
        assert_eq!(wait_terminal(&queue, &b).await, JobStatus::Failed);
        assert!(queue.get(&a).unwrap().error.is_some());

        tx.send(true).unwrap();
    }
}
