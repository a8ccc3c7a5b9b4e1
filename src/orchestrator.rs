//! Batch orchestrator
//!
//! Runs jobs from the shared queue one at a time through the [`Pipeline`].
//! A batch holds the queue's `processing` flag for its whole duration; a
//! [`CancelHandle`] obtained before the batch starts can stop it from any
//! other thread.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(queue, pipeline, settings, Arc::new(TracingNotifier));
//! let cancel = orchestrator.cancel_handle();
//! std::thread::spawn(move || orchestrator.process_all());
//! // later, from the foreground
//! cancel.cancel();
//! ```

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::job::{JobId, JobStatus};
use crate::notify::{BatchSummary, Notifier};
use crate::pipeline::{JobInput, Outcome, Pipeline};
use crate::process::ProcessRunner;
use crate::queue::SharedQueue;
use crate::settings::SettingsView;

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub cancelled: bool,
}

/// Stops the running batch. Cloneable and usable from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    queue: SharedQueue,
    token: Arc<Mutex<CancellationToken>>,
    runner: Arc<dyn ProcessRunner>,
}

impl CancelHandle {
    /// Request cancellation of the current batch. No-op when idle.
    pub fn cancel(&self) {
        {
            let mut queue = self.queue.lock();
            if !queue.is_processing() {
                debug!("Cancel requested with no batch running");
                return;
            }
            queue.set_cancelling(true);
            self.token.lock().cancel();
        }
        info!("Cancelling batch");
        self.runner.terminate();
    }
}

pub struct Orchestrator {
    queue: SharedQueue,
    pipeline: Arc<Pipeline>,
    settings: Arc<dyn SettingsView>,
    notifier: Arc<dyn Notifier>,
    token: Arc<Mutex<CancellationToken>>,
}

/// Clears the batch flags when a batch ends, including by panic
struct BatchGuard<'a> {
    orchestrator: &'a Orchestrator,
    finished: bool,
}

impl BatchGuard<'_> {
    fn finish(mut self) -> bool {
        self.finished = true;
        self.orchestrator.end_batch()
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Batch aborted unexpectedly");
            self.orchestrator.end_batch();
        }
    }
}

impl Orchestrator {
    pub fn new(
        queue: SharedQueue,
        pipeline: Arc<Pipeline>,
        settings: Arc<dyn SettingsView>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            pipeline,
            settings,
            notifier,
            token: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            queue: self.queue.clone(),
            token: self.token.clone(),
            runner: self.pipeline.runner().clone(),
        }
    }

    /// Process every eligible job until none remain or the batch is
    /// cancelled. Returns `None` if a batch is already running.
    ///
    /// Eligible means `queued`, or in reprocess-all mode any job not yet
    /// visited in this batch. Only jobs present when the batch starts take
    /// part.
    pub fn process_all(&self) -> Option<BatchReport> {
        let (token, guard) = self.begin_batch()?;

        let members: HashSet<JobId> = self.queue.lock().jobs().iter().map(|j| j.id).collect();
        let reprocess_all = self.settings.reprocess_all();
        let mut visited = HashSet::new();
        let mut summary = BatchSummary::default();

        info!("Batch started: {} job(s), reprocess_all={}", members.len(), reprocess_all);

        'batch: loop {
            let pass = self.eligible(&members, &visited, reprocess_all);
            if pass.is_empty() {
                break;
            }

            for id in pass {
                if token.is_cancelled() {
                    break 'batch;
                }
                let still_eligible = self
                    .queue
                    .lock()
                    .get(id)
                    .map(|j| reprocess_all || j.status() == JobStatus::Queued)
                    .unwrap_or(false);
                if !still_eligible {
                    continue;
                }
                visited.insert(id);
                if let Some(status) = self.run_job(id, &token) {
                    summary.record(status);
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        Some(self.end(guard, summary))
    }

    /// Process exactly `ids` in display order, whatever their status.
    /// Returns `None` if a batch is already running.
    pub fn process_subset(&self, ids: &[JobId]) -> Option<BatchReport> {
        let (token, guard) = self.begin_batch()?;

        let wanted: HashSet<JobId> = ids.iter().copied().collect();
        let order: Vec<JobId> = self
            .queue
            .lock()
            .display_order()
            .into_iter()
            .filter(|id| wanted.contains(id))
            .collect();
        let mut summary = BatchSummary::default();

        info!("Reconverting {} job(s)", order.len());

        for id in order {
            if token.is_cancelled() {
                break;
            }
            if let Some(status) = self.run_job(id, &token) {
                summary.record(status);
            }
        }

        Some(self.end(guard, summary))
    }

    /// Ids eligible in display order at this moment
    fn eligible(&self, members: &HashSet<JobId>, visited: &HashSet<JobId>, reprocess_all: bool) -> Vec<JobId> {
        let queue = self.queue.lock();
        queue
            .display_order()
            .into_iter()
            .filter(|id| members.contains(id) && !visited.contains(id))
            .filter(|id| {
                queue
                    .get(*id)
                    .map(|j| reprocess_all || j.status() == JobStatus::Queued)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Run one job. Returns its final status, or `None` if it was removed
    /// before it could start or the run was cancelled.
    fn run_job(&self, id: JobId, token: &CancellationToken) -> Option<JobStatus> {
        let (input, name) = {
            let mut queue = self.queue.lock();
            let job = queue.begin_job(id)?;
            (JobInput::from_job(&job, self.settings.as_ref()), job.display_name)
        };

        let span = info_span!("job", id = %id, file = %name);
        let _enter = span.enter();

        let queue = &self.queue;
        let mut progress = |fraction: f32| queue.lock().update_progress(id, fraction);

        match self.pipeline.run(&input, token, &mut progress) {
            Ok(report) => {
                let (status, message) = match report.outcome {
                    Outcome::Completed => (JobStatus::Completed, None),
                    Outcome::Warning(message) => (JobStatus::Warning, Some(message)),
                };
                let mut queue = self.queue.lock();
                queue.store_shot_info(id, &report.shot);
                queue.finish_job(id, status, message);
                info!("Job {}", status.as_str());
                Some(status)
            }
            Err(e) if e.is_cancelled() => {
                self.queue.lock().finish_job(id, JobStatus::Queued, None);
                info!("Job cancelled, reset to queued");
                None
            }
            Err(e) => {
                error!("Job failed: {}", e);
                self.queue.lock().finish_job(id, JobStatus::Failed, Some(e.to_string()));
                Some(JobStatus::Failed)
            }
        }
    }

    fn begin_batch(&self) -> Option<(CancellationToken, BatchGuard<'_>)> {
        let mut queue = self.queue.lock();
        if queue.is_processing() {
            warn!("Batch already running");
            return None;
        }
        queue.set_processing(true);
        self.pipeline.runner().clear_terminate();
        let token = self.token.lock().clone();

        Some((
            token,
            BatchGuard {
                orchestrator: self,
                finished: false,
            },
        ))
    }

    fn end(&self, guard: BatchGuard<'_>, summary: BatchSummary) -> BatchReport {
        let cancelled = guard.finish();
        if cancelled {
            info!("Batch cancelled after {} job(s)", summary.total);
        } else {
            self.notifier.batch_finished(&summary);
        }
        BatchReport { summary, cancelled }
    }

    /// Clear the processing flag; on cancellation also reset the cancelling
    /// flag and arm a fresh token. Returns whether the batch was cancelled.
    fn end_batch(&self) -> bool {
        let mut queue = self.queue.lock();
        queue.set_processing(false);

        let mut token = self.token.lock();
        let cancelled = queue.is_cancelling() || token.is_cancelled();
        if cancelled {
            queue.set_cancelling(false);
            *token = CancellationToken::new();
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::job::Job;
    use crate::process::{ExitKind, ProcessOutput};
    use crate::profiles::ProfileResolver;
    use crate::queue::JobQueue;
    use crate::settings::Config;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Converter writes its output, exiftool always fails to read
    #[derive(Default)]
    struct CountingRunner {
        conversions: AtomicUsize,
        clears: AtomicUsize,
    }

    impl ProcessRunner for CountingRunner {
        fn run(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<ProcessOutput> {
            let exit = if program == Path::new("conv") {
                self.conversions.fetch_add(1, Ordering::SeqCst);
                let source = Path::new(args.last().unwrap());
                let name = source.file_name().unwrap().to_string_lossy();
                std::fs::write(working_dir.join(format!("{}.dng", name)), b"DNG").unwrap();
                ExitKind::Exited(0)
            } else if args.first().map(String::as_str) == Some("-j") {
                ExitKind::Exited(1)
            } else {
                ExitKind::Exited(0)
            };
            Ok(ProcessOutput {
                exit,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        fn terminate(&self) {}

        fn clear_terminate(&self) {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn batch_finished(&self, _summary: &BatchSummary) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(dir: &Path, files: usize, config: Config) -> (Orchestrator, Arc<CountingRunner>, Arc<CountingNotifier>) {
        let mut queue = JobQueue::new();
        for i in 0..files {
            let path: PathBuf = dir.join(format!("IMG{}.X3F", i));
            std::fs::write(&path, b"raw").unwrap();
            queue.push_job(Job::new(path));
        }

        let runner = Arc::new(CountingRunner::default());
        let notifier = Arc::new(CountingNotifier::default());
        let pipeline = Pipeline::new(runner.clone(), ProfileResolver::new(dir), "conv", "exif");
        let orchestrator = Orchestrator::new(queue.shared(), Arc::new(pipeline), Arc::new(config), notifier.clone());
        (orchestrator, runner, notifier)
    }

    #[test]
    fn test_process_all_and_flags() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, runner, notifier) = setup(dir.path(), 3, Config::default());

        let report = orchestrator.process_all().unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.warning, 3);
        assert_eq!(runner.conversions.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert!(!orchestrator.queue().lock().is_processing());

        // Nothing left to do
        let report = orchestrator.process_all().unwrap();
        assert_eq!(report.summary.total, 0);
        assert_eq!(runner.conversions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reprocess_all_visits_each_job_once() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            reprocess_all: true,
            ..Config::default()
        };
        let (orchestrator, runner, _) = setup(dir.path(), 5, config);

        {
            let mut queue = orchestrator.queue().lock();
            let ids: Vec<JobId> = queue.jobs().iter().map(|j| j.id).collect();
            for id in ids {
                queue.finish_job(id, JobStatus::Completed, None);
            }
        }

        let report = orchestrator.process_all().unwrap();
        assert_eq!(report.summary.total, 5);
        assert_eq!(runner.conversions.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_busy_queue_rejects_second_batch() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _, notifier) = setup(dir.path(), 1, Config::default());

        orchestrator.queue().lock().set_processing(true);
        assert!(orchestrator.process_all().is_none());
        assert!(orchestrator.process_subset(&[]).is_none());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_batch_start_clears_pending_terminate() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, runner, _) = setup(dir.path(), 1, Config::default());

        orchestrator.process_all().unwrap();
        assert_eq!(runner.clears.load(Ordering::SeqCst), 1);
        orchestrator.process_subset(&[]).unwrap();
        assert_eq!(runner.clears.load(Ordering::SeqCst), 2);

        orchestrator.queue().lock().set_processing(true);
        assert!(orchestrator.process_all().is_none());
        assert_eq!(runner.clears.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, runner, _) = setup(dir.path(), 2, Config::default());

        orchestrator.cancel_handle().cancel();
        assert!(!orchestrator.queue().lock().is_cancelling());

        let report = orchestrator.process_all().unwrap();
        assert!(!report.cancelled);
        assert_eq!(runner.conversions.load(Ordering::SeqCst), 2);
    }
}
