//! Job queue
//!
//! The single shared mutable state of a conversion session. Storage order is
//! insertion order; the display order is a derived sort that never reorders
//! storage. Status and progress are written by the orchestrator only, through
//! the crate-private methods at the bottom of this file.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::edit::{EditHistory, FieldChange, MetadataField};
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobOverrides, JobStatus};
use crate::metadata::{self, ShotInfo};
use crate::settings::SettingsView;

/// Source extensions accepted into the queue (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["x3f"];

pub type SharedQueue = Arc<Mutex<JobQueue>>;

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Key used for duplicate detection: the canonical path when it resolves,
/// the path as given otherwise
fn identity(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortField {
    /// Insertion order
    #[default]
    Added,
    Name,
    Size,
    CaptureTime,
    Status,
    CameraModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

fn status_rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Processing => 0,
        JobStatus::Queued => 1,
        JobStatus::Warning => 2,
        JobStatus::Failed => 3,
        JobStatus::Completed => 4,
    }
}

impl SortField {
    fn compare(&self, a: &Job, b: &Job) -> Ordering {
        match self {
            SortField::Added => Ordering::Equal,
            SortField::Name => a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()),
            SortField::Size => a.metadata.file_size.cmp(&b.metadata.file_size),
            SortField::CaptureTime => a.metadata.capture_time.cmp(&b.metadata.capture_time),
            SortField::Status => status_rank(a.status()).cmp(&status_rank(b.status())),
            SortField::CameraModel => a.metadata.camera_model.cmp(&b.metadata.camera_model),
        }
    }
}

/// Per-status job counts, computed on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub warning: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed + self.warning
    }
}

#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
    selected: HashSet<JobId>,
    processing: bool,
    cancelling: bool,
    history: EditHistory,
    sort_field: SortField,
    sort_order: SortOrder,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedQueue {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Queue every supported, not-yet-queued file among `paths`.
    /// Returns the ids of the jobs created.
    pub fn add_paths<I>(&mut self, paths: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut added = Vec::new();
        let mut seen: HashSet<PathBuf> = self.jobs.iter().map(|j| identity(&j.source_path)).collect();

        for path in paths {
            if !is_supported(&path) {
                debug!("Skipping unsupported file {}", path.display());
                continue;
            }
            if !seen.insert(identity(&path)) {
                debug!("Already queued: {}", path.display());
                continue;
            }

            match metadata::capture_file_info(&path) {
                Ok(meta) => {
                    let job = Job::new(path).with_metadata(meta);
                    added.push(self.push_job(job));
                }
                Err(e) => warn!("Cannot queue {}: {}", path.display(), e),
            }
        }

        if !added.is_empty() {
            info!("Queued {} file(s)", added.len());
        }
        added
    }

    /// Insert a prepared job as-is
    pub fn push_job(&mut self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.push(job);
        id
    }

    /// Remove the given jobs; others are untouched
    pub fn remove(&mut self, ids: &[JobId]) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|j| !ids.contains(&j.id));
        for id in ids {
            self.selected.remove(id);
        }
        before - self.jobs.len()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
        self.selected.clear();
        self.history.clear();
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// Jobs in storage (insertion) order
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    // ------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for job in &self.jobs {
            match job.status() {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Warning => counts.warning += 1,
            }
        }
        counts
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status() == status).count()
    }

    /// Mean over jobs of 1.0 (completed), the in-flight fraction
    /// (processing) or 0.0 (anything else). 0.0 for an empty queue.
    pub fn aggregate_progress(&self) -> f32 {
        if self.jobs.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .jobs
            .iter()
            .map(|j| match j.status() {
                JobStatus::Completed => 1.0,
                JobStatus::Processing => j.progress(),
                _ => 0.0,
            })
            .sum();
        sum / self.jobs.len() as f32
    }

    pub fn set_sort(&mut self, field: SortField, order: SortOrder) {
        self.sort_field = field;
        self.sort_order = order;
    }

    pub fn sort(&self) -> (SortField, SortOrder) {
        (self.sort_field, self.sort_order)
    }

    /// Snapshot of job ids in display order. Ties keep insertion order.
    pub fn display_order(&self) -> Vec<JobId> {
        let mut refs: Vec<&Job> = self.jobs.iter().collect();
        let field = self.sort_field;
        match self.sort_order {
            SortOrder::Ascending => refs.sort_by(|a, b| field.compare(a, b)),
            SortOrder::Descending => refs.sort_by(|a, b| field.compare(b, a)),
        }
        refs.into_iter().map(|j| j.id).collect()
    }

    /// Jobs whose output file is already on disk (asks before reconverting)
    pub fn jobs_with_existing_output(&self, settings: &dyn SettingsView) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|j| j.output_path(settings).exists())
            .map(|j| j.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn select(&mut self, id: JobId) {
        if self.get(id).is_some() {
            self.selected.insert(id);
        }
    }

    pub fn deselect(&mut self, id: JobId) {
        self.selected.remove(&id);
    }

    pub fn select_all(&mut self) {
        self.selected = self.jobs.iter().map(|j| j.id).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: JobId) -> bool {
        self.selected.contains(&id)
    }

    /// Selected ids in display order
    pub fn selected(&self) -> Vec<JobId> {
        self.display_order()
            .into_iter()
            .filter(|id| self.selected.contains(id))
            .collect()
    }

    // ------------------------------------------------------------------
    // User edits
    // ------------------------------------------------------------------

    /// Set `field` to `value` on every job in `ids` as one undoable unit.
    /// Jobs being processed are rejected and nothing is changed.
    pub fn edit_metadata(&mut self, ids: &[JobId], field: MetadataField, value: Option<&str>) -> QueueResult<()> {
        let new = field.normalize(value)?;

        for id in ids {
            let job = self.get(*id).ok_or(QueueError::UnknownJob(*id))?;
            if job.status() == JobStatus::Processing {
                return Err(QueueError::JobBusy(*id));
            }
        }

        let mut unit = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_mut(*id) {
                let old = field.get(&job.metadata);
                field.set(&mut job.metadata, new.clone());
                unit.push(FieldChange {
                    job: *id,
                    field: field.clone(),
                    old,
                    new: new.clone(),
                });
            }
        }

        debug!("Edited {} on {} job(s)", field, unit.len());
        self.history.record(unit);
        Ok(())
    }

    pub fn edit_selected(&mut self, field: MetadataField, value: Option<&str>) -> QueueResult<()> {
        let ids = self.selected();
        self.edit_metadata(&ids, field, value)
    }

    /// Revert the last edit unit. Returns `Ok(false)` when there is nothing
    /// to undo. A unit touching a job being processed is refused whole and
    /// stays on the stack.
    pub fn undo(&mut self) -> QueueResult<bool> {
        if let Some(unit) = self.history.peek_undo() {
            self.check_not_busy(unit)?;
        }
        let Some(unit) = self.history.take_undo() else {
            return Ok(false);
        };
        for change in unit.iter().rev() {
            if let Some(job) = self.get_mut(change.job) {
                change.field.set(&mut job.metadata, change.old.clone());
            }
        }
        Ok(true)
    }

    /// Reapply the last undone unit, with the same busy rule as `undo`
    pub fn redo(&mut self) -> QueueResult<bool> {
        if let Some(unit) = self.history.peek_redo() {
            self.check_not_busy(unit)?;
        }
        let Some(unit) = self.history.take_redo() else {
            return Ok(false);
        };
        for change in &unit {
            if let Some(job) = self.get_mut(change.job) {
                change.field.set(&mut job.metadata, change.new.clone());
            }
        }
        Ok(true)
    }

    fn check_not_busy(&self, unit: &[FieldChange]) -> QueueResult<()> {
        for change in unit {
            if self.get(change.job).map(|j| j.status()) == Some(JobStatus::Processing) {
                return Err(QueueError::JobBusy(change.job));
            }
        }
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn set_overrides(&mut self, id: JobId, overrides: JobOverrides) -> QueueResult<()> {
        let job = self.get_mut(id).ok_or(QueueError::UnknownJob(id))?;
        if job.status() == JobStatus::Processing {
            return Err(QueueError::JobBusy(id));
        }
        job.overrides = overrides;
        Ok(())
    }

    /// Explicit reconversion: move terminal jobs back to `queued`.
    /// Returns the ids that changed.
    pub fn requeue(&mut self, ids: &[JobId]) -> Vec<JobId> {
        let mut changed = Vec::new();
        for id in ids {
            if let Some(job) = self.get_mut(*id) {
                if job.status().is_terminal() {
                    job.set_status(JobStatus::Queued, None);
                    changed.push(*id);
                }
            }
        }
        changed
    }

    // ------------------------------------------------------------------
    // Batch flags
    // ------------------------------------------------------------------

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling
    }

    pub(crate) fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }

    pub(crate) fn set_cancelling(&mut self, cancelling: bool) {
        self.cancelling = cancelling;
    }

    // ------------------------------------------------------------------
    // Orchestrator writes
    // ------------------------------------------------------------------

    /// Move a job to `processing` (via `queued` if it was terminal) and
    /// return a snapshot of it
    pub(crate) fn begin_job(&mut self, id: JobId) -> Option<Job> {
        let job = self.get_mut(id)?;
        if job.status().is_terminal() {
            job.set_status(JobStatus::Queued, None);
        }
        job.set_status(JobStatus::Processing, None);
        Some(job.clone())
    }

    pub(crate) fn update_progress(&mut self, id: JobId, fraction: f32) {
        if let Some(job) = self.get_mut(id) {
            job.set_progress(fraction);
        }
    }

    pub(crate) fn finish_job(&mut self, id: JobId, status: JobStatus, message: Option<String>) {
        if let Some(job) = self.get_mut(id) {
            job.set_status(status, message);
        }
    }

    pub(crate) fn store_shot_info(&mut self, id: JobId, shot: &ShotInfo) {
        if let Some(job) = self.get_mut(id) {
            job.metadata.fill_missing(shot);
        }
    }
}
