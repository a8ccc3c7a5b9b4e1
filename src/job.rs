//! Queued conversion jobs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::converter;
use crate::metadata::CameraMetadata;
use crate::settings::{ColorProfile, EffectiveSettings, OutputFormat, SettingsView};

/// Stable job identity, independent of the source path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Converted, but without a correction profile
    Warning,
}

impl JobStatus {
    /// Terminal for a run; re-enterable through explicit reconversion
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Warning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Warning => "warning",
        }
    }
}

/// Per-job settings; `None` falls back to the global value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOverrides {
    pub format: Option<OutputFormat>,
    pub compress: Option<bool>,
    pub denoise: Option<bool>,
    pub faster_processing: Option<bool>,
    pub color_profile: Option<ColorProfile>,
}

/// One queued source file and its conversion state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_path: PathBuf,
    pub display_name: String,
    status: JobStatus,
    progress: f32,
    /// Error text for `failed`, warning text for `warning`
    pub message: Option<String>,
    pub overrides: JobOverrides,
    pub metadata: CameraMetadata,
}

impl Job {
    pub fn new(source_path: PathBuf) -> Self {
        let display_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_path.display().to_string());

        Self {
            id: JobId::new(),
            source_path,
            display_name,
            status: JobStatus::Queued,
            progress: 0.0,
            message: None,
            overrides: JobOverrides::default(),
            metadata: CameraMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: CameraMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn source(&self) -> &Path {
        &self.source_path
    }

    /// Move to `status`, keeping `progress == 1.0` exactly when completed
    pub(crate) fn set_status(&mut self, status: JobStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.progress = if status == JobStatus::Completed { 1.0 } else { 0.0 };
    }

    /// In-flight progress; clamped below 1.0 and ignored unless processing
    pub(crate) fn set_progress(&mut self, fraction: f32) {
        if self.status == JobStatus::Processing {
            self.progress = fraction.clamp(0.0, 0.99);
        }
    }

    pub fn effective_settings(&self, settings: &dyn SettingsView) -> EffectiveSettings {
        EffectiveSettings::resolve(self, settings)
    }

    /// Where this job's converted file ends up. Recomputed on every call.
    pub fn output_path(&self, settings: &dyn SettingsView) -> PathBuf {
        let eff = self.effective_settings(settings);
        converter::final_output_path(&self.source_path, &eff.output_dir, eff.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Config, OutputLocation};

    #[test]
    fn test_progress_invariant() {
        let mut job = Job::new(PathBuf::from("/raw/a.X3F"));
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.progress(), 0.0);

        job.set_progress(0.5);
        assert_eq!(job.progress(), 0.0);

        job.set_status(JobStatus::Processing, None);
        job.set_progress(0.5);
        assert_eq!(job.progress(), 0.5);
        job.set_progress(1.0);
        assert!(job.progress() < 1.0);

        job.set_status(JobStatus::Completed, None);
        assert_eq!(job.progress(), 1.0);

        job.set_status(JobStatus::Warning, Some("no profile".to_string()));
        assert_ne!(job.progress(), 1.0);
        assert_eq!(job.message.as_deref(), Some("no profile"));
    }

    #[test]
    fn test_output_path_follows_settings() {
        let mut config = Config::default();
        let mut job = Job::new(PathBuf::from("/raw/shot.X3F"));
        assert_eq!(job.display_name, "shot.X3F");
        assert_eq!(job.output_path(&config), PathBuf::from("/raw/shot.dng"));

        config.output_location = OutputLocation::Subfolder("DNG".to_string());
        assert_eq!(job.output_path(&config), PathBuf::from("/raw/DNG/shot.dng"));

        job.overrides.format = Some(OutputFormat::Jpeg);
        assert_eq!(job.output_path(&config), PathBuf::from("/raw/DNG/shot.X3F.jpg"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Job::new(PathBuf::from("a.X3F"));
        let b = Job::new(PathBuf::from("a.X3F"));
        assert_ne!(a.id, b.id);
    }
}
