//! raw_batch - batch RAW conversion orchestration
//!
//! Queues camera RAW files, converts them one at a time through an external
//! converter, merges metadata and applies per-camera correction profiles
//! through exiftool. Both tools are shelled out to; nothing is linked.

pub mod converter;
pub mod edit;
pub mod error;
pub mod exiftool;
pub mod job;
pub mod metadata;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod profiles;
pub mod queue;
pub mod settings;
pub mod validation;

pub use edit::{EditHistory, FieldChange, MetadataField};
pub use error::{ConversionError, QueueError, QueueResult, Result};
pub use job::{Job, JobId, JobOverrides, JobStatus};
pub use metadata::{CameraMetadata, ShotInfo};
pub use notify::{BatchSummary, Notifier, TracingNotifier};
pub use orchestrator::{BatchReport, CancelHandle, Orchestrator};
pub use pipeline::{JobInput, JobReport, Outcome, Pipeline};
pub use process::{ExitKind, ProcessOutput, ProcessRunner, SystemRunner};
pub use profiles::ProfileResolver;
pub use queue::{JobQueue, SharedQueue, SortField, SortOrder, StatusCounts};
pub use settings::{ColorProfile, Config, EffectiveSettings, OutputFormat, OutputLocation, SettingsView};
