//! Conversion step pipeline
//!
//! Runs the seven ordered steps for one job:
//!
//! 1. ensure the output directory
//! 2. read shot info (exiftool, filename heuristic on failure)
//! 3. run the converter
//! 4. primary format only: resolve a correction profile and merge metadata
//! 5. validate the output file
//! 6. fix output permissions (best effort)
//! 7. primary format only: rename `shot.X3F.dng` to `shot.dng`
//!
//! The cancellation token is checked before every step and again after each
//! external tool returns. Once the converter has been started, a run that
//! fails or is cancelled removes the in-flight artifacts before returning
//! its error.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let pipeline = Pipeline::from_config(Arc::new(SystemRunner::new()), &config);
//! let input = JobInput::from_job(&job, &config);
//! let report = pipeline.run(&input, &token, &mut |p| println!("{:.0}%", p * 100.0))?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::converter::{self, ConverterCommand};
use crate::error::{ConversionError, Result};
use crate::exiftool::{self, ExifTool};
use crate::job::Job;
use crate::metadata::{self, ShotInfo};
use crate::process::ProcessRunner;
use crate::profiles::ProfileResolver;
use crate::settings::{Config, EffectiveSettings, SettingsView};
use crate::validation;

pub const STEP_COUNT: usize = 7;

/// Snapshot of everything a run reads from its job
#[derive(Debug, Clone)]
pub struct JobInput {
    pub source: PathBuf,
    pub settings: EffectiveSettings,
    /// Values already on the job; they win over extracted ones
    pub stored: ShotInfo,
}

impl JobInput {
    pub fn from_job(job: &Job, settings: &dyn SettingsView) -> Self {
        Self {
            source: job.source_path.clone(),
            settings: job.effective_settings(settings),
            stored: job.metadata.shot_info(),
        }
    }

    pub fn converter_output(&self) -> PathBuf {
        converter::converter_output_path(&self.source, &self.settings.output_dir, self.settings.format)
    }

    pub fn final_output(&self) -> PathBuf {
        converter::final_output_path(&self.source, &self.settings.output_dir, self.settings.format)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Converted without a correction profile
    Warning(String),
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub outcome: Outcome,
    /// Shot info used for this run
    pub shot: ShotInfo,
    pub output_path: PathBuf,
    pub output_size: u64,
}

pub struct Pipeline {
    runner: Arc<dyn ProcessRunner>,
    resolver: ProfileResolver,
    converter_path: PathBuf,
    exiftool_path: PathBuf,
}

impl Pipeline {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        resolver: ProfileResolver,
        converter_path: impl Into<PathBuf>,
        exiftool_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            resolver,
            converter_path: converter_path.into(),
            exiftool_path: exiftool_path.into(),
        }
    }

    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &Config) -> Self {
        Self::new(
            runner,
            ProfileResolver::new(&config.profile_dir),
            &config.converter_path,
            &config.exiftool_path,
        )
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    /// Run every step for one job. `progress` receives the completed
    /// fraction after each step.
    pub fn run(
        &self,
        input: &JobInput,
        token: &CancellationToken,
        progress: &mut dyn FnMut(f32),
    ) -> Result<JobReport> {
        let mut converter_started = false;
        let result = self.run_steps(input, token, progress, &mut converter_started);

        if result.is_err() && converter_started {
            self.cleanup_partial(input);
        }
        result
    }

    fn run_steps(
        &self,
        input: &JobInput,
        token: &CancellationToken,
        progress: &mut dyn FnMut(f32),
        converter_started: &mut bool,
    ) -> Result<JobReport> {
        let source = input.source.as_path();
        let settings = &input.settings;
        let exiftool = ExifTool::new(self.runner.as_ref(), &self.exiftool_path);

        // 1. Output directory
        checkpoint(token, source)?;
        validation::ensure_output_dir(&settings.output_dir)?;
        report_step(progress, 1);

        // 2. Shot info
        checkpoint(token, source)?;
        let extracted = match exiftool.read_shot_info(source) {
            Ok(shot) => shot,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("Metadata read failed, guessing from filename: {}", e);
                metadata::guess_from_filename(source)
            }
        };
        let shot = input.stored.clone().or(extracted);
        debug!(
            "Shot info: model={:?} lens={:?} aperture={:?}",
            shot.camera_model, shot.lens_id, shot.aperture
        );
        report_step(progress, 2);

        // 3. Converter
        checkpoint(token, source)?;
        let command = ConverterCommand::from_settings(settings).input(source);
        debug!("Converter args: {:?}", command.as_args());
        *converter_started = true;
        command.execute(
            self.runner.as_ref(),
            &self.converter_path,
            &settings.output_dir,
            source,
        )?;
        checkpoint(token, source)?;
        report_step(progress, 3);

        let converted = input.converter_output();

        // 4. Profile and metadata merge
        checkpoint(token, source)?;
        let mut outcome = Outcome::Completed;
        if settings.format.is_primary() {
            let profile = self.resolve_profile(&shot);
            match &profile {
                Some(path) => info!("Applying correction profile {}", path.display()),
                None => {
                    let message = missing_profile_message(&shot);
                    warn!("{}", message);
                    outcome = Outcome::Warning(message);
                }
            }
            exiftool.write_metadata(source, &converted, profile.as_deref())?;
            checkpoint(token, source)?;
        }
        report_step(progress, 4);

        // 5. Validation
        checkpoint(token, source)?;
        let output_size = validation::validate_output(&converted)?;
        report_step(progress, 5);

        // 6. Permissions
        checkpoint(token, source)?;
        validation::fix_permissions(&converted);
        report_step(progress, 6);

        // 7. Rename
        checkpoint(token, source)?;
        let output_path = input.final_output();
        if output_path != converted {
            if output_path.exists() {
                std::fs::remove_file(&output_path)?;
            }
            std::fs::rename(&converted, &output_path)?;
        }
        report_step(progress, 7);

        info!("Converted {} -> {}", source.display(), output_path.display());

        Ok(JobReport {
            outcome,
            shot,
            output_path,
            output_size,
        })
    }

    fn resolve_profile(&self, shot: &ShotInfo) -> Option<PathBuf> {
        let model = shot.camera_model.as_deref()?;
        let aperture = shot.aperture.as_deref()?;
        self.resolver.resolve(model, shot.lens_id.as_deref(), aperture)
    }

    /// Remove the converter output and the metadata tool's temp file for a
    /// failed or interrupted run. The final output of an earlier run is left
    /// alone.
    pub fn cleanup_partial(&self, input: &JobInput) {
        let converted = input.converter_output();
        let tmp = exiftool::temp_path(&converted);

        for path in [converted, tmp] {
            if path.exists() {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("Removed partial output {}", path.display()),
                    Err(e) => warn!("Could not remove {}: {}", path.display(), e),
                }
            }
        }
    }
}

fn report_step(progress: &mut dyn FnMut(f32), done: usize) {
    progress(done as f32 / STEP_COUNT as f32);
}

fn checkpoint(token: &CancellationToken, source: &Path) -> Result<()> {
    if token.is_cancelled() {
        return Err(ConversionError::ConversionCancelled {
            source_path: source.to_path_buf(),
        });
    }
    Ok(())
}

fn missing_profile_message(shot: &ShotInfo) -> String {
    format!(
        "No correction profile for {} (lens {}, f/{})",
        shot.camera_model.as_deref().unwrap_or("unknown camera"),
        shot.lens_id.as_deref().unwrap_or("-"),
        shot.aperture.as_deref().unwrap_or("?"),
    )
}
