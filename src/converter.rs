//! RAW converter command wrapper
//!
//! Builds the argument list for the converter from [`EffectiveSettings`] and
//! knows how the converter names its output files.

use std::path::{Path, PathBuf};

use crate::error::{ConversionError, Result};
use crate::process::{ProcessOutput, ProcessRunner};
use crate::settings::{EffectiveSettings, OutputFormat};

/// Acceleration flag understood by the converter
pub const FAST_FLAG: &str = "-ocl";

pub struct ConverterCommand {
    args: Vec<String>,
}

impl ConverterCommand {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Arguments for one conversion, without the trailing source path
    pub fn from_settings(settings: &EffectiveSettings) -> Self {
        let mut cmd = Self::new().output_dir(&settings.output_dir);

        if !settings.denoise {
            cmd = cmd.arg("-no-denoise");
        }
        if settings.compress && settings.format.supports_compression() {
            cmd = cmd.arg("-compress");
        }
        if settings.faster_processing {
            cmd = cmd.arg(FAST_FLAG);
        }
        if let Some(flag) = settings.format.converter_flag() {
            cmd = cmd.arg(flag);
        }
        if let Some(name) = settings.color_profile.converter_name() {
            cmd = cmd.args(&["-color", name]);
        }

        cmd
    }

    pub fn output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.args.push("-o".to_string());
        self.args.push(dir.as_ref().display().to_string());
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Source path goes last
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn as_args(&self) -> &[String] {
        &self.args
    }

    /// Run the converter with `working_dir` as its current directory.
    ///
    /// A terminated child maps to `ConversionCancelled`, any other non-zero
    /// exit to `ConversionFailed` carrying stderr.
    pub fn execute(
        self,
        runner: &dyn ProcessRunner,
        program: &Path,
        working_dir: &Path,
        source: &Path,
    ) -> Result<ProcessOutput> {
        let output = runner.run(program, &self.args, working_dir)?;

        if output.was_terminated() {
            return Err(ConversionError::ConversionCancelled {
                source_path: source.to_path_buf(),
            });
        }
        if !output.success() {
            return Err(ConversionError::ConversionFailed {
                exit_code: output.exit_code(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }
}

impl Default for ConverterCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// File the converter writes: the full source filename plus the new
/// extension (`shot.X3F` → `shot.X3F.dng`)
pub fn converter_output_path(source: &Path, output_dir: &Path, format: OutputFormat) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    output_dir.join(format!("{}.{}", file_name, format.extension()))
}

/// Final output location. Primary-format outputs are renamed to
/// `<basename>.<ext>`; the other formats keep the converter's name.
pub fn final_output_path(source: &Path, output_dir: &Path, format: OutputFormat) -> PathBuf {
    if format.is_primary() {
        let stem = source
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        output_dir.join(format!("{}.{}", stem, format.extension()))
    } else {
        converter_output_path(source, output_dir, format)
    }
}
