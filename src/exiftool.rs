//! exiftool contract
//!
//! Two invocations are used:
//!
//! - **read**: `exiftool -j -n -Model -LensType -LensID -FNumber <src>`,
//!   parsed from JSON into [`ShotInfo`]
//! - **write**: `exiftool -overwrite_original -TagsFromFile <src> -all:all
//!   [-OpcodeList3<=<profile>] <dst>`, copying every tag and optionally
//!   injecting the correction profile in one call

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConversionError, Result};
use crate::metadata::{format_aperture, ShotInfo};
use crate::process::{ProcessOutput, ProcessRunner};

pub struct ExifTool<'a> {
    runner: &'a dyn ProcessRunner,
    program: &'a Path,
}

impl<'a> ExifTool<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, program: &'a Path) -> Self {
        Self { runner, program }
    }

    /// Read camera model, lens id and aperture from `source`
    pub fn read_shot_info(&self, source: &Path) -> Result<ShotInfo> {
        let args = vec![
            "-j".to_string(),
            "-n".to_string(),
            "-Model".to_string(),
            "-LensType".to_string(),
            "-LensID".to_string(),
            "-FNumber".to_string(),
            source.display().to_string(),
        ];

        let output = self.invoke(&args, working_dir_of(source), source)?;
        parse_shot_info(&output.stdout).map_err(|detail| ConversionError::MetadataProcessingFailed {
            path: source.to_path_buf(),
            detail,
        })
    }

    /// Copy all tags from `source` into `target` in place, injecting
    /// `profile` as OpcodeList3 when given
    pub fn write_metadata(&self, source: &Path, target: &Path, profile: Option<&Path>) -> Result<()> {
        let args = write_args(source, target, profile);
        self.invoke(&args, working_dir_of(target), target)?;
        Ok(())
    }

    fn invoke(&self, args: &[String], working_dir: &Path, subject: &Path) -> Result<ProcessOutput> {
        let output = self.runner.run(self.program, args, working_dir)?;

        if output.was_terminated() {
            return Err(ConversionError::ConversionCancelled {
                source_path: subject.to_path_buf(),
            });
        }
        if !output.success() {
            return Err(ConversionError::MetadataProcessingFailed {
                path: subject.to_path_buf(),
                detail: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }
}

fn working_dir_of(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

pub fn write_args(source: &Path, target: &Path, profile: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-overwrite_original".to_string(),
        "-TagsFromFile".to_string(),
        source.display().to_string(),
        "-all:all".to_string(),
    ];
    if let Some(profile) = profile {
        args.push(format!("-OpcodeList3<={}", profile.display()));
    }
    args.push(target.display().to_string());
    args
}

/// Temp file exiftool leaves behind when interrupted mid-write
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push("_exiftool_tmp");
    PathBuf::from(name)
}

/// Parse `exiftool -j -n` output
pub fn parse_shot_info(json_str: &str) -> std::result::Result<ShotInfo, String> {
    let parsed: Vec<HashMap<String, Value>> =
        serde_json::from_str(json_str).map_err(|e| format!("JSON parse error: {}", e))?;

    let tags = parsed
        .into_iter()
        .next()
        .ok_or_else(|| "No metadata found".to_string())?;

    let get_str = |key: &str| -> Option<String> {
        tags.get(key).and_then(|v| match v {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        })
    };

    let aperture = tags
        .get("FNumber")
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .filter(|f| *f > 0.0)
        .map(format_aperture);

    Ok(ShotInfo {
        camera_model: get_str("Model"),
        lens_id: get_str("LensType").or_else(|| get_str("LensID")),
        aperture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shot_info_numeric() {
        let json = r#"[{"SourceFile": "a.X3F", "Model": "SIGMA sd Quattro H", "LensType": 32776, "FNumber": 2.8}]"#;
        let info = parse_shot_info(json).unwrap();
        assert_eq!(info.camera_model.as_deref(), Some("SIGMA sd Quattro H"));
        assert_eq!(info.lens_id.as_deref(), Some("32776"));
        assert_eq!(info.aperture.as_deref(), Some("2.8"));
    }

    #[test]
    fn test_parse_shot_info_text_fields() {
        let json = r#"[{"Model": "SIGMA DP2 Merrill", "LensID": "Sigma 30mm F2.8 (32776)", "FNumber": "4"}]"#;
        let info = parse_shot_info(json).unwrap();
        assert_eq!(info.lens_id.as_deref(), Some("Sigma 30mm F2.8 (32776)"));
        assert_eq!(info.aperture.as_deref(), Some("4.0"));
    }

    #[test]
    fn test_parse_shot_info_errors() {
        assert!(parse_shot_info("[]").is_err());
        assert!(parse_shot_info("not json").is_err());
        assert_eq!(parse_shot_info("[{}]").unwrap(), ShotInfo::default());
    }

    #[test]
    fn test_write_args() {
        let args = write_args(
            Path::new("/raw/a.X3F"),
            Path::new("/out/a.X3F.dng"),
            Some(Path::new("/opcodes/DP2M_FF_DNG_Opcodelist3_2.8")),
        );
        assert_eq!(
            args,
            vec![
                "-overwrite_original",
                "-TagsFromFile",
                "/raw/a.X3F",
                "-all:all",
                "-OpcodeList3<=/opcodes/DP2M_FF_DNG_Opcodelist3_2.8",
                "/out/a.X3F.dng",
            ]
        );

        let args = write_args(Path::new("a.X3F"), Path::new("a.X3F.dng"), None);
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/out/a.X3F.dng")),
            PathBuf::from("/out/a.X3F.dng_exiftool_tmp")
        );
    }
}
