//! Conversion settings
//!
//! Global configuration lives in [`Config`], which can be loaded from a JSON
//! file and overridden from the command line. The pipeline never reads
//! `Config` directly: it sees a [`SettingsView`] and resolves per-job
//! overrides into [`EffectiveSettings`] at the moment a job is picked up.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::job::Job;

/// Output format produced by the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Lossless DNG carrying the full sensor data (primary format)
    #[default]
    Dng,
    /// Embedded JPEG preview
    Jpeg,
    /// TIFF rendering
    Tiff,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Dng => "dng",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Tiff => "tif",
        }
    }

    /// Converter flag selecting this format. The primary format is implicit.
    pub fn converter_flag(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Dng => None,
            OutputFormat::Jpeg => Some("-jpg"),
            OutputFormat::Tiff => Some("-tiff"),
        }
    }

    pub fn supports_compression(&self) -> bool {
        matches!(self, OutputFormat::Dng | OutputFormat::Tiff)
    }

    /// Only the primary format gets a correction profile and metadata merge,
    /// and only its output is renamed to `<basename>.<ext>`.
    pub fn is_primary(&self) -> bool {
        matches!(self, OutputFormat::Dng)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dng" => Ok(OutputFormat::Dng),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "tif" | "tiff" => Ok(OutputFormat::Tiff),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Output color space requested from the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorProfile {
    #[default]
    Default,
    Srgb,
    AdobeRgb,
    ProPhotoRgb,
}

impl ColorProfile {
    /// Name passed to `-color`, or `None` for the converter default.
    pub fn converter_name(&self) -> Option<&'static str> {
        match self {
            ColorProfile::Default => None,
            ColorProfile::Srgb => Some("sRGB"),
            ColorProfile::AdobeRgb => Some("AdobeRGB"),
            ColorProfile::ProPhotoRgb => Some("ProPhotoRGB"),
        }
    }
}

impl std::str::FromStr for ColorProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "default" | "none" => Ok(ColorProfile::Default),
            "srgb" => Ok(ColorProfile::Srgb),
            "adobergb" => Ok(ColorProfile::AdobeRgb),
            "prophotorgb" | "prophoto" => Ok(ColorProfile::ProPhotoRgb),
            other => Err(format!("unknown color profile: {}", other)),
        }
    }
}

/// Where converted files are written
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLocation {
    /// Next to the source file
    #[default]
    SourceFolder,
    /// A named subfolder of the source file's folder
    Subfolder(String),
    /// One fixed directory for every file
    Fixed(PathBuf),
}

impl OutputLocation {
    pub fn dir_for(&self, source: &Path) -> PathBuf {
        let parent = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        match self {
            OutputLocation::SourceFolder => parent,
            OutputLocation::Subfolder(name) => parent.join(name),
            OutputLocation::Fixed(dir) => dir.clone(),
        }
    }
}

/// Read-only view of the application settings consumed by the core
pub trait SettingsView: Send + Sync {
    fn output_dir_for(&self, source: &Path) -> PathBuf;
    fn output_format(&self) -> OutputFormat;
    fn compress(&self) -> bool;
    fn denoise(&self) -> bool;
    fn faster_processing(&self) -> bool;
    fn color_profile(&self) -> ColorProfile;
    /// Reprocess every job in `process_all`, not only queued ones
    fn reprocess_all(&self) -> bool;
}

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_location: OutputLocation,
    pub output_format: OutputFormat,
    pub compress: bool,
    pub denoise: bool,
    pub faster_processing: bool,
    pub color_profile: ColorProfile,
    pub reprocess_all: bool,

    /// RAW converter executable
    pub converter_path: PathBuf,
    /// Metadata tool executable
    pub exiftool_path: PathBuf,
    /// Directory holding `*_FF_DNG_Opcodelist3_*` correction profiles
    pub profile_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_location: OutputLocation::SourceFolder,
            output_format: OutputFormat::Dng,
            compress: false,
            denoise: true,
            faster_processing: false,
            color_profile: ColorProfile::Default,
            reprocess_all: false,
            converter_path: PathBuf::from("x3f_extract"),
            exiftool_path: PathBuf::from("exiftool"),
            profile_dir: PathBuf::from("opcodes"),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

impl SettingsView for Config {
    fn output_dir_for(&self, source: &Path) -> PathBuf {
        self.output_location.dir_for(source)
    }

    fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    fn compress(&self) -> bool {
        self.compress
    }

    fn denoise(&self) -> bool {
        self.denoise
    }

    fn faster_processing(&self) -> bool {
        self.faster_processing
    }

    fn color_profile(&self) -> ColorProfile {
        self.color_profile
    }

    fn reprocess_all(&self) -> bool {
        self.reprocess_all
    }
}

/// Settings for one job: the per-job override if present, else the global value
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub compress: bool,
    pub denoise: bool,
    pub faster_processing: bool,
    pub color_profile: ColorProfile,
}

impl EffectiveSettings {
    pub fn resolve(job: &Job, settings: &dyn SettingsView) -> Self {
        let o = &job.overrides;
        Self {
            output_dir: settings.output_dir_for(&job.source_path),
            format: o.format.unwrap_or_else(|| settings.output_format()),
            compress: o.compress.unwrap_or_else(|| settings.compress()),
            denoise: o.denoise.unwrap_or_else(|| settings.denoise()),
            faster_processing: o.faster_processing.unwrap_or_else(|| settings.faster_processing()),
            color_profile: o.color_profile.unwrap_or_else(|| settings.color_profile()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOverrides;

    #[test]
    fn test_output_location() {
        let src = Path::new("/photos/day1/SDIM0001.X3F");
        assert_eq!(OutputLocation::SourceFolder.dir_for(src), PathBuf::from("/photos/day1"));
        assert_eq!(
            OutputLocation::Subfolder("DNG".to_string()).dir_for(src),
            PathBuf::from("/photos/day1/DNG")
        );
        assert_eq!(
            OutputLocation::Fixed(PathBuf::from("/out")).dir_for(src),
            PathBuf::from("/out")
        );
        assert_eq!(OutputLocation::SourceFolder.dir_for(Path::new("a.X3F")), PathBuf::from("."));
    }

    #[test]
    fn test_config_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{"output_format": "tiff", "output_location": {"subfolder": "converted"}, "denoise": false}"#,
        )
        .unwrap();
        assert_eq!(config.output_format, OutputFormat::Tiff);
        assert_eq!(config.output_location, OutputLocation::Subfolder("converted".to_string()));
        assert!(!config.denoise);
        assert_eq!(config.exiftool_path, PathBuf::from("exiftool"));
    }

    #[test]
    fn test_config_load_errors_name_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"output_format": "#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("batch.json"), "{}", err);
        assert!(err.to_string().starts_with("Failed to parse config"));

        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"), "{}", err);

        std::fs::write(&path, r#"{"compress": true}"#).unwrap();
        assert!(Config::load(&path).unwrap().compress);
    }

    #[test]
    fn test_effective_settings_prefer_overrides() {
        let config = Config {
            compress: true,
            ..Default::default()
        };
        let mut job = Job::new(PathBuf::from("/raw/a.X3F"));
        job.overrides = JobOverrides {
            format: Some(OutputFormat::Jpeg),
            denoise: Some(false),
            ..Default::default()
        };

        let eff = EffectiveSettings::resolve(&job, &config);
        assert_eq!(eff.format, OutputFormat::Jpeg);
        assert!(!eff.denoise);
        assert!(eff.compress);
        assert_eq!(eff.color_profile, ColorProfile::Default);
        assert_eq!(eff.output_dir, PathBuf::from("/raw"));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("adobe-rgb".parse::<ColorProfile>().unwrap(), ColorProfile::AdobeRgb);
        assert!("webp".parse::<OutputFormat>().is_err());
    }
}
