//! Per-file metadata
//!
//! Two layers of metadata are kept for each queued file:
//!
//! - **File info** captured when the file is queued: size, modification
//!   time and, when the container is readable by `kamadak-exif`, the
//!   embedded capture timestamp.
//! - **Shot info** (camera model, lens id, aperture) needed to pick a
//!   correction profile. It is read through exiftool during conversion, with
//!   a filename heuristic as the last resort.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::profiles;

/// EXIF date layout used when capture timestamps are rendered or edited
pub const CAPTURE_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Metadata attached to a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMetadata {
    /// Raw camera model string as reported by the file (e.g. "SIGMA DP2 Merrill")
    pub camera_model: Option<String>,
    /// Lens identifier, in whatever encoding the metadata tool produced
    pub lens_id: Option<String>,
    /// Aperture as a one-decimal f-number string ("2.8")
    pub aperture: Option<String>,
    pub capture_time: Option<NaiveDateTime>,
    pub file_size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Free-form tags
    pub tags: BTreeMap<String, String>,
}

/// Fields needed for profile resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotInfo {
    pub camera_model: Option<String>,
    pub lens_id: Option<String>,
    pub aperture: Option<String>,
}

impl ShotInfo {
    /// Fill missing fields from `other`
    pub fn or(self, other: ShotInfo) -> ShotInfo {
        ShotInfo {
            camera_model: self.camera_model.or(other.camera_model),
            lens_id: self.lens_id.or(other.lens_id),
            aperture: self.aperture.or(other.aperture),
        }
    }
}

impl CameraMetadata {
    pub fn shot_info(&self) -> ShotInfo {
        ShotInfo {
            camera_model: self.camera_model.clone(),
            lens_id: self.lens_id.clone(),
            aperture: self.aperture.clone(),
        }
    }

    /// Store extracted shot info without overwriting fields already set
    pub fn fill_missing(&mut self, shot: &ShotInfo) {
        if self.camera_model.is_none() {
            self.camera_model = shot.camera_model.clone();
        }
        if self.lens_id.is_none() {
            self.lens_id = shot.lens_id.clone();
        }
        if self.aperture.is_none() {
            self.aperture = shot.aperture.clone();
        }
    }
}

/// Capture filesystem metadata and a best-effort embedded timestamp
pub fn capture_file_info(path: &Path) -> std::io::Result<CameraMetadata> {
    let fs_meta = std::fs::metadata(path)?;

    Ok(CameraMetadata {
        file_size: fs_meta.len(),
        modified: fs_meta.modified().ok().map(DateTime::<Utc>::from),
        capture_time: read_embedded_timestamp(path),
        ..Default::default()
    })
}

/// Read `DateTimeOriginal` with kamadak-exif. Most RAW containers are not
/// TIFF-based, so failure here is expected and silent.
pub fn read_embedded_timestamp(path: &Path) -> Option<NaiveDateTime> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);

    let exif_data = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(data) => data,
        Err(e) => {
            debug!("No embedded EXIF in {}: {}", path.display(), e);
            return None;
        }
    };

    let field = exif_data
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .or_else(|| exif_data.get_field(exif::Tag::DateTime, exif::In::PRIMARY))?;

    match field.value {
        exif::Value::Ascii(ref parts) if !parts.is_empty() => {
            let dt = exif::DateTime::from_ascii(&parts[0]).ok()?;
            chrono::NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
                .and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)
        }
        _ => None,
    }
}

/// Render an f-number the way profile filenames expect it ("2.8", "4.0")
pub fn format_aperture(f_number: f64) -> String {
    format!("{:.1}", f_number)
}

/// Parse an exiftool-style or ISO capture timestamp
pub fn parse_capture_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, CAPTURE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Guess shot info from the filename when the metadata tool is unavailable.
///
/// Recognizes a model code at the start of the stem or as a separate token
/// (`DP2M0042.X3F`, `trip_SDQH_0001.X3F`) and an `F<number>` aperture token
/// (`shot_F2.8.X3F`). Lens ids cannot be guessed.
pub fn guess_from_filename(path: &Path) -> ShotInfo {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_default();

    let tokens: Vec<&str> = stem.split(['_', '-', ' ']).filter(|t| !t.is_empty()).collect();

    let camera_model = profiles::model_codes_by_length()
        .into_iter()
        .find(|code| stem.starts_with(*code) || tokens.iter().any(|t| *t == *code))
        .and_then(profiles::model_pattern_for_code)
        .map(str::to_string);

    let aperture = tokens.iter().find_map(|t| {
        let rest = t.strip_prefix('F')?;
        let value: f64 = rest.parse().ok()?;
        (value > 0.0 && value < 64.0).then(|| format_aperture(value))
    });

    ShotInfo {
        camera_model,
        lens_id: None,
        aperture,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_format_aperture() {
        assert_eq!(format_aperture(2.8), "2.8");
        assert_eq!(format_aperture(4.0), "4.0");
        assert_eq!(format_aperture(5.6000001), "5.6");
    }

    #[test]
    fn test_parse_capture_time() {
        let t = parse_capture_time("2016:05:04 03:02:01").unwrap();
        assert_eq!(t.format(CAPTURE_TIME_FORMAT).to_string(), "2016:05:04 03:02:01");
        assert!(parse_capture_time("2016-05-04T03:02:01").is_some());
        assert!(parse_capture_time("yesterday").is_none());
    }

    #[test]
    fn test_guess_from_filename() {
        let guess = guess_from_filename(Path::new("/raw/DP2M0042.X3F"));
        assert_eq!(guess.camera_model.as_deref(), Some("DP2 MERRILL"));
        assert_eq!(guess.aperture, None);

        let guess = guess_from_filename(Path::new("trip_sdqh_F4.X3F"));
        assert_eq!(guess.camera_model.as_deref(), Some("SD QUATTRO H"));
        assert_eq!(guess.aperture.as_deref(), Some("4.0"));

        let guess = guess_from_filename(Path::new("SDIM1234.X3F"));
        assert_eq!(guess, ShotInfo::default());
    }

    #[test]
    fn test_fill_missing_keeps_existing() {
        let mut meta = CameraMetadata {
            lens_id: Some("32776".to_string()),
            ..Default::default()
        };
        meta.fill_missing(&ShotInfo {
            camera_model: Some("SIGMA sd Quattro H".to_string()),
            lens_id: Some("1024".to_string()),
            aperture: Some("2.8".to_string()),
        });
        assert_eq!(meta.lens_id.as_deref(), Some("32776"));
        assert_eq!(meta.camera_model.as_deref(), Some("SIGMA sd Quattro H"));
        assert_eq!(meta.aperture.as_deref(), Some("2.8"));
    }

    #[test]
    fn test_capture_file_info() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SDIM0001.X3F");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"FOVb not a real raw").unwrap();

        let info = capture_file_info(&path).unwrap();
        assert_eq!(info.file_size, 19);
        assert!(info.modified.is_some());
        assert!(info.capture_time.is_none());
    }
}
