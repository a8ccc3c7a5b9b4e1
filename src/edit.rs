//! Metadata edits and their undo/redo history
//!
//! Editable fields are a closed enum; each maps to a getter/setter pair on
//! [`CameraMetadata`]. One user edit may touch several jobs and is recorded
//! as a single undoable unit.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueueError, QueueResult};
use crate::job::JobId;
use crate::metadata::{format_aperture, parse_capture_time, CameraMetadata, CAPTURE_TIME_FORMAT};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataField {
    CameraModel,
    LensId,
    Aperture,
    CaptureTime,
    /// Free-form tag by name
    Tag(String),
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataField::CameraModel => write!(f, "camera model"),
            MetadataField::LensId => write!(f, "lens id"),
            MetadataField::Aperture => write!(f, "aperture"),
            MetadataField::CaptureTime => write!(f, "capture time"),
            MetadataField::Tag(name) => write!(f, "tag {}", name),
        }
    }
}

type Getter = fn(&CameraMetadata) -> Option<String>;
type Setter = fn(&mut CameraMetadata, Option<String>);

struct Accessor {
    get: Getter,
    set: Setter,
}

static CAMERA_MODEL: Accessor = Accessor {
    get: |m| m.camera_model.clone(),
    set: |m, v| m.camera_model = v,
};

static LENS_ID: Accessor = Accessor {
    get: |m| m.lens_id.clone(),
    set: |m, v| m.lens_id = v,
};

static APERTURE: Accessor = Accessor {
    get: |m| m.aperture.clone(),
    set: |m, v| m.aperture = v,
};

static CAPTURE_TIME: Accessor = Accessor {
    get: |m| m.capture_time.map(|t| t.format(CAPTURE_TIME_FORMAT).to_string()),
    set: |m, v| m.capture_time = v.as_deref().and_then(parse_capture_time),
};

impl MetadataField {
    fn accessor(&self) -> Option<&'static Accessor> {
        match self {
            MetadataField::CameraModel => Some(&CAMERA_MODEL),
            MetadataField::LensId => Some(&LENS_ID),
            MetadataField::Aperture => Some(&APERTURE),
            MetadataField::CaptureTime => Some(&CAPTURE_TIME),
            MetadataField::Tag(_) => None,
        }
    }

    pub fn get(&self, meta: &CameraMetadata) -> Option<String> {
        match (self, self.accessor()) {
            (_, Some(acc)) => (acc.get)(meta),
            (MetadataField::Tag(name), None) => meta.tags.get(name).cloned(),
            _ => None,
        }
    }

    /// Store an already-normalized value
    pub fn set(&self, meta: &mut CameraMetadata, value: Option<String>) {
        match (self, self.accessor()) {
            (_, Some(acc)) => (acc.set)(meta, value),
            (MetadataField::Tag(name), None) => match value {
                Some(v) => {
                    meta.tags.insert(name.clone(), v);
                }
                None => {
                    meta.tags.remove(name);
                }
            },
            _ => {}
        }
    }

    /// Validate user input and bring it into stored form. Blank input clears
    /// the field.
    pub fn normalize(&self, value: Option<&str>) -> QueueResult<Option<String>> {
        let value = match value.map(str::trim) {
            None | Some("") => return Ok(None),
            Some(v) => v,
        };
        let invalid = || QueueError::InvalidValue {
            field: self.clone(),
            value: value.to_string(),
        };

        match self {
            MetadataField::Aperture => {
                let f: f64 = value
                    .trim_start_matches(['f', 'F', '/'])
                    .parse()
                    .map_err(|_| invalid())?;
                if f > 0.0 {
                    Ok(Some(format_aperture(f)))
                } else {
                    Err(invalid())
                }
            }
            MetadataField::CaptureTime => parse_capture_time(value)
                .map(|t| Some(t.format(CAPTURE_TIME_FORMAT).to_string()))
                .ok_or_else(invalid),
            _ => Ok(Some(value.to_string())),
        }
    }
}

/// One field change on one job
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub job: JobId,
    pub field: MetadataField,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Undo/redo stacks of edit units
#[derive(Debug, Default)]
pub struct EditHistory {
    undo: Vec<Vec<FieldChange>>,
    redo: Vec<Vec<FieldChange>>,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new unit. Any redo history is discarded.
    pub fn record(&mut self, unit: Vec<FieldChange>) {
        if unit.is_empty() {
            return;
        }
        self.undo.push(unit);
        self.redo.clear();
    }

    /// Unit the next `take_undo` would return
    pub fn peek_undo(&self) -> Option<&[FieldChange]> {
        self.undo.last().map(Vec::as_slice)
    }

    pub fn peek_redo(&self) -> Option<&[FieldChange]> {
        self.redo.last().map(Vec::as_slice)
    }

    pub fn take_undo(&mut self) -> Option<Vec<FieldChange>> {
        let unit = self.undo.pop()?;
        self.redo.push(unit.clone());
        Some(unit)
    }

    pub fn take_redo(&mut self) -> Option<Vec<FieldChange>> {
        let unit = self.redo.pop()?;
        self.undo.push(unit.clone());
        Some(unit)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let mut meta = CameraMetadata::default();
        MetadataField::CameraModel.set(&mut meta, Some("SIGMA DP3 Merrill".to_string()));
        MetadataField::Tag("Artist".to_string()).set(&mut meta, Some("K".to_string()));

        assert_eq!(MetadataField::CameraModel.get(&meta).as_deref(), Some("SIGMA DP3 Merrill"));
        assert_eq!(MetadataField::Tag("Artist".to_string()).get(&meta).as_deref(), Some("K"));

        MetadataField::Tag("Artist".to_string()).set(&mut meta, None);
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn test_capture_time_round_trip() {
        let mut meta = CameraMetadata::default();
        let value = MetadataField::CaptureTime.normalize(Some("2020-01-02 03:04:05")).unwrap();
        assert_eq!(value.as_deref(), Some("2020:01:02 03:04:05"));

        MetadataField::CaptureTime.set(&mut meta, value.clone());
        assert_eq!(MetadataField::CaptureTime.get(&meta), value);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(MetadataField::Aperture.normalize(Some("f/2.8")), Ok(Some("2.8".to_string())));
        assert_eq!(MetadataField::Aperture.normalize(Some("4")), Ok(Some("4.0".to_string())));
        assert!(MetadataField::Aperture.normalize(Some("wide")).is_err());
        assert!(MetadataField::CaptureTime.normalize(Some("soon")).is_err());
        assert_eq!(MetadataField::LensId.normalize(Some("  ")), Ok(None));
    }

    #[test]
    fn test_history_redo_cleared_by_new_edit() {
        let change = FieldChange {
            job: JobId::new(),
            field: MetadataField::LensId,
            old: None,
            new: Some("32776".to_string()),
        };

        let mut history = EditHistory::new();
        history.record(vec![change.clone()]);
        assert_eq!(history.peek_undo().map(|u| u.len()), Some(1));
        assert!(history.take_undo().is_some());
        assert!(history.peek_undo().is_none());
        assert!(history.peek_redo().is_some());
        assert!(history.can_redo());

        history.record(vec![change]);
        assert!(!history.can_redo());
        assert!(history.take_undo().is_some());
        assert!(history.take_undo().is_none());
    }
}
