//! Output file validation

use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ConversionError, Result};

/// Create the output directory if needed
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(ConversionError::ValidationFailed {
            path: dir.to_path_buf(),
            reason: "output location exists and is not a directory".to_string(),
        });
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Check that the converter produced a non-empty file at `path`.
/// Returns its size.
pub fn validate_output(path: &Path) -> Result<u64> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConversionError::MissingOutputFile {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    if !meta.is_file() {
        return Err(ConversionError::ValidationFailed {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }

    let size = meta.len();
    if size == 0 {
        return Err(ConversionError::InvalidOutputFile {
            path: path.to_path_buf(),
            size,
        });
    }

    debug!("Output {} ({} bytes)", path.display(), size);
    Ok(size)
}

/// Make the output owner read/write, world readable. Failure is logged only.
pub fn fix_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
            warn!("Could not set permissions on {}: {}", path.display(), e);
        }
    }

    #[cfg(not(unix))]
    {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mut perms = meta.permissions();
                perms.set_readonly(false);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    warn!("Could not set permissions on {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Could not read permissions of {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_output() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("none.dng");
        let empty = dir.path().join("empty.dng");
        let good = dir.path().join("good.dng");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&good, b"DNG!").unwrap();

        assert!(matches!(
            validate_output(&missing),
            Err(ConversionError::MissingOutputFile { .. })
        ));
        assert!(matches!(
            validate_output(&empty),
            Err(ConversionError::InvalidOutputFile { size: 0, .. })
        ));
        assert_eq!(validate_output(&good).unwrap(), 4);
        assert!(validate_output(dir.path()).is_err());
    }

    #[test]
    fn test_ensure_output_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_output_dir(&nested).unwrap();

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(ensure_output_dir(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_fix_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.dng");
        std::fs::write(&path, b"x").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        fix_permissions(&path);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        // missing file only logs
        fix_permissions(&dir.path().join("missing"));
    }
}
