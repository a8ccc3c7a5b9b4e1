//! Correction Profiles
//!
//! Selects the flat-field correction profile (an `OpcodeList3` blob) that
//! matches a camera body, lens and aperture.
//!
//! ## Naming
//!
//! Profiles live flat in one directory and are named
//!
//! ```text
//! <ModelCode>[_<LensId>]_FF_DNG_Opcodelist3_<Aperture>
//! ```
//!
//! e.g. `DP2M_FF_DNG_Opcodelist3_2.8` or `SDQH_32776_FF_DNG_Opcodelist3_4.0`.
//! The lens id segment is only present for interchangeable-lens bodies.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raw_batch::profiles::ProfileResolver;
//!
//! let resolver = ProfileResolver::new("/usr/share/raw_batch/opcodes");
//! let profile = resolver.resolve("SIGMA DP2 Merrill", None, "2.8");
//! ```
//!
//! A missing profile is not an error: the caller converts without one and
//! reports a warning.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Code returned for camera models outside the table. Never matches a file.
pub const UNKNOWN_MODEL: &str = "UNKNOWN";

const PROFILE_INFIX: &str = "_FF_DNG_Opcodelist3_";

// ============================================================================
// Camera Models
// ============================================================================

/// Substring (uppercase, single-spaced) → model code.
/// The longest matching substring wins, so "SD15" beats "SD1".
const MODEL_TABLE: &[(&str, &str)] = &[
    ("DP0 QUATTRO", "DP0Q"),
    ("DP1 QUATTRO", "DP1Q"),
    ("DP2 QUATTRO", "DP2Q"),
    ("DP3 QUATTRO", "DP3Q"),
    ("DP1 MERRILL", "DP1M"),
    ("DP2 MERRILL", "DP2M"),
    ("DP3 MERRILL", "DP3M"),
    ("DP1X", "DP1X"),
    ("DP2X", "DP2X"),
    ("DP1S", "DP1S"),
    ("DP2S", "DP2S"),
    ("DP1", "DP1"),
    ("DP2", "DP2"),
    ("SD QUATTRO H", "SDQH"),
    ("SD QUATTRO", "SDQ"),
    ("SD1 MERRILL", "SD1M"),
    ("SD9", "SD9"),
    ("SD10", "SD10"),
    ("SD14", "SD14"),
    ("SD15", "SD15"),
    ("SD1", "SD1"),
];

/// Interchangeable-lens bodies: their profiles are keyed by lens as well
const LENS_BODIES: &[&str] = &["SD9", "SD10", "SD14", "SD15", "SD1", "SD1M", "SDQ", "SDQH"];

/// Map a raw camera model string to its short code
pub fn normalize_model(raw: &str) -> &'static str {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();

    MODEL_TABLE
        .iter()
        .filter(|(pattern, _)| normalized.contains(pattern))
        .max_by_key(|(pattern, _)| pattern.len())
        .map(|(_, code)| *code)
        .unwrap_or(UNKNOWN_MODEL)
}

pub fn uses_lens_id(model_code: &str) -> bool {
    LENS_BODIES.iter().any(|body| *body == model_code)
}

/// All known model codes, longest first
pub fn model_codes_by_length() -> Vec<&'static str> {
    let mut codes: Vec<&'static str> = MODEL_TABLE.iter().map(|(_, code)| *code).collect();
    codes.dedup();
    codes.sort_by_key(|c| std::cmp::Reverse(c.len()));
    codes
}

/// A model string that normalizes back to `code`
pub fn model_pattern_for_code(code: &str) -> Option<&'static str> {
    MODEL_TABLE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(pattern, _)| *pattern)
}

// ============================================================================
// Lens Identifiers
// ============================================================================

/// Canonical lens token: a bare decimal id
fn is_canonical_lens_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Normalize a lens identifier into its canonical token.
///
/// Whitespace and `|` are stripped first; anything that is still not a bare
/// number goes through [`extract_numeric_lens_id`].
pub fn normalize_lens(raw: &str) -> Option<String> {
    let token: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '|')
        .collect();

    if token.is_empty() {
        return None;
    }
    if is_canonical_lens_token(&token) {
        return Some(token);
    }

    extract_numeric_lens_id(raw).map(|id| id.to_string())
}

/// Recover a numeric lens id from the textual encodings metadata tools emit:
/// `Sigma 30mm F1.4 (32776)`, `32776`, `32776 Sigma 30mm`, `ID_32776`,
/// `Lens_32776`.
pub fn extract_numeric_lens_id(raw: &str) -> Option<u32> {
    parenthesized_number(raw)
        .or_else(|| standalone_number(raw))
        .or_else(|| prefixed_number(raw, "ID_"))
        .or_else(|| prefixed_number(raw, "LENS_"))
}

fn parenthesized_number(raw: &str) -> Option<u32> {
    raw.split('(')
        .skip(1)
        .filter_map(|rest| rest.split_once(')'))
        .map(|(inner, _)| inner.trim())
        .find(|inner| is_canonical_lens_token(inner))
        .and_then(|inner| inner.parse().ok())
}

fn standalone_number(raw: &str) -> Option<u32> {
    raw.split(|c: char| c.is_whitespace() || c == '|')
        .find(|t| is_canonical_lens_token(t))
        .and_then(|t| t.parse().ok())
}

fn prefixed_number(raw: &str, prefix: &str) -> Option<u32> {
    let upper = raw.to_uppercase();
    let start = upper.find(prefix)? + prefix.len();
    let digits: String = upper[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ============================================================================
// Resolution
// ============================================================================

/// Profile filename for a normalized model, optional lens token and aperture
pub fn profile_file_name(model_code: &str, lens_token: Option<&str>, aperture: &str) -> String {
    match lens_token {
        Some(lens) => format!("{}_{}{}{}", model_code, lens, PROFILE_INFIX, aperture),
        None => format!("{}{}{}", model_code, PROFILE_INFIX, aperture),
    }
}

/// Looks up correction profiles in a fixed directory
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    profile_dir: PathBuf,
}

impl ProfileResolver {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
        }
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Path of the matching profile, or `None` if no file exists for this
    /// combination. Reads the filesystem only; never creates anything.
    pub fn resolve(&self, camera_model: &str, lens_id: Option<&str>, aperture: &str) -> Option<PathBuf> {
        let model_code = normalize_model(camera_model);
        if model_code == UNKNOWN_MODEL {
            debug!("No model code for camera {:?}", camera_model);
            return None;
        }

        let aperture = aperture.trim();
        if aperture.is_empty() {
            return None;
        }

        let lens_token = if uses_lens_id(model_code) {
            lens_id.and_then(normalize_lens)
        } else {
            None
        };

        let candidate = self
            .profile_dir
            .join(profile_file_name(model_code, lens_token.as_deref(), aperture));

        debug!("Profile candidate: {}", candidate.display());

        candidate.is_file().then_some(candidate)
    }
}
