//! Pathname redaction for log output.
//!
//! When enabled, archive filenames and entry pathnames are replaced by a
//! placeholder so that log records do not leak personally identifiable
//! information.

use std::path::Path;
use std::sync::OnceLock;

static REDACT: OnceLock<bool> = OnceLock::new();

/// Enable or disable redaction for the lifetime of the process.
///
/// Only the first call has any effect.
pub fn set_redact(enabled: bool) {
    let _ = REDACT.set(enabled);
}

/// Returns `s`, or a placeholder if redaction is enabled.
pub fn redact(s: &str) -> &str {
    if *REDACT.get().unwrap_or(&false) {
        "(redacted)"
    } else {
        s
    }
}

/// Display form of a path, honouring redaction.
pub fn redacted_path(path: &Path) -> String {
    redact(&path.display().to_string()).to_string()
}
