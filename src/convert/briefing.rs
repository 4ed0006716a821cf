//! Mission briefing copy.
//!
//! The simulator writes `briefing.html` (or `<something>briefing.html`) into
//! its briefings folder and may keep it open while doing so. The newest match
//! is read with shared access and written to `briefing.html` in the web root.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::ConversionError;
use crate::util::write_atomic;

/// Destination name inside the web root.
pub const BRIEFING_FILE: &str = "briefing.html";

const BRIEFING_SUFFIX: &str = "briefing.html";

/// What a briefing pass did.
#[derive(Debug, PartialEq, Eq)]
pub enum BriefingOutcome {
    Copied { source: PathBuf, bytes: usize },
    /// No `*briefing.html` in the folder (or the folder is missing).
    NoCandidates,
    /// The newest candidate could not be read; the previous copy stays.
    SourceUnavailable { source: PathBuf, reason: String },
}

/// Newest `*briefing.html` directly inside `dir`, by modification time.
pub fn newest_briefing(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .to_ascii_lowercase()
                .ends_with(BRIEFING_SUFFIX)
        })
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, e.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// Copy the newest briefing in `dir` to `web_root/briefing.html`.
///
/// Fails only when the destination cannot be written.
pub fn convert(dir: &Path, web_root: &Path) -> Result<BriefingOutcome, ConversionError> {
    let Some(source) = newest_briefing(dir) else {
        debug!("No briefing found in {}", dir.display());
        return Ok(BriefingOutcome::NoCandidates);
    };

    // std opens with shared read/write/delete access on Windows, so this
    // works while the simulator still holds the file.
    let bytes = match std::fs::read(&source) {
        Ok(b) => b,
        Err(e) => {
            return Ok(BriefingOutcome::SourceUnavailable {
                source,
                reason: e.to_string(),
            })
        }
    };

    let dest = web_root.join(BRIEFING_FILE);
    write_atomic(&dest, &bytes).map_err(|source| ConversionError::Copy { path: dest, source })?;
    Ok(BriefingOutcome::Copied {
        source,
        bytes: bytes.len(),
    })
}
