//! Kneeboard texture conversion into the web root.
//!
//! A whole-directory pass is best-effort: a missing or broken texture is
//! recorded in the [`KneeboardReport`] and the remaining pages are still
//! converted. The pass only fails when no page at all could be written.

use std::path::Path;

use tracing::debug;

use super::splitter::{decode_texture, write_pages};
use super::{ConversionJob, JobScope};
use crate::error::ConversionError;
use crate::install::{kneeboard_paths, texture_index, AssetRole};

/// Outcome of a successful (possibly partial) kneeboard conversion.
#[derive(Debug, Default)]
pub struct KneeboardReport {
    /// Indices that were written, ascending.
    pub converted: Vec<u8>,
    /// Indices that could not be converted, with the reason.
    pub failures: Vec<(u8, ConversionError)>,
}

impl KneeboardReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run `job`, writing PNG pages into `web_root`.
pub fn run(job: &ConversionJob, web_root: &Path) -> Result<KneeboardReport, ConversionError> {
    convert(job.scope.source(), matches!(job.scope, JobScope::WholeDirectory(_)), web_root)
}

/// Convert a single texture file, or every expected texture in a directory.
pub fn convert(
    source: &Path,
    is_directory: bool,
    web_root: &Path,
) -> Result<KneeboardReport, ConversionError> {
    if is_directory {
        convert_directory(source, web_root)
    } else {
        let index = convert_file(source, web_root)?;
        Ok(KneeboardReport {
            converted: vec![index],
            failures: Vec::new(),
        })
    }
}

/// Convert one texture; the page index comes from the file name.
pub fn convert_file(path: &Path, web_root: &Path) -> Result<u8, ConversionError> {
    let index =
        texture_index(path).ok_or_else(|| ConversionError::UnknownTexture(path.to_path_buf()))?;
    let image = decode_texture(path)?;
    write_pages(&image, index, web_root)?;
    debug!("Converted {} to page {index:02}", path.display());
    Ok(index)
}

fn convert_directory(dir: &Path, web_root: &Path) -> Result<KneeboardReport, ConversionError> {
    let mut report = KneeboardReport::default();
    for asset in kneeboard_paths(dir) {
        let AssetRole::KneeboardTexture(index) = asset.role else {
            continue;
        };
        let result = decode_texture(&asset.path).and_then(|img| write_pages(&img, index, web_root));
        match result {
            Ok(()) => report.converted.push(index),
            Err(e) => report.failures.push((index, e)),
        }
    }
    if report.converted.is_empty() {
        return Err(ConversionError::NothingConverted(dir.to_path_buf()));
    }
    Ok(report)
}
