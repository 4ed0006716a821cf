//! Error types for every pipeline component.
//!
//! Each component returns its own error type. The controller catches all of
//! them at the component boundary and reports them through the
//! [`ControlSurface`](crate::surface::ControlSurface); only
//! [`ResolutionError`] is allowed to stop startup.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// The simulator install directory could not be found. Fatal.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("configured install directory {0} does not exist")]
    MissingOverride(PathBuf),
    #[error("no Falcon BMS {version} installation found (tried {})", display_paths(.tried))]
    NotFound { version: String, tried: Vec<PathBuf> },
}

/// None of the requested paths could be registered with the filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create filesystem watcher: {0}")]
    Backend(#[from] notify::Error),
    #[error("none of the {count} path(s) could be watched (first: {})", .first.display())]
    NothingWatched { count: usize, first: PathBuf },
    #[error("no paths given to watch")]
    Empty,
}

/// A single conversion job failed (kneeboard or briefing).
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to encode {name}: {source}")]
    Encode {
        name: String,
        source: image::ImageError,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("{} is not a kneeboard texture", .0.display())]
    UnknownTexture(PathBuf),
    #[error("no kneeboard textures could be converted in {}", .0.display())]
    NothingConverted(PathBuf),
    #[error("failed to copy briefing to {}: {source}", .path.display())]
    Copy { path: PathBuf, source: io::Error },
    #[error("conversion task failed: {0}")]
    Task(String),
}

/// The HTTP listener could not be bound. The rest of the pipeline continues.
#[derive(Debug, Error)]
#[error("failed to bind {addr}: {source}")]
pub struct ServerBindError {
    pub addr: SocketAddr,
    pub source: io::Error,
}

/// The selected theater could not be written back to the config file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("refusing to overwrite malformed config {}: {message}", .path.display())]
    Malformed { path: PathBuf, message: String },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
