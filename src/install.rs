//! Simulator install discovery and the asset paths inside an install.
//!
//! Kneeboard textures live in the theater's object folder as
//! `7982.dds`..`7997.dds`; texture `7982 + i - 1` becomes `l{i:02}.png` and
//! `r{i:02}.png`. Briefings are written to `User/Briefings`.

use std::path::{Path, PathBuf};

use crate::config::SimulatorConfig;
use crate::error::ResolutionError;
use crate::theater::Theater;
use crate::util::home_dir;

/// Texture id of the first kneeboard page.
pub const FIRST_TEXTURE_ID: u32 = 7982;
/// Number of kneeboard pages (and output pairs).
pub const KNEEBOARD_COUNT: u8 = 16;

/// Resolves the simulator's base install directory.
pub trait InstallLocator: Send + Sync {
    fn resolve(&self, version: &str) -> Result<PathBuf, ResolutionError>;
}

/// Configured override, then `BMS_INSTALL_DIR`, then well-known locations.
#[derive(Debug, Clone, Default)]
pub struct StandardLocator {
    pub override_dir: Option<PathBuf>,
}

impl StandardLocator {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            override_dir: config.install_dir.clone(),
        }
    }

    fn candidates(version: &str) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(dir) = std::env::var("BMS_INSTALL_DIR") {
            candidates.push(PathBuf::from(dir));
        }
        let folder = format!("Falcon BMS {version}");
        if cfg!(windows) {
            candidates.push(PathBuf::from("C:\\").join(&folder));
            candidates.push(PathBuf::from("C:\\Program Files").join(&folder));
        }
        if let Some(home) = home_dir() {
            candidates.push(PathBuf::from(home).join(&folder));
        }
        candidates
    }
}

impl InstallLocator for StandardLocator {
    fn resolve(&self, version: &str) -> Result<PathBuf, ResolutionError> {
        if let Some(dir) = &self.override_dir {
            return if dir.is_dir() {
                Ok(dir.clone())
            } else {
                Err(ResolutionError::MissingOverride(dir.clone()))
            };
        }
        let tried = Self::candidates(version);
        tried
            .iter()
            .find(|p| p.is_dir())
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound {
                version: version.to_string(),
                tried,
            })
    }
}

/// Semantic role of a watched or converted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetRole {
    /// Kneeboard page, `1..=16`.
    KneeboardTexture(u8),
    BriefingSource,
}

/// A filesystem path plus what it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPath {
    pub path: PathBuf,
    pub role: AssetRole,
}

/// Asset locations inside a resolved install directory.
#[derive(Debug, Clone)]
pub struct SimLayout {
    install_dir: PathBuf,
}

impl SimLayout {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Folder holding the theater's kneeboard textures.
    pub fn kneeboard_dir(&self, theater: &Theater) -> PathBuf {
        let mut dir = self.install_dir.join("Data");
        if let Some(sub) = &theater.add_on_subdir {
            dir.push(sub);
        }
        dir.join("TerrData").join("Objects").join("KoreaObj")
    }

    pub fn briefing_dir(&self) -> PathBuf {
        self.install_dir.join("User").join("Briefings")
    }

    pub fn kneeboard_paths(&self, theater: &Theater) -> Vec<AssetPath> {
        kneeboard_paths(&self.kneeboard_dir(theater))
    }

    pub fn briefing_path(&self) -> AssetPath {
        AssetPath {
            path: self.briefing_dir(),
            role: AssetRole::BriefingSource,
        }
    }
}

/// The 16 expected texture files in `dir`, in ascending index order.
pub fn kneeboard_paths(dir: &Path) -> Vec<AssetPath> {
    (1..=KNEEBOARD_COUNT)
        .map(|index| AssetPath {
            path: dir.join(texture_file_name(index)),
            role: AssetRole::KneeboardTexture(index),
        })
        .collect()
}

/// `7982.dds` for index 1, up to `7997.dds` for index 16.
pub fn texture_file_name(index: u8) -> String {
    format!("{}.dds", FIRST_TEXTURE_ID + u32::from(index) - 1)
}

/// Map a texture file name back to its kneeboard index.
///
/// Returns `None` for anything outside `7982..=7997`.
pub fn texture_index(path: &Path) -> Option<u8> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("dds") {
        return None;
    }
    let id: u32 = path.file_stem()?.to_str()?.parse().ok()?;
    let offset = id.checked_sub(FIRST_TEXTURE_ID)?;
    if offset >= u32::from(KNEEBOARD_COUNT) {
        return None;
    }
    u8::try_from(offset + 1).ok()
}

/// Output names for a kneeboard index: `("l01.png", "r01.png")`.
pub fn output_names(index: u8) -> (String, String) {
    (format!("l{index:02}.png"), format!("r{index:02}.png"))
}
