//! Conversion jobs and their scheduling.
//!
//! - [`splitter`] — decode a DDS texture and split it into two PNG pages
//! - [`kneeboard`] — convert one texture or a whole kneeboard folder
//! - [`briefing`] — copy the newest `*briefing.html` into the web root
//!
//! ## Scheduling
//!
//! A [`JobQueue`] holds at most one active job and one pending job. Jobs
//! submitted while another is active are merged into the pending slot, so at
//! most one conversion of a given kind writes to the web root at any time and
//! a burst of filesystem events collapses into a single follow-up pass.

pub mod briefing;
pub mod kneeboard;
pub mod splitter;

use std::path::{Path, PathBuf};

use crate::install::{output_names, texture_index, KNEEBOARD_COUNT};

/// What a kneeboard job converts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobScope {
    SingleFile(PathBuf),
    WholeDirectory(PathBuf),
}

impl JobScope {
    pub fn source(&self) -> &Path {
        match self {
            Self::SingleFile(p) | Self::WholeDirectory(p) => p,
        }
    }

    fn directory(&self) -> PathBuf {
        match self {
            Self::WholeDirectory(dir) => dir.clone(),
            Self::SingleFile(file) => file.parent().map(Path::to_path_buf).unwrap_or_default(),
        }
    }
}

/// One kneeboard conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub scope: JobScope,
    /// Keep the theater selection disabled while this job runs.
    pub locks_control: bool,
}

impl ConversionJob {
    pub fn single(path: PathBuf, locks_control: bool) -> Self {
        Self {
            scope: JobScope::SingleFile(path),
            locks_control,
        }
    }

    pub fn whole(dir: PathBuf, locks_control: bool) -> Self {
        Self {
            scope: JobScope::WholeDirectory(dir),
            locks_control,
        }
    }

    /// Output files this job (re)writes.
    pub fn target_names(&self) -> Vec<String> {
        let indices: Vec<u8> = match &self.scope {
            JobScope::SingleFile(path) => texture_index(path).into_iter().collect(),
            JobScope::WholeDirectory(_) => (1..=KNEEBOARD_COUNT).collect(),
        };
        indices
            .into_iter()
            .flat_map(|i| {
                let (l, r) = output_names(i);
                [l, r]
            })
            .collect()
    }
}

/// One briefing copy request for a briefings folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BriefingJob {
    pub directory: PathBuf,
}

/// How a newer request folds into one that is already waiting.
pub trait Coalesce: Sized {
    fn coalesce(self, newer: Self) -> Self;
}

impl Coalesce for ConversionJob {
    fn coalesce(self, newer: Self) -> Self {
        let locks_control = self.locks_control || newer.locks_control;
        let scope = match (self.scope, newer.scope) {
            (JobScope::SingleFile(a), JobScope::SingleFile(b)) if a == b => JobScope::SingleFile(b),
            // A theater switch replaces the folder; the newest one wins.
            (_, newer) => JobScope::WholeDirectory(newer.directory()),
        };
        Self {
            scope,
            locks_control,
        }
    }
}

impl Coalesce for BriefingJob {
    fn coalesce(self, newer: Self) -> Self {
        newer
    }
}

/// One active job plus at most one merged pending job.
#[derive(Debug)]
pub struct JobQueue<J> {
    active: Option<J>,
    pending: Option<J>,
}

impl<J> Default for JobQueue<J> {
    fn default() -> Self {
        Self {
            active: None,
            pending: None,
        }
    }
}

impl<J: Coalesce + Clone> JobQueue<J> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job`. Returns it back if nothing is running and it should start now.
    pub fn submit(&mut self, job: J) -> Option<J> {
        if self.active.is_some() {
            self.pending = Some(match self.pending.take() {
                Some(waiting) => waiting.coalesce(job),
                None => job,
            });
            return None;
        }
        self.active = Some(job.clone());
        Some(job)
    }

    /// Mark the active job done. Returns the pending job, now active, if any.
    pub fn finish(&mut self) -> Option<J> {
        self.active = self.pending.take();
        self.active.clone()
    }

    /// Drop the pending job, leaving the active one to finish.
    pub fn cancel_pending(&mut self) -> Option<J> {
        self.pending.take()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn pending(&self) -> Option<&J> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! In-code DXT1 textures so tests need no binary assets.

    use std::path::Path;

    use crate::install::texture_file_name;

    /// RGB565 colours that decode to pure primaries.
    pub const RED: u16 = 0xF800;
    pub const GREEN: u16 = 0x07E0;
    pub const BLUE: u16 = 0x001F;

    /// Write a DXT1 DDS whose left half is `left` and right half is `right`.
    ///
    /// `width` and `height` must be multiples of 4; `width / 2` must be too.
    pub fn write_dds(path: &Path, width: u32, height: u32, left: u16, right: u16) {
        let blocks_x = width / 4;
        let blocks_y = height / 4;
        let mut out = Vec::new();
        out.extend_from_slice(b"DDS ");
        let header: [u32; 7] = [
            124,
            0x1 | 0x2 | 0x4 | 0x1000 | 0x8_0000,
            height,
            width,
            blocks_x * blocks_y * 8,
            0,
            0,
        ];
        for v in header {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[0u8; 44]);
        // Pixel format: size, flags (FOURCC), fourcc, bit count, 4 masks.
        out.extend_from_slice(&32u32.to_le_bytes());
        out.extend_from_slice(&0x4u32.to_le_bytes());
        out.extend_from_slice(b"DXT1");
        out.extend_from_slice(&[0u8; 20]);
        // Caps (TEXTURE), caps2-4, reserved.
        out.extend_from_slice(&0x1000u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);

        for _ in 0..blocks_y {
            for bx in 0..blocks_x {
                let color = if bx < blocks_x / 2 { left } else { right };
                out.extend_from_slice(&color.to_le_bytes());
                out.extend_from_slice(&color.to_le_bytes());
                out.extend_from_slice(&[0u8; 4]);
            }
        }
        std::fs::write(path, out).unwrap();
    }

    /// Populate `dir` with all 16 textures in the given colours.
    pub fn write_kneeboard_set(dir: &Path, left: u16, right: u16) {
        std::fs::create_dir_all(dir).unwrap();
        for index in 1..=crate::install::KNEEBOARD_COUNT {
            write_dds(&dir.join(texture_file_name(index)), 16, 8, left, right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(name: &str) -> ConversionJob {
        ConversionJob::single(PathBuf::from("/kb").join(name), false)
    }

    #[test]
    fn test_target_names() {
        assert_eq!(single("7983.dds").target_names(), vec!["l02.png", "r02.png"]);
        assert_eq!(
            ConversionJob::whole(PathBuf::from("/kb"), false)
                .target_names()
                .len(),
            32
        );
        assert!(single("notes.txt").target_names().is_empty());
    }

    #[test]
    fn test_queue_runs_one_at_a_time() {
        let mut queue = JobQueue::new();
        assert_eq!(queue.submit(single("7982.dds")), Some(single("7982.dds")));
        assert!(queue.is_busy());
        assert_eq!(queue.submit(single("7982.dds")), None);
        assert_eq!(queue.submit(single("7982.dds")), None);
        assert_eq!(queue.pending(), Some(&single("7982.dds")));

        assert_eq!(queue.finish(), Some(single("7982.dds")));
        assert!(queue.pending().is_none());
        assert_eq!(queue.finish(), None);
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_different_files_coalesce_to_directory() {
        let mut queue = JobQueue::new();
        queue.submit(single("7982.dds"));
        queue.submit(single("7983.dds"));
        queue.submit(single("7984.dds"));
        assert_eq!(
            queue.finish(),
            Some(ConversionJob::whole(PathBuf::from("/kb"), false))
        );
    }

    #[test]
    fn test_theater_switch_replaces_pending_directory() {
        let mut queue = JobQueue::new();
        queue.submit(ConversionJob::whole(PathBuf::from("/korea"), true));
        queue.submit(ConversionJob::single(PathBuf::from("/korea/7990.dds"), false));
        queue.submit(ConversionJob::whole(PathBuf::from("/balkans"), true));
        let next = queue.finish().unwrap();
        assert_eq!(next.scope, JobScope::WholeDirectory(PathBuf::from("/balkans")));
        assert!(next.locks_control);
    }

    #[test]
    fn test_cancel_pending_leaves_active() {
        let mut queue = JobQueue::new();
        queue.submit(single("7982.dds"));
        queue.submit(single("7983.dds"));
        assert!(queue.cancel_pending().is_some());
        assert!(queue.is_busy());
        assert_eq!(queue.finish(), None);
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_locks_control_is_sticky() {
        let merged = ConversionJob::single(PathBuf::from("/kb/7982.dds"), true)
            .coalesce(ConversionJob::single(PathBuf::from("/kb/7982.dds"), false));
        assert!(merged.locks_control);
    }

    #[test]
    fn test_briefing_jobs_keep_newest() {
        let mut queue = JobQueue::new();
        queue.submit(BriefingJob {
            directory: "/a".into(),
        });
        queue.submit(BriefingJob {
            directory: "/b".into(),
        });
        queue.submit(BriefingJob {
            directory: "/c".into(),
        });
        assert_eq!(queue.finish().unwrap().directory, PathBuf::from("/c"));
    }
}
