#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! bmsnav library: the watch → convert → serve pipeline behind the `bmsnav`
//! binary.
//!
//! - `controller` — pipeline state machine and its handle
//! - `monitor` — debounced filesystem monitors
//! - `convert` — DDS kneeboard splitting, briefing copy, job scheduling
//! - `server` — static HTTP server for the web root
//! - `config` — TOML + env-var configuration, theater persistence
//! - `install` — simulator install discovery and asset layout
//! - `theater` — theater list and selection
//! - `surface` — user-facing control surface boundary

pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod install;
pub mod monitor;
pub mod server;
pub mod surface;
pub mod theater;
pub mod util;

// Re-export key types at crate root for convenience.
pub use config::{Config, LoadedConfig};
pub use controller::{PipelineHandle, PipelineOptions, PipelineState, PipelineStatus};
pub use install::{InstallLocator, SimLayout, StandardLocator};
pub use surface::{ConsoleSurface, ControlSurface, StatusLevel};
pub use theater::{Theater, TheaterSet};
