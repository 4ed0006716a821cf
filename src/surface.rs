//! The user-facing control surface the pipeline drives.
//!
//! A desktop front end would show a theater drop-down and a status console.
//! Here that boundary is a trait: the controller tells the surface
//! which theaters exist, when the theater control may be used, and what to
//! print. [`ConsoleSurface`] renders it all as log lines, and
//! [`ConsoleCommand`] parses what the user types back.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info, warn};

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

/// Implemented by whatever presents the pipeline to the user.
pub trait ControlSurface: Send + Sync {
    /// The theater list was loaded (or reloaded).
    fn theaters_loaded(&self, names: &[String], selected: &str);
    /// Enable or disable the theater selection control.
    fn set_theater_control_enabled(&self, enabled: bool);
    /// Show a status message.
    fn post(&self, level: StatusLevel, message: &str);
}

/// Surface that writes everything to the log.
#[derive(Debug, Default)]
pub struct ConsoleSurface {
    control_enabled: Mutex<bool>,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn theater_control_enabled(&self) -> bool {
        *self
            .control_enabled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ControlSurface for ConsoleSurface {
    fn theaters_loaded(&self, names: &[String], selected: &str) {
        info!("Theaters: {} (selected: {selected})", names.join(", "));
    }

    fn set_theater_control_enabled(&self, enabled: bool) {
        *self
            .control_enabled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = enabled;
        if enabled {
            info!("Theater selection enabled");
        } else {
            info!("Theater selection disabled");
        }
    }

    fn post(&self, level: StatusLevel, message: &str) {
        match level {
            StatusLevel::Info => info!("{message}"),
            StatusLevel::Warn => warn!("{message}"),
            StatusLevel::Error => error!("{message}"),
        }
    }
}

/// One line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    SelectTheater(String),
    ListTheaters,
    Status,
    Help,
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse a console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));
        let command = match word.to_ascii_lowercase().as_str() {
            "theater" | "t" if !rest.is_empty() => Self::SelectTheater(rest.to_string()),
            "theaters" | "theater" | "t" => Self::ListTheaters,
            "status" | "s" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(command)
    }
}

pub const CONSOLE_HELP: &str = "\
commands:
  theater <name>   switch theater and regenerate kneeboards
  theaters         list theaters
  status           show pipeline status
  quit             stop serving and exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(
            ConsoleCommand::parse("theater Balkans"),
            Some(ConsoleCommand::SelectTheater("Balkans".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("  theater   Add-On Aegean  "),
            Some(ConsoleCommand::SelectTheater("Add-On Aegean".into()))
        );
        assert_eq!(ConsoleCommand::parse("theater"), Some(ConsoleCommand::ListTheaters));
        assert_eq!(ConsoleCommand::parse("THEATERS"), Some(ConsoleCommand::ListTheaters));
        assert_eq!(ConsoleCommand::parse("status"), Some(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("q"), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse("   "), None);
        assert_eq!(
            ConsoleCommand::parse("fly"),
            Some(ConsoleCommand::Unknown("fly".into()))
        );
    }

    #[test]
    fn test_console_surface_tracks_control() {
        let surface = ConsoleSurface::new();
        assert!(!surface.theater_control_enabled());
        surface.set_theater_control_enabled(true);
        assert!(surface.theater_control_enabled());
        surface.post(StatusLevel::Warn, "page 05 not updated");
    }
}
