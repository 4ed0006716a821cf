//! Configuration loading, defaults, and persistence of the selected theater.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `BMSNAV_PORT`, `BMSNAV_WEB_ROOT`,
//!    `BMSNAV_INSTALL_DIR`
//! 2. **Config file** — path via `--config <path>`, or `bmsnav.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! ```toml
//! [server]
//! port = 2676
//! web_root = "serve"
//!
//! [simulator]
//! install_dir = "C:\\Falcon BMS 4.37"   # optional, skips auto-detection
//! version = "4.37"
//!
//! [watch]
//! debounce_ms = 250
//!
//! [logging]
//! level = "info"
//!
//! [theaters]
//! selected = "Korea"
//!
//! [[theaters.available]]
//! name = "Korea"
//!
//! [[theaters.available]]
//! name = "Balkans"
//! add_on_subdir = "Add-On Balkans"
//! ```
//!
//! Loading never fails. Each field is read on its own: a missing field takes
//! its default, an invalid one takes its default and adds a [`ConfigIssue`].
//! A file that cannot be read or parsed yields all defaults plus one issue.

use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::error::PersistError;
use crate::theater::{default_theaters, Theater};
use crate::util::{expand_tilde, write_atomic};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "bmsnav.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub simulator: SimulatorConfig,
    pub theaters: TheaterConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port in `(1024, 65535]` (default 2676). Binds all interfaces.
    pub port: u16,
    /// Directory served over HTTP and written by the converters (default `serve`).
    pub web_root: PathBuf,
}

/// Where to find the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Explicit install directory, skipping auto-detection.
    pub install_dir: Option<PathBuf>,
    /// Simulator version used for auto-detection (default `4.37`).
    pub version: String,
}

/// Known theaters and the persisted selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TheaterConfig {
    pub selected: String,
    pub available: Vec<Theater>,
}

/// Filesystem watcher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Quiet period before a change is reported (default 250 ms).
    pub debounce_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    pub level: String,
}

/// A field that was present but unusable and fell back to its default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ConfigIssue {
    /// Dotted key, e.g. `server.port`, or `*` for the whole file.
    pub field: String,
    pub message: String,
}

/// Result of [`Config::load`]: defaults already applied, plus what was wrong.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// File the config came from and the selection is persisted to.
    pub path: PathBuf,
    pub issues: Vec<ConfigIssue>,
}

pub const DEFAULT_PORT: u16 = 2676;
const MIN_PORT_EXCLUSIVE: i64 = 1024;
const MIN_DEBOUNCE_MS: i64 = 10;
const MAX_DEBOUNCE_MS: i64 = 10_000;
const SECTIONS: [&str; 5] = ["server", "simulator", "watch", "logging", "theaters"];

fn default_web_root() -> PathBuf {
    PathBuf::from("serve")
}
fn default_version() -> String {
    "4.37".to_string()
}
fn default_selected() -> String {
    "Korea".to_string()
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            web_root: default_web_root(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            install_dir: None,
            version: default_version(),
        }
    }
}

impl Default for TheaterConfig {
    fn default() -> Self {
        Self {
            selected: default_selected(),
            available: default_theaters(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            simulator: SimulatorConfig::default(),
            theaters: TheaterConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `None`, looks for `bmsnav.toml` in the current directory.
    /// A missing default file is not an issue; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> LoadedConfig {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut loaded = match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => LoadedConfig {
                config: Config::default(),
                path: PathBuf::new(),
                issues: Vec::new(),
            },
            Err(e) => LoadedConfig {
                config: Config::default(),
                path: PathBuf::new(),
                issues: vec![ConfigIssue {
                    field: "*".into(),
                    message: format!("cannot read {}: {e}; using defaults", path.display()),
                }],
            },
        };
        loaded.path = path;
        loaded.apply_env();
        loaded
    }

    /// Parse TOML content, applying defaults field by field.
    pub fn parse(content: &str) -> LoadedConfig {
        let mut issues = Vec::new();
        let root = match content.parse::<Table>() {
            Ok(t) => t,
            Err(e) => {
                issues.push(ConfigIssue {
                    field: "*".into(),
                    message: format!("malformed config ({}); using defaults", e.message()),
                });
                Table::new()
            }
        };

        let mut fields = Fields {
            root: &root,
            issues: &mut issues,
        };
        fields.check_sections();

        let server = ServerConfig {
            port: fields.read("server", "port", DEFAULT_PORT, parse_port),
            web_root: fields.read("server", "web_root", default_web_root(), parse_path),
        };
        let simulator = SimulatorConfig {
            install_dir: fields.read("simulator", "install_dir", None, |v| parse_path(v).map(Some)),
            version: fields.read("simulator", "version", default_version(), parse_string),
        };
        let watch = WatchConfig {
            debounce_ms: fields.read("watch", "debounce_ms", default_debounce_ms(), |v| {
                parse_ranged(v, MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS)
            }),
        };
        let logging = LoggingConfig {
            level: fields.read("logging", "level", default_log_level(), parse_string),
        };
        let theaters = TheaterConfig {
            selected: fields.read("theaters", "selected", default_selected(), parse_string),
            available: fields.theaters(),
        };

        LoadedConfig {
            config: Config {
                server,
                simulator,
                theaters,
                watch,
                logging,
            },
            path: PathBuf::new(),
            issues,
        }
    }
}

impl LoadedConfig {
    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("BMSNAV_PORT") {
            match parse_port(&Value::String(port)) {
                Ok(p) => self.config.server.port = p,
                Err(message) => self.issues.push(ConfigIssue {
                    field: "BMSNAV_PORT".into(),
                    message,
                }),
            }
        }
        if let Ok(root) = std::env::var("BMSNAV_WEB_ROOT") {
            self.config.server.web_root = PathBuf::from(expand_tilde(&root).into_owned());
        }
        if let Ok(dir) = std::env::var("BMSNAV_INSTALL_DIR") {
            self.config.simulator.install_dir = Some(PathBuf::from(expand_tilde(&dir).into_owned()));
        }
    }
}

/// Per-field reader that records fallbacks instead of failing.
struct Fields<'a> {
    root: &'a Table,
    issues: &'a mut Vec<ConfigIssue>,
}

impl<'a> Fields<'a> {
    /// Flag top-level keys that should be tables but are not.
    fn check_sections(&mut self) {
        for name in SECTIONS {
            if self.root.get(name).is_some_and(|v| !v.is_table()) {
                self.issues.push(ConfigIssue {
                    field: name.to_string(),
                    message: "expected a table; using defaults".into(),
                });
            }
        }
    }

    fn get(&self, section: &str, key: &str) -> Option<&'a Value> {
        match self.root.get(section) {
            Some(Value::Table(t)) => t.get(key),
            _ => None,
        }
    }

    fn read<T>(
        &mut self,
        section: &str,
        key: &str,
        default: T,
        parse: impl FnOnce(&Value) -> Result<T, String>,
    ) -> T {
        let Some(value) = self.get(section, key) else {
            return default;
        };
        match parse(value) {
            Ok(v) => v,
            Err(message) => {
                self.issues.push(ConfigIssue {
                    field: format!("{section}.{key}"),
                    message: format!("{message}; using default"),
                });
                default
            }
        }
    }

    fn theaters(&mut self) -> Vec<Theater> {
        let Some(value) = self.get("theaters", "available").cloned() else {
            return default_theaters();
        };
        let Value::Array(entries) = value else {
            self.issues.push(ConfigIssue {
                field: "theaters.available".into(),
                message: "expected an array of tables; using defaults".into(),
            });
            return default_theaters();
        };

        let mut theaters: Vec<Theater> = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            match entry.try_into::<Theater>() {
                Ok(t) if t.name.trim().is_empty() => self.issues.push(ConfigIssue {
                    field: format!("theaters.available[{i}]"),
                    message: "empty theater name; skipped".into(),
                }),
                Ok(t) if theaters.iter().any(|known| known.name == t.name) => {
                    self.issues.push(ConfigIssue {
                        field: format!("theaters.available[{i}]"),
                        message: format!("duplicate theater {:?}; skipped", t.name),
                    });
                }
                Ok(t) => theaters.push(t),
                Err(e) => self.issues.push(ConfigIssue {
                    field: format!("theaters.available[{i}]"),
                    message: format!("{}; skipped", e.message()),
                }),
            }
        }
        if theaters.is_empty() {
            self.issues.push(ConfigIssue {
                field: "theaters.available".into(),
                message: "no usable theaters; using defaults".into(),
            });
            return default_theaters();
        }
        theaters
    }
}

fn parse_port(value: &Value) -> Result<u16, String> {
    let port = match value {
        Value::Integer(i) => *i,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("port {s:?} is not a number"))?,
        other => return Err(format!("port must be an integer, got {}", other.type_str())),
    };
    if port <= MIN_PORT_EXCLUSIVE || port > i64::from(u16::MAX) {
        return Err(format!("port {port} outside (1024, 65535]"));
    }
    u16::try_from(port).map_err(|e| e.to_string())
}

fn parse_ranged(value: &Value, min: i64, max: i64) -> Result<u64, String> {
    match value {
        Value::Integer(i) if (min..=max).contains(i) => u64::try_from(*i).map_err(|e| e.to_string()),
        Value::Integer(i) => Err(format!("{i} outside [{min}, {max}]")),
        other => Err(format!("expected an integer, got {}", other.type_str())),
    }
}

fn parse_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) => Err("empty string".into()),
        other => Err(format!("expected a string, got {}", other.type_str())),
    }
}

fn parse_path(value: &Value) -> Result<PathBuf, String> {
    parse_string(value).map(|s| PathBuf::from(expand_tilde(&s).into_owned()))
}

/// Write `selected` into `[theaters] selected` of the file at `path`.
///
/// Only that key changes; comments aside, the rest of the document is kept.
/// A missing file is created. A file that does not parse is left alone so a
/// hand-edited config with a typo is never clobbered. The write is atomic.
pub fn persist_selected_theater(path: &Path, selected: &str) -> Result<(), PersistError> {
    let mut root = match std::fs::read_to_string(path) {
        Ok(content) => content
            .parse::<Table>()
            .map_err(|e| PersistError::Malformed {
                path: path.to_path_buf(),
                message: e.message().to_string(),
            })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::new(),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let theaters = root
        .entry("theaters")
        .or_insert_with(|| Value::Table(Table::new()));
    if !theaters.is_table() {
        *theaters = Value::Table(Table::new());
    }
    if let Value::Table(t) = theaters {
        t.insert("selected".into(), Value::String(selected.to_string()));
    }

    let content = toml::to_string_pretty(&root)?;
    write_atomic(path, content.as_bytes()).map_err(|source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_is_all_defaults() {
        let loaded = Config::parse("");
        assert!(loaded.issues.is_empty());
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn test_parse_full() {
        let loaded = Config::parse(
            r#"
            [server]
            port = 8080
            web_root = "/srv/kneeboards"

            [simulator]
            install_dir = "/games/bms"
            version = "4.38"

            [watch]
            debounce_ms = 100

            [theaters]
            selected = "Balkans"

            [[theaters.available]]
            name = "Korea"

            [[theaters.available]]
            name = "Balkans"
            add_on_subdir = "Add-On Balkans"
            "#,
        );
        assert!(loaded.issues.is_empty(), "{:?}", loaded.issues);
        let c = loaded.config;
        assert_eq!(c.server.port, 8080);
        assert_eq!(c.server.web_root, PathBuf::from("/srv/kneeboards"));
        assert_eq!(c.simulator.install_dir, Some(PathBuf::from("/games/bms")));
        assert_eq!(c.simulator.version, "4.38");
        assert_eq!(c.watch.debounce_ms, 100);
        assert_eq!(c.theaters.selected, "Balkans");
        assert_eq!(c.theaters.available.len(), 2);
        assert_eq!(
            c.theaters.available[1].add_on_subdir.as_deref(),
            Some("Add-On Balkans")
        );
    }

    #[test]
    fn test_invalid_port_falls_back_independently() {
        let loaded = Config::parse("[server]\nport = 80\nweb_root = \"www\"\n");
        assert_eq!(loaded.config.server.port, DEFAULT_PORT);
        assert_eq!(loaded.config.server.web_root, PathBuf::from("www"));
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].field, "server.port");
        assert!(loaded.issues[0].to_string().starts_with("server.port: "));
    }

    #[test]
    fn test_port_bounds() {
        assert!(parse_port(&Value::Integer(1024)).is_err());
        assert_eq!(parse_port(&Value::Integer(1025)), Ok(1025));
        assert_eq!(parse_port(&Value::Integer(65535)), Ok(65535));
        assert!(parse_port(&Value::Integer(65536)).is_err());
        assert!(parse_port(&Value::String("abc".into())).is_err());
        assert_eq!(parse_port(&Value::String("2676".into())), Ok(2676));
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let loaded = Config::parse("[server\nport = ");
        assert_eq!(loaded.config, Config::default());
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].field, "*");
    }

    #[test]
    fn test_mistyped_section_reported_once() {
        let loaded = Config::parse("server = 3\n");
        assert_eq!(loaded.config.server, ServerConfig::default());
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].field, "server");
    }

    #[test]
    fn test_bad_theater_entries_skipped() {
        let loaded = Config::parse(
            r#"
            [[theaters.available]]
            name = "Korea"
            [[theaters.available]]
            name = "Korea"
            [[theaters.available]]
            add_on_subdir = "nameless"
            "#,
        );
        assert_eq!(loaded.config.theaters.available, vec![Theater::base("Korea")]);
        assert_eq!(loaded.issues.len(), 2);
    }

    #[test]
    fn test_no_usable_theaters_uses_defaults() {
        let loaded = Config::parse("[theaters]\navailable = \"Korea\"\n");
        assert_eq!(loaded.config.theaters.available, default_theaters());
        assert_eq!(loaded.issues.len(), 1);
    }

    #[test]
    fn test_debounce_range() {
        let loaded = Config::parse("[watch]\ndebounce_ms = 5\n");
        assert_eq!(loaded.config.watch.debounce_ms, 250);
        assert_eq!(loaded.issues[0].field, "watch.debounce_ms");
    }

    #[test]
    fn test_load_missing_explicit_file_reports_issue() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.toml");
        let loaded = Config::load(Some(&path));
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.config.theaters, TheaterConfig::default());
    }

    #[test]
    fn test_persist_preserves_other_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bmsnav.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[theaters]\nselected = \"Korea\"\n",
        )
        .unwrap();

        persist_selected_theater(&path, "Balkans").unwrap();

        let loaded = Config::load(Some(&path));
        assert!(loaded.issues.is_empty());
        assert_eq!(loaded.config.theaters.selected, "Balkans");
        assert_eq!(loaded.config.server.port, 9000);
    }

    #[test]
    fn test_persist_creates_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("new.toml");
        persist_selected_theater(&path, "Israel").unwrap();
        let loaded = Config::load(Some(&path));
        assert_eq!(loaded.config.theaters.selected, "Israel");
    }

    #[test]
    fn test_persist_refuses_malformed_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.toml");
        std::fs::write(&path, "[theaters\n").unwrap();
        let err = persist_selected_theater(&path, "Israel").unwrap_err();
        assert!(matches!(err, PersistError::Malformed { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[theaters\n");
    }
}
