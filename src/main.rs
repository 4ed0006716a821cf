#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # bmsnav
//!
//! Serves Falcon BMS kneeboards and mission briefings to tablets on the LAN.
//!
//! bmsnav watches the simulator's kneeboard textures and briefings folder,
//! converts every change into PNG pages (`l01.png`..`r16.png`) and
//! `briefing.html` inside a web root, and serves that web root over HTTP on
//! port 2676.
//!
//! ## Subcommands
//!
//! - `bmsnav serve` (default) — run the pipeline and HTTP server
//! - `bmsnav convert --source DIR` — one-shot kneeboard conversion
//! - `bmsnav theaters` — list configured theaters
//!
//! While serving, stdin takes console commands (`theater <name>`,
//! `theaters`, `status`, `quit`).
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, console, graceful shutdown
//! controller.rs    — pipeline state machine (theater, monitors, job queues)
//! monitor.rs       — debounced notify watchers
//! convert/
//!   splitter.rs    — DDS decode, half split, PNG encode
//!   kneeboard.rs   — single-file and whole-directory passes
//!   briefing.rs    — newest *briefing.html copy
//!   mod.rs         — ConversionJob, JobQueue
//! server.rs        — axum static server, /api/health
//! config.rs        — TOML + env-var configuration
//! install.rs       — install discovery, asset layout
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use bmsnav::controller::{self, PipelineHandle, PipelineOptions, PipelineState};
use bmsnav::convert::kneeboard;
use bmsnav::surface::{ConsoleCommand, ConsoleSurface, CONSOLE_HELP};
use bmsnav::{Config, LoadedConfig, StandardLocator, TheaterSet};

/// Falcon BMS kneeboard and briefing server.
#[derive(Parser)]
#[command(name = "bmsnav", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch, convert, and serve (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Convert a kneeboard folder (or one texture) once and exit.
    Convert {
        /// Kneeboard texture folder or a single `79xx.dds` file.
        #[arg(long)]
        source: PathBuf,
        /// Output directory (defaults to the configured web root).
        #[arg(long)]
        web_root: Option<PathBuf>,
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List configured theaters and mark the selected one.
    Theaters {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        Some(Commands::Convert {
            source,
            web_root,
            config,
        }) => run_convert(&source, web_root, config.as_deref()),
        Some(Commands::Theaters { config }) => list_theaters(config.as_deref()),
        None => run_server(None).await,
    };
    // A console read blocked on stdin would keep the runtime alive.
    std::process::exit(code);
}

fn init_tracing(loaded: &LoadedConfig) {
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| loaded.config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    for issue in &loaded.issues {
        warn!("Config {}: {issue}", loaded.path.display());
    }
}

async fn run_server(config_path: Option<&Path>) -> i32 {
    let loaded = Config::load(config_path);
    init_tracing(&loaded);

    info!("bmsnav v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Web root: {}", loaded.config.server.web_root.display());

    let locator = StandardLocator::from_config(&loaded.config.simulator);
    let surface = Arc::new(ConsoleSurface::new());
    let handle = controller::start(PipelineOptions::from_loaded(&loaded), &locator, surface).await;

    if handle.status().state == PipelineState::Failed {
        error!("No simulator installation; set [simulator] install_dir or BMSNAV_INSTALL_DIR");
        return 1;
    }

    let mut console = tokio::spawn(run_console(handle.clone()));
    tokio::select! {
        () = shutdown_signal() => {}
        _ = &mut console => info!("Quit requested"),
    }
    console.abort();

    info!("Shutting down...");
    handle.shutdown().await;
    info!("Goodbye");
    0
}

fn run_convert(source: &Path, web_root: Option<PathBuf>, config_path: Option<&Path>) -> i32 {
    let loaded = Config::load(config_path);
    init_tracing(&loaded);

    let web_root = web_root.unwrap_or(loaded.config.server.web_root);
    if let Err(e) = std::fs::create_dir_all(&web_root) {
        error!("Cannot create {}: {e}", web_root.display());
        return 1;
    }

    match kneeboard::convert(source, source.is_dir(), &web_root) {
        Ok(report) => {
            for (index, e) in &report.failures {
                warn!("Page {index:02} not converted: {e}");
            }
            info!(
                "Converted {} page(s) into {}",
                report.converted.len(),
                web_root.display()
            );
            i32::from(!report.is_complete())
        }
        Err(e) => {
            error!("Conversion failed: {e}");
            1
        }
    }
}

fn list_theaters(config_path: Option<&Path>) -> i32 {
    let loaded = Config::load(config_path);
    for issue in &loaded.issues {
        eprintln!("warning: {issue}");
    }
    let (set, _) = TheaterSet::new(
        loaded.config.theaters.available,
        &loaded.config.theaters.selected,
    );
    let selected = set.selected().name.clone();
    for theater in set.theaters() {
        let marker = if theater.name == selected { '*' } else { ' ' };
        match &theater.add_on_subdir {
            Some(sub) => println!("{marker} {} ({sub})", theater.name),
            None => println!("{marker} {}", theater.name),
        }
    }
    0
}

/// Read console commands until `quit`. If stdin closes, keep serving.
async fn run_console(handle: PipelineHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, console disabled");
                break;
            }
            Err(e) => {
                warn!("Console read failed: {e}");
                break;
            }
        };

        match ConsoleCommand::parse(&line) {
            None => {}
            Some(ConsoleCommand::SelectTheater(name)) => handle.select_theater(&name),
            Some(ConsoleCommand::ListTheaters) => {
                let status = handle.status();
                for name in &status.theaters {
                    let marker = if *name == status.theater { '*' } else { ' ' };
                    println!("{marker} {name}");
                }
                if !status.theater_control_enabled {
                    println!("(theater selection disabled while converting)");
                }
            }
            Some(ConsoleCommand::Status) => match serde_json::to_string_pretty(&handle.status()) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("Cannot render status: {e}"),
            },
            Some(ConsoleCommand::Help) => println!("{CONSOLE_HELP}"),
            Some(ConsoleCommand::Quit) => return,
            Some(ConsoleCommand::Unknown(line)) => {
                println!("unknown command: {line}\n{CONSOLE_HELP}");
            }
        }
    }
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            },
            Err(e) => {
                warn!("SIGTERM handler not installed: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
