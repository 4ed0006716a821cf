//! Pipeline controller: the single owner of theater selection, watched paths,
//! control enablement, and the conversion queues.
//!
//! ## States
//!
//! ```text
//! Initializing ──first kneeboard pass done──▶ Ready ⇄ Converting
//!      │
//!      └──install dir not found──▶ Failed (terminal)
//! ```
//!
//! ## Event flow
//!
//! Monitors, conversion tasks, and [`PipelineHandle`] callers never touch
//! controller state. They send messages that one control loop consumes in
//! order:
//!
//! ```text
//! AssetMonitor ──AssetChange──┐
//! PipelineHandle ─SelectTheater┼──▶ control loop ──spawn_blocking──▶ converter
//! converter ──*Finished───────┘           │
//!                                         └──watch::Sender<PipelineStatus>
//! ```
//!
//! Each converter kind has a [`JobQueue`], so at most one kneeboard
//! conversion writes to the web root at any time. Events that arrive while a
//! job runs are merged into a single follow-up job.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::config::{persist_selected_theater, Config, LoadedConfig};
use crate::convert::briefing::{self, BriefingOutcome};
use crate::convert::kneeboard::{self, KneeboardReport};
use crate::convert::{BriefingJob, ConversionJob, JobQueue, JobScope};
use crate::error::ConversionError;
use crate::install::{texture_index, InstallLocator, SimLayout};
use crate::monitor::{AssetChange, AssetMonitor, WatchKind};
use crate::server::AssetServer;
use crate::surface::{ControlSurface, StatusLevel};
use crate::theater::TheaterSet;

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Initializing,
    Ready,
    Converting,
    /// The simulator install directory could not be resolved. Nothing runs.
    Failed,
}

/// Snapshot published after every controller step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub theater: String,
    pub theaters: Vec<String>,
    pub theater_control_enabled: bool,
    pub kneeboard_dir: Option<PathBuf>,
    pub watched: Vec<PathBuf>,
    pub server_addr: Option<SocketAddr>,
    pub kneeboard_conversions: u64,
    pub briefing_conversions: u64,
    pub last_error: Option<String>,
}

/// Everything the controller needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub config: Config,
    /// Where the selected theater is persisted.
    pub config_path: PathBuf,
    pub listen: SocketAddr,
    pub debounce: Duration,
}

impl PipelineOptions {
    /// Listen on all interfaces at the configured port.
    pub fn from_loaded(loaded: &LoadedConfig) -> Self {
        let config = loaded.config.clone();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], config.server.port)),
            debounce: Duration::from_millis(config.watch.debounce_ms),
            config_path: loaded.path.clone(),
            config,
        }
    }
}

enum ControlEvent {
    SelectTheater(String),
    KneeboardFinished {
        job: ConversionJob,
        result: Result<KneeboardReport, ConversionError>,
    },
    BriefingFinished {
        job: BriefingJob,
        result: Result<BriefingOutcome, ConversionError>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running (or failed) pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
    status: watch::Receiver<PipelineStatus>,
}

impl PipelineHandle {
    /// Ask the controller to switch theaters. Unknown names are reported
    /// through the surface and ignored.
    pub fn select_theater(&self, name: &str) {
        let _ = self.events.send(ControlEvent::SelectTheater(name.to_string()));
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    /// Stop the server and monitors, wait for running conversions, then return.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(ControlEvent::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Resolve the install, start monitors, the initial conversions, and the
/// server, then hand control to the event loop.
///
/// A resolution failure leaves the pipeline in [`PipelineState::Failed`]
/// with nothing started; every other failure is reported and the pipeline
/// keeps running.
pub async fn start(
    options: PipelineOptions,
    locator: &dyn InstallLocator,
    surface: Arc<dyn ControlSurface>,
) -> PipelineHandle {
    let (theaters, unknown) = TheaterSet::new(
        options.config.theaters.available.clone(),
        &options.config.theaters.selected,
    );
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(PipelineStatus::default());
    let handle = PipelineHandle {
        events: events_tx.clone(),
        status: status_rx,
    };

    let install_dir = match locator.resolve(&options.config.simulator.version) {
        Ok(dir) => dir,
        Err(e) => {
            let message = format!("Cannot start: {e}");
            surface.theaters_loaded(&theaters.names(), &theaters.selected().name);
            surface.set_theater_control_enabled(false);
            surface.post(StatusLevel::Error, &message);
            status_tx.send_replace(PipelineStatus {
                state: PipelineState::Failed,
                theater: theaters.selected().name.clone(),
                theaters: theaters.names(),
                last_error: Some(message),
                ..PipelineStatus::default()
            });
            return handle;
        }
    };

    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let mut controller = PipelineController {
        layout: SimLayout::new(install_dir),
        theaters,
        web_root: options.config.server.web_root.clone(),
        config_path: options.config_path,
        listen: options.listen,
        debounce: options.debounce,
        surface,
        state: PipelineState::Initializing,
        control_enabled: true,
        kneeboard_monitor: None,
        briefing_monitor: None,
        kneeboard_jobs: JobQueue::new(),
        briefing_jobs: JobQueue::new(),
        kneeboard_done: 0,
        briefing_done: 0,
        last_error: None,
        server: None,
        events: events_tx,
        changes: changes_tx,
        status: status_tx,
    };
    if let Some(unknown) = unknown {
        let fallback = controller.theaters.selected().name.clone();
        controller.report(
            StatusLevel::Warn,
            format!("Config names {unknown}; using {fallback}"),
        );
    }
    controller.startup().await;
    tokio::spawn(controller.run(events_rx, changes_rx));
    handle
}

struct PipelineController {
    layout: SimLayout,
    theaters: TheaterSet,
    web_root: PathBuf,
    config_path: PathBuf,
    listen: SocketAddr,
    debounce: Duration,
    surface: Arc<dyn ControlSurface>,

    state: PipelineState,
    control_enabled: bool,
    kneeboard_monitor: Option<AssetMonitor>,
    briefing_monitor: Option<AssetMonitor>,
    kneeboard_jobs: JobQueue<ConversionJob>,
    briefing_jobs: JobQueue<BriefingJob>,
    kneeboard_done: u64,
    briefing_done: u64,
    last_error: Option<String>,
    server: Option<AssetServer>,

    events: mpsc::UnboundedSender<ControlEvent>,
    changes: mpsc::UnboundedSender<AssetChange>,
    status: watch::Sender<PipelineStatus>,
}

impl PipelineController {
    async fn startup(&mut self) {
        info!("Simulator install: {}", self.layout.install_dir().display());
        self.surface
            .theaters_loaded(&self.theaters.names(), &self.theaters.selected().name);
        self.set_control(false);

        if let Err(e) = std::fs::create_dir_all(&self.web_root) {
            self.report(
                StatusLevel::Error,
                format!("Cannot create web root {}: {e}", self.web_root.display()),
            );
        }

        self.kneeboard_monitor = self.start_monitor(WatchKind::Kneeboard, self.kneeboard_paths());
        self.briefing_monitor =
            self.start_monitor(WatchKind::Briefing, vec![self.layout.briefing_path().path]);

        let dir = self.current_kneeboard_dir();
        self.submit_kneeboard(ConversionJob::whole(dir, true));
        self.submit_briefing(BriefingJob {
            directory: self.layout.briefing_dir(),
        });

        match AssetServer::start(self.listen, &self.web_root, self.status.subscribe()).await {
            Ok(server) => {
                self.report(
                    StatusLevel::Info,
                    format!("Serving kneeboards on http://{}", server.local_addr()),
                );
                self.server = Some(server);
            }
            Err(e) => self.report(StatusLevel::Error, format!("HTTP server not started: {e}")),
        }
        self.publish();
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ControlEvent>,
        mut changes: mpsc::UnboundedReceiver<AssetChange>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => match event {
                    ControlEvent::SelectTheater(name) => self.select_theater(&name),
                    ControlEvent::KneeboardFinished { job, result } => {
                        self.kneeboard_finished(&job, result)
                    }
                    ControlEvent::BriefingFinished { job, result } => {
                        self.briefing_finished(&job, result)
                    }
                    ControlEvent::Shutdown(done) => {
                        self.shutdown(&mut events, done).await;
                        return;
                    }
                },
                Some(change) = changes.recv() => self.asset_changed(change),
                else => break,
            }
            self.publish();
        }
    }

    fn asset_changed(&mut self, change: AssetChange) {
        match change.kind {
            WatchKind::Kneeboard => {
                // Changes queued before a theater switch belong to the old folder.
                if change.path.parent() != Some(self.current_kneeboard_dir().as_path()) {
                    debug!("Ignoring stale change {}", change.path.display());
                    return;
                }
                let Some(index) = texture_index(&change.path) else {
                    debug!("Ignoring non-texture change {}", change.path.display());
                    return;
                };
                // Page 1 changing means the simulator is likely rewriting the set.
                self.submit_kneeboard(ConversionJob::single(change.path, index == 1));
            }
            WatchKind::Briefing => self.submit_briefing(BriefingJob {
                directory: change.path,
            }),
        }
    }

    fn select_theater(&mut self, name: &str) {
        if !self.control_enabled {
            self.report(
                StatusLevel::Warn,
                format!("Theater selection is disabled while converting; ignoring {name}"),
            );
            return;
        }
        match self.theaters.select(name) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Theater {name} already selected");
                return;
            }
            Err(unknown) => {
                self.report(StatusLevel::Warn, format!("Ignoring {unknown}"));
                return;
            }
        }
        self.report(StatusLevel::Info, format!("Theater changed to {name}"));

        if let Err(e) = persist_selected_theater(&self.config_path, name) {
            self.report(StatusLevel::Error, format!("Selected theater not saved: {e}"));
        }

        let paths = self.kneeboard_paths();
        match self
            .kneeboard_monitor
            .as_mut()
            .map(|m| m.restart(Some(&paths)))
        {
            Some(Ok(())) => {}
            Some(Err(e)) => self.report(
                StatusLevel::Warn,
                format!("Kneeboard monitor not watching {name}: {e}"),
            ),
            None => self.kneeboard_monitor = self.start_monitor(WatchKind::Kneeboard, paths),
        }

        let dir = self.current_kneeboard_dir();
        self.submit_kneeboard(ConversionJob::whole(dir, true));
    }

    fn submit_kneeboard(&mut self, job: ConversionJob) {
        if job.locks_control {
            self.set_control(false);
        }
        if let Some(job) = self.kneeboard_jobs.submit(job) {
            self.spawn_kneeboard(job);
        }
    }

    fn submit_briefing(&mut self, job: BriefingJob) {
        if let Some(job) = self.briefing_jobs.submit(job) {
            self.spawn_briefing(job);
        }
    }

    fn spawn_kneeboard(&mut self, job: ConversionJob) {
        if self.state != PipelineState::Initializing {
            self.state = PipelineState::Converting;
        }
        debug!(
            "Kneeboard job started: {} -> {}",
            job.scope.source().display(),
            job.target_names().join(", ")
        );
        let web_root = self.web_root.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let task_job = job.clone();
            let result = tokio::task::spawn_blocking(move || kneeboard::run(&task_job, &web_root))
                .await
                .unwrap_or_else(|e| Err(ConversionError::Task(e.to_string())));
            let _ = events.send(ControlEvent::KneeboardFinished { job, result });
        });
    }

    fn spawn_briefing(&self, job: BriefingJob) {
        let web_root = self.web_root.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let dir = job.directory.clone();
            let result = tokio::task::spawn_blocking(move || briefing::convert(&dir, &web_root))
                .await
                .unwrap_or_else(|e| Err(ConversionError::Task(e.to_string())));
            let _ = events.send(ControlEvent::BriefingFinished { job, result });
        });
    }

    fn kneeboard_finished(
        &mut self,
        job: &ConversionJob,
        result: Result<KneeboardReport, ConversionError>,
    ) {
        self.kneeboard_done += 1;
        match result {
            Ok(report) => {
                for (index, e) in &report.failures {
                    self.report(StatusLevel::Warn, format!("Page {index:02} not updated: {e}"));
                }
                let what = match &job.scope {
                    JobScope::SingleFile(path) => path.display().to_string(),
                    JobScope::WholeDirectory(dir) => dir.display().to_string(),
                };
                self.report(
                    StatusLevel::Info,
                    format!("Converted {} kneeboard page(s) from {what}", report.converted.len()),
                );
            }
            Err(e) => self.report(StatusLevel::Error, format!("Kneeboard conversion failed: {e}")),
        }

        // Some watcher backends drop a file watch once the file is replaced.
        if let Some(Err(e)) = self.kneeboard_monitor.as_mut().map(|m| m.restart(None)) {
            self.report(StatusLevel::Warn, format!("Kneeboard monitor not re-armed: {e}"));
        }

        match self.kneeboard_jobs.finish() {
            Some(next) => {
                self.set_control(!next.locks_control);
                self.state = PipelineState::Converting;
                self.spawn_kneeboard(next);
            }
            None => {
                self.set_control(true);
                self.state = PipelineState::Ready;
            }
        }
    }

    fn briefing_finished(&mut self, job: &BriefingJob, result: Result<BriefingOutcome, ConversionError>) {
        self.briefing_done += 1;
        match result {
            Ok(BriefingOutcome::Copied { source, bytes }) => self.report(
                StatusLevel::Info,
                format!("Briefing updated from {} ({bytes} bytes)", source.display()),
            ),
            Ok(BriefingOutcome::NoCandidates) => {
                debug!("No briefing in {}", job.directory.display());
            }
            Ok(BriefingOutcome::SourceUnavailable { source, reason }) => self.report(
                StatusLevel::Warn,
                format!("Briefing {} not readable: {reason}", source.display()),
            ),
            Err(e) => self.report(StatusLevel::Error, format!("Briefing not updated: {e}")),
        }
        if let Some(next) = self.briefing_jobs.finish() {
            self.spawn_briefing(next);
        }
    }

    async fn shutdown(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<ControlEvent>,
        done: oneshot::Sender<()>,
    ) {
        info!("Pipeline shutting down");
        self.kneeboard_monitor = None;
        self.briefing_monitor = None;
        self.kneeboard_jobs.cancel_pending();
        self.briefing_jobs.cancel_pending();
        if let Some(server) = self.server.take() {
            server.stop().await;
        }

        // Let running conversions land so the web root is left consistent.
        let mut waiters = vec![done];
        while self.kneeboard_jobs.is_busy() || self.briefing_jobs.is_busy() {
            match events.recv().await {
                Some(ControlEvent::KneeboardFinished { .. }) => {
                    self.kneeboard_jobs.finish();
                }
                Some(ControlEvent::BriefingFinished { .. }) => {
                    self.briefing_jobs.finish();
                }
                Some(ControlEvent::Shutdown(done)) => waiters.push(done),
                Some(ControlEvent::SelectTheater(_)) => {}
                None => break,
            }
        }
        self.publish();
        info!("Pipeline stopped");
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    fn start_monitor(&mut self, kind: WatchKind, paths: Vec<PathBuf>) -> Option<AssetMonitor> {
        match AssetMonitor::start(kind, &paths, self.debounce, self.changes.clone()) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                self.report(
                    StatusLevel::Warn,
                    format!("{kind:?} monitor not started, serving existing files: {e}"),
                );
                None
            }
        }
    }

    fn current_kneeboard_dir(&self) -> PathBuf {
        self.layout.kneeboard_dir(self.theaters.selected())
    }

    fn kneeboard_paths(&self) -> Vec<PathBuf> {
        self.layout
            .kneeboard_paths(self.theaters.selected())
            .into_iter()
            .map(|asset| asset.path)
            .collect()
    }

    fn set_control(&mut self, enabled: bool) {
        if self.control_enabled != enabled {
            self.control_enabled = enabled;
            self.surface.set_theater_control_enabled(enabled);
        }
    }

    fn report(&mut self, level: StatusLevel, message: String) {
        self.surface.post(level, &message);
        if level == StatusLevel::Error {
            self.last_error = Some(message);
        }
    }

    fn publish(&self) {
        let watched = [&self.kneeboard_monitor, &self.briefing_monitor]
            .into_iter()
            .flatten()
            .flat_map(AssetMonitor::watched_paths)
            .collect();
        self.status.send_replace(PipelineStatus {
            state: self.state,
            theater: self.theaters.selected().name.clone(),
            theaters: self.theaters.names(),
            theater_control_enabled: self.control_enabled,
            kneeboard_dir: Some(self.current_kneeboard_dir()),
            watched,
            server_addr: self.server.as_ref().map(AssetServer::local_addr),
            kneeboard_conversions: self.kneeboard_done,
            briefing_conversions: self.briefing_done,
            last_error: self.last_error.clone(),
        });
    }
}
