use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::camera::VideoSource;
use crate::config::AppConfig;
use crate::detection::{filter_detections, DetectionSet, RawDetection};
use crate::detector::ObjectDetector;
use crate::error::CapabilityError;
use crate::overlay::{render, OverlaySurface};
use crate::session::{SessionState, SettingsUpdate};
use crate::speech::{AlertSelector, SpeechOutput};

const COMMAND_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopCommand {
    Start,
    Stop,
    Settings(SettingsUpdate),
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub skipped_not_ready: u64,
    pub skipped_busy: u64,
    pub frame_failures: u64,
    pub detector_failures: u64,
    pub stale_results_dropped: u64,
    pub alerts_spoken: u64,
    pub last_detection_ms: u64,
}

/// Snapshot published to observers after every command, tick and detector result.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    pub detections: Arc<DetectionSet>,
    pub error: Option<CapabilityError>,
    pub last_alert: Option<String>,
    pub session: SessionState,
    pub stats: LoopStats,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub interval: Duration,
    pub throttle: Duration,
    pub fallback_frame_width: u32,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            throttle: crate::speech::DEFAULT_THROTTLE,
            fallback_frame_width: crate::position::DEFAULT_FRAME_WIDTH,
        }
    }
}

impl LoopOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.detection.interval(),
            throttle: config.speech.throttle(),
            fallback_frame_width: config.detection.fallback_frame_width,
        }
    }
}

/// Cloneable control surface for a running [`DetectionLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    commands: mpsc::Sender<LoopCommand>,
    status: watch::Receiver<LoopStatus>,
}

impl LoopHandle {
    async fn send(&self, command: LoopCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Detection loop has shut down"))
    }

    pub async fn start(&self) -> Result<()> {
        self.send(LoopCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(LoopCommand::Stop).await
    }

    pub async fn set_sensitivity(&self, value: f32) -> Result<()> {
        self.send(LoopCommand::Settings(SettingsUpdate::Sensitivity(value))).await
    }

    pub async fn set_volume(&self, value: f32) -> Result<()> {
        self.send(LoopCommand::Settings(SettingsUpdate::Volume(value))).await
    }

    pub async fn set_speech_enabled(&self, enabled: bool) -> Result<()> {
        self.send(LoopCommand::Settings(SettingsUpdate::SpeechEnabled(enabled))).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(LoopCommand::Shutdown).await
    }

    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status.clone()
    }
}

struct PendingDetection {
    future: BoxFuture<'static, Result<Vec<RawDetection>>>,
    frame_size: (u32, u32),
    generation: u64,
    started: Instant,
}

/// Periodic frame → detector → filter → {overlay, speech} cycle.
///
/// Runs as a single task: settings, lifecycle commands and detector results
/// are all handled on it, and at most one detector call is outstanding.
pub struct DetectionLoop {
    source: Box<dyn VideoSource>,
    detector: Result<Box<dyn ObjectDetector>, CapabilityError>,
    speech: Box<dyn SpeechOutput>,
    overlay: Option<Box<dyn OverlaySurface>>,
    selector: AlertSelector,
    session: SessionState,
    options: LoopOptions,

    commands: mpsc::Receiver<LoopCommand>,
    status_tx: watch::Sender<LoopStatus>,

    state: LoopState,
    // bumped on every start so results from an earlier run are never published
    generation: u64,
    owns_source: bool,
    detections: Arc<DetectionSet>,
    error: Option<CapabilityError>,
    last_alert: Option<String>,
    stats: LoopStats,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn VideoSource>,
        detector: Box<dyn ObjectDetector>,
        speech: Box<dyn SpeechOutput>,
        session: SessionState,
        options: LoopOptions,
    ) -> (Self, LoopHandle) {
        Self::build(source, Ok(detector), speech, session, options)
    }

    /// A loop whose detector failed to load; it reports the error and never runs.
    pub fn without_detector(
        source: Box<dyn VideoSource>,
        load_error: CapabilityError,
        speech: Box<dyn SpeechOutput>,
        session: SessionState,
        options: LoopOptions,
    ) -> (Self, LoopHandle) {
        Self::build(source, Err(load_error), speech, session, options)
    }

    fn build(
        source: Box<dyn VideoSource>,
        detector: Result<Box<dyn ObjectDetector>, CapabilityError>,
        speech: Box<dyn SpeechOutput>,
        session: SessionState,
        options: LoopOptions,
    ) -> (Self, LoopHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let error = detector.as_ref().err().cloned();

        let initial = LoopStatus {
            state: LoopState::Idle,
            detections: Arc::new(Vec::new()),
            error: error.clone(),
            last_alert: None,
            session: session.clone(),
            stats: LoopStats::default(),
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let controller = Self {
            source,
            detector,
            speech,
            overlay: None,
            selector: AlertSelector::new(options.throttle),
            session,
            options,
            commands,
            status_tx,
            state: LoopState::Idle,
            generation: 0,
            owns_source: false,
            detections: Arc::new(Vec::new()),
            error,
            last_alert: None,
            stats: LoopStats::default(),
        };
        let handle = LoopHandle {
            commands: command_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    pub fn with_overlay(mut self, overlay: Box<dyn OverlaySurface>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Serve commands until `Shutdown` or every handle is dropped, then
    /// release the video source.
    pub async fn run(mut self) -> Result<()> {
        info!("Detection loop ready (period {}ms)", self.options.interval.as_millis());

        let mut ticker: Option<Interval> = None;
        let mut pending: Option<PendingDetection> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(LoopCommand::Start) => {
                        if self.start() {
                            ticker = Some(self.new_ticker());
                        }
                    }
                    Some(LoopCommand::Stop) => {
                        self.stop();
                        ticker = None;
                    }
                    Some(LoopCommand::Settings(update)) => {
                        self.session.apply(update);
                        self.publish();
                    }
                    Some(LoopCommand::Shutdown) | None => break,
                },
                _ = next_tick(&mut ticker) => {
                    if pending.is_some() {
                        self.stats.skipped_busy += 1;
                        debug!("Tick skipped: detection still in flight");
                    } else {
                        pending = self.begin_tick();
                    }
                    self.publish();
                }
                result = settle(&mut pending) => {
                    if let Some(done) = pending.take() {
                        self.finish_tick(done, result);
                    }
                    self.publish();
                }
            }
        }

        self.teardown();
        Ok(())
    }

    fn new_ticker(&self) -> Interval {
        let period = self.options.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    fn start(&mut self) -> bool {
        if self.state == LoopState::Running {
            debug!("Start ignored: already running");
            return false;
        }

        if let Err(e) = &self.detector {
            error!("Cannot start detection: {}", e);
            self.error = Some(e.clone());
            self.publish();
            return false;
        }

        if !self.source.is_active() {
            match self.source.activate() {
                Ok(()) => self.owns_source = true,
                Err(e) => {
                    error!("Cannot start detection: {}", e);
                    self.error = Some(e.into());
                    self.publish();
                    return false;
                }
            }
        }

        self.error = None;
        self.state = LoopState::Running;
        self.generation += 1;
        info!("Detection started");
        self.publish();
        true
    }

    fn stop(&mut self) {
        if self.state == LoopState::Idle {
            debug!("Stop ignored: already idle");
            return;
        }
        self.state = LoopState::Idle;
        self.release_source();
        info!("Detection stopped");
        self.publish();
    }

    fn release_source(&mut self) {
        if self.owns_source {
            self.source.deactivate();
            self.owns_source = false;
        }
    }

    fn teardown(&mut self) {
        info!("Detection loop shutting down after {} ticks", self.stats.ticks);
        self.state = LoopState::Idle;
        self.release_source();
        self.publish();
    }

    fn begin_tick(&mut self) -> Option<PendingDetection> {
        let detector = self.detector.as_ref().ok()?;

        // A not-ready tick leaves everything but its own counter untouched.
        let (width, height) = self.source.frame_size();
        if width == 0 || height == 0 {
            self.stats.skipped_not_ready += 1;
            debug!("Tick skipped: video not ready");
            return None;
        }

        self.stats.ticks += 1;
        if self.stats.ticks % 100 == 0 {
            info!(
                "Processed {} ticks, {} alerts spoken",
                self.stats.ticks, self.stats.alerts_spoken
            );
        }

        let frame = match self.source.current_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.frame_failures += 1;
                warn!("Frame capture failed: {}", e);
                return None;
            }
        };

        debug!("Running {} detector on {}x{} frame", detector.name(), width, height);
        Some(PendingDetection {
            future: detector.detect(frame),
            frame_size: (width, height),
            generation: self.generation,
            started: Instant::now(),
        })
    }

    fn finish_tick(&mut self, done: PendingDetection, result: Result<Vec<RawDetection>>) {
        if self.state != LoopState::Running || done.generation != self.generation {
            self.stats.stale_results_dropped += 1;
            debug!("Dropping detector result from a stopped run");
            return;
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.detector_failures += 1;
                warn!("Detection failed: {:#}", e);
                return;
            }
        };

        let now = Instant::now();
        self.stats.last_detection_ms = now.saturating_duration_since(done.started).as_millis() as u64;
        self.detections = Arc::new(filter_detections(raw, self.session.sensitivity(), now));

        let (width, height) = done.frame_size;
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.resize(width, height);
            render(overlay.as_mut(), &self.detections);
        }

        let frame_width = if width == 0 {
            self.options.fallback_frame_width
        } else {
            width
        };
        if let Some(message) = self.selector.maybe_speak(
            &self.detections,
            frame_width,
            &mut self.session,
            self.speech.as_mut(),
            now,
        ) {
            self.stats.alerts_spoken += 1;
            self.last_alert = Some(message);
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(LoopStatus {
            state: self.state,
            detections: Arc::clone(&self.detections),
            error: self.error.clone(),
            last_alert: self.last_alert.clone(),
            session: self.session.clone(),
            stats: self.stats.clone(),
        });
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn settle(pending: &mut Option<PendingDetection>) -> Result<Vec<RawDetection>> {
    match pending {
        Some(p) => (&mut p.future).await,
        None => std::future::pending().await,
    }
}
