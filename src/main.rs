use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use sightcue::camera::{list_cameras, CameraSource};
use sightcue::config::{AppConfig, SpeechBackend};
use sightcue::console::{dispatch, parse_command, HELP};
use sightcue::controller::{DetectionLoop, LoopHandle, LoopOptions};
use sightcue::detector::BasicDetector;
use sightcue::overlay::FrameOverlay;
use sightcue::session::SessionState;
use sightcue::speech::{LogSpeech, SpeechOutput, TtsSpeech};

#[derive(Parser)]
#[command(name = "sightcue")]
#[command(about = "Spoken alerts for objects seen by a live camera")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "sightcue.toml")]
    config: String,

    /// Camera device index
    #[arg(short = 'd', long)]
    camera_device: Option<u32>,

    /// Detection sensitivity (0.1 - 0.9)
    #[arg(long)]
    sensitivity: Option<f32>,

    /// Alert volume (0.0 - 1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Start with spoken alerts disabled
    #[arg(long)]
    mute: bool,

    /// Log alerts instead of using the text-to-speech engine
    #[arg(long)]
    log_speech: bool,

    /// List available cameras and exit
    #[arg(long)]
    list_cameras: bool,

    /// Start detecting immediately
    #[arg(long)]
    autostart: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("sightcue={}", log_level))
        .try_init();

    if args.list_cameras {
        for camera in list_cameras()? {
            println!("{}\t{}", camera.index, camera.name);
        }
        return Ok(());
    }

    info!("Starting sightcue");

    let mut config = AppConfig::load(&args.config).await?;
    apply_overrides(&mut config, &args);
    info!("Configuration loaded from {}", args.config);

    let (controller, handle) = build_loop(&config);

    spawn_status_reporter(&handle);
    spawn_console(handle.clone());
    spawn_shutdown_on_ctrl_c(handle.clone());

    if args.autostart {
        handle.start().await?;
    } else {
        println!("{}", HELP);
    }

    if let Err(e) = controller.run().await {
        error!("Detection loop error: {}", e);
        return Err(e);
    }

    info!("sightcue stopped");
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(device) = args.camera_device {
        config.camera.device_index = device;
    }
    if let Some(sensitivity) = args.sensitivity {
        config.detection.sensitivity = sensitivity;
    }
    if let Some(volume) = args.volume {
        config.speech.volume = volume;
    }
    if args.mute {
        config.speech.enabled = false;
    }
    if args.log_speech {
        config.speech.backend = SpeechBackend::Log;
    }
}

fn build_speech(config: &AppConfig) -> Box<dyn SpeechOutput> {
    match config.speech.backend {
        SpeechBackend::Tts => match TtsSpeech::new() {
            Ok(tts) => Box::new(tts),
            Err(e) => {
                warn!("Text-to-speech unavailable ({}), logging alerts instead", e);
                Box::new(LogSpeech)
            }
        },
        SpeechBackend::Log => Box::new(LogSpeech),
    }
}

fn build_loop(config: &AppConfig) -> (DetectionLoop, LoopHandle) {
    let source = Box::new(CameraSource::new(config.camera.clone()));
    let speech = build_speech(config);
    let session = SessionState::from_config(config);
    let options = LoopOptions::from_config(config);

    let (controller, handle) = match BasicDetector::load(config.detection.max_detections) {
        Ok(detector) => DetectionLoop::new(source, Box::new(detector), speech, session, options),
        Err(e) => {
            error!("{}", e);
            DetectionLoop::without_detector(source, e, speech, session, options)
        }
    };

    if !config.overlay.enabled {
        return (controller, handle);
    }
    let mut overlay = FrameOverlay::new(config.camera.width, config.camera.height);
    if let Some(path) = &config.overlay.snapshot_path {
        overlay = overlay.with_snapshot(path);
    }
    (controller.with_overlay(Box::new(overlay)), handle)
}

/// Prints spoken alerts and capability errors as they change.
fn spawn_status_reporter(handle: &LoopHandle) {
    let mut status = handle.subscribe();
    tokio::spawn(async move {
        let mut last_error = None;
        let mut last_alerts = 0;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if current.error != last_error {
                if let Some(e) = &current.error {
                    eprintln!("⚠️  {}", e);
                }
                last_error = current.error.clone();
            }
            if current.stats.alerts_spoken != last_alerts {
                if let Some(alert) = &current.last_alert {
                    println!("🔊 {}", alert);
                }
                last_alerts = current.stats.alerts_spoken;
            }
        }
    });
}

fn spawn_console(handle: LoopHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Console read error: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let command = match parse_command(&line) {
                Ok(command) => command,
                Err(e) => {
                    println!("{} ({})", e, HELP);
                    continue;
                }
            };
            match dispatch(&handle, command).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("Console command failed: {}", e);
                    break;
                }
            }
        }
    });
}

fn spawn_shutdown_on_ctrl_c(handle: LoopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = handle.shutdown().await;
        }
    });
}
