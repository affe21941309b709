use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use sightcue::camera::{Frame, VideoSource};
use sightcue::controller::{DetectionLoop, LoopHandle, LoopOptions, LoopState};
use sightcue::detection::{BoundingBox, RawDetection};
use sightcue::detector::ObjectDetector;
use sightcue::error::{CameraError, CapabilityError};
use sightcue::overlay::{DrawCommand, OverlaySurface};
use sightcue::session::SessionState;
use sightcue::speech::SpeechOutput;

#[derive(Default)]
struct SourceLog {
    active: bool,
    activations: u32,
    deactivations: u32,
    size: (u32, u32),
    fail_with: Option<CameraError>,
}

struct FakeSource(Arc<Mutex<SourceLog>>);

impl VideoSource for FakeSource {
    fn is_active(&self) -> bool {
        self.0.lock().active
    }

    fn activate(&mut self) -> Result<(), CameraError> {
        let mut log = self.0.lock();
        if let Some(e) = log.fail_with.clone() {
            return Err(e);
        }
        log.active = true;
        log.activations += 1;
        Ok(())
    }

    fn deactivate(&mut self) {
        let mut log = self.0.lock();
        log.active = false;
        log.deactivations += 1;
    }

    fn frame_size(&self) -> (u32, u32) {
        let log = self.0.lock();
        if log.active {
            log.size
        } else {
            (0, 0)
        }
    }

    fn current_frame(&mut self) -> Result<Frame> {
        let (w, h) = self.frame_size();
        Ok(Frame::new(w, h, 3))
    }
}

#[derive(Default)]
struct DetectorLog {
    calls: u32,
    in_flight: u32,
    max_in_flight: u32,
}

struct FakeDetector {
    log: Arc<Mutex<DetectorLog>>,
    delay: Duration,
    scripted: Mutex<VecDeque<Result<Vec<RawDetection>, String>>>,
    default: Vec<RawDetection>,
}

impl ObjectDetector for FakeDetector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn detect(&self, _frame: Frame) -> BoxFuture<'static, Result<Vec<RawDetection>>> {
        let next = self
            .scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()));
        {
            let mut log = self.log.lock();
            log.calls += 1;
            log.in_flight += 1;
            log.max_in_flight = log.max_in_flight.max(log.in_flight);
        }

        let log = Arc::clone(&self.log);
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            log.lock().in_flight -= 1;
            next.map_err(|e| anyhow!(e))
        }
        .boxed()
    }
}

struct FakeSpeech(Arc<Mutex<Vec<(String, f32)>>>);

impl SpeechOutput for FakeSpeech {
    fn speak(&mut self, text: &str, volume: f32) {
        self.0.lock().push((text.to_string(), volume));
    }
}

struct SharedOverlay(Arc<Mutex<Vec<DrawCommand>>>, Arc<Mutex<Option<(u32, u32)>>>);

impl OverlaySurface for SharedOverlay {
    fn clear(&mut self) {
        self.0.lock().clear();
        self.0.lock().push(DrawCommand::Clear);
    }

    fn draw_rect(&mut self, bbox: &BoundingBox) {
        self.0.lock().push(DrawCommand::Rect(*bbox));
    }

    fn draw_label(&mut self, text: &str, x: f32, y: f32) {
        self.0.lock().push(DrawCommand::Label { text: text.to_string(), x, y });
    }

    fn resize(&mut self, width: u32, height: u32) {
        *self.1.lock() = Some((width, height));
    }
}

struct Observed {
    source: Arc<Mutex<SourceLog>>,
    detector: Arc<Mutex<DetectorLog>>,
    spoken: Arc<Mutex<Vec<(String, f32)>>>,
}

struct Setup {
    frame_size: (u32, u32),
    delay: Duration,
    scripted: Vec<Result<Vec<RawDetection>, String>>,
    default: Vec<RawDetection>,
    session: SessionState,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            frame_size: (640, 480),
            delay: Duration::ZERO,
            scripted: Vec::new(),
            default: scenario_results(),
            session: SessionState::default(),
        }
    }
}

fn scenario_results() -> Vec<RawDetection> {
    vec![
        RawDetection::new("person", 0.95, [10.0, 10.0, 50.0, 100.0]),
        RawDetection::new("chair", 0.4, [500.0, 10.0, 50.0, 50.0]),
    ]
}

fn build(setup: Setup) -> (DetectionLoop, LoopHandle, Observed) {
    let source = Arc::new(Mutex::new(SourceLog {
        size: setup.frame_size,
        ..Default::default()
    }));
    let detector_log = Arc::new(Mutex::new(DetectorLog::default()));
    let spoken = Arc::new(Mutex::new(Vec::new()));

    let detector = FakeDetector {
        log: Arc::clone(&detector_log),
        delay: setup.delay,
        scripted: Mutex::new(setup.scripted.into()),
        default: setup.default,
    };

    let (controller, handle) = DetectionLoop::new(
        Box::new(FakeSource(Arc::clone(&source))),
        Box::new(detector),
        Box::new(FakeSpeech(Arc::clone(&spoken))),
        setup.session,
        LoopOptions::default(),
    );

    let seen = Observed {
        source,
        detector: detector_log,
        spoken,
    };
    (controller, handle, seen)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_filters_and_speaks() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());
    let observer = handle.subscribe();

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;

        let status = handle.status();
        assert_eq!(status.state, LoopState::Running);
        assert_eq!(status.stats.ticks, 1);
        assert_eq!(status.detections.len(), 1);
        assert_eq!(status.detections[0].class, "person");
        assert_eq!(status.last_alert.as_deref(), Some("Person detected to your left"));
        assert_eq!(
            *seen.spoken.lock(),
            vec![("Person detected to your left".to_string(), 1.0)]
        );
        assert_eq!(observer.borrow().detections.len(), 1);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script?;
    println!("✅ Scenario alert spoken after first tick");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_alerts_are_throttled_globally() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());

    let script = async {
        handle.start().await?;
        sleep(ms(2750)).await;

        let status = handle.status();
        // ticks at 500..=2500, alerts at 500 and 2500
        assert_eq!(status.stats.ticks, 5);
        assert_eq!(status.stats.alerts_spoken, 2);
        assert_eq!(seen.spoken.lock().len(), 2);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_zero_sized_frame_skips_detector() -> Result<()> {
    let (controller, handle, seen) = build(Setup {
        frame_size: (0, 0),
        ..Default::default()
    });

    let script = async {
        handle.start().await?;
        sleep(ms(1750)).await;

        let status = handle.status();
        assert_eq!(status.stats.ticks, 0);
        assert_eq!(status.stats.skipped_not_ready, 3);
        assert_eq!(seen.detector.lock().calls, 0);
        assert!(status.detections.is_empty());
        assert!(seen.spoken.lock().is_empty());

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_not_ready_frames_keep_previous_detections() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());
    let observer = handle.subscribe();

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        assert_eq!(observer.borrow().detections.len(), 1);

        seen.source.lock().size = (0, 0);
        sleep(ms(1500)).await;

        // ticks at 1000, 1500 and 2000 find no frame
        let status = observer.borrow().clone();
        assert_eq!(status.state, LoopState::Running);
        assert_eq!(status.stats.ticks, 1);
        assert_eq!(status.stats.skipped_not_ready, 3);
        assert_eq!(status.detections.len(), 1);
        assert_eq!(status.detections[0].class, "person");
        assert_eq!(seen.detector.lock().calls, 1);
        assert_eq!(seen.spoken.lock().len(), 1);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_skipped_ticks_reach_observers() -> Result<()> {
    let (controller, handle, _seen) = build(Setup {
        delay: ms(1200),
        ..Default::default()
    });
    let mut observer = handle.subscribe();

    let script = async {
        handle.start().await?;
        sleep(ms(1250)).await;

        // the 1000 ms tick found the 500 ms call still running
        assert!(observer.has_changed()?);
        let status = observer.borrow_and_update().clone();
        assert_eq!(status.stats.ticks, 1);
        assert_eq!(status.stats.skipped_busy, 1);
        assert!(status.detections.is_empty());

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_slow_detector_never_overlaps() -> Result<()> {
    let (controller, handle, seen) = build(Setup {
        delay: ms(1200),
        ..Default::default()
    });

    let script = async {
        handle.start().await?;
        sleep(ms(2250)).await;

        // call at 500 runs until 1700; ticks at 1000 and 1500 are skipped
        let status = handle.status();
        assert_eq!(seen.detector.lock().calls, 2);
        assert_eq!(seen.detector.lock().max_in_flight, 1);
        assert_eq!(status.stats.skipped_busy, 2);
        assert_eq!(status.detections.len(), 1);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_result_after_stop_is_dropped() -> Result<()> {
    let (controller, handle, seen) = build(Setup {
        delay: ms(1200),
        ..Default::default()
    });

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        handle.stop().await?;
        sleep(ms(1500)).await;

        let status = handle.status();
        assert_eq!(status.state, LoopState::Idle);
        assert_eq!(status.stats.stale_results_dropped, 1);
        assert!(status.detections.is_empty());
        assert!(seen.spoken.lock().is_empty());
        assert_eq!(seen.detector.lock().calls, 1);
        assert_eq!(seen.source.lock().deactivations, 1);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());

    let script = async {
        handle.stop().await?;
        sleep(ms(10)).await;
        assert_eq!(seen.source.lock().deactivations, 0);

        handle.start().await?;
        handle.stop().await?;
        handle.stop().await?;
        sleep(ms(10)).await;
        assert_eq!(seen.source.lock().activations, 1);
        assert_eq!(seen.source.lock().deactivations, 1);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script?;
    assert_eq!(seen.source.lock().deactivations, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_source_once() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script?;

    let source = seen.source.lock();
    assert!(!source.active);
    assert_eq!(source.deactivations, 1);
    assert_eq!(handle.status().state, LoopState::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_externally_activated_source_is_left_running() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());
    seen.source.lock().active = true;

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        handle.stop().await?;
        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script?;

    let source = seen.source.lock();
    assert_eq!(source.activations, 0);
    assert_eq!(source.deactivations, 0);
    assert!(source.active);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_camera_failure_is_reported_and_retryable() -> Result<()> {
    let (controller, handle, seen) = build(Setup::default());
    seen.source.lock().fail_with = Some(CameraError::PermissionDenied);

    let script = async {
        handle.start().await?;
        sleep(ms(10)).await;
        let status = handle.status();
        assert_eq!(status.state, LoopState::Idle);
        assert_eq!(status.error, Some(CapabilityError::CameraPermissionDenied));

        // no automatic retry
        sleep(ms(2000)).await;
        assert_eq!(handle.status().stats.ticks, 0);

        seen.source.lock().fail_with = None;
        handle.start().await?;
        sleep(ms(10)).await;
        let status = handle.status();
        assert_eq!(status.state, LoopState::Running);
        assert!(status.error.is_none());

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_detector_failure_does_not_stop_loop() -> Result<()> {
    let (controller, handle, seen) = build(Setup {
        scripted: vec![Err("inference backend hiccup".to_string())],
        ..Default::default()
    });

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        let status = handle.status();
        assert_eq!(status.stats.detector_failures, 1);
        assert!(status.error.is_none());
        assert!(status.detections.is_empty());

        sleep(ms(500)).await;
        let status = handle.status();
        assert_eq!(status.state, LoopState::Running);
        assert_eq!(status.detections.len(), 1);
        assert_eq!(seen.spoken.lock().len(), 1);

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_muted_session_never_speaks() -> Result<()> {
    let (controller, handle, seen) = build(Setup {
        session: SessionState::new(0.5, 0.8, false),
        ..Default::default()
    });

    let script = async {
        handle.start().await?;
        sleep(ms(2750)).await;
        assert!(seen.spoken.lock().is_empty());
        assert_eq!(handle.status().detections.len(), 1);

        handle.set_speech_enabled(true).await?;
        sleep(ms(500)).await;
        assert_eq!(
            *seen.spoken.lock(),
            vec![("Person detected to your left".to_string(), 0.8)]
        );

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_sensitivity_change_applies_next_tick() -> Result<()> {
    let (controller, handle, _seen) = build(Setup {
        default: vec![RawDetection::new("dog", 0.6, [300.0, 100.0, 40.0, 40.0])],
        session: SessionState::new(0.7, 1.0, true),
        ..Default::default()
    });

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        assert!(handle.status().detections.is_empty());

        handle.set_sensitivity(0.5).await?;
        sleep(ms(500)).await;
        let status = handle.status();
        assert_eq!(status.session.sensitivity(), 0.5);
        assert_eq!(status.detections.len(), 1);
        assert_eq!(status.last_alert.as_deref(), Some("Dog detected directly ahead"));

        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script
}

#[tokio::test(start_paused = true)]
async fn test_overlay_receives_filtered_set() -> Result<()> {
    let (controller, handle, _seen) = build(Setup::default());
    let commands = Arc::new(Mutex::new(Vec::new()));
    let size = Arc::new(Mutex::new(None));
    let controller = controller.with_overlay(Box::new(SharedOverlay(
        Arc::clone(&commands),
        Arc::clone(&size),
    )));

    let script = async {
        handle.start().await?;
        sleep(ms(750)).await;
        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script?;

    assert_eq!(*size.lock(), Some((640, 480)));
    assert_eq!(
        *commands.lock(),
        vec![
            DrawCommand::Clear,
            DrawCommand::Rect(BoundingBox::new(10.0, 10.0, 50.0, 100.0)),
            DrawCommand::Label { text: "person (95%)".to_string(), x: 10.0, y: 10.0 },
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_detector_load_failure_blocks_start() -> Result<()> {
    let source = Arc::new(Mutex::new(SourceLog {
        size: (640, 480),
        ..Default::default()
    }));
    let spoken = Arc::new(Mutex::new(Vec::new()));
    let (controller, handle) = DetectionLoop::without_detector(
        Box::new(FakeSource(Arc::clone(&source))),
        CapabilityError::DetectorLoad("model file missing".to_string()),
        Box::new(FakeSpeech(spoken)),
        SessionState::default(),
        LoopOptions::default(),
    );
    assert!(matches!(handle.status().error, Some(CapabilityError::DetectorLoad(_))));

    let script = async {
        handle.start().await?;
        sleep(ms(1000)).await;
        let status = handle.status();
        assert_eq!(status.state, LoopState::Idle);
        assert!(matches!(status.error, Some(CapabilityError::DetectorLoad(_))));
        handle.shutdown().await
    };

    let (run, script) = tokio::join!(controller.run(), script);
    run?;
    script?;
    assert_eq!(source.lock().activations, 0);
    Ok(())
}

#[tokio::test]
async fn test_handle_errors_after_loop_exits() -> Result<()> {
    let (controller, handle, _seen) = build(Setup::default());
    handle.shutdown().await?;
    controller.run().await?;

    assert!(handle.start().await.is_err());
    Ok(())
}
