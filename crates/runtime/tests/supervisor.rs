//! Supervisor behavior with scripted collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ppewatch_common::config::{CameraConfig, PipelineConfig};
use ppewatch_model::{AlertRecord, BBox, Detection, Detections, FrameEnvelope, FramePayload};
use ppewatch_runtime::replay::PassthroughTracker;
use ppewatch_runtime::sinks::LogNotifier;
use ppewatch_runtime::{
    AlertSink, CameraFactory, CameraIo, CaptureError, Collaborators, Detector, DetectorError,
    DetectorFactory, FrameSource, SinkError, Supervisor, SupervisorError, WorkerError, WorkerId,
    WorkerState,
};

/// Detector that sees one helmetless person, optionally slowly, and
/// records how many calls overlap.
#[derive(Default)]
struct ScriptedDetectorFactory {
    fail_load: bool,
    fail_infer: bool,
    delay: Duration,
    /// Extra delay on the very first call across all loaded detectors.
    stall_first_call: Duration,
    stalled: Arc<AtomicBool>,
    loads: AtomicUsize,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
}

struct ScriptedDetector {
    fail: bool,
    delay: Duration,
    stall_first_call: Duration,
    stalled: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
}

impl DetectorFactory for ScriptedDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(DetectorError::load("weights not found"));
        }
        Ok(Box::new(ScriptedDetector {
            fail: self.fail_infer,
            delay: self.delay,
            stall_first_call: self.stall_first_call,
            stalled: self.stalled.clone(),
            calls: self.calls.clone(),
            in_flight: self.in_flight.clone(),
            overlapped: self.overlapped.clone(),
        }))
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn infer(&mut self, _frame: &FrameEnvelope) -> Result<Detections, DetectorError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if !self.stall_first_call.is_zero() && !self.stalled.swap(true, Ordering::SeqCst) {
            std::thread::sleep(self.stall_first_call);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectorError::failed("CUDA error: an illegal memory access"));
        }
        let person = Detection::new("person", 0.9, BBox::new(100.0, 100.0, 200.0, 400.0));
        Ok(Detections {
            persons: vec![person.with_track_id(1)],
            equipment: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum SourceMode {
    Frames,
    Hang,
    EndOfStream,
}

struct ScriptedCameraFactory {
    mode: SourceMode,
    opens: AtomicUsize,
}

impl ScriptedCameraFactory {
    fn new(mode: SourceMode) -> Self {
        Self {
            mode,
            opens: AtomicUsize::new(0),
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct ScriptedSource {
    mode: SourceMode,
    width: u32,
    height: u32,
}

#[async_trait::async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<FramePayload, CaptureError> {
        match self.mode {
            SourceMode::Frames => Ok(FramePayload::new(self.width, self.height, vec![0u8; 16])),
            SourceMode::Hang => std::future::pending().await,
            SourceMode::EndOfStream => Err(CaptureError::EndOfStream),
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[async_trait::async_trait]
impl CameraFactory for ScriptedCameraFactory {
    async fn open(&self, camera: &CameraConfig) -> Result<CameraIo, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(CameraIo {
            source: Box::new(ScriptedSource {
                mode: self.mode,
                width: camera.width,
                height: camera.height,
            }),
            tracker: Box::new(PassthroughTracker::new(vec!["helmet".to_string()])),
        })
    }
}

#[derive(Default)]
struct MemorySink {
    records: Mutex<Vec<AlertRecord>>,
}

impl MemorySink {
    fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AlertSink for MemorySink {
    async fn persist(&self, record: &AlertRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn config(cameras: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.supervisor.heartbeat_timeout = Duration::from_secs(3);
    config.supervisor.heartbeat_interval = Duration::from_secs(1);
    config.supervisor.tick_interval = Duration::from_secs(1);
    config.supervisor.max_restarts = 2;
    config.supervisor.restart_window = Duration::from_secs(60);
    config.supervisor.shutdown_grace = Duration::from_secs(2);
    config.required_ppe = vec!["helmet".to_string()];
    config.cameras = cameras
        .iter()
        .map(|id| {
            let mut camera = CameraConfig::new(*id, format!("scripted://{id}"));
            camera.width = 640;
            camera.height = 480;
            camera.target_fps = 5;
            camera
        })
        .collect();
    config
}

fn collaborators(
    detector: Arc<ScriptedDetectorFactory>,
    cameras: Arc<ScriptedCameraFactory>,
    sink: Arc<MemorySink>,
) -> Collaborators {
    Collaborators {
        detector,
        cameras,
        sink,
        notifier: Arc::new(LogNotifier),
        equipment: None,
    }
}

async fn advance(supervisor: &mut Supervisor, ticks: u32) {
    for _ in 0..ticks {
        tokio::time::sleep(Duration::from_secs(1)).await;
        supervisor.tick().await;
    }
}

fn camera(id: &str) -> WorkerId {
    WorkerId::Camera(id.to_string())
}

fn restarts(supervisor: &Supervisor, id: &WorkerId) -> u32 {
    supervisor
        .snapshot()
        .into_iter()
        .find(|snapshot| &snapshot.id == id)
        .map(|snapshot| snapshot.restarts)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_gpu_load_failure_is_fatal() {
    let detector = Arc::new(ScriptedDetectorFactory {
        fail_load: true,
        ..Default::default()
    });
    let cameras = Arc::new(ScriptedCameraFactory::new(SourceMode::Frames));
    let mut supervisor = Supervisor::new(
        config(&["a"]),
        collaborators(detector.clone(), cameras.clone(), Arc::default()),
    );

    let result = supervisor.start().await;
    assert!(matches!(
        result,
        Err(SupervisorError::GpuStartup(WorkerError::Detector(
            DetectorError::Load { .. }
        )))
    ));
    assert_eq!(detector.loads.load(Ordering::SeqCst), 1);
    assert_eq!(cameras.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_cameras() {
    let mut supervisor = Supervisor::new(
        config(&[]),
        collaborators(
            Arc::default(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            Arc::default(),
        ),
    );
    assert!(matches!(supervisor.start().await, Err(SupervisorError::NoCameras)));
}

#[tokio::test(start_paused = true)]
async fn test_hung_camera_is_restarted_then_stopped() {
    let cameras = Arc::new(ScriptedCameraFactory::new(SourceMode::Hang));
    let mut supervisor = Supervisor::new(
        config(&["hung"]),
        collaborators(Arc::default(), cameras.clone(), Arc::default()),
    );
    supervisor.start().await.unwrap();
    assert_eq!(cameras.opens(), 1);

    advance(&mut supervisor, 5).await;
    assert_eq!(cameras.opens(), 2);
    assert_eq!(restarts(&supervisor, &camera("hung")), 1);

    advance(&mut supervisor, 20).await;
    assert_eq!(cameras.opens(), 3);
    assert_eq!(restarts(&supervisor, &camera("hung")), 2);
    assert_eq!(supervisor.state(&camera("hung")), Some(WorkerState::Stopped));

    // The rest of the system keeps running.
    assert_eq!(supervisor.state(&WorkerId::Gpu), Some(WorkerState::Healthy));
    assert_eq!(supervisor.alive_workers(), 1);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exited_worker_restarts_without_waiting_for_timeout() {
    let cameras = Arc::new(ScriptedCameraFactory::new(SourceMode::EndOfStream));
    let mut config = config(&["eos"]);
    config.supervisor.max_restarts = 5;
    let mut supervisor = Supervisor::new(
        config,
        collaborators(Arc::default(), cameras.clone(), Arc::default()),
    );
    supervisor.start().await.unwrap();

    advance(&mut supervisor, 1).await;
    assert_eq!(restarts(&supervisor, &camera("eos")), 1);
    assert_eq!(cameras.opens(), 2);

    advance(&mut supervisor, 10).await;
    assert_eq!(restarts(&supervisor, &camera("eos")), 5);
    assert_eq!(supervisor.state(&camera("eos")), Some(WorkerState::Stopped));

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_no_worker_alive() {
    let mut supervisor = Supervisor::new(
        config(&["a", "b", "c"]),
        collaborators(
            Arc::default(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            Arc::default(),
        ),
    );
    supervisor.start().await.unwrap();
    advance(&mut supervisor, 3).await;
    assert_eq!(supervisor.alive_workers(), 4);

    supervisor.shutdown().await;
    assert_eq!(supervisor.alive_workers(), 0);
    assert!(supervisor
        .snapshot()
        .iter()
        .all(|snapshot| snapshot.state == WorkerState::Shutdown && !snapshot.alive));

    // A second call is a no-op.
    supervisor.shutdown().await;
    assert_eq!(supervisor.alive_workers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_violation_reaches_sink_once() {
    let detector = Arc::new(ScriptedDetectorFactory::default());
    let sink = Arc::new(MemorySink::default());
    let mut config = config(&["gate"]);
    config.alerts.enable_alerts = true;
    config.alerts.min_consecutive_frames = 3;
    config.alerts.debounce = Duration::from_secs(2);
    let mut supervisor = Supervisor::new(
        config,
        collaborators(
            detector.clone(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            sink.clone(),
        ),
    );
    supervisor.start().await.unwrap();

    advance(&mut supervisor, 6).await;
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].camera_id, "gate");
    assert_eq!(records[0].person_track_id, 1);
    assert_eq!(records[0].missing_ppe, vec!["helmet".to_string()]);
    assert!(detector.calls.load(Ordering::SeqCst) >= 10);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_alerts_emit_nothing() {
    let sink = Arc::new(MemorySink::default());
    let mut config = config(&["gate"]);
    config.alerts.enable_alerts = false;
    config.alerts.min_consecutive_frames = 3;
    config.alerts.debounce = Duration::from_secs(2);
    let mut supervisor = Supervisor::new(
        config,
        collaborators(
            Arc::default(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            sink.clone(),
        ),
    );
    supervisor.start().await.unwrap();
    advance(&mut supervisor, 6).await;
    assert!(sink.records().is_empty());
    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inference_never_overlaps() {
    let detector = Arc::new(ScriptedDetectorFactory {
        delay: Duration::from_millis(5),
        ..Default::default()
    });
    let mut config = config(&["a", "b", "c", "d"]);
    for camera in &mut config.cameras {
        camera.target_fps = 50;
    }
    let mut supervisor = Supervisor::new(
        config,
        collaborators(
            detector.clone(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            Arc::default(),
        ),
    );

    supervisor
        .run_until(tokio::time::sleep(Duration::from_millis(600)))
        .await
        .unwrap();

    assert!(detector.calls.load(Ordering::SeqCst) > 20);
    assert!(!detector.overlapped.load(Ordering::SeqCst));
    assert_eq!(supervisor.alive_workers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_aborts_worker_stuck_in_inference() {
    let detector = Arc::new(ScriptedDetectorFactory {
        delay: Duration::from_millis(1500),
        ..Default::default()
    });
    let mut config = config(&["a"]);
    config.supervisor.shutdown_grace = Duration::from_millis(100);
    let mut supervisor = Supervisor::new(
        config,
        collaborators(
            detector.clone(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            Arc::default(),
        ),
    );
    supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(detector.in_flight.load(Ordering::SeqCst), 1);

    let started = std::time::Instant::now();
    supervisor.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(supervisor.alive_workers(), 0);
    assert_eq!(supervisor.state(&WorkerId::Gpu), Some(WorkerState::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn test_failing_detector_restarts_gpu_worker() {
    let detector = Arc::new(ScriptedDetectorFactory {
        fail_infer: true,
        ..Default::default()
    });
    let mut config = config(&["gate"]);
    config.dispatch.max_consecutive_failures = 3;
    config.supervisor.max_restarts = 10;
    let mut supervisor = Supervisor::new(
        config,
        collaborators(
            detector.clone(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            Arc::default(),
        ),
    );
    supervisor.start().await.unwrap();
    assert_eq!(detector.loads.load(Ordering::SeqCst), 1);

    advance(&mut supervisor, 5).await;
    let gpu_restarts = restarts(&supervisor, &WorkerId::Gpu);
    assert!(gpu_restarts >= 1);
    assert_eq!(
        detector.loads.load(Ordering::SeqCst),
        gpu_restarts as usize + 1
    );

    // The camera only sees failed requests and keeps running.
    assert_eq!(restarts(&supervisor, &camera("gate")), 0);
    assert!(supervisor
        .state(&camera("gate"))
        .is_some_and(WorkerState::is_live));

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gpu_restart_waits_for_hung_inference_to_release_accelerator() {
    let detector = Arc::new(ScriptedDetectorFactory {
        stall_first_call: Duration::from_millis(1500),
        ..Default::default()
    });
    let mut config = config(&["a"]);
    config.supervisor.heartbeat_timeout = Duration::from_millis(400);
    config.supervisor.heartbeat_interval = Duration::from_millis(100);
    config.supervisor.tick_interval = Duration::from_millis(100);
    config.supervisor.max_restarts = 10;
    config.supervisor.shutdown_grace = Duration::from_millis(200);
    config.dispatch.inference_timeout = Duration::from_millis(150);
    config.dispatch.submit_timeout = Duration::from_millis(50);
    for camera in &mut config.cameras {
        camera.target_fps = 20;
    }
    let mut supervisor = Supervisor::new(
        config,
        collaborators(
            detector.clone(),
            Arc::new(ScriptedCameraFactory::new(SourceMode::Frames)),
            Arc::default(),
        ),
    );
    supervisor.start().await.unwrap();

    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.tick().await;

        let loads = detector.loads.load(Ordering::SeqCst);
        let state = supervisor.state(&WorkerId::Gpu).unwrap();
        if loads == 1 && restarts(&supervisor, &WorkerId::Gpu) > 0 {
            // The replacement cannot load while the stalled call holds the
            // accelerator, and must not be reported as running.
            assert!(!state.is_live(), "GPU reported {state} without a model");
        }
        if loads == 2 && state.is_live() {
            break;
        }
    }

    assert!(restarts(&supervisor, &WorkerId::Gpu) >= 1);
    assert_eq!(detector.loads.load(Ordering::SeqCst), 2);
    assert!(supervisor.state(&WorkerId::Gpu).is_some_and(WorkerState::is_live));
    supervisor.shutdown().await;
    assert_eq!(supervisor.alive_workers(), 0);
}
