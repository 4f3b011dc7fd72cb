//! Detection sessions.
//!
//! A session is one Idle -> Running -> Idle cycle. It owns the camera for the
//! whole run, classifies each frame, records each accepted label once per
//! run, and publishes annotated JPEG frames to the `FrameHub`.
//!
//! `SessionManager` holds the single session slot. Start is check-and-set
//! under the slot lock, so at most one session runs at a time. Each session
//! carries its own cancel flag; stop flips it and returns without waiting.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::annotate::{annotate, encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::classify::{Classification, FrameClassifier};
use crate::config::DetectionSettings;
use crate::frame::{Frame, FrameHub};
use crate::ingest::{CameraConfig, CameraSource};
use crate::storage::{ProductRecord, ProductStore};

/// Detections must score strictly above this to be recorded.
pub const CONFIDENCE_THRESHOLD: f32 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionPolicy {
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            frame_interval: Duration::ZERO,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl From<&DetectionSettings> for DetectionPolicy {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            frame_interval: settings.frame_interval,
            jpeg_quality: settings.jpeg_quality,
        }
    }
}

/// Per-run bookkeeping. A fresh one is created for every run, so the seen
/// set never carries over.
#[derive(Debug, Default)]
pub struct RunState {
    seen: HashSet<String>,
    frames: u64,
    recorded: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen(&self, label: &str) -> bool {
        self.seen.contains(label)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

#[derive(Debug)]
pub struct FrameOutcome {
    pub classification: Classification,
    pub recorded: Option<ProductRecord>,
    pub jpeg: Vec<u8>,
}

/// Classify, record, annotate, encode: everything done to one frame.
pub struct DetectionPipeline {
    classifier: Arc<FrameClassifier>,
    store: Arc<dyn ProductStore>,
    policy: DetectionPolicy,
}

impl DetectionPipeline {
    pub fn new(
        classifier: Arc<FrameClassifier>,
        store: Arc<dyn ProductStore>,
        policy: DetectionPolicy,
    ) -> Self {
        Self {
            classifier,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &DetectionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    pub fn process(&self, run: &mut RunState, frame: &mut Frame) -> Result<FrameOutcome> {
        run.frames += 1;
        let classification = self.classifier.classify(frame)?;

        let mut recorded = None;
        if classification.confidence > CONFIDENCE_THRESHOLD
            && run.seen.insert(classification.label.clone())
        {
            let price = self
                .classifier
                .catalog()
                .price_of(&classification.label)
                .ok_or_else(|| anyhow!("no price for label {}", classification.label))?;
            let record = self.store.append(&classification.label, price)?;
            log::info!(
                "recorded product {} (price {}, confidence {:.2}, id {})",
                record.name,
                record.price,
                classification.confidence,
                record.id
            );
            run.recorded += 1;
            recorded = Some(record);
        }

        annotate(frame.image_mut(), &classification);
        let jpeg = encode_jpeg(frame.image(), self.policy.jpeg_quality)?;
        Ok(FrameOutcome {
            classification,
            recorded,
            jpeg,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunExit {
    Stopped,
    /// The camera could not be opened or a read failed.
    CaptureEnded(String),
    /// Classification, storage or encoding failed.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub session_id: u64,
    pub frames: u64,
    /// Frames the camera delivered, including any that never finished processing.
    pub captured: u64,
    pub recorded: u64,
    pub exit: RunExit,
}

/// Runs the detection loop until `cancel` is set or the source fails.
///
/// The source is consumed so the device is released when the run ends.
pub fn run_detection(
    session_id: u64,
    mut source: CameraSource,
    pipeline: &DetectionPipeline,
    hub: &FrameHub,
    cancel: &AtomicBool,
) -> RunSummary {
    let mut run = RunState::new();
    let exit = loop {
        if cancel.load(Ordering::SeqCst) {
            break RunExit::Stopped;
        }
        let started = Instant::now();
        let mut frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) => break RunExit::CaptureEnded(format!("{:#}", err)),
        };
        let outcome = match pipeline.process(&mut run, &mut frame) {
            Ok(outcome) => outcome,
            Err(err) => break RunExit::Failed(format!("{:#}", err)),
        };
        match hub.publish(session_id, outcome.jpeg) {
            Ok(true) => {}
            Ok(false) => log::debug!("session {} no longer owns the frame hub", session_id),
            Err(err) => break RunExit::Failed(format!("{:#}", err)),
        }

        let interval = pipeline.policy().frame_interval;
        let elapsed = started.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    };
    let stats = source.stats();
    log::debug!(
        "session {} released {} after {} captured frames",
        session_id,
        stats.device,
        stats.frames_captured
    );
    RunSummary {
        session_id,
        frames: run.frames,
        captured: stats.frames_captured,
        recorded: run.recorded,
        exit,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started(u64),
    AlreadyRunning(u64),
}

impl StartOutcome {
    pub fn session_id(self) -> u64 {
        match self {
            StartOutcome::Started(id) | StartOutcome::AlreadyRunning(id) => id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(u64),
    NotRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running(u64),
}

impl SessionStatus {
    pub fn is_running(self) -> bool {
        matches!(self, SessionStatus::Running(_))
    }
}

struct ActiveSession {
    id: u64,
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<RunSummary>>,
}

#[derive(Default)]
struct SlotState {
    active: Option<ActiveSession>,
    /// Threads of sessions that left the slot but may still hold the device.
    draining: Vec<JoinHandle<RunSummary>>,
}

/// How often start re-checks a stopped session that is still draining.
const DRAIN_POLL: Duration = Duration::from_millis(10);

pub struct SessionManager {
    camera: CameraConfig,
    pipeline: Arc<DetectionPipeline>,
    hub: Arc<FrameHub>,
    /// Serializes start and stop.
    control: Mutex<()>,
    slot: Arc<Mutex<SlotState>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(camera: CameraConfig, pipeline: DetectionPipeline, hub: Arc<FrameHub>) -> Self {
        Self {
            camera,
            pipeline: Arc::new(pipeline),
            hub,
            control: Mutex::new(()),
            slot: Arc::new(Mutex::new(SlotState::default())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn hub(&self) -> &Arc<FrameHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        self.pipeline.store()
    }

    pub fn status(&self) -> Result<SessionStatus> {
        let slot = lock_slot(&self.slot)?;
        Ok(match &slot.active {
            Some(active) => SessionStatus::Running(active.id),
            None => SessionStatus::Idle,
        })
    }

    /// Starts a session unless one is already running.
    ///
    /// A stopped session may still be mid-read. Start waits for its thread to
    /// release the device, polling without holding the control lock so stop
    /// and status stay responsive meanwhile.
    pub fn start(&self) -> Result<StartOutcome> {
        loop {
            let control = self
                .control
                .lock()
                .map_err(|_| anyhow!("session control lock poisoned"))?;
            let mut slot = lock_slot(&self.slot)?;
            if let Some(active) = &slot.active {
                return Ok(StartOutcome::AlreadyRunning(active.id));
            }
            if slot.draining.iter().any(|join| !join.is_finished()) {
                drop(slot);
                drop(control);
                std::thread::sleep(DRAIN_POLL);
                continue;
            }
            join_all(std::mem::take(&mut slot.draining));

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let cancel = Arc::new(AtomicBool::new(false));
            let lease = HubLease::open(&self.hub, id)?;
            let join = {
                let camera = self.camera.clone();
                let pipeline = self.pipeline.clone();
                let hub = self.hub.clone();
                let cancel = cancel.clone();
                let slot = self.slot.clone();
                std::thread::Builder::new()
                    .name(format!("session-{}", id))
                    .spawn(move || session_main(id, camera, &pipeline, &hub, &cancel, &slot))?
            };
            lease.keep();
            slot.active = Some(ActiveSession {
                id,
                cancel,
                join: Some(join),
            });
            log::info!("session {} started on {}", id, self.camera.device);
            return Ok(StartOutcome::Started(id));
        }
    }

    /// Signals the running session to stop. Does not wait for its thread.
    pub fn stop(&self) -> Result<StopOutcome> {
        let _control = self
            .control
            .lock()
            .map_err(|_| anyhow!("session control lock poisoned"))?;
        let mut slot = lock_slot(&self.slot)?;
        let Some(mut active) = slot.active.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        active.cancel.store(true, Ordering::SeqCst);
        if let Some(join) = active.join.take() {
            slot.draining.push(join);
        }
        log::info!("session {} stop requested", active.id);
        Ok(StopOutcome::Stopped(active.id))
    }

    /// Stops any running session and joins every session thread.
    pub fn stop_and_wait(&self) -> Result<()> {
        self.stop()?;
        let draining = std::mem::take(&mut lock_slot(&self.slot)?.draining);
        join_all(draining);
        Ok(())
    }

    /// Polls until no session is running. Returns false on timeout.
    pub fn wait_for_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.status()?.is_running() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Err(err) = self.stop_and_wait() {
            log::warn!("session shutdown failed: {}", err);
        }
    }
}

fn session_main(
    id: u64,
    camera: CameraConfig,
    pipeline: &DetectionPipeline,
    hub: &FrameHub,
    cancel: &AtomicBool,
    slot: &Mutex<SlotState>,
) -> RunSummary {
    let opened = CameraSource::new(camera).and_then(|mut source| {
        source.connect()?;
        Ok(source)
    });
    let summary = match opened {
        Ok(source) => run_detection(id, source, pipeline, hub, cancel),
        Err(err) => RunSummary {
            session_id: id,
            frames: 0,
            captured: 0,
            recorded: 0,
            exit: RunExit::CaptureEnded(format!("{:#}", err)),
        },
    };

    if let Err(err) = hub.close(id) {
        log::warn!("session {} could not close frame hub: {}", id, err);
    }
    match &summary.exit {
        RunExit::Stopped => log::info!(
            "session {} stopped: {} frames, {} products recorded",
            id,
            summary.frames,
            summary.recorded
        ),
        RunExit::CaptureEnded(reason) => log::warn!(
            "session {} ended on capture failure after {} frames ({} recorded): {}",
            id,
            summary.frames,
            summary.recorded,
            reason
        ),
        RunExit::Failed(reason) => log::error!(
            "session {} failed after {} frames ({} recorded): {}",
            id,
            summary.frames,
            summary.recorded,
            reason
        ),
    }

    // Only clear the slot if it is still ours; stop() may already have
    // handed it to a newer session.
    match slot.lock() {
        Ok(mut slot) => {
            if slot.active.as_ref().map(|active| active.id) == Some(id) {
                if let Some(join) = slot.active.take().and_then(|mut active| active.join.take()) {
                    slot.draining.push(join);
                }
            }
        }
        Err(_) => log::error!("session {} could not clear slot: lock poisoned", id),
    }
    summary
}

/// Keeps the hub open for a session being launched. Dropped without
/// `keep`, it closes the hub again so no subscriber waits on a session that
/// never ran.
struct HubLease<'a> {
    hub: &'a FrameHub,
    id: u64,
    armed: bool,
}

impl<'a> HubLease<'a> {
    fn open(hub: &'a FrameHub, id: u64) -> Result<Self> {
        hub.open(id)?;
        Ok(Self {
            hub,
            id,
            armed: true,
        })
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for HubLease<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.hub.close(self.id) {
                log::warn!("session {} could not close frame hub: {}", self.id, err);
            }
        }
    }
}

fn lock_slot(slot: &Mutex<SlotState>) -> Result<MutexGuard<'_, SlotState>> {
    slot.lock().map_err(|_| anyhow!("session slot lock poisoned"))
}

fn join_all(handles: Vec<JoinHandle<RunSummary>>) {
    for handle in handles {
        if handle.join().is_err() {
            log::error!("session thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LabelCatalog;
    use crate::classify::{InputSpec, ScriptedBackend};
    use crate::frame::HubRecv;
    use crate::storage::InMemoryProductStore;

    fn classifier(backend: ScriptedBackend) -> Arc<FrameClassifier> {
        Arc::new(FrameClassifier::new(
            Box::new(backend),
            LabelCatalog::default(),
            InputSpec::default(),
        ))
    }

    fn camera(device: &str) -> CameraConfig {
        CameraConfig {
            device: device.to_string(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    fn connected(device: &str) -> CameraSource {
        let mut source = CameraSource::new(camera(device)).unwrap();
        source.connect().unwrap();
        source
    }

    fn names(store: &dyn ProductStore) -> Vec<(String, i64)> {
        store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|r| (r.name, r.price))
            .collect()
    }

    #[test]
    fn records_each_label_once_per_run() {
        let store = Arc::new(InMemoryProductStore::new());
        let pipeline = DetectionPipeline::new(
            classifier(
                ScriptedBackend::new()
                    .then_scores(vec![0.95, 0.03, 0.02])
                    .then_scores(vec![0.92, 0.05, 0.03])
                    .then_scores(vec![0.10, 0.81, 0.09]),
            ),
            store.clone(),
            DetectionPolicy::default(),
        );
        let hub = FrameHub::default();
        hub.open(1).unwrap();

        let summary = run_detection(
            1,
            connected("stub://shelf?frames=3"),
            &pipeline,
            &hub,
            &AtomicBool::new(false),
        );

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.captured, 3);
        assert_eq!(summary.recorded, 2);
        assert!(matches!(summary.exit, RunExit::CaptureEnded(_)));
        assert_eq!(
            names(store.as_ref()),
            vec![("Snickers".to_string(), 50), ("Mars".to_string(), 45)]
        );
        let mut subscription = hub.subscribe(1).unwrap();
        assert!(matches!(
            subscription.recv(Duration::from_millis(10)).unwrap(),
            HubRecv::Frame(frame) if frame.sequence == 3
        ));
    }

    #[test]
    fn threshold_is_strict() {
        let store = Arc::new(InMemoryProductStore::new());
        let pipeline = DetectionPipeline::new(
            classifier(
                ScriptedBackend::new()
                    .then_scores(vec![0.10, 0.11, 0.79])
                    .then_scores(vec![0.10, 0.10, 0.80]),
            ),
            store.clone(),
            DetectionPolicy::default(),
        );
        let mut run = RunState::new();
        let mut frame = connected("stub://shelf").next_frame().unwrap();

        let first = pipeline.process(&mut run, &mut frame).unwrap();
        assert_eq!(first.classification.label, "KitKat");
        assert!(first.recorded.is_none());
        let second = pipeline.process(&mut run, &mut frame).unwrap();
        assert!(second.recorded.is_none());
        assert!(!run.has_seen("KitKat"));
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn second_run_records_again() {
        let store = Arc::new(InMemoryProductStore::new());
        let pipeline = DetectionPipeline::new(
            classifier(ScriptedBackend::new().then_scores(vec![0.9, 0.05, 0.05])),
            store.clone(),
            DetectionPolicy::default(),
        );
        let mut source = connected("stub://shelf");

        for _ in 0..2 {
            let mut run = RunState::new();
            for _ in 0..3 {
                let mut frame = source.next_frame().unwrap();
                pipeline.process(&mut run, &mut frame).unwrap();
            }
            assert_eq!(run.recorded(), 1);
        }
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn model_failure_ends_run() {
        let store = Arc::new(InMemoryProductStore::new());
        let pipeline = DetectionPipeline::new(
            classifier(
                ScriptedBackend::new()
                    .then_scores(vec![0.9, 0.05, 0.05])
                    .then_fail("inference crashed"),
            ),
            store.clone(),
            DetectionPolicy::default(),
        );
        let hub = FrameHub::default();
        hub.open(7).unwrap();

        let summary = run_detection(
            7,
            connected("stub://shelf"),
            &pipeline,
            &hub,
            &AtomicBool::new(false),
        );
        assert_eq!(summary.frames, 2);
        assert!(matches!(summary.exit, RunExit::Failed(ref msg) if msg.contains("inference crashed")));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn cancelled_run_stops_before_reading() {
        let pipeline = DetectionPipeline::new(
            classifier(ScriptedBackend::new().then_scores(vec![0.9, 0.05, 0.05])),
            Arc::new(InMemoryProductStore::new()),
            DetectionPolicy::default(),
        );
        let summary = run_detection(
            1,
            connected("stub://shelf"),
            &pipeline,
            &FrameHub::default(),
            &AtomicBool::new(true),
        );
        assert_eq!(summary.exit, RunExit::Stopped);
        assert_eq!(summary.frames, 0);
    }

    fn manager(device: &str, backend: ScriptedBackend) -> SessionManager {
        let policy = DetectionPolicy {
            frame_interval: Duration::from_millis(5),
            ..DetectionPolicy::default()
        };
        let pipeline = DetectionPipeline::new(
            classifier(backend),
            Arc::new(InMemoryProductStore::new()),
            policy,
        );
        SessionManager::new(camera(device), pipeline, Arc::new(FrameHub::default()))
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let sessions = manager("stub://shelf", ScriptedBackend::new().then_scores(vec![1.0, 0.0, 0.0]));
        assert_eq!(sessions.stop().unwrap(), StopOutcome::NotRunning);
        assert_eq!(sessions.status().unwrap(), SessionStatus::Idle);
    }

    #[test]
    fn immediate_capture_failure_returns_to_idle() {
        let sessions = manager(
            "stub://broken?fail=connect",
            ScriptedBackend::new().then_scores(vec![1.0, 0.0, 0.0]),
        );
        let id = sessions.start().unwrap().session_id();
        let mut subscription = sessions.hub().subscribe(id).unwrap();

        assert!(sessions.wait_for_idle(Duration::from_secs(5)).unwrap());
        let mut frames = 0;
        loop {
            match subscription.recv(Duration::from_millis(200)).unwrap() {
                HubRecv::Frame(_) => frames += 1,
                HubRecv::Timeout => continue,
                HubRecv::Closed => break,
            }
        }
        assert_eq!(frames, 0);
        assert!(sessions.store().list_all().unwrap().is_empty());
    }

    #[test]
    fn start_stop_start_runs_new_session() {
        let sessions = manager("stub://shelf", ScriptedBackend::new().then_scores(vec![0.9, 0.05, 0.05]));
        let first = sessions.start().unwrap();
        assert!(matches!(first, StartOutcome::Started(_)));
        assert_eq!(
            sessions.start().unwrap(),
            StartOutcome::AlreadyRunning(first.session_id())
        );
        assert_eq!(sessions.stop().unwrap(), StopOutcome::Stopped(first.session_id()));
        assert_eq!(sessions.status().unwrap(), SessionStatus::Idle);

        let second = sessions.start().unwrap();
        assert!(matches!(second, StartOutcome::Started(id) if id != first.session_id()));
        sessions.stop_and_wait().unwrap();
        assert_eq!(sessions.status().unwrap(), SessionStatus::Idle);
    }

    #[test]
    fn concurrent_starts_create_one_session() {
        let sessions = Arc::new(manager(
            "stub://shelf",
            ScriptedBackend::new().then_scores(vec![0.2, 0.2, 0.6]),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sessions = sessions.clone();
                std::thread::spawn(move || sessions.start().unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let started = outcomes
            .iter()
            .filter(|o| matches!(o, StartOutcome::Started(_)))
            .count();
        assert_eq!(started, 1);
        let ids: HashSet<_> = outcomes.iter().map(|o| o.session_id()).collect();
        assert_eq!(ids.len(), 1);
        sessions.stop_and_wait().unwrap();
    }

    #[test]
    fn running_session_publishes_frames() {
        let sessions = manager("stub://shelf", ScriptedBackend::new().then_scores(vec![0.95, 0.03, 0.02]));
        let id = sessions.start().unwrap().session_id();
        let mut subscription = sessions.hub().subscribe(id).unwrap();
        let frame = loop {
            match subscription.recv(Duration::from_secs(2)).unwrap() {
                HubRecv::Frame(frame) => break frame,
                HubRecv::Timeout => continue,
                HubRecv::Closed => panic!("session closed before publishing"),
            }
        };
        assert_eq!(frame.session_id, id);
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        sessions.stop_and_wait().unwrap();

        let records = sessions.store().list_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Snickers");
    }

    #[test]
    fn abandoned_launch_closes_the_hub() {
        let hub = FrameHub::default();
        let mut subscription = {
            let _lease = HubLease::open(&hub, 9).unwrap();
            hub.subscribe(9).unwrap()
        };
        assert!(matches!(
            subscription.recv(Duration::from_millis(10)).unwrap(),
            HubRecv::Closed
        ));
        assert!(!hub.publish(9, vec![1]).unwrap());
    }

    #[test]
    fn kept_launch_leaves_the_hub_open() {
        let hub = FrameHub::default();
        HubLease::open(&hub, 4).unwrap().keep();
        assert!(hub.publish(4, vec![1]).unwrap());
    }

    /// Sleeps through every inference so a stopped session stays busy.
    struct SlowBackend(Duration);

    impl crate::classify::ClassifierBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn infer(&self, _input: &crate::classify::InputTensor) -> Result<Vec<f32>> {
            std::thread::sleep(self.0);
            Ok(vec![0.1, 0.1, 0.8])
        }
    }

    #[test]
    fn restart_waits_for_old_session_without_blocking_stop() {
        let pipeline = DetectionPipeline::new(
            Arc::new(FrameClassifier::new(
                Box::new(SlowBackend(Duration::from_millis(600))),
                LabelCatalog::default(),
                InputSpec::default(),
            )),
            Arc::new(InMemoryProductStore::new()),
            DetectionPolicy::default(),
        );
        let sessions = Arc::new(SessionManager::new(
            camera("stub://shelf"),
            pipeline,
            Arc::new(FrameHub::default()),
        ));
        let first = sessions.start().unwrap().session_id();
        // Let the first session get into its slow inference.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sessions.stop().unwrap(), StopOutcome::Stopped(first));

        let restart = {
            let sessions = sessions.clone();
            std::thread::spawn(move || sessions.start().unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));

        let asked = Instant::now();
        sessions.stop().unwrap();
        sessions.status().unwrap();
        assert!(asked.elapsed() < Duration::from_millis(300));

        let second = restart.join().unwrap();
        assert!(matches!(second, StartOutcome::Started(id) if id != first));
        sessions.stop_and_wait().unwrap();
    }
}
