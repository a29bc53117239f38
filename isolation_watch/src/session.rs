// THEORY:
// The `session` module is the runtime around the engine. It has three parts:
//
// 1.  **Collaborator seams**: `VideoSource`, `Detector`, `FrameObserver` and `Clock`
//     are the only things the frame loop knows about the outside world. Camera,
//     model and renderer live in other crates and plug in through these traits.
// 2.  **`SessionControl`**: the handle shared with the control surface. All of the
//     session's externally visible state (running flag, generation, `LiveState`)
//     sits behind one `watch` channel, so every change is a single replacement and
//     readers never see a half-cleared state. Each `start` bumps the generation; a
//     frame loop only keeps going, and only publishes, while its generation is
//     current. A frame that finishes after a stop is therefore dropped on the floor.
// 3.  **The frame loop and its supervisor**: `run_session` reads, detects,
//     classifies and publishes one frame at a time. `Supervisor` sits on a blocking
//     thread, waits for a start, opens a source, runs a fresh pipeline, and releases
//     everything when the loop ends.

use crate::config::{EngineConfig, SharedSettings};
use crate::core_modules::detection::RawDetection;
use crate::error::Result;
use crate::pipeline::{FrameAnalysis, IsolationPipeline, LiveState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// A blocking source of video frames.
pub trait VideoSource {
    type Frame;

    /// Returns the next frame, or `Ok(None)` once the stream is exhausted.
    fn read(&mut self) -> anyhow::Result<Option<Self::Frame>>;
}

/// Pixel size of a frame, needed for the edge-margin filter.
pub trait FrameDimensions {
    fn dimensions(&self) -> (u32, u32);
}

/// Turns a frame into raw multi-class detections in frame pixel coordinates.
pub trait Detector<F> {
    fn detect(&mut self, frame: &F) -> anyhow::Result<Vec<RawDetection>>;
}

/// Consumes each processed frame together with its analysis (renderers, encoders).
pub trait FrameObserver<F> {
    fn observe(&mut self, frame: F, analysis: &FrameAnalysis);
}

/// Session-relative time source.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock measured from the start of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }
}

impl Clock for SessionClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Externally visible state of the streaming session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub running: bool,
    /// Incremented on every start; identifies the current session.
    pub generation: u64,
    /// Set once the process is shutting down; supervisors exit when they see it.
    pub shutdown: bool,
    pub live: LiveState,
}

/// Shared handle through which the control surface drives the session.
#[derive(Debug, Clone)]
pub struct SessionControl {
    settings: Arc<SharedSettings>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl SessionControl {
    pub fn new(config: &EngineConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            settings: Arc::new(SharedSettings::new(config)),
            status: Arc::new(status),
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Starts streaming. Returns `false` if a session was already running.
    pub fn start(&self) -> bool {
        let started = self.status.send_if_modified(|s| {
            if s.running || s.shutdown {
                return false;
            }
            s.running = true;
            s.generation += 1;
            s.live = LiveState::default();
            true
        });
        if started {
            info!(generation = self.generation(), "streaming started");
        }
        started
    }

    /// Stops streaming and clears the live state in one step.
    /// Stopping an idle session is a no-op that returns `false`.
    pub fn stop(&self) -> bool {
        let stopped = self.status.send_if_modified(|s| {
            if !s.running {
                return false;
            }
            s.running = false;
            s.live = LiveState::default();
            true
        });
        if stopped {
            info!(generation = self.generation(), "streaming stopped");
        }
        stopped
    }

    /// Stops any session and tells supervisors to exit.
    pub fn shutdown(&self) {
        self.status.send_modify(|s| {
            s.running = false;
            s.shutdown = true;
            s.live = LiveState::default();
        });
    }

    /// Marks `generation` as finished after its loop ended on its own
    /// (end of stream, read failure). Ignored if a newer session exists.
    pub fn finish(&self, generation: u64) {
        self.status.send_if_modified(|s| {
            if s.generation != generation || (!s.running && s.live.is_empty()) {
                return false;
            }
            s.running = false;
            s.live = LiveState::default();
            true
        });
    }

    /// Replaces the live state if `generation` is still the running session.
    pub fn publish(&self, generation: u64, live: LiveState) -> bool {
        self.status.send_if_modified(move |s| {
            if !s.running || s.generation != generation {
                return false;
            }
            s.live = live;
            true
        })
    }

    pub fn is_current(&self, generation: u64) -> bool {
        let s = self.status.borrow();
        s.running && s.generation == generation
    }

    pub fn is_running(&self) -> bool {
        self.status.borrow().running
    }

    pub fn generation(&self) -> u64 {
        self.status.borrow().generation
    }

    pub fn live_state(&self) -> LiveState {
        self.status.borrow().live.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn set_distance_threshold(&self, pixels: u64) -> Result<u32> {
        let px = self.settings.set_distance_threshold(pixels)?;
        info!(distance_threshold = px, "distance threshold updated");
        Ok(px)
    }

    pub fn set_isolation_time(&self, seconds: f64) -> Result<Duration> {
        let duration = self.settings.set_isolation_time(seconds)?;
        info!(isolation_time_secs = duration.as_secs_f64(), "isolation time updated");
        Ok(duration)
    }

    /// Blocks until streaming is started; returns the new generation,
    /// or `None` once shutdown has been requested.
    pub fn wait_for_start(&self) -> Option<u64> {
        let mut rx = self.status.subscribe();
        let status = futures::executor::block_on(rx.wait_for(|s| s.running || s.shutdown)).ok()?;
        if status.shutdown {
            None
        } else {
            Some(status.generation)
        }
    }
}

/// Why a frame loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Stopped { frames: u64 },
    EndOfStream { frames: u64 },
    ReadFailed { frames: u64 },
    DetectorFailed { frames: u64 },
}

/// Runs the sequential frame loop for one session.
///
/// Every stage of a frame completes before the next frame is requested. The loop
/// never panics on collaborator failures; it returns and lets the caller clean up.
pub fn run_session<S, D, O, C>(
    pipeline: &mut IsolationPipeline,
    source: &mut S,
    detector: &mut D,
    observer: &mut O,
    clock: &C,
    control: &SessionControl,
    generation: u64,
) -> SessionEnd
where
    S: VideoSource,
    S::Frame: FrameDimensions,
    D: Detector<S::Frame>,
    O: FrameObserver<S::Frame>,
    C: Clock,
{
    let mut frames = 0u64;
    loop {
        if !control.is_current(generation) {
            return SessionEnd::Stopped { frames };
        }

        // --- 1. Read ---
        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => return SessionEnd::EndOfStream { frames },
            Err(e) => {
                warn!(error = %e, frames, "frame read failed, ending session");
                return SessionEnd::ReadFailed { frames };
            }
        };

        // --- 2. Detect ---
        let raw = match detector.detect(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, frames, "detector failed, ending session");
                return SessionEnd::DetectorFailed { frames };
            }
        };

        // --- 3. Classify ---
        let (width, height) = frame.dimensions();
        let settings = control.settings().snapshot();
        let analysis = pipeline.process_raw(&raw, width, height, clock.now(), settings);

        // --- 4. Publish & Render ---
        if !control.publish(generation, analysis.live_state.clone()) {
            return SessionEnd::Stopped { frames };
        }
        observer.observe(frame, &analysis);
        frames += 1;
    }
}

/// Owns the collaborators and runs one session after another until shutdown.
pub struct Supervisor<Open, D, O> {
    control: SessionControl,
    config: EngineConfig,
    open_source: Open,
    detector: D,
    observer: O,
}

impl<Open, S, D, O> Supervisor<Open, D, O>
where
    Open: FnMut() -> anyhow::Result<S>,
    S: VideoSource,
    S::Frame: FrameDimensions,
    D: Detector<S::Frame>,
    O: FrameObserver<S::Frame>,
{
    pub fn new(control: SessionControl, config: EngineConfig, open_source: Open, detector: D, observer: O) -> Self {
        Self { control, config, open_source, detector, observer }
    }

    /// Blocks the calling thread. Returns when `SessionControl::shutdown` is called.
    pub fn run(mut self) -> Result<()> {
        self.config.validate()?;

        while let Some(generation) = self.control.wait_for_start() {
            let mut source = match (self.open_source)() {
                Ok(source) => source,
                Err(e) => {
                    warn!(error = %e, generation, "could not open video source");
                    self.control.finish(generation);
                    continue;
                }
            };

            let mut pipeline = IsolationPipeline::new(&self.config)?;
            let clock = SessionClock::start();
            let end = run_session(
                &mut pipeline,
                &mut source,
                &mut self.detector,
                &mut self.observer,
                &clock,
                &self.control,
                generation,
            );

            // Release the device before anyone can start the next session.
            drop(source);
            self.control.finish(generation);
            info!(generation, ?end, "session ended");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::PERSON_CLASS_ID;
    use crate::core_modules::identity::GridBinResolver;
    use crate::core_modules::task_assigner::TaskAssigner;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A frame is just the detections the scripted detector should "find" in it.
    #[derive(Debug, Clone)]
    struct ScriptedFrame(Vec<RawDetection>);

    impl FrameDimensions for ScriptedFrame {
        fn dimensions(&self) -> (u32, u32) {
            (640, 480)
        }
    }

    struct ScriptedSource {
        frames: VecDeque<anyhow::Result<ScriptedFrame>>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Vec<RawDetection>>) -> Self {
            Self { frames: frames.into_iter().map(|f| Ok(ScriptedFrame(f))).collect() }
        }
    }

    impl VideoSource for ScriptedSource {
        type Frame = ScriptedFrame;

        fn read(&mut self) -> anyhow::Result<Option<ScriptedFrame>> {
            self.frames.pop_front().transpose()
        }
    }

    struct PassThrough;

    impl Detector<ScriptedFrame> for PassThrough {
        fn detect(&mut self, frame: &ScriptedFrame) -> anyhow::Result<Vec<RawDetection>> {
            Ok(frame.0.clone())
        }
    }

    #[derive(Default, Clone)]
    struct Recorder {
        states: Arc<Mutex<Vec<LiveState>>>,
    }

    impl FrameObserver<ScriptedFrame> for Recorder {
        fn observe(&mut self, _frame: ScriptedFrame, analysis: &FrameAnalysis) {
            self.states.lock().unwrap().push(analysis.live_state.clone());
        }
    }

    /// Advances by a fixed step every time it is read.
    struct SteppingClock {
        next: Cell<Duration>,
        step: Duration,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> Duration {
            let now = self.next.get();
            self.next.set(now + self.step);
            now
        }
    }

    fn person_at(cx: i32, cy: i32) -> RawDetection {
        RawDetection { class_id: PERSON_CLASS_ID, x1: cx - 10, y1: cy - 30, x2: cx + 10, y2: cy + 30 }
    }

    fn pipeline(config: &EngineConfig) -> IsolationPipeline {
        IsolationPipeline::with_parts(
            config,
            Box::new(GridBinResolver::new(config.bin_size)),
            TaskAssigner::seeded(config.task_pool.clone(), 9),
        )
    }

    fn clock(step_secs: u64) -> SteppingClock {
        SteppingClock { next: Cell::new(Duration::ZERO), step: Duration::from_secs(step_secs) }
    }

    #[test]
    fn stop_is_idempotent_and_clears_state() {
        let control = SessionControl::new(&EngineConfig::default());
        assert!(!control.stop());

        assert!(control.start());
        assert!(!control.start());
        let generation = control.generation();
        assert!(control.publish(generation, LiveState { total: 1, ..LiveState::default() }));
        assert_eq!(control.live_state().total, 1);

        assert!(control.stop());
        assert!(control.live_state().is_empty());
        assert!(!control.stop());
        assert!(!control.publish(generation, LiveState { total: 5, ..LiveState::default() }));
        assert!(control.live_state().is_empty());
    }

    #[test]
    fn stale_generation_cannot_publish_into_a_new_session() {
        let control = SessionControl::new(&EngineConfig::default());
        control.start();
        let old = control.generation();
        control.stop();
        control.start();

        assert!(!control.is_current(old));
        assert!(!control.publish(old, LiveState { total: 3, ..LiveState::default() }));
        control.finish(old);
        assert!(control.is_running());
    }

    #[test]
    fn loop_runs_until_end_of_stream() {
        let config = EngineConfig::default();
        let control = SessionControl::new(&config);
        control.start();
        let generation = control.generation();

        let mut source = ScriptedSource::new(vec![
            vec![person_at(300, 200)],
            vec![person_at(300, 200)],
            vec![person_at(300, 200)],
        ]);
        let mut recorder = Recorder::default();
        let end = run_session(
            &mut pipeline(&config),
            &mut source,
            &mut PassThrough,
            &mut recorder,
            &clock(15),
            &control,
            generation,
        );

        assert_eq!(end, SessionEnd::EndOfStream { frames: 3 });
        let states = recorder.states.lock().unwrap();
        let statuses: Vec<&str> = states.iter().map(|s| s.persons[0].status.as_str()).collect();
        // t = 0, 15, 30 with a 20 s isolation time.
        assert_eq!(statuses, vec!["watching", "watching", "isolated"]);
        assert_eq!(control.live_state().isolated, 1);
    }

    #[test]
    fn read_error_ends_the_session_gracefully() {
        let config = EngineConfig::default();
        let control = SessionControl::new(&config);
        control.start();

        let mut source = ScriptedSource::new(vec![vec![person_at(300, 200)]]);
        source.frames.push_back(Err(anyhow::anyhow!("camera unplugged")));
        let end = run_session(
            &mut pipeline(&config),
            &mut source,
            &mut PassThrough,
            &mut Recorder::default(),
            &clock(1),
            &control,
            control.generation(),
        );
        assert_eq!(end, SessionEnd::ReadFailed { frames: 1 });
    }

    #[test]
    fn loop_does_not_start_when_stopped() {
        let config = EngineConfig::default();
        let control = SessionControl::new(&config);
        control.start();
        let generation = control.generation();
        control.stop();

        let mut source = ScriptedSource::new(vec![vec![person_at(300, 200)]]);
        let end = run_session(
            &mut pipeline(&config),
            &mut source,
            &mut PassThrough,
            &mut Recorder::default(),
            &clock(1),
            &control,
            generation,
        );
        assert_eq!(end, SessionEnd::Stopped { frames: 0 });
        assert_eq!(source.frames.len(), 1);
    }

    #[test]
    fn restart_reflects_only_the_new_session() {
        let config = EngineConfig::default();
        let control = SessionControl::new(&config);

        control.start();
        let mut crowded = ScriptedSource::new(vec![vec![person_at(100, 100), person_at(400, 100), person_at(500, 400)]]);
        run_session(&mut pipeline(&config), &mut crowded, &mut PassThrough, &mut Recorder::default(), &clock(1), &control, control.generation());
        assert_eq!(control.live_state().total, 3);

        control.stop();
        assert_eq!(control.live_state(), LiveState { total: 0, isolated: 0, persons: vec![] });

        control.start();
        let mut single = ScriptedSource::new(vec![vec![person_at(300, 300)]]);
        run_session(&mut pipeline(&config), &mut single, &mut PassThrough, &mut Recorder::default(), &clock(1), &control, control.generation());
        let live = control.live_state();
        assert_eq!(live.total, 1);
        assert_eq!(live.persons.len(), 1);
        assert_eq!(live.persons[0].id, "15_15");
    }

    #[test]
    fn supervisor_runs_a_session_and_resets_on_end_of_stream() {
        let config = EngineConfig::default();
        let control = SessionControl::new(&config);
        let recorder = Recorder::default();
        let opened = Arc::new(Mutex::new(0u32));

        let supervisor = {
            let opened = opened.clone();
            Supervisor::new(
                control.clone(),
                config.clone(),
                move || {
                    *opened.lock().unwrap() += 1;
                    Ok::<_, anyhow::Error>(ScriptedSource::new(vec![vec![person_at(300, 200)]; 4]))
                },
                PassThrough,
                recorder.clone(),
            )
        };
        let handle = std::thread::spawn(move || supervisor.run());

        let mut rx = control.subscribe();
        control.start();
        futures::executor::block_on(rx.wait_for(|s| s.generation == 1 && !s.running)).unwrap();

        assert_eq!(recorder.states.lock().unwrap().len(), 4);
        assert_eq!(*opened.lock().unwrap(), 1);
        assert!(control.live_state().is_empty());

        control.shutdown();
        handle.join().unwrap().unwrap();
    }
}
