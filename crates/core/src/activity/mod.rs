//! Cancellable background activities.
//!
//! An [`Activity`] owns a unit of work and runs it on a dedicated thread at a
//! fixed cadence, either until the work reports a completed pass
//! ([`Activity::start_once`]) or until stopped ([`Activity::start_loop`]).
//! Starting returns a [`Handle`]; stopping is cooperative and
//! [`Handle::stop_and_wait`] only returns once the work can no longer run.
//!
//! Each start after the previous run has stopped spawns a fresh run. The
//! last [`Handle`] clone of a run stops it when dropped.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, Weak,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    audio::{AudioClip, AudioPlayback, AudioSink},
    effect::{lock_effect, Progress, SharedEffect},
    frame::{lock_frame, SharedFrameBuffer},
    timeline::FramePacer,
    CauldronError, Result,
};

/// Life cycle of one run of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Never started.
    Idle,
    Running,
    /// A stop was requested but the worker has not observed it yet.
    StopRequested,
    /// The worker has exited. Terminal for the run.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeat {
    Once,
    Loop,
}

/// Shortest pause after a failed iteration.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Work invoked once per iteration. The argument counts iterations since the
/// run started, so stateful work can rewind on `0`.
type Work = Box<dyn FnMut(u64) -> Result<Progress> + Send>;

/// Repeatable background work with cooperative start/stop.
pub struct Activity {
    name: Arc<str>,
    period: Duration,
    retry_delay: Duration,
    work: Arc<Mutex<Work>>,
    current: Mutex<Option<Slot>>,
}

struct Slot {
    status: Arc<Status>,
    run: Weak<Run>,
}

impl Activity {
    /// Creates an activity that invokes `work` every `period`.
    ///
    /// A zero period runs iterations back to back, which suits work that
    /// blocks on its own (audio chunks).
    pub fn new<F>(name: impl Into<String>, period: Duration, work: F) -> Self
    where
        F: FnMut(u64) -> Result<Progress> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            period,
            retry_delay: period.max(MIN_RETRY_DELAY),
            work: Arc::new(Mutex::new(Box::new(work))),
            current: Mutex::new(None),
        }
    }

    /// Steps `effect` into `frame` and flushes after every step, at the
    /// effect's own frame period.
    ///
    /// Transmit failures are logged and the frame is skipped.
    pub fn for_effect(
        name: impl Into<String>,
        effect: SharedEffect,
        frame: SharedFrameBuffer,
    ) -> Result<Self> {
        let period = lock_effect(&effect)?.frame_period();
        let name = name.into();
        let label = name.clone();
        Ok(Self::new(name, period, move |_| {
            let mut effect = lock_effect(&effect)?;
            let mut frame = lock_frame(&frame)?;
            let progress = effect.step(&mut frame)?;
            if let Err(err) = frame.flush() {
                tracing::warn!(activity = %label, error = %err, "dropping frame");
            }
            Ok(progress)
        }))
    }

    /// Plays `clip` through `sink` one chunk per iteration. Every run starts
    /// from the beginning of the clip. After a failed chunk the worker waits
    /// one chunk length before trying the next.
    pub fn for_audio(
        name: impl Into<String>,
        clip: Arc<AudioClip>,
        sink: Arc<dyn AudioSink>,
        chunk: Duration,
    ) -> Self {
        let mut playback = AudioPlayback::new(clip, sink, chunk);
        let activity = Self::new(name, Duration::ZERO, move |iteration| {
            if iteration == 0 {
                playback.rewind();
            }
            playback.play_next()
        });
        Self {
            retry_delay: chunk.max(MIN_RETRY_DELAY),
            ..activity
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs the work until it reports [`Progress::Complete`] or is stopped.
    pub fn start_once(&self) -> Result<Handle> {
        self.start(Repeat::Once)
    }

    /// Runs the work until stopped.
    pub fn start_loop(&self) -> Result<Handle> {
        self.start(Repeat::Loop)
    }

    /// State of the most recent run.
    pub fn state(&self) -> ActivityState {
        match self.current.lock() {
            Ok(slot) => slot
                .as_ref()
                .map_or(ActivityState::Idle, |slot| slot.status.state()),
            Err(_) => ActivityState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ActivityState::Running
    }

    /// Handle to the current run, if one is still referenced.
    pub fn handle(&self) -> Option<Handle> {
        let slot = self.current.lock().ok()?;
        slot.as_ref()?.run.upgrade().map(|run| Handle { run })
    }

    fn start(&self, repeat: Repeat) -> Result<Handle> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| CauldronError::Poisoned("activity slot"))?;

        if let Some(run) = current.as_ref().and_then(|slot| slot.run.upgrade()) {
            match run.status.state() {
                ActivityState::Running => return Ok(Handle { run }),
                // Never overlap with a run that is still winding down.
                ActivityState::StopRequested => run.stop_and_wait()?,
                ActivityState::Idle | ActivityState::Stopped => {}
            }
        }

        let status = Arc::new(Status::running());
        let worker = Worker {
            name: self.name.clone(),
            status: status.clone(),
            work: self.work.clone(),
            period: self.period,
            retry_delay: self.retry_delay,
            repeat,
        };
        let thread = thread::Builder::new()
            .name(format!("activity-{}", self.name))
            .spawn(move || worker.run())
            .map_err(CauldronError::Spawn)?;
        tracing::debug!(activity = %self.name, ?repeat, "activity started");

        let run = Arc::new(Run {
            name: self.name.clone(),
            status: status.clone(),
            thread: Mutex::new(Some(thread)),
        });
        *current = Some(Slot {
            status,
            run: Arc::downgrade(&run),
        });
        Ok(Handle { run })
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("state", &self.state())
            .finish()
    }
}

/// Caller-held reference to a run, used to stop it.
///
/// Clones share the run. When the last clone is dropped the run is stopped
/// and waited for.
#[derive(Clone)]
pub struct Handle {
    run: Arc<Run>,
}

impl Handle {
    pub fn name(&self) -> &str {
        &self.run.name
    }

    pub fn state(&self) -> ActivityState {
        self.run.status.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ActivityState::Running
    }

    /// True once the worker has exited, whether stopped or finished.
    pub fn is_finished(&self) -> bool {
        self.state() == ActivityState::Stopped
    }

    /// Blocks until the worker has begun its first iteration, or has exited
    /// without running one.
    pub fn wait_started(&self) {
        self.run.status.wait_started();
    }

    /// Asks the worker to stop without waiting for it.
    pub fn request_stop(&self) {
        self.run.status.request_stop();
    }

    /// Requests a stop and blocks until the worker has exited. Once this
    /// returns the work is never invoked again by this run.
    pub fn stop_and_wait(&self) -> Result<()> {
        self.run.stop_and_wait()
    }

    /// Like [`Handle::stop_and_wait`] but gives up after `timeout`.
    pub fn stop_timeout(&self, timeout: Duration) -> Result<()> {
        self.run.status.request_stop();
        if self.run.status.wait_stopped(Some(timeout)) {
            self.run.join();
            Ok(())
        } else {
            Err(CauldronError::StopTimeout {
                activity: self.run.name.to_string(),
                waited: timeout,
            })
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.run.name)
            .field("state", &self.state())
            .finish()
    }
}

struct Run {
    name: Arc<str>,
    status: Arc<Status>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Run {
    fn stop_and_wait(&self) -> Result<()> {
        self.status.request_stop();
        if self.is_worker_thread() {
            // Waiting here would wait on ourselves.
            return Ok(());
        }
        self.status.wait_stopped(None);
        self.join();
        Ok(())
    }

    fn is_worker_thread(&self) -> bool {
        let thread = self.thread.lock().unwrap_or_else(|p| p.into_inner());
        thread
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    fn join(&self) {
        let handle = self.thread.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(activity = %self.name, "activity worker panicked");
            }
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if let Err(err) = self.stop_and_wait() {
            tracing::warn!(activity = %self.name, error = %err, "failed to stop dropped activity");
        }
    }
}

struct Status {
    state: Mutex<ActivityState>,
    /// Set once the worker is about to run its first iteration.
    started: AtomicBool,
    changed: Condvar,
}

impl Status {
    fn running() -> Self {
        Self {
            state: Mutex::new(ActivityState::Running),
            started: AtomicBool::new(false),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        // The state is a plain enum; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn state(&self) -> ActivityState {
        *self.lock()
    }

    fn request_stop(&self) {
        let mut state = self.lock();
        if *state == ActivityState::Running {
            *state = ActivityState::StopRequested;
            self.changed.notify_all();
        }
    }

    fn mark_started(&self) {
        let _state = self.lock();
        self.started.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    fn wait_started(&self) {
        let state = self.lock();
        let _state = self
            .changed
            .wait_while(state, |s| {
                !self.started.load(Ordering::Acquire) && *s != ActivityState::Stopped
            })
            .unwrap_or_else(|p| p.into_inner());
    }

    fn mark_stopped(&self) {
        *self.lock() = ActivityState::Stopped;
        self.changed.notify_all();
    }

    /// Sleeps up to `timeout` unless a stop is requested first. Returns true
    /// if the worker should exit.
    fn pause(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if timeout.is_zero() {
            return *state != ActivityState::Running;
        }
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| *s == ActivityState::Running)
            .unwrap_or_else(|p| p.into_inner());
        *state != ActivityState::Running
    }

    /// Waits until the worker has exited. Returns false on timeout.
    fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let state = self.lock();
        let not_stopped = |s: &mut ActivityState| *s != ActivityState::Stopped;
        let state = match timeout {
            None => self
                .changed
                .wait_while(state, not_stopped)
                .unwrap_or_else(|p| p.into_inner()),
            Some(timeout) => {
                self.changed
                    .wait_timeout_while(state, timeout, not_stopped)
                    .unwrap_or_else(|p| p.into_inner())
                    .0
            }
        };
        *state == ActivityState::Stopped
    }
}

struct Worker {
    name: Arc<str>,
    status: Arc<Status>,
    work: Arc<Mutex<Work>>,
    period: Duration,
    retry_delay: Duration,
    repeat: Repeat,
}

impl Worker {
    fn run(self) {
        let _stopped = StopGuard(&self.status);
        let mut work = match self.work.lock() {
            Ok(work) => work,
            Err(_) => {
                tracing::warn!(activity = %self.name, "activity work poisoned by an earlier panic");
                return;
            }
        };

        let mut pacer = FramePacer::new(self.period);
        let mut iteration = 0_u64;
        self.status.mark_started();
        while self.status.state() == ActivityState::Running {
            let failed = match (*work)(iteration) {
                Ok(Progress::Complete) if self.repeat == Repeat::Once => break,
                Ok(_) => false,
                // One bad frame must not end the activity.
                Err(err) => {
                    tracing::warn!(activity = %self.name, error = %err, "iteration failed");
                    true
                }
            };
            iteration += 1;

            let mut wait = pacer.tick(Instant::now());
            if failed {
                wait = wait.max(self.retry_delay);
            }
            if self.status.pause(wait) {
                break;
            }
        }
        tracing::debug!(activity = %self.name, iterations = iteration, "activity stopped");
    }
}

/// Marks the run stopped on every exit path, including panics in the work.
struct StopGuard<'a>(&'a Status);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::audio::AudioChunk;

    const PERIOD: Duration = Duration::from_millis(2);

    fn counting(period: Duration) -> (Activity, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let activity = Activity::new("counter", period, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Progress::Continue)
        });
        (activity, count)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn no_work_runs_after_stop_and_wait() {
        let (activity, count) = counting(PERIOD);
        let handle = activity.start_loop().unwrap();
        wait_for(|| count.load(Ordering::SeqCst) >= 3);

        handle.stop_and_wait().unwrap();
        let stopped_at = count.load(Ordering::SeqCst);
        thread::sleep(PERIOD * 20);
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
        assert_eq!(handle.state(), ActivityState::Stopped);
        assert_eq!(activity.state(), ActivityState::Stopped);
    }

    #[test]
    fn starting_a_running_activity_returns_the_same_run() {
        let (activity, count) = counting(PERIOD);
        assert_eq!(activity.state(), ActivityState::Idle);
        let first = activity.start_loop().unwrap();
        let second = activity.start_loop().unwrap();
        assert!(Arc::ptr_eq(&first.run, &second.run));

        first.stop_and_wait().unwrap();
        assert!(second.is_finished());
        let stopped_at = count.load(Ordering::SeqCst);
        thread::sleep(PERIOD * 10);
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn restarts_after_a_stop() {
        let (activity, count) = counting(PERIOD);
        activity.start_loop().unwrap().stop_and_wait().unwrap();
        let before = count.load(Ordering::SeqCst);

        let handle = activity.start_loop().unwrap();
        assert!(handle.is_running());
        wait_for(|| count.load(Ordering::SeqCst) > before);
        handle.stop_and_wait().unwrap();
    }

    #[test]
    fn dropping_the_last_handle_stops_the_run() {
        let (activity, count) = counting(PERIOD);
        let handle = activity.start_loop().unwrap();
        let clone = handle.clone();
        wait_for(|| count.load(Ordering::SeqCst) >= 2);

        drop(handle);
        assert!(clone.is_running());
        drop(clone);

        assert_eq!(activity.state(), ActivityState::Stopped);
        assert!(activity.handle().is_none());
        let stopped_at = count.load(Ordering::SeqCst);
        thread::sleep(PERIOD * 10);
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn once_runs_until_the_pass_completes() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let activity = Activity::new("three-steps", PERIOD, move |iteration| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(if iteration == 2 {
                Progress::Complete
            } else {
                Progress::Continue
            })
        });

        let handle = activity.start_once().unwrap();
        wait_for(|| handle.is_finished());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        handle.stop_and_wait().unwrap();
    }

    #[test]
    fn errors_do_not_end_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let activity = Activity::new("flaky", PERIOD, move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(CauldronError::transmit("socket closed"))
            } else {
                Ok(Progress::Continue)
            }
        });

        let handle = activity.start_loop().unwrap();
        wait_for(|| count.load(Ordering::SeqCst) >= 6);
        assert!(handle.is_running());
        handle.stop_and_wait().unwrap();
    }

    #[test]
    fn failing_audio_waits_a_chunk_before_retrying() {
        struct Unplugged(AtomicUsize);

        impl AudioSink for Unplugged {
            fn play_chunk(&self, _chunk: &AudioChunk<'_>) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(CauldronError::transmit("device unplugged"))
            }
        }

        let sink = Arc::new(Unplugged(AtomicUsize::new(0)));
        let clip = AudioClip::tone(440.0, Duration::from_secs(1), 8_000).unwrap();
        let activity = Activity::for_audio(
            "unplugged",
            Arc::new(clip),
            sink.clone(),
            Duration::from_millis(50),
        );

        let handle = activity.start_loop().unwrap();
        thread::sleep(Duration::from_millis(120));
        handle.stop_and_wait().unwrap();
        let attempts = sink.0.load(Ordering::SeqCst);
        assert!((1..=4).contains(&attempts), "{attempts} attempts");
    }

    #[test]
    fn failing_work_is_not_retried_back_to_back() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let activity = Activity::new("broken", Duration::ZERO, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CauldronError::transmit("socket closed"))
        });

        let handle = activity.start_loop().unwrap();
        thread::sleep(Duration::from_millis(55));
        handle.stop_and_wait().unwrap();
        assert!(count.load(Ordering::SeqCst) <= 10);
    }

    #[test]
    fn request_stop_does_not_block() {
        let (activity, count) = counting(PERIOD);
        let handle = activity.start_loop().unwrap();
        wait_for(|| count.load(Ordering::SeqCst) >= 1);

        handle.request_stop();
        assert_ne!(handle.state(), ActivityState::Running);
        wait_for(|| handle.is_finished());
        handle.stop_and_wait().unwrap();
    }

    #[test]
    fn a_panicking_worker_still_reports_stopped() {
        let activity = Activity::new("panics", PERIOD, |_| panic!("boom"));
        let handle = activity.start_loop().unwrap();
        wait_for(|| handle.is_finished());
        handle.stop_and_wait().unwrap();
    }

    #[test]
    fn stop_is_not_delayed_by_a_long_period() {
        let (activity, count) = counting(Duration::from_secs(30));
        let handle = activity.start_loop().unwrap();
        wait_for(|| count.load(Ordering::SeqCst) == 1);

        let started = Instant::now();
        handle.stop_timeout(Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn bounded_stop_reports_a_timeout() {
        let activity = Activity::new("slow", PERIOD, |_| {
            thread::sleep(Duration::from_millis(200));
            Ok(Progress::Continue)
        });
        let handle = activity.start_loop().unwrap();
        thread::sleep(Duration::from_millis(20));

        let err = handle.stop_timeout(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, CauldronError::StopTimeout { .. }));
        handle.stop_and_wait().unwrap();
    }
}
