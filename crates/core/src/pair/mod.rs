//! Audio and visual activities started and stopped as one unit.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    activity::{Activity, Handle},
    CauldronError, Result,
};

/// Poll interval used when the visual side has no frame period of its own.
const MIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Idle,
    Running,
    Stopping,
}

/// Couples an audio activity with a visual one.
///
/// Both children are started together (audio first so the first visible
/// frame is not silent) and watched by a supervisor thread. The supervisor
/// stops both once a stop is requested or once both children have finished
/// on their own. Callers only ever observe `Idle`, `Running` or `Stopping`:
/// never one child running without the other.
pub struct SynchronizedPair {
    name: String,
    audio: Activity,
    visual: Activity,
    sync: Arc<PairSync>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct PairSync {
    inner: Mutex<PairInner>,
    changed: Condvar,
}

struct PairInner {
    state: PairState,
    stop_requested: bool,
}

impl PairSync {
    fn lock(&self) -> MutexGuard<'_, PairInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SynchronizedPair {
    pub fn new(name: impl Into<String>, audio: Activity, visual: Activity) -> Self {
        Self {
            name: name.into(),
            audio,
            visual,
            sync: Arc::new(PairSync {
                inner: Mutex::new(PairInner {
                    state: PairState::Idle,
                    stop_requested: false,
                }),
                changed: Condvar::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PairState {
        self.sync.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PairState::Running
    }

    /// Plays both children once. The pair returns to idle when both have
    /// finished or when stopped. No-op while already running.
    pub fn play(&self) -> Result<()> {
        self.launch(|activity| activity.start_once())
    }

    /// Loops both children until stopped. No-op while already running.
    pub fn play_looped(&self) -> Result<()> {
        self.launch(|activity| activity.start_loop())
    }

    /// Stops both children and waits for them. Stopping an idle pair, or a
    /// pair whose children already finished, succeeds.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.sync.lock();
        if inner.state != PairState::Idle {
            inner.stop_requested = true;
            self.sync.changed.notify_all();
            while inner.state != PairState::Idle {
                inner = self
                    .sync
                    .changed
                    .wait(inner)
                    .unwrap_or_else(|p| p.into_inner());
            }
        }
        drop(inner);
        self.join_supervisor();
        Ok(())
    }

    fn launch(&self, start: impl Fn(&Activity) -> Result<Handle>) -> Result<()> {
        let mut inner = self.sync.lock();
        loop {
            match inner.state {
                PairState::Running => return Ok(()),
                PairState::Stopping => {
                    inner = self
                        .sync
                        .changed
                        .wait(inner)
                        .unwrap_or_else(|p| p.into_inner());
                }
                PairState::Idle => break,
            }
        }
        // The previous supervisor has already published `Idle`.
        self.join_supervisor();

        let audio = start(&self.audio)?;
        audio.wait_started();
        let visual = match start(&self.visual) {
            Ok(visual) => visual,
            Err(err) => {
                audio.stop_and_wait()?;
                return Err(err);
            }
        };

        let sync = self.sync.clone();
        let name = self.name.clone();
        let poll = if self.visual.period().is_zero() {
            MIN_POLL
        } else {
            self.visual.period()
        };
        let supervisor = thread::Builder::new()
            .name(format!("pair-{}", self.name))
            .spawn(move || supervise(&name, &sync, &audio, &visual, poll))
            .map_err(CauldronError::Spawn)?;

        inner.state = PairState::Running;
        inner.stop_requested = false;
        *self.supervisor.lock().unwrap_or_else(|p| p.into_inner()) = Some(supervisor);
        tracing::debug!(pair = %self.name, "pair started");
        Ok(())
    }

    fn join_supervisor(&self) {
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(pair = %self.name, "pair supervisor panicked");
            }
        }
    }
}

/// Waits for a stop request or for both children to finish, then stops both
/// and publishes `Idle`.
fn supervise(name: &str, sync: &PairSync, audio: &Handle, visual: &Handle, poll: Duration) {
    let mut inner = sync.lock();
    // The launching thread holds the lock until `Running` is published, so the
    // first check below already sees any stop issued right after launch.
    while !inner.stop_requested && !(audio.is_finished() && visual.is_finished()) {
        inner = sync
            .changed
            .wait_timeout(inner, poll)
            .unwrap_or_else(|p| p.into_inner())
            .0;
    }
    inner.state = PairState::Stopping;
    drop(inner);

    for child in [visual, audio] {
        if let Err(err) = child.stop_and_wait() {
            tracing::warn!(
                pair = %name,
                activity = child.name(),
                error = %err,
                "failed to stop child"
            );
        }
    }

    let mut inner = sync.lock();
    inner.state = PairState::Idle;
    inner.stop_requested = false;
    sync.changed.notify_all();
    tracing::debug!(pair = %name, "pair stopped");
}

impl Drop for SynchronizedPair {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(pair = %self.name, error = %err, "failed to stop dropped pair");
        }
    }
}

impl fmt::Debug for SynchronizedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedPair")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("audio", &self.audio)
            .field("visual", &self.visual)
            .finish()
    }
}
