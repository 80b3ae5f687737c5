//! The cauldron: a bubbling base loop that changes color on every explosion.
//!
//! [`Cauldron`] owns every pre-built effect and activity up front. The base
//! loop pairs a looping bubbling sound with one [`BubblingField`] per palette
//! entry; an explosion plays a one-shot sound whose loudness drives the strip
//! brightness while the base loop switches to a different palette entry.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    activity::{Activity, Handle},
    audio::{AudioSink, AudioSource, DEFAULT_CHUNK},
    config::CauldronConfig,
    effect::{lock_effect, AudioEnvelopeBrightnessEffect, BubblingField, Effect, SharedEffect},
    frame::{lock_frame, FrameBuffer, FrameSink, FrameSnapshot, SharedFrameBuffer},
    pair::SynchronizedPair,
    CauldronError, Result, Rgb,
};

/// The control surface exposed to whatever drives the cauldron (HTTP, RPC,
/// CLI).
pub trait CauldronControl {
    /// Starts the base loop with the first palette entry. No-op while running.
    fn start(&self) -> Result<()>;
    /// Stops everything and leaves the strip dark.
    fn stop(&self) -> Result<()>;
    /// Plays an explosion and switches the base loop to a different color.
    fn cause_explosion(&self) -> Result<()>;
    /// True while both halves of the base loop are running.
    fn is_playing(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauldronState {
    Stopped,
    BaseLoop(usize),
    /// An explosion is playing over the base loop of the given color.
    Exploding(usize),
}

/// One palette entry of the base loop.
struct BaseLoop {
    base_color: Rgb,
    effect: SharedEffect,
    visual: Activity,
}

struct Inner {
    state: CauldronState,
    index: usize,
    rng: SmallRng,
    audio: Option<Handle>,
    visual: Option<Handle>,
}

pub struct Cauldron {
    frame: SharedFrameBuffer,
    brightness: f32,
    bases: Vec<BaseLoop>,
    bubbling_audio: Activity,
    explosion_effect: SharedEffect,
    explosion: SynchronizedPair,
    inner: Mutex<Inner>,
}

impl Cauldron {
    /// Builds every effect and activity for `config`. Decoding failures and
    /// invalid parameters are reported here; the cauldron starts stopped.
    pub fn new(
        config: &CauldronConfig,
        frame_sink: Arc<dyn FrameSink>,
        source: &dyn AudioSource,
        audio_sink: Arc<dyn AudioSink>,
    ) -> Result<Self> {
        config.validate()?;

        let mut frame = FrameBuffer::new(config.num_pixels, frame_sink)?;
        frame.set_brightness(config.brightness);
        let frame = frame.into_shared();

        let bases = config
            .palette
            .iter()
            .enumerate()
            .map(|(index, colors)| {
                let field = BubblingField::new(config.bubbling_params(index)?)?;
                let effect = Effect::from(field).into_shared();
                let visual = Activity::for_effect(
                    format!("bubbling-{index}"),
                    effect.clone(),
                    frame.clone(),
                )?;
                Ok(BaseLoop {
                    base_color: colors.base,
                    effect,
                    visual,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let bubbling = source
            .decode(&config.sounds.bubbling)?
            .with_rate_scale(config.sounds.bubbling_rate_scale)?;
        let bubbling_audio = Activity::for_audio(
            "bubbling-audio",
            Arc::new(bubbling),
            audio_sink.clone(),
            DEFAULT_CHUNK,
        );

        let explosion_clip = Arc::new(source.decode(&config.sounds.explosion)?);
        let explosion_effect = Effect::from(AudioEnvelopeBrightnessEffect::from_clip(
            &explosion_clip,
            config.frame_period(),
        )?)
        .into_shared();
        let explosion = SynchronizedPair::new(
            "explosion",
            Activity::for_audio("explosion-audio", explosion_clip, audio_sink, DEFAULT_CHUNK),
            Activity::for_effect("explosion", explosion_effect.clone(), frame.clone())?,
        );

        let seed = config.seed.unwrap_or_else(rand::random);
        tracing::debug!(
            pixels = config.num_pixels,
            palette = bases.len(),
            "cauldron built"
        );

        Ok(Self {
            frame,
            brightness: config.brightness,
            bases,
            bubbling_audio,
            explosion_effect,
            explosion,
            inner: Mutex::new(Inner {
                state: CauldronState::Stopped,
                index: 0,
                rng: SmallRng::seed_from_u64(seed),
                audio: None,
                visual: None,
            }),
        })
    }

    /// Current state. An explosion that has finished playing reports the base
    /// loop it left behind.
    pub fn state(&self) -> CauldronState {
        let Ok(inner) = self.lock() else {
            return CauldronState::Stopped;
        };
        match inner.state {
            CauldronState::Exploding(index) if !self.explosion.is_running() => {
                CauldronState::BaseLoop(index)
            }
            state => state,
        }
    }

    /// Palette entry of the current (or most recent) base loop.
    pub fn color_index(&self) -> usize {
        self.lock().map(|inner| inner.index).unwrap_or_default()
    }

    pub fn palette_len(&self) -> usize {
        self.bases.len()
    }

    /// Copy of the strip as last rendered.
    pub fn snapshot(&self) -> Result<FrameSnapshot> {
        Ok(lock_frame(&self.frame)?.snapshot())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CauldronError::Poisoned("cauldron"))
    }

    /// Resets the palette entry's field, paints its base color and starts it.
    fn start_base(&self, index: usize) -> Result<Handle> {
        let base = &self.bases[index];
        lock_effect(&base.effect)?.reset();
        lock_frame(&self.frame)?.set_all(base.base_color);
        base.visual.start_loop()
    }

    fn restore_brightness(&self) -> Result<()> {
        lock_frame(&self.frame)?.set_brightness(self.brightness);
        Ok(())
    }
}

impl CauldronControl for Cauldron {
    fn start(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state != CauldronState::Stopped {
            return Ok(());
        }

        self.restore_brightness()?;
        let audio = self.bubbling_audio.start_loop()?;
        audio.wait_started();
        let visual = match self.start_base(0) {
            Ok(visual) => visual,
            Err(err) => {
                audio.stop_and_wait()?;
                return Err(err);
            }
        };

        inner.index = 0;
        inner.audio = Some(audio);
        inner.visual = Some(visual);
        inner.state = CauldronState::BaseLoop(0);
        tracing::info!(color = 0, "cauldron started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == CauldronState::Stopped {
            return Ok(());
        }

        // Every renderer must be gone before the strip is blanked, otherwise
        // a late frame could light it up again.
        let mut outcome = self.explosion.stop();
        for handle in [inner.visual.take(), inner.audio.take()].into_iter().flatten() {
            let stopped = handle.stop_and_wait();
            if outcome.is_ok() {
                outcome = stopped;
            }
        }
        inner.state = CauldronState::Stopped;

        let mut frame = lock_frame(&self.frame)?;
        frame.blank();
        if let Err(err) = frame.flush() {
            tracing::warn!(error = %err, "failed to transmit the blank frame");
        }
        drop(frame);

        tracing::info!("cauldron stopped");
        outcome
    }

    fn cause_explosion(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let current = match inner.state {
            CauldronState::Stopped => return Err(CauldronError::NotRunning),
            CauldronState::BaseLoop(index) | CauldronState::Exploding(index) => index,
        };

        // An interrupted explosion never reaches its restore frame.
        self.explosion.stop()?;
        self.restore_brightness()?;
        lock_effect(&self.explosion_effect)?.reset();

        let next = pick_next_color(&mut inner.rng, current, self.bases.len());
        if let Some(visual) = inner.visual.take() {
            visual.stop_and_wait()?;
        }

        let played = self.explosion.play();
        inner.visual = Some(self.start_base(next)?);
        inner.index = next;
        inner.state = CauldronState::Exploding(next);
        tracing::info!(from = current, to = next, "explosion");
        played
    }

    fn is_playing(&self) -> bool {
        let Ok(inner) = self.lock() else {
            return false;
        };
        let running = |handle: &Option<Handle>| handle.as_ref().is_some_and(Handle::is_running);
        running(&inner.audio) && running(&inner.visual)
    }
}

/// Picks a palette index uniformly among the `len - 1` entries other than
/// `current`.
pub fn pick_next_color<R: Rng + ?Sized>(rng: &mut R, current: usize, len: usize) -> usize {
    if len < 2 {
        return 0;
    }
    (current + rng.gen_range(1..len)) % len
}

impl Drop for Cauldron {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "failed to stop the cauldron on drop");
        }
    }
}

impl fmt::Debug for Cauldron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cauldron")
            .field("state", &self.state())
            .field("palette", &self.bases.len())
            .field("explosion", &self.explosion)
            .finish()
    }
}
