//! Effect system with compile-time known effect variants.
//!
//! Every effect is a stateful per-frame generator over a [`FrameBuffer`].
//! Variants are stored in the [`Effect`] enum and dispatched by matching, so
//! the set of effects is closed and known up front.

mod audio_envelope;
mod bubble;
mod bubbling;
mod sine_wave;

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

pub use audio_envelope::AudioEnvelopeBrightnessEffect;
pub use bubble::{BubbleEffect, BubbleParams};
pub use bubbling::{BubblingField, BubblingParams, WeightedChoice};
pub use sine_wave::{SineWaveEffect, SineWaveParams};

use crate::{frame::FrameBuffer, CauldronError, Result};

/// Render cadence used when an effect does not override it.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(50);

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More frames follow in the current pass.
    Continue,
    /// The step finished one natural pass of the effect (an envelope wrapped,
    /// a clip ended). Looping activities keep going; one-shot activities stop.
    Complete,
}

/// Effect slot - enum containing all possible effects.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Two-color cosine wave, optionally breathing in amplitude.
    SineWave(SineWaveEffect),
    /// A single bubble popping at a fixed position.
    Bubble(BubbleEffect),
    /// A randomly spawning population of bubbles.
    BubblingField(BubblingField),
    /// Strip brightness following an audio clip's loudness.
    AudioEnvelope(AudioEnvelopeBrightnessEffect),
}

/// Effect shared between the control path and the activity rendering it.
pub type SharedEffect = Arc<Mutex<Effect>>;

impl Effect {
    /// Render one frame into `buffer`.
    pub fn step(&mut self, buffer: &mut FrameBuffer) -> Result<Progress> {
        match self {
            Self::SineWave(effect) => effect.step(buffer),
            Self::Bubble(effect) => effect.step(buffer),
            Self::BubblingField(effect) => effect.step(buffer),
            Self::AudioEnvelope(effect) => effect.step(buffer),
        }
    }

    /// Return to the construction-time state.
    pub fn reset(&mut self) {
        match self {
            Self::SineWave(effect) => effect.reset(),
            Self::Bubble(effect) => effect.reset(),
            Self::BubblingField(effect) => effect.reset(),
            Self::AudioEnvelope(effect) => effect.reset(),
        }
    }

    pub fn frame_period(&self) -> Duration {
        match self {
            Self::SineWave(effect) => effect.frame_period(),
            Self::Bubble(effect) => effect.frame_period(),
            Self::BubblingField(effect) => effect.frame_period(),
            Self::AudioEnvelope(effect) => effect.frame_period(),
        }
    }

    /// The wrapped sine wave, for changing its parameters while it plays.
    pub fn as_sine_wave_mut(&mut self) -> Option<&mut SineWaveEffect> {
        match self {
            Self::SineWave(effect) => Some(effect),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::SineWave(_) => "sine_wave",
            Self::Bubble(_) => "bubble",
            Self::BubblingField(_) => "bubbling_field",
            Self::AudioEnvelope(_) => "audio_envelope",
        }
    }

    pub fn into_shared(self) -> SharedEffect {
        Arc::new(Mutex::new(self))
    }
}

impl From<SineWaveEffect> for Effect {
    fn from(effect: SineWaveEffect) -> Self {
        Self::SineWave(effect)
    }
}

impl From<BubbleEffect> for Effect {
    fn from(effect: BubbleEffect) -> Self {
        Self::Bubble(effect)
    }
}

impl From<BubblingField> for Effect {
    fn from(effect: BubblingField) -> Self {
        Self::BubblingField(effect)
    }
}

impl From<AudioEnvelopeBrightnessEffect> for Effect {
    fn from(effect: AudioEnvelopeBrightnessEffect) -> Self {
        Self::AudioEnvelope(effect)
    }
}

/// Locks a shared effect, mapping poisoning to [`CauldronError::Poisoned`].
pub fn lock_effect(effect: &SharedEffect) -> Result<MutexGuard<'_, Effect>> {
    effect.lock().map_err(|_| CauldronError::Poisoned("effect"))
}

fn check_frame_period(frame_period: Duration) -> Result<()> {
    if frame_period.is_zero() {
        return Err(CauldronError::construction("frame period must be positive"));
    }
    Ok(())
}
