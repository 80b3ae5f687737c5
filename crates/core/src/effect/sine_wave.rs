//! Two-color cosine wave across the strip.
//!
//! Each channel follows `y = a * cos(b * x) + y_offset` where `x` maps the
//! strip evenly onto `[0, 2π)`. With oscillation enabled the amplitude itself
//! breathes: `a(t) = a₀ * cos(phase)`, one full cycle per oscillation period.

use std::{f32::consts::TAU, time::Duration};

use super::{check_frame_period, Progress, DEFAULT_FRAME_PERIOD};
use crate::{frame::FrameBuffer, CauldronError, Result, Rgb};

/// Parameters for [`SineWaveEffect`].
#[derive(Debug, Clone, PartialEq)]
pub struct SineWaveParams {
    pub color0: Rgb,
    pub color1: Rgb,
    /// Wave length factor `b`. Larger values fit more waves on the strip.
    pub wave_length: f32,
    /// Time for one full amplitude cycle; `None` keeps the wave still.
    pub oscillation: Option<Duration>,
    pub frame_period: Duration,
}

impl SineWaveParams {
    pub fn new(color0: Rgb, color1: Rgb) -> Self {
        Self {
            color0,
            color1,
            wave_length: 1.0,
            oscillation: None,
            frame_period: DEFAULT_FRAME_PERIOD,
        }
    }

    #[must_use]
    pub fn with_wave_length(mut self, wave_length: f32) -> Self {
        self.wave_length = wave_length;
        self
    }

    #[must_use]
    pub fn with_oscillation(mut self, period: Duration) -> Self {
        self.oscillation = Some(period);
        self
    }

    #[must_use]
    pub fn with_frame_period(mut self, frame_period: Duration) -> Self {
        self.frame_period = frame_period;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SineWaveEffect {
    wave_length: f32,
    frame_period: Duration,
    offsets: [f32; 3],
    base_amplitude: [f32; 3],
    amplitude: [f32; 3],
    phase: f32,
    /// Phase advance per frame; zero when oscillation is off.
    phase_step: f32,
    scratch: Vec<Rgb>,
}

impl SineWaveEffect {
    pub fn new(params: SineWaveParams) -> Result<Self> {
        check_frame_period(params.frame_period)?;
        check_wave_length(params.wave_length)?;
        let phase_step = phase_step(params.frame_period, params.oscillation)?;

        let c0 = params.color0.channels();
        let c1 = params.color1.channels();
        let offsets = [0, 1, 2].map(|i| (c0[i] - c1[i]).abs() / 2.0 + c0[i].min(c1[i]));
        let base_amplitude = [0, 1, 2].map(|i| (c0[i] - c1[i]) / 2.0);

        Ok(Self {
            wave_length: params.wave_length,
            frame_period: params.frame_period,
            offsets,
            base_amplitude,
            amplitude: base_amplitude,
            phase: 0.0,
            phase_step,
            scratch: Vec::new(),
        })
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    pub fn wave_length(&self) -> f32 {
        self.wave_length
    }

    pub fn is_oscillating(&self) -> bool {
        self.phase_step != 0.0
    }

    /// Current per-channel amplitude.
    pub fn amplitude(&self) -> [f32; 3] {
        self.amplitude
    }

    /// Changes the wave length from the next frame on.
    pub fn set_wave_length(&mut self, wave_length: f32) -> Result<()> {
        check_wave_length(wave_length)?;
        self.wave_length = wave_length;
        Ok(())
    }

    /// Turns amplitude oscillation on with a new cycle length, or off with
    /// `None`. Turning it off freezes the wave at full amplitude.
    pub fn set_oscillation(&mut self, oscillation: Option<Duration>) -> Result<()> {
        self.phase_step = phase_step(self.frame_period, oscillation)?;
        if oscillation.is_none() {
            self.reset();
        }
        Ok(())
    }

    pub fn step(&mut self, buffer: &mut FrameBuffer) -> Result<Progress> {
        let len = buffer.len();
        self.scratch.resize(len, Rgb::BLACK);

        let spacing = TAU / len as f32;
        for (i, pixel) in self.scratch.iter_mut().enumerate() {
            let wave = (self.wave_length * spacing * i as f32).cos();
            *pixel =
                Rgb::from_channels([0, 1, 2].map(|c| wave * self.amplitude[c] + self.offsets[c]));
        }
        buffer.bulk_replace(&self.scratch)?;

        if self.phase_step != 0.0 {
            self.phase = (self.phase + self.phase_step) % TAU;
            let factor = self.phase.cos();
            self.amplitude = self.base_amplitude.map(|a| a * factor);
        }

        Ok(Progress::Continue)
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.amplitude = self.base_amplitude;
    }
}

fn check_wave_length(wave_length: f32) -> Result<()> {
    if !wave_length.is_finite() {
        return Err(CauldronError::construction(format!(
            "wave length must be finite, got {wave_length}"
        )));
    }
    Ok(())
}

/// Phase advance per frame so that a full cycle spans
/// `oscillation / frame_period` frames.
fn phase_step(frame_period: Duration, oscillation: Option<Duration>) -> Result<f32> {
    match oscillation {
        None => Ok(0.0),
        Some(period) if period.is_zero() => Err(CauldronError::construction(
            "oscillation period must be positive",
        )),
        Some(period) => Ok(TAU * frame_period.as_secs_f32() / period.as_secs_f32()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        effect::{lock_effect, Effect},
        frame::NullSink,
    };

    fn frame(len: usize) -> FrameBuffer {
        FrameBuffer::new(len, Arc::new(NullSink)).unwrap()
    }

    fn within(value: u8, a: u8, b: u8) -> bool {
        value >= a.min(b) && value <= a.max(b)
    }

    #[test]
    fn starts_on_color0_and_reaches_color1_halfway() {
        let color0 = Rgb::new(3, 252, 11);
        let color1 = Rgb::new(229, 245, 5);
        let mut effect = SineWaveEffect::new(SineWaveParams::new(color0, color1)).unwrap();
        let mut buffer = frame(50);

        effect.step(&mut buffer).unwrap();
        assert_eq!(buffer.get(0).unwrap(), color0);
        assert_eq!(buffer.get(25).unwrap(), color1);
    }

    #[test]
    fn rejects_non_finite_parameters() {
        let params = SineWaveParams::new(Rgb::BLACK, Rgb::new(255, 0, 0));
        assert!(SineWaveEffect::new(params.clone().with_wave_length(f32::NAN)).is_err());
        assert!(SineWaveEffect::new(params.clone().with_oscillation(Duration::ZERO)).is_err());
        assert!(SineWaveEffect::new(params.with_frame_period(Duration::ZERO)).is_err());
    }

    #[test]
    fn oscillation_inverts_the_wave_after_half_a_cycle() {
        let color0 = Rgb::new(0, 0, 0);
        let color1 = Rgb::new(200, 100, 50);
        let params = SineWaveParams::new(color0, color1)
            .with_oscillation(Duration::from_millis(1000))
            .with_frame_period(Duration::from_millis(50));
        let mut effect = SineWaveEffect::new(params).unwrap();
        let mut buffer = frame(10);

        // 20 frames per cycle: after 10 steps the amplitude has flipped sign.
        for _ in 0..10 {
            effect.step(&mut buffer).unwrap();
        }
        effect.step(&mut buffer).unwrap();
        assert_eq!(buffer.get(0).unwrap(), color1);
    }

    #[test]
    fn reset_replays_the_same_frames() {
        let params = SineWaveParams::new(Rgb::new(142, 75, 166), Rgb::new(237, 114, 178))
            .with_wave_length(5.0)
            .with_oscillation(Duration::from_millis(700));
        let mut first = SineWaveEffect::new(params.clone()).unwrap();
        let mut second = SineWaveEffect::new(params).unwrap();
        let (mut a, mut b) = (frame(30), frame(30));

        for _ in 0..7 {
            first.step(&mut a).unwrap();
        }
        first.reset();
        second.reset();
        for _ in 0..40 {
            first.step(&mut a).unwrap();
            second.step(&mut b).unwrap();
            assert_eq!(a.pixels(), b.pixels());
        }
    }

    #[test]
    fn parameters_change_through_the_shared_effect() {
        let color0 = Rgb::new(0, 0, 0);
        let color1 = Rgb::new(200, 100, 50);
        let params =
            SineWaveParams::new(color0, color1).with_frame_period(Duration::from_millis(50));
        let shared = Effect::from(SineWaveEffect::new(params).unwrap()).into_shared();
        let mut buffer = frame(10);

        let mut effect = lock_effect(&shared).unwrap();
        let sine = effect.as_sine_wave_mut().unwrap();
        assert!(!sine.is_oscillating());
        sine.set_wave_length(2.0).unwrap();
        sine.set_oscillation(Some(Duration::from_millis(1000))).unwrap();
        assert!(sine.is_oscillating());
        assert!(sine.set_wave_length(f32::INFINITY).is_err());
        assert!(sine.set_oscillation(Some(Duration::ZERO)).is_err());
        assert_eq!(sine.wave_length(), 2.0);

        // Two full waves across ten pixels.
        effect.step(&mut buffer).unwrap();
        assert_eq!(buffer.get(0).unwrap(), color0);
        assert_eq!(buffer.get(5).unwrap(), color0);

        for _ in 0..10 {
            effect.step(&mut buffer).unwrap();
        }
        assert_eq!(buffer.get(0).unwrap(), color1);

        let sine = effect.as_sine_wave_mut().unwrap();
        assert!(sine.amplitude()[0] > 99.0);
        sine.set_oscillation(None).unwrap();
        assert!(!sine.is_oscillating());
        assert_eq!(sine.amplitude(), [-100.0, -50.0, -25.0]);
    }

    proptest! {
        #[test]
        fn pixels_stay_between_the_two_colors(
            c0 in any::<[u8; 3]>(),
            c1 in any::<[u8; 3]>(),
            wave_length in -20.0f32..20.0,
            oscillation_ms in 60u64..5000,
            len in 1usize..120,
        ) {
            let (color0, color1) = (Rgb::from(c0), Rgb::from(c1));
            let params = SineWaveParams::new(color0, color1)
                .with_wave_length(wave_length)
                .with_oscillation(Duration::from_millis(oscillation_ms));
            let mut effect = SineWaveEffect::new(params).unwrap();
            let mut buffer = frame(len);

            for _ in 0..25 {
                effect.step(&mut buffer).unwrap();
                for pixel in buffer.pixels() {
                    prop_assert!(within(pixel.r, color0.r, color1.r));
                    prop_assert!(within(pixel.g, color0.g, color1.g));
                    prop_assert!(within(pixel.b, color0.b, color1.b));
                }
            }
        }
    }
}
