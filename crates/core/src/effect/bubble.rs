use std::{
    f32::consts::{PI, TAU},
    time::Duration,
};

use super::{check_frame_period, Progress, DEFAULT_FRAME_PERIOD};
use crate::{frame::FrameBuffer, timeline::frames_in, CauldronError, Result, Rgb};

/// Parameters for [`BubbleEffect`].
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleParams {
    /// Strip index the bubble is centred on.
    pub origin: usize,
    pub base_color: Rgb,
    pub bubble_color: Rgb,
    /// Width of the bubble in pixels.
    pub length: usize,
    /// Time for one full swell-and-pop cycle.
    pub pop_duration: Duration,
    pub frame_period: Duration,
}

impl BubbleParams {
    pub fn new(origin: usize, base_color: Rgb, bubble_color: Rgb) -> Self {
        Self {
            origin,
            base_color,
            bubble_color,
            length: 5,
            pop_duration: Duration::from_millis(3000),
            frame_period: DEFAULT_FRAME_PERIOD,
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    #[must_use]
    pub fn with_pop_duration(mut self, pop_duration: Duration) -> Self {
        self.pop_duration = pop_duration;
        self
    }

    #[must_use]
    pub fn with_frame_period(mut self, frame_period: Duration) -> Self {
        self.frame_period = frame_period;
        self
    }
}

/// One bubble swelling and popping at a fixed strip position.
///
/// The pop envelope `(cos(x + π) + 1) / 2` is sampled at one point per
/// frame across the pop duration, giving a smooth 0 → 1 → 0 swell. The same
/// bell shape is used across the bubble's width. The envelope wraps, so a
/// bubble keeps cycling until its owner removes it.
#[derive(Debug, Clone)]
pub struct BubbleEffect {
    origin: usize,
    start: usize,
    length: usize,
    base: [f32; 3],
    amplitude: [f32; 3],
    envelope: Vec<f32>,
    increment: usize,
    age: u64,
    frame_period: Duration,
}

impl BubbleEffect {
    pub fn new(params: BubbleParams) -> Result<Self> {
        check_frame_period(params.frame_period)?;
        if params.length == 0 {
            return Err(CauldronError::construction("bubble length must be positive"));
        }

        let increments = frames_in(params.pop_duration, params.frame_period);
        if increments < 2 {
            return Err(CauldronError::construction(format!(
                "pop duration {:?} spans fewer than two frames of {:?}",
                params.pop_duration, params.frame_period
            )));
        }

        let base = params.base_color.channels();
        let bubble = params.bubble_color.channels();

        Ok(Self {
            origin: params.origin,
            start: params.origin.saturating_sub(params.length / 2),
            length: params.length,
            base,
            amplitude: [0, 1, 2].map(|c| bubble[c] - base[c]),
            envelope: bell_curve(increments),
            increment: 0,
            age: 0,
            frame_period: params.frame_period,
        })
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of frames in one pop cycle.
    pub fn pop_increments(&self) -> usize {
        self.envelope.len()
    }

    /// Frames rendered since construction or the last reset.
    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    /// Paints the bubble over its pixels and advances the pop envelope.
    ///
    /// Returns [`Progress::Complete`] on the step that wraps the envelope.
    pub fn step(&mut self, buffer: &mut FrameBuffer) -> Result<Progress> {
        let len = buffer.len();
        if self.origin >= len {
            return Err(CauldronError::IndexOutOfRange {
                index: self.origin,
                len,
            });
        }

        let end = len.min(self.start + self.length);
        let width = end - self.start;
        let swell = self.envelope[self.increment];
        for offset in 0..width {
            let shape = if width == 1 {
                1.0
            } else {
                bell(TAU * offset as f32 / (width - 1) as f32)
            };
            let color = Rgb::from_channels(
                [0, 1, 2].map(|c| self.base[c] + self.amplitude[c] * swell * shape),
            );
            buffer.set(self.start + offset, color)?;
        }

        self.age += 1;
        self.increment = (self.increment + 1) % self.envelope.len();
        Ok(if self.increment == 0 {
            Progress::Complete
        } else {
            Progress::Continue
        })
    }

    pub fn reset(&mut self) {
        self.increment = 0;
        self.age = 0;
    }
}

fn bell(x: f32) -> f32 {
    ((x + PI).cos() + 1.0) / 2.0
}

/// `points` samples of the bell over `[0, 2π]`, both ends included.
fn bell_curve(points: usize) -> Vec<f32> {
    let spacing = TAU / (points - 1) as f32;
    (0..points).map(|i| bell(spacing * i as f32)).collect()
}
