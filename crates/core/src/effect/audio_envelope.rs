use std::time::Duration;

use super::{check_frame_period, Progress, DEFAULT_FRAME_PERIOD};
use crate::{audio::AudioClip, frame::FrameBuffer, timeline::frames_in, CauldronError, Result};

/// Drives strip brightness from a loudness envelope, one value per frame.
///
/// The envelope is resampled up front so that one pass spans exactly
/// `total_frames` steps. The step after the last value restores the
/// brightness the strip had when the pass started and rewinds, reporting
/// [`Progress::Complete`].
#[derive(Debug, Clone)]
pub struct AudioEnvelopeBrightnessEffect {
    envelope: Vec<f32>,
    frame_period: Duration,
    cursor: usize,
    baseline: Option<f32>,
}

impl AudioEnvelopeBrightnessEffect {
    /// Builds the effect from a decoded clip, one envelope value per frame
    /// of the clip's duration.
    pub fn from_clip(clip: &AudioClip, frame_period: Duration) -> Result<Self> {
        check_frame_period(frame_period)?;
        let total_frames = frames_in(clip.duration(), frame_period);
        if total_frames == 0 {
            return Err(CauldronError::construction(format!(
                "clip of {:?} is shorter than one frame of {frame_period:?}",
                clip.duration()
            )));
        }
        Self::from_envelope(&clip.loudness_envelope(), total_frames, frame_period)
    }

    /// Builds the effect from a precomputed `[0, 1]` envelope, floor-sampling
    /// it down (or up) to `total_frames` values.
    pub fn from_envelope(
        envelope: &[f32],
        total_frames: usize,
        frame_period: Duration,
    ) -> Result<Self> {
        check_frame_period(frame_period)?;
        if envelope.is_empty() {
            return Err(CauldronError::construction("loudness envelope is empty"));
        }
        if total_frames == 0 {
            return Err(CauldronError::construction("total frame count must be positive"));
        }
        if envelope.iter().any(|v| !v.is_finite()) {
            return Err(CauldronError::construction(
                "loudness envelope contains non-finite values",
            ));
        }

        let len = envelope.len();
        let envelope = (0..total_frames)
            .map(|frame| envelope[frame * len / total_frames].clamp(0.0, 1.0))
            .collect();

        Ok(Self {
            envelope,
            frame_period,
            cursor: 0,
            baseline: None,
        })
    }

    pub fn with_default_period(envelope: &[f32], total_frames: usize) -> Result<Self> {
        Self::from_envelope(envelope, total_frames, DEFAULT_FRAME_PERIOD)
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    /// Number of envelope frames in one pass.
    pub fn total_frames(&self) -> usize {
        self.envelope.len()
    }

    pub fn envelope(&self) -> &[f32] {
        &self.envelope
    }

    pub fn step(&mut self, buffer: &mut FrameBuffer) -> Result<Progress> {
        let baseline = *self.baseline.get_or_insert(buffer.brightness());

        if let Some(value) = self.envelope.get(self.cursor) {
            buffer.set_brightness(*value);
            self.cursor += 1;
            return Ok(Progress::Continue);
        }

        buffer.set_brightness(baseline);
        self.cursor = 0;
        self.baseline = None;
        Ok(Progress::Complete)
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.baseline = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::frame::NullSink;

    fn frame() -> FrameBuffer {
        let mut frame = FrameBuffer::new(8, Arc::new(NullSink)).unwrap();
        frame.set_brightness(0.2);
        frame
    }

    #[test]
    fn follows_the_envelope_then_restores_brightness() {
        let envelope = [0.0, 0.5, 1.0, 0.5, 0.0];
        let mut effect = AudioEnvelopeBrightnessEffect::with_default_period(&envelope, 5).unwrap();
        let mut buffer = frame();

        let mut seen = Vec::new();
        for _ in 0..5 {
            assert_eq!(effect.step(&mut buffer).unwrap(), Progress::Continue);
            seen.push(buffer.brightness());
        }
        assert_eq!(seen, envelope);

        assert_eq!(effect.step(&mut buffer).unwrap(), Progress::Complete);
        assert_eq!(buffer.brightness(), 0.2);

        // The next pass starts over.
        effect.step(&mut buffer).unwrap();
        assert_eq!(buffer.brightness(), 0.0);
    }

    #[test]
    fn resamples_to_the_frame_count() {
        let envelope: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        let effect = AudioEnvelopeBrightnessEffect::with_default_period(&envelope, 4).unwrap();
        assert_eq!(effect.envelope(), &[0.0, 0.2, 0.5, 0.7]);

        let stretched =
            AudioEnvelopeBrightnessEffect::with_default_period(&[0.25, 0.75], 4).unwrap();
        assert_eq!(stretched.envelope(), &[0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn rejects_empty_inputs() {
        assert!(AudioEnvelopeBrightnessEffect::with_default_period(&[], 3).is_err());
        assert!(AudioEnvelopeBrightnessEffect::with_default_period(&[0.5], 0).is_err());
        assert!(AudioEnvelopeBrightnessEffect::with_default_period(&[f32::NAN], 1).is_err());
    }

    #[test]
    fn builds_from_a_clip() {
        // 1s at 100 Hz with 50ms frames gives 20 envelope values.
        let samples: Vec<f32> = (0..100).map(|i| if i < 50 { 0.0 } else { 1.0 }).collect();
        let clip = AudioClip::new(samples, 100, 1).unwrap();
        let effect =
            AudioEnvelopeBrightnessEffect::from_clip(&clip, Duration::from_millis(50)).unwrap();
        assert_eq!(effect.total_frames(), 20);
        assert_eq!(effect.envelope()[0], 0.0);
        assert_eq!(effect.envelope()[19], 1.0);

        let short = AudioClip::new(vec![0.5; 2], 100, 1).unwrap();
        assert!(
            AudioEnvelopeBrightnessEffect::from_clip(&short, Duration::from_millis(50)).is_err()
        );
    }

    #[test]
    fn reset_rewinds_mid_pass() {
        let envelope = [0.1, 0.9, 0.4];
        let mut effect = AudioEnvelopeBrightnessEffect::with_default_period(&envelope, 3).unwrap();
        let mut buffer = frame();
        effect.step(&mut buffer).unwrap();
        effect.step(&mut buffer).unwrap();
        effect.reset();
        effect.step(&mut buffer).unwrap();
        assert_eq!(buffer.brightness(), 0.1);
    }
}
