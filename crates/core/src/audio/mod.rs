//! Decoded audio clips and the contracts used to load and play them.
//!
//! Decoding files and driving an output device are left to collaborators
//! implementing [`AudioSource`] and [`AudioSink`]. The in-crate
//! implementations cover tests, dry runs and synthesised clips.

use std::{
    collections::HashMap,
    f32::consts::TAU,
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{effect::Progress, CauldronError, Result};

/// Default length of a single `play_chunk` call. Stop requests are observed
/// between chunks, so this bounds how long stopping audio can take.
pub const DEFAULT_CHUNK: Duration = Duration::from_millis(100);

/// Interleaved floating point samples plus their format.
#[derive(Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(CauldronError::construction("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(CauldronError::construction("a clip needs at least one channel"));
        }
        if samples.is_empty() {
            return Err(CauldronError::construction("a clip needs at least one sample"));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(CauldronError::construction(format!(
                "{} samples cannot be split into {channels} channels",
                samples.len()
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Mono sine tone with a short fade at both ends to avoid clicks.
    pub fn tone(frequency_hz: f32, duration: Duration, sample_rate: u32) -> Result<Self> {
        let len = frame_count(duration, sample_rate).max(1);
        let fade = (len / 20).max(1) as f32;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate.max(1) as f32;
                let edge = (i.min(len - 1 - i) as f32 / fade).min(1.0);
                (TAU * frequency_hz * t).sin() * 0.5 * edge
            })
            .collect();
        Self::new(samples, sample_rate, 1)
    }

    /// Mono noise burst with an exponential decay, roughly a "poof".
    pub fn burst(duration: Duration, sample_rate: u32, seed: u64) -> Result<Self> {
        let len = frame_count(duration, sample_rate).max(1);
        let mut rng = SmallRng::seed_from_u64(seed);
        let samples = (0..len)
            .map(|i| {
                let decay = (-5.0 * i as f32 / len as f32).exp();
                rng.gen_range(-1.0_f32..=1.0) * decay
            })
            .collect();
        Self::new(samples, sample_rate, 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of multi-channel frames in the clip.
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Reinterprets the clip at a scaled sample rate. A scale of `0.25` plays
    /// the same samples four times slower and two octaves lower.
    pub fn with_rate_scale(mut self, scale: f32) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CauldronError::construction(format!(
                "rate scale must be a positive number, got {scale}"
            )));
        }
        let rate = (self.sample_rate as f32 * scale).round();
        if rate < 1.0 {
            return Err(CauldronError::construction(format!(
                "rate scale {scale} leaves no usable sample rate"
            )));
        }
        self.sample_rate = rate as u32;
        Ok(self)
    }

    /// Loudness per frame normalised to `[0, 1]`.
    ///
    /// Each frame takes its loudest channel; the result is min-max
    /// normalised. A clip without any dynamic range yields all zeros.
    pub fn loudness_envelope(&self) -> Vec<f32> {
        let channels = usize::from(self.channels);
        let raw: Vec<f32> = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().fold(0.0_f32, |acc, s| acc.max(s.abs())))
            .collect();

        let (min, max) = raw
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        let range = max - min;
        if !range.is_finite() || range <= f32::EPSILON {
            return vec![0.0; raw.len()];
        }
        raw.iter().map(|v| ((v - min) / range).clamp(0.0, 1.0)).collect()
    }

    /// Borrowed view over `frames` frames starting at frame `start`.
    pub fn chunk(&self, start: usize, frames: usize) -> AudioChunk<'_> {
        let channels = usize::from(self.channels);
        let begin = (start * channels).min(self.samples.len());
        let end = ((start + frames) * channels).min(self.samples.len());
        AudioChunk {
            samples: &self.samples[begin..end],
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frames())
            .finish()
    }
}

/// A slice of a clip handed to an [`AudioSink`].
#[derive(Debug, Clone, Copy)]
pub struct AudioChunk<'a> {
    pub samples: &'a [f32],
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk<'_> {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// Loads audio for effects and playback. Failures surface as
/// [`CauldronError::Decode`] while things are being built.
pub trait AudioSource {
    fn decode(&self, path: &Path) -> Result<AudioClip>;
}

/// Audio output. `play_chunk` blocks until the chunk has been rendered.
pub trait AudioSink: Send + Sync {
    fn play_chunk(&self, chunk: &AudioChunk<'_>) -> Result<()>;
}

/// Source backed by clips registered up front.
#[derive(Debug, Default)]
pub struct InMemorySource {
    clips: HashMap<PathBuf, AudioClip>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, clip: AudioClip) {
        self.clips.insert(path.into(), clip);
    }

    #[must_use]
    pub fn with_clip(mut self, path: impl Into<PathBuf>, clip: AudioClip) -> Self {
        self.insert(path, clip);
        self
    }
}

impl AudioSource for InMemorySource {
    fn decode(&self, path: &Path) -> Result<AudioClip> {
        self.clips
            .get(path)
            .cloned()
            .ok_or_else(|| CauldronError::decode(path, "no clip registered for this path"))
    }
}

/// Sink that blocks for each chunk's playback time without producing sound.
///
/// `speed` divides the wait, which keeps tests fast while preserving the
/// blocking behaviour of a real device.
#[derive(Debug)]
pub struct PacedSink {
    speed: f32,
    chunks_played: AtomicUsize,
}

impl PacedSink {
    pub fn realtime() -> Self {
        Self::with_speed(1.0)
    }

    pub fn with_speed(speed: f32) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        Self {
            speed,
            chunks_played: AtomicUsize::new(0),
        }
    }

    pub fn chunks_played(&self) -> usize {
        self.chunks_played.load(Ordering::Relaxed)
    }
}

impl AudioSink for PacedSink {
    fn play_chunk(&self, chunk: &AudioChunk<'_>) -> Result<()> {
        thread::sleep(chunk.duration().div_f32(self.speed));
        self.chunks_played.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Chunked playback cursor over a clip.
///
/// Each call to [`AudioPlayback::play_next`] plays one chunk and reports
/// [`Progress::Complete`] once the clip has been played to the end, at which
/// point the cursor rewinds.
pub struct AudioPlayback {
    clip: Arc<AudioClip>,
    sink: Arc<dyn AudioSink>,
    chunk_frames: usize,
    position: usize,
}

impl AudioPlayback {
    pub fn new(clip: Arc<AudioClip>, sink: Arc<dyn AudioSink>, chunk: Duration) -> Self {
        let chunk_frames = frame_count(chunk, clip.sample_rate()).max(1);
        Self {
            clip,
            sink,
            chunk_frames,
            position: 0,
        }
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn play_next(&mut self) -> Result<Progress> {
        let chunk = self.clip.chunk(self.position, self.chunk_frames);
        self.position += chunk.frames();
        let played = self.sink.play_chunk(&chunk);

        let progress = if self.position >= self.clip.frames() {
            self.position = 0;
            Progress::Complete
        } else {
            Progress::Continue
        };
        played.map(|()| progress)
    }
}

impl fmt::Debug for AudioPlayback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPlayback")
            .field("clip", &self.clip)
            .field("chunk_frames", &self.chunk_frames)
            .field("position", &self.position)
            .finish()
    }
}

fn frame_count(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_clips() {
        assert!(AudioClip::new(vec![], 44_100, 1).is_err());
        assert!(AudioClip::new(vec![0.0; 3], 44_100, 2).is_err());
        assert!(AudioClip::new(vec![0.0; 4], 0, 2).is_err());
        assert!(AudioClip::new(vec![0.0; 4], 44_100, 0).is_err());
    }

    #[test]
    fn envelope_is_normalised_per_frame() {
        let clip = AudioClip::new(vec![0.5, -1.0, 0.0, 0.25, -0.75, 0.1], 10, 2).unwrap();
        // Loudest channel per frame: 1.0, 0.25, 0.75.
        let envelope = clip.loudness_envelope();
        assert_eq!(envelope.len(), 3);
        assert!((envelope[0] - 1.0).abs() < 1e-6);
        assert!(envelope[1].abs() < 1e-6);
        assert!((envelope[2] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn silent_clips_have_a_flat_envelope() {
        let clip = AudioClip::new(vec![0.0; 8], 8, 1).unwrap();
        assert!(clip.loudness_envelope().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rate_scale_stretches_duration() {
        let clip = AudioClip::tone(440.0, Duration::from_secs(1), 1000).unwrap();
        let slowed = clip.with_rate_scale(0.25).unwrap();
        assert_eq!(slowed.sample_rate(), 250);
        assert_eq!(slowed.duration(), Duration::from_secs(4));
        assert!(slowed.clone().with_rate_scale(0.0).is_err());
    }

    #[test]
    fn unknown_paths_fail_to_decode() {
        let source = InMemorySource::new().with_clip(
            "poof.wav",
            AudioClip::burst(Duration::from_millis(10), 1000, 7).unwrap(),
        );
        assert!(source.decode(Path::new("poof.wav")).is_ok());
        let err = source.decode(Path::new("missing.wav")).unwrap_err();
        assert!(matches!(err, CauldronError::Decode { .. }));
        assert!(format!("{err}").contains("missing.wav"));
    }

    #[test]
    fn playback_walks_the_clip_in_chunks() {
        let clip = Arc::new(AudioClip::new(vec![0.1; 25], 100, 1).unwrap());
        let sink = Arc::new(PacedSink::with_speed(1000.0));
        let mut playback = AudioPlayback::new(clip, sink.clone(), Duration::from_millis(100));

        assert_eq!(playback.play_next().unwrap(), Progress::Continue);
        assert_eq!(playback.play_next().unwrap(), Progress::Continue);
        assert_eq!(playback.play_next().unwrap(), Progress::Complete);
        assert_eq!(playback.position(), 0);
        assert_eq!(sink.chunks_played(), 3);
    }
}
