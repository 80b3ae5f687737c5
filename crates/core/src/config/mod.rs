use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{effect::BubblingParams, CauldronError, Result, Rgb};

/// Top-level configuration for a cauldron installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CauldronConfig {
    pub num_pixels: usize,
    pub frame_period_ms: u64,
    /// Strip brightness while the base loop runs, in `[0, 1]`.
    pub brightness: f32,
    pub palette: Vec<ColorPair>,
    pub bubbles: BubbleConfig,
    pub sounds: SoundConfig,
    /// Seeds bubble spawning and explosion color picks. Random when absent.
    pub seed: Option<u64>,
}

impl Default for CauldronConfig {
    fn default() -> Self {
        Self {
            num_pixels: 50,
            frame_period_ms: 33,
            brightness: 0.2,
            palette: vec![
                ColorPair::new(Rgb::new(32, 139, 25), Rgb::new(215, 232, 23)),
                ColorPair::new(Rgb::new(142, 75, 166), Rgb::new(237, 114, 178)),
                ColorPair::new(Rgb::new(255, 179, 0), Rgb::new(255, 0, 60)),
                ColorPair::new(Rgb::new(235, 57, 21), Rgb::new(76, 172, 194)),
            ],
            bubbles: BubbleConfig::default(),
            sounds: SoundConfig::default(),
            seed: None,
        }
    }
}

impl CauldronConfig {
    /// Reads and validates a JSON configuration file. Missing fields take
    /// their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_pixels == 0 {
            return Err(CauldronError::construction("num_pixels must be positive"));
        }
        if self.frame_period_ms == 0 {
            return Err(CauldronError::construction("frame_period_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&self.brightness) {
            return Err(CauldronError::construction(format!(
                "brightness must be in [0, 1], got {}",
                self.brightness
            )));
        }
        if self.palette.len() < 2 {
            return Err(CauldronError::construction(
                "palette needs at least two color pairs to switch between",
            ));
        }
        let scale = self.sounds.bubbling_rate_scale;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(CauldronError::construction(format!(
                "bubbling_rate_scale must be positive, got {scale}"
            )));
        }
        Ok(())
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms)
    }

    /// Bubbling parameters for palette entry `index`.
    pub fn bubbling_params(&self, index: usize) -> Result<BubblingParams> {
        let colors = self
            .palette
            .get(index)
            .ok_or(CauldronError::IndexOutOfRange {
                index,
                len: self.palette.len(),
            })?;
        let bubbles = &self.bubbles;
        Ok(BubblingParams {
            lengths: bubbles.lengths.clone(),
            length_weights: bubbles.length_weights.clone(),
            pop_durations: bubbles
                .pop_durations_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            pop_weights: bubbles.pop_weights.clone(),
            max_bubbles: bubbles.max_bubbles,
            spawn_prob: bubbles.spawn_prob,
            retire_popped: bubbles.retire_popped,
            frame_period: self.frame_period(),
            seed: self.seed.map(|seed| seed.wrapping_add(index as u64)),
            ..BubblingParams::new(colors.base, colors.bubble)
        })
    }
}

/// Base color of the strip and the color its bubbles swell towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPair {
    pub base: Rgb,
    pub bubble: Rgb,
}

impl ColorPair {
    pub const fn new(base: Rgb, bubble: Rgb) -> Self {
        Self { base, bubble }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BubbleConfig {
    pub lengths: Vec<usize>,
    pub length_weights: Vec<f64>,
    pub pop_durations_ms: Vec<u64>,
    pub pop_weights: Vec<f64>,
    pub max_bubbles: usize,
    pub spawn_prob: f64,
    pub retire_popped: bool,
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            lengths: vec![7, 9, 11],
            length_weights: vec![0.5, 0.25, 0.25],
            pop_durations_ms: vec![3000, 4000, 5000],
            pop_weights: vec![0.5, 0.25, 0.25],
            max_bubbles: 10,
            spawn_prob: 0.05,
            retire_popped: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Looped under the base animation.
    pub bubbling: PathBuf,
    /// Playback rate of the bubbling loop relative to the recording.
    pub bubbling_rate_scale: f32,
    pub explosion: PathBuf,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            bubbling: PathBuf::from("files/audio/bubbles.wav"),
            bubbling_rate_scale: 0.25,
            explosion: PathBuf::from("files/audio/poof.wav"),
        }
    }
}
