use std::{collections::BTreeMap, fmt, time::Duration};

use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::SmallRng,
    Rng, SeedableRng,
};

use super::{check_frame_period, BubbleEffect, BubbleParams, Progress, DEFAULT_FRAME_PERIOD};
use crate::{frame::FrameBuffer, CauldronError, Result, Rgb};

/// Weighted random choice over a fixed set of options.
#[derive(Clone)]
pub struct WeightedChoice<T> {
    options: Vec<T>,
    index: WeightedIndex<f64>,
}

impl<T: Clone> WeightedChoice<T> {
    pub fn new(options: Vec<T>, weights: &[f64]) -> Result<Self> {
        if options.is_empty() {
            return Err(CauldronError::construction("weighted choice needs at least one option"));
        }
        if options.len() != weights.len() {
            return Err(CauldronError::construction(format!(
                "{} options but {} weights",
                options.len(),
                weights.len()
            )));
        }
        let index = WeightedIndex::new(weights)
            .map_err(|err| CauldronError::construction(format!("invalid weights: {err}")))?;
        Ok(Self { options, index })
    }

    pub fn options(&self) -> &[T] {
        &self.options
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        self.options[self.index.sample(rng)].clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for WeightedChoice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedChoice")
            .field("options", &self.options)
            .finish()
    }
}

/// Parameters for [`BubblingField`].
#[derive(Debug, Clone, PartialEq)]
pub struct BubblingParams {
    pub base_color: Rgb,
    pub bubble_color: Rgb,
    pub lengths: Vec<usize>,
    pub length_weights: Vec<f64>,
    pub pop_durations: Vec<Duration>,
    pub pop_weights: Vec<f64>,
    pub max_bubbles: usize,
    /// Chance of spawning a bubble on any given frame, in `(0, 1]`.
    pub spawn_prob: f64,
    /// Remove bubbles after their first pop instead of letting them cycle.
    pub retire_popped: bool,
    pub frame_period: Duration,
    /// Seed for spawn decisions. `None` picks a random seed at construction.
    pub seed: Option<u64>,
}

impl BubblingParams {
    pub fn new(base_color: Rgb, bubble_color: Rgb) -> Self {
        Self {
            base_color,
            bubble_color,
            lengths: vec![7, 9, 11],
            length_weights: vec![0.5, 0.25, 0.25],
            pop_durations: vec![
                Duration::from_millis(3000),
                Duration::from_millis(4000),
                Duration::from_millis(5000),
            ],
            pop_weights: vec![0.5, 0.25, 0.25],
            max_bubbles: 10,
            spawn_prob: 0.05,
            retire_popped: false,
            frame_period: DEFAULT_FRAME_PERIOD,
            seed: None,
        }
    }
}

/// A managed population of [`BubbleEffect`]s over a base color.
///
/// Each step may spawn one bubble at a free strip index, then repaints the
/// base color and composites every live bubble in index order.
#[derive(Debug, Clone)]
pub struct BubblingField {
    base_color: Rgb,
    bubble_color: Rgb,
    lengths: WeightedChoice<usize>,
    pop_durations: WeightedChoice<Duration>,
    max_bubbles: usize,
    spawn_prob: f64,
    retire_popped: bool,
    frame_period: Duration,
    seed: u64,
    rng: SmallRng,
    bubbles: BTreeMap<usize, BubbleEffect>,
}

impl BubblingField {
    pub fn new(params: BubblingParams) -> Result<Self> {
        check_frame_period(params.frame_period)?;
        if params.max_bubbles == 0 {
            return Err(CauldronError::construction("max_bubbles must be positive"));
        }
        if !(params.spawn_prob > 0.0 && params.spawn_prob <= 1.0) {
            return Err(CauldronError::construction(format!(
                "spawn probability must be in (0, 1], got {}",
                params.spawn_prob
            )));
        }
        if params.lengths.contains(&0) {
            return Err(CauldronError::construction("bubble lengths must be positive"));
        }

        // Every length and pop duration combination must make a valid bubble.
        for &length in &params.lengths {
            for &pop_duration in &params.pop_durations {
                BubbleEffect::new(
                    BubbleParams::new(0, params.base_color, params.bubble_color)
                        .with_length(length)
                        .with_pop_duration(pop_duration)
                        .with_frame_period(params.frame_period),
                )?;
            }
        }

        let lengths = WeightedChoice::new(params.lengths, &params.length_weights)?;
        let pop_durations = WeightedChoice::new(params.pop_durations, &params.pop_weights)?;
        let seed = params.seed.unwrap_or_else(rand::random);

        Ok(Self {
            base_color: params.base_color,
            bubble_color: params.bubble_color,
            lengths,
            pop_durations,
            max_bubbles: params.max_bubbles,
            spawn_prob: params.spawn_prob,
            retire_popped: params.retire_popped,
            frame_period: params.frame_period,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            bubbles: BTreeMap::new(),
        })
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    pub fn base_color(&self) -> Rgb {
        self.base_color
    }

    pub fn bubble_color(&self) -> Rgb {
        self.bubble_color
    }

    pub fn max_bubbles(&self) -> usize {
        self.max_bubbles
    }

    pub fn population(&self) -> usize {
        self.bubbles.len()
    }

    /// Strip indices currently holding a bubble, in ascending order.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.bubbles.keys().copied()
    }

    pub fn step(&mut self, buffer: &mut FrameBuffer) -> Result<Progress> {
        let len = buffer.len();
        let capacity = self.max_bubbles.min(len);
        if self.bubbles.len() < capacity && self.rng.gen_bool(self.spawn_prob) {
            self.spawn(len)?;
        }

        buffer.set_all(self.base_color);
        let mut popped = Vec::new();
        for (&origin, bubble) in &mut self.bubbles {
            if bubble.step(buffer)? == Progress::Complete {
                popped.push(origin);
            }
        }

        if self.retire_popped {
            for origin in popped {
                self.bubbles.remove(&origin);
            }
        }
        Ok(Progress::Continue)
    }

    /// Drops every bubble and rewinds the spawn sequence.
    pub fn reset(&mut self) {
        self.bubbles.clear();
        self.rng = SmallRng::seed_from_u64(self.seed);
    }

    fn spawn(&mut self, len: usize) -> Result<()> {
        let free = len - self.bubbles.len();
        let pick = self.rng.gen_range(0..free);
        let Some(origin) = (0..len)
            .filter(|index| !self.bubbles.contains_key(index))
            .nth(pick)
        else {
            return Ok(());
        };

        let params = BubbleParams::new(origin, self.base_color, self.bubble_color)
            .with_length(self.lengths.sample(&mut self.rng))
            .with_pop_duration(self.pop_durations.sample(&mut self.rng))
            .with_frame_period(self.frame_period);
        self.bubbles.insert(origin, BubbleEffect::new(params)?);
        tracing::trace!(origin, population = self.bubbles.len(), "bubble spawned");
        Ok(())
    }
}
