//! Core library for the cauldron LED strip.
//!
//! The crate renders procedural effects into an in-memory [`FrameBuffer`],
//! runs them (and the audio that goes with them) as cancellable background
//! [`Activity`] values, couples audio and visuals through
//! [`SynchronizedPair`], and switches between pre-built combinations with the
//! [`Cauldron`] orchestrator. Frame transmission and audio decoding/output are
//! reached through the [`FrameSink`], [`AudioSource`] and [`AudioSink`]
//! contracts.

pub mod activity;
pub mod audio;
pub mod cauldron;
pub mod color;
pub mod config;
pub mod effect;
pub mod error;
pub mod frame;
pub mod pair;
pub mod timeline;

pub use activity::{Activity, ActivityState, Handle};
pub use audio::{AudioClip, AudioSink, AudioSource, InMemorySource, PacedSink};
pub use cauldron::{Cauldron, CauldronControl, CauldronState};
pub use color::Rgb;
pub use config::{BubbleConfig, CauldronConfig, ColorPair, SoundConfig};
pub use effect::{Effect, Progress, SharedEffect};
pub use error::{CauldronError, Result};
pub use frame::{FrameBuffer, FrameSink, FrameSnapshot, NullSink, RecordingSink, SharedFrameBuffer};
pub use pair::{PairState, SynchronizedPair};
pub use timeline::FramePacer;
