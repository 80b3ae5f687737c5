use std::{path::PathBuf, time::Duration};

/// Result alias that carries the custom [`CauldronError`] type.
pub type Result<T> = std::result::Result<T, CauldronError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CauldronError {
    /// Invalid effect, palette or configuration parameters. Raised while
    /// building things, never from inside a running frame loop.
    #[error("invalid parameters: {0}")]
    Construction(String),
    /// The frame sink failed to transmit a frame. Callers skip the frame and
    /// carry on with the next tick.
    #[error("frame transmission failed: {0}")]
    Transmit(String),
    /// Audio could not be decoded for the effect that needed it.
    #[error("failed to decode audio `{}`: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    /// A control operation that needs a running cauldron was issued while it
    /// was stopped.
    #[error("the cauldron is not running")]
    NotRunning,
    #[error("pixel index {index} is out of range for a strip of {len} pixels")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("expected {expected} pixels but got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    /// A bounded stop did not observe the background worker finishing.
    #[error("activity `{activity}` did not stop within {waited:?}")]
    StopTimeout { activity: String, waited: Duration },
    /// The background thread backing an activity could not be spawned.
    #[error("failed to spawn background worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl CauldronError {
    /// Creates a construction error from the provided message.
    pub fn construction<T: Into<String>>(msg: T) -> Self {
        Self::Construction(msg.into())
    }

    /// Creates a transmit error from the provided message.
    pub fn transmit<T: Into<String>>(msg: T) -> Self {
        Self::Transmit(msg.into())
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
