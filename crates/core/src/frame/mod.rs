//! In-memory strip state and the contract used to push it to hardware.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::{CauldronError, Result, Rgb};

/// Destination for rendered frames (network streamer, GPIO driver, ...).
///
/// `transmit` is called once per [`FrameBuffer::flush`] while the frame is
/// still locked, so implementations must return promptly. The caller does not
/// retry failed transmissions.
pub trait FrameSink: Send + Sync {
    fn transmit(&self, pixels: &[Rgb], brightness: f32) -> Result<()>;
}

/// Immutable copy of a frame as it was handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub pixels: Vec<Rgb>,
    pub brightness: f32,
}

impl FrameSnapshot {
    /// True when every pixel is black and brightness is zero.
    pub fn is_dark(&self) -> bool {
        self.brightness == 0.0 && self.pixels.iter().all(|p| *p == Rgb::BLACK)
    }
}

/// Frame buffer shared between the control path and background renderers.
pub type SharedFrameBuffer = Arc<Mutex<FrameBuffer>>;

/// Owned pixel array plus a global brightness scalar.
///
/// The pixel count is fixed at construction time. Colors are stored as
/// [`Rgb`], so every channel is already clamped to `[0, 255]`.
pub struct FrameBuffer {
    pixels: Vec<Rgb>,
    brightness: f32,
    sink: Arc<dyn FrameSink>,
}

impl FrameBuffer {
    /// Creates a black frame of `len` pixels at full brightness.
    pub fn new(len: usize, sink: Arc<dyn FrameSink>) -> Result<Self> {
        if len == 0 {
            return Err(CauldronError::construction(
                "a frame buffer needs at least one pixel",
            ));
        }

        Ok(Self {
            pixels: vec![Rgb::BLACK; len],
            brightness: 1.0,
            sink,
        })
    }

    /// Wraps the buffer so it can be handed to background activities.
    pub fn into_shared(self) -> SharedFrameBuffer {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn get(&self, index: usize) -> Result<Rgb> {
        self.pixels
            .get(index)
            .copied()
            .ok_or(CauldronError::IndexOutOfRange {
                index,
                len: self.pixels.len(),
            })
    }

    pub fn set(&mut self, index: usize, color: Rgb) -> Result<()> {
        let len = self.pixels.len();
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(CauldronError::IndexOutOfRange { index, len })?;
        *pixel = color;
        Ok(())
    }

    pub fn set_all(&mut self, color: Rgb) {
        self.pixels.fill(color);
    }

    /// Replaces every pixel at once. The slice must match the strip length.
    pub fn bulk_replace(&mut self, pixels: &[Rgb]) -> Result<()> {
        if pixels.len() != self.pixels.len() {
            return Err(CauldronError::ShapeMismatch {
                expected: self.pixels.len(),
                actual: pixels.len(),
            });
        }
        self.pixels.copy_from_slice(pixels);
        Ok(())
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    /// Sets the brightness, silently clamping it to `[0, 1]`.
    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = if brightness.is_nan() {
            0.0
        } else {
            brightness.clamp(0.0, 1.0)
        };
    }

    /// Turns every pixel off and drops brightness to zero.
    pub fn blank(&mut self) {
        self.set_all(Rgb::BLACK);
        self.brightness = 0.0;
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            pixels: self.pixels.clone(),
            brightness: self.brightness,
        }
    }

    /// Hands the current frame to the sink.
    pub fn flush(&self) -> Result<()> {
        self.sink.transmit(&self.pixels, self.brightness)
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.pixels.len())
            .field("brightness", &self.brightness)
            .finish()
    }
}

/// Locks a shared frame, mapping poisoning to [`CauldronError::Poisoned`].
pub fn lock_frame(frame: &SharedFrameBuffer) -> Result<MutexGuard<'_, FrameBuffer>> {
    frame
        .lock()
        .map_err(|_| CauldronError::Poisoned("frame buffer"))
}

/// Sink that discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn transmit(&self, _pixels: &[Rgb], _brightness: f32) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps a copy of every transmitted frame.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<FrameSnapshot>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames transmitted so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn last(&self) -> Option<FrameSnapshot> {
        self.lock().last().cloned()
    }

    pub fn frames(&self) -> Vec<FrameSnapshot> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FrameSnapshot>> {
        // A panic while pushing a snapshot leaves the history intact.
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for RecordingSink {
    fn transmit(&self, pixels: &[Rgb], brightness: f32) -> Result<()> {
        self.lock().push(FrameSnapshot {
            pixels: pixels.to_vec(),
            brightness,
        });
        Ok(())
    }
}
