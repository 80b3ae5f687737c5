use serde::{Deserialize, Serialize};

/// 8-bit RGB color as sent to the strip.
///
/// Serialised as a plain `[r, g, b]` array so palettes read naturally in
/// configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a color from floating point channels, clamping each one to
    /// `[0, 255]` and rounding to the nearest integer.
    pub fn from_channels(channels: [f32; 3]) -> Self {
        let [r, g, b] = channels.map(clamp_channel);
        Self { r, g, b }
    }

    /// Returns the channels as floats for color arithmetic.
    pub fn channels(self) -> [f32; 3] {
        [f32::from(self.r), f32::from(self.g), f32::from(self.b)]
    }

    /// Scales every channel by `factor`, which is clamped to `[0, 1]`.
    pub fn scaled(self, factor: f32) -> Self {
        let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
        Self::from_channels(self.channels().map(|c| c * factor))
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(color: Rgb) -> Self {
        [color.r, color.g, color.b]
    }
}

fn clamp_channel(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_channels() {
        let color = Rgb::from_channels([-12.0, 127.6, 300.0]);
        assert_eq!(color, Rgb::new(0, 128, 255));
    }

    #[test]
    fn scales_by_brightness() {
        assert_eq!(Rgb::new(200, 100, 50).scaled(0.5), Rgb::new(100, 50, 25));
        assert_eq!(Rgb::new(200, 100, 50).scaled(2.0), Rgb::new(200, 100, 50));
        assert_eq!(Rgb::new(200, 100, 50).scaled(f32::NAN), Rgb::BLACK);
    }

    #[test]
    fn round_trips_through_json_arrays() {
        let json = serde_json::to_string(&Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(json, "[1,2,3]");
        let parsed: Rgb = serde_json::from_str("[32,139,25]").unwrap();
        assert_eq!(parsed, Rgb::new(32, 139, 25));
    }
}
