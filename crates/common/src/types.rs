//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Time in milliseconds (f64 precision).
///
/// Timeline positions, media offsets and frame timestamps are all expressed in
/// milliseconds throughout the engine. Container timestamps in seconds are
/// converted at the demux/decode boundary.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeMs(pub f64);

impl TimeMs {
    pub const ZERO: Self = Self(0.0);

    pub fn from_millis(ms: f64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: f64) -> Self {
        Self(secs * 1000.0)
    }

    pub fn as_millis(self) -> f64 {
        self.0
    }

    pub fn as_secs(self) -> f64 {
        self.0 / 1000.0
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl Add for TimeMs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TimeMs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.0)
    }
}

/// Rational number for frame rates (e.g., 30000/1001 for 29.97fps).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_10: Self = Self { num: 10, den: 1 };
    pub const FPS_24: Self = Self { num: 24, den: 1 };
    pub const FPS_25: Self = Self { num: 25, den: 1 };
    pub const FPS_30: Self = Self { num: 30, den: 1 };
    pub const FPS_29_97: Self = Self {
        num: 30000,
        den: 1001,
    };
    pub const FPS_60: Self = Self { num: 60, den: 1 };

    /// Returns `None` for a zero denominator.
    pub fn new(num: u32, den: u32) -> Option<Self> {
        (den > 0).then_some(Self { num, den })
    }

    /// Best rational for a frame rate given as a plain number.
    ///
    /// Integral rates map to `n/1`; NTSC-style rates such as 29.97 map to
    /// `n*1000/1001`; anything else keeps millisecond precision.
    pub fn from_fps(fps: f64) -> Option<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        if fps.fract() == 0.0 {
            return Some(Self {
                num: fps as u32,
                den: 1,
            });
        }
        let ntsc = (fps * 1001.0 / 1000.0).round();
        if (ntsc * 1000.0 / 1001.0 - fps).abs() < 0.005 {
            return Some(Self {
                num: ntsc as u32 * 1000,
                den: 1001,
            });
        }
        Some(Self {
            num: (fps * 1000.0).round() as u32,
            den: 1000,
        })
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Duration of one frame: `1000 / fps` milliseconds.
    pub fn frame_interval(self) -> TimeMs {
        TimeMs(1000.0 * self.den as f64 / self.num as f64)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Video/image resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Byte size for RGBA8 pixel data.
    pub fn rgba_byte_size(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Source identifier for media files referenced by the timeline.
///
/// This is the asset-store path as written in the project document.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_display() {
        assert_eq!(Rational::FPS_30.to_string(), "30");
        assert_eq!(Rational::FPS_29_97.to_string(), "30000/1001");
    }

    #[test]
    fn frame_interval_ms() {
        assert!((Rational::FPS_10.frame_interval().as_millis() - 100.0).abs() < 1e-9);
        assert!((Rational::FPS_29_97.frame_interval().as_millis() - 33.366_666).abs() < 1e-3);
    }

    #[test]
    fn rational_from_plain_fps() {
        assert_eq!(Rational::from_fps(30.0), Some(Rational::FPS_30));
        assert_eq!(Rational::from_fps(29.97), Some(Rational::FPS_29_97));
        assert_eq!(Rational::from_fps(12.5), Rational::new(12500, 1000));
        assert_eq!(Rational::from_fps(0.0), None);
        assert_eq!(Rational::from_fps(f64::NAN), None);
    }

    #[test]
    fn rational_rejects_zero_denominator() {
        assert!(Rational::new(30, 0).is_none());
    }

    #[test]
    fn time_conversions() {
        let t = TimeMs::from_secs(1.5);
        assert_eq!(t, TimeMs(1500.0));
        assert!((t.as_secs() - 1.5).abs() < 1e-12);
        assert_eq!(t - TimeMs(500.0), TimeMs(1000.0));
        assert_eq!(t.to_string(), "1500.000ms");
    }

    #[test]
    fn resolution_byte_sizes() {
        assert_eq!(Resolution::HD.rgba_byte_size(), 1920 * 1080 * 4);
        assert_eq!(Resolution::new(4, 2).to_string(), "4x2");
    }
}
