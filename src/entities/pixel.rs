//! Pixel layout: channel format plus channel type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    L,    // luminance
    LA,   // luminance + alpha
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::L => 1,
            PixelFormat::LA => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(PixelFormat::L),
            2 => Some(PixelFormat::LA),
            3 => Some(PixelFormat::Rgb),
            4 => Some(PixelFormat::Rgba),
            _ => None,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::LA | PixelFormat::Rgba)
    }

    /// Same layout without alpha.
    pub fn without_alpha(self) -> Self {
        match self {
            PixelFormat::LA => PixelFormat::L,
            PixelFormat::Rgba => PixelFormat::Rgb,
            other => other,
        }
    }
}

/// Channel storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    /// 16-bit unsigned; 10-bit file data is widened into this with bit replication
    U16,
    F16,
    F32,
}

impl PixelType {
    pub fn byte_count(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 | PixelType::F16 => 2,
            PixelType::F32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PixelType::F16 | PixelType::F32)
    }

    /// Integer types from a bit depth (8 or 16).
    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            8 => Some(PixelType::U8),
            16 => Some(PixelType::U16),
            _ => None,
        }
    }
}

/// Channel layout plus storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub format: PixelFormat,
    pub ty: PixelType,
}

impl Pixel {
    pub const L_U8: Pixel = Pixel::new(PixelFormat::L, PixelType::U8);
    pub const L_U16: Pixel = Pixel::new(PixelFormat::L, PixelType::U16);
    pub const LA_U8: Pixel = Pixel::new(PixelFormat::LA, PixelType::U8);
    pub const RGB_U8: Pixel = Pixel::new(PixelFormat::Rgb, PixelType::U8);
    pub const RGB_U16: Pixel = Pixel::new(PixelFormat::Rgb, PixelType::U16);
    pub const RGBA_U8: Pixel = Pixel::new(PixelFormat::Rgba, PixelType::U8);
    pub const RGBA_U16: Pixel = Pixel::new(PixelFormat::Rgba, PixelType::U16);
    pub const RGBA_F16: Pixel = Pixel::new(PixelFormat::Rgba, PixelType::F16);
    pub const RGBA_F32: Pixel = Pixel::new(PixelFormat::Rgba, PixelType::F32);

    pub const fn new(format: PixelFormat, ty: PixelType) -> Self {
        Self { format, ty }
    }

    /// Build from a channel count, if 1..=4.
    pub fn from_channels(channels: usize, ty: PixelType) -> Option<Self> {
        PixelFormat::from_channels(channels).map(|format| Self { format, ty })
    }

    pub fn channels(self) -> usize {
        self.format.channels()
    }

    pub fn byte_count(self) -> usize {
        self.format.channels() * self.ty.byte_count()
    }

    pub fn bit_depth(self) -> usize {
        self.ty.byte_count() * 8
    }
}

impl Default for Pixel {
    fn default() -> Self {
        Pixel::RGBA_U8
    }
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self.format {
            PixelFormat::L => "L",
            PixelFormat::LA => "LA",
            PixelFormat::Rgb => "RGB",
            PixelFormat::Rgba => "RGBA",
        };
        let ty = match self.ty {
            PixelType::U8 => "U8",
            PixelType::U16 => "U16",
            PixelType::F16 => "F16",
            PixelType::F32 => "F32",
        };
        write!(f, "{format} {ty}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_counts() {
        assert_eq!(Pixel::RGB_U8.byte_count(), 3);
        assert_eq!(Pixel::RGBA_U16.byte_count(), 8);
        assert_eq!(Pixel::RGBA_F32.byte_count(), 16);
        assert_eq!(Pixel::from_channels(2, PixelType::F16).map(|p| p.byte_count()), Some(4));
        assert_eq!(Pixel::from_channels(5, PixelType::U8), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Pixel::LA_U8.to_string(), "LA U8");
        assert_eq!(PixelFormat::Rgba.without_alpha(), PixelFormat::Rgb);
    }
}
