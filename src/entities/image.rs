//! Decoded frame: pixel buffer plus the tags read with it.

use super::attrs::Attrs;
use super::pixel_data::{PixelData, PixelDataInfo};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    pub pixels: PixelData,
    pub tags: Attrs,
}

impl Image {
    pub fn new(pixels: PixelData) -> Self {
        Self { pixels, tags: Attrs::new() }
    }

    pub fn with_tags(pixels: PixelData, tags: Attrs) -> Self {
        Self { pixels, tags }
    }

    pub fn info(&self) -> &PixelDataInfo {
        self.pixels.info()
    }

    /// Bytes held by the pixel buffer (what the frame cache accounts).
    pub fn byte_count(&self) -> usize {
        self.pixels.byte_count()
    }
}
