//! Rectangular pixel buffer and the shape that describes it
//!
//! **Why**: Codecs decode into one shared buffer type so the cache, savers and
//! callers never care where the pixels came from.
//!
//! **Used by**: every codec (decode target / encode source), Image, FrameCache
//!
//! # Vertical convention
//!
//! Row 0 is the bottom image row. `mirror.y == true` flips that: row 0 is the
//! top row, which is how most formats store scanlines, so decoders can copy
//! rows in file order and just set the flag. `convert()` resolves mirroring
//! when a saver needs a specific orientation.
//!
//! Samples are stored in native byte order.

use half::f16;
use serde::{Deserialize, Serialize};

use super::pixel::{Pixel, PixelFormat, PixelType};

/// Power-of-two downscale applied at decode time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Proxy {
    #[default]
    None,
    Half,
    Quarter,
    Eighth,
}

impl Proxy {
    pub fn scale(self) -> usize {
        match self {
            Proxy::None => 1,
            Proxy::Half => 2,
            Proxy::Quarter => 4,
            Proxy::Eighth => 8,
        }
    }

    pub fn from_scale(scale: usize) -> Option<Self> {
        match scale {
            1 => Some(Proxy::None),
            2 => Some(Proxy::Half),
            4 => Some(Proxy::Quarter),
            8 => Some(Proxy::Eighth),
            _ => None,
        }
    }

    /// Size of one dimension after scaling (rounded up).
    pub fn scaled(self, size: usize) -> usize {
        size.div_ceil(self.scale())
    }
}

/// Orientation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Mirror {
    pub x: bool,
    pub y: bool,
}

impl Mirror {
    pub const NONE: Mirror = Mirror { x: false, y: false };
    pub const Y: Mirror = Mirror { x: false, y: true };
}

/// Shape of a pixel buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelDataInfo {
    pub layer_name: String,
    pub width: usize,
    pub height: usize,
    pub proxy: Proxy,
    pub pixel: Pixel,
    pub mirror: Mirror,
}

impl PixelDataInfo {
    pub fn new(width: usize, height: usize, pixel: Pixel) -> Self {
        Self {
            layer_name: String::new(),
            width,
            height,
            proxy: Proxy::None,
            pixel,
            mirror: Mirror::NONE,
        }
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.layer_name = name.into();
        self
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width * self.pixel.byte_count()
    }

    pub fn byte_count(&self) -> usize {
        self.bytes_per_row() * self.height
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Owned pixel buffer whose shape is given by `PixelDataInfo`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelData {
    info: PixelDataInfo,
    data: Vec<u8>,
}

impl PixelData {
    /// Zero-filled buffer.
    pub fn new(info: PixelDataInfo) -> Self {
        let data = vec![0u8; info.byte_count()];
        Self { info, data }
    }

    /// Wrap existing bytes. Returns `None` if the length does not match the shape.
    pub fn from_bytes(info: PixelDataInfo, data: Vec<u8>) -> Option<Self> {
        (data.len() == info.byte_count()).then_some(Self { info, data })
    }

    /// Replace the shape, reallocating only if the byte size changes.
    pub fn set_info(&mut self, info: PixelDataInfo) {
        if info.byte_count() != self.data.len() {
            self.data = vec![0u8; info.byte_count()];
        }
        self.info = info;
    }

    pub fn info(&self) -> &PixelDataInfo {
        &self.info
    }

    pub fn width(&self) -> usize {
        self.info.width
    }

    pub fn height(&self) -> usize {
        self.info.height
    }

    pub fn pixel(&self) -> Pixel {
        self.info.pixel
    }

    pub fn channels(&self) -> usize {
        self.info.pixel.channels()
    }

    pub fn bytes_per_row(&self) -> usize {
        self.info.bytes_per_row()
    }

    pub fn byte_count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let n = self.bytes_per_row();
        &self.data[y * n..(y + 1) * n]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let n = self.bytes_per_row();
        &mut self.data[y * n..(y + 1) * n]
    }

    /// Row counted from the top of the image regardless of `mirror.y`.
    pub fn row_from_top(&self, y: usize) -> &[u8] {
        if self.info.mirror.y {
            self.row(y)
        } else {
            self.row(self.height() - 1 - y)
        }
    }

    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    /// Channel `c` of pixel (x, y), normalized to 0..1 for integer types.
    pub fn get_f32(&self, x: usize, y: usize, c: usize) -> f32 {
        let ty = self.info.pixel.ty;
        let offset = y * self.bytes_per_row() + (x * self.channels() + c) * ty.byte_count();
        load_channel(&self.data[offset..], ty)
    }

    pub fn set_f32(&mut self, x: usize, y: usize, c: usize, v: f32) {
        let ty = self.info.pixel.ty;
        let offset = y * self.bytes_per_row() + (x * self.channels() + c) * ty.byte_count();
        store_channel(&mut self.data[offset..], ty, v);
    }

    /// Convert to another pixel layout and/or orientation. Width and height
    /// are kept from `self`; `target.width/height` are ignored.
    pub fn convert(&self, target: &PixelDataInfo) -> PixelData {
        let mut info = target.clone();
        info.width = self.width();
        info.height = self.height();
        info.proxy = self.info.proxy;

        if info == self.info {
            return self.clone();
        }

        let mut out = PixelData::new(info);
        let (w, h) = (self.width(), self.height());
        let flip_x = self.info.mirror.x != out.info.mirror.x;
        let flip_y = self.info.mirror.y != out.info.mirror.y;
        let same_pixel = self.info.pixel == out.info.pixel;
        let src_px = self.info.pixel.byte_count();
        let dst_px = out.info.pixel.byte_count();
        let dst_pixel = out.info.pixel;

        for y in 0..h {
            let sy = if flip_y { h - 1 - y } else { y };
            let src_row = self.row(sy);
            let dst_row = out.row_mut(y);

            if same_pixel && !flip_x {
                dst_row.copy_from_slice(src_row);
                continue;
            }

            for x in 0..w {
                let sx = if flip_x { w - 1 - x } else { x };
                let src = &src_row[sx * src_px..(sx + 1) * src_px];
                let rgba = read_rgba(src, self.info.pixel);
                write_rgba(&mut dst_row[x * dst_px..(x + 1) * dst_px], dst_pixel, rgba);
            }
        }
        out
    }

    /// Box-filter downscale. Output size is rounded up; edge blocks average
    /// only the pixels that exist.
    pub fn proxy_scale(&self, proxy: Proxy) -> PixelData {
        if proxy == Proxy::None {
            return self.clone();
        }
        let s = proxy.scale();
        let mut info = self.info.clone();
        info.width = proxy.scaled(self.width());
        info.height = proxy.scaled(self.height());
        info.proxy = proxy;
        let mut out = PixelData::new(info);
        let channels = self.channels();

        for oy in 0..out.height() {
            let y0 = oy * s;
            let y1 = (y0 + s).min(self.height());
            for ox in 0..out.width() {
                let x0 = ox * s;
                let x1 = (x0 + s).min(self.width());
                let count = ((y1 - y0) * (x1 - x0)) as f32;
                for c in 0..channels {
                    let mut sum = 0.0f32;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            sum += self.get_f32(x, y, c);
                        }
                    }
                    out.set_f32(ox, oy, c, sum / count);
                }
            }
        }
        out
    }
}

/// Read one sample of type `ty` from the start of `src`.
pub fn load_channel(src: &[u8], ty: PixelType) -> f32 {
    match ty {
        PixelType::U8 => src[0] as f32 / 255.0,
        PixelType::U16 => u16::from_ne_bytes([src[0], src[1]]) as f32 / 65535.0,
        PixelType::F16 => f16::from_ne_bytes([src[0], src[1]]).to_f32(),
        PixelType::F32 => f32::from_ne_bytes([src[0], src[1], src[2], src[3]]),
    }
}

/// Write one sample of type `ty` to the start of `dst`. Integer types clamp to 0..1.
pub fn store_channel(dst: &mut [u8], ty: PixelType, v: f32) {
    match ty {
        PixelType::U8 => dst[0] = (v.clamp(0.0, 1.0) * 255.0).round() as u8,
        PixelType::U16 => {
            let q = (v.clamp(0.0, 1.0) * 65535.0).round() as u16;
            dst[..2].copy_from_slice(&q.to_ne_bytes());
        }
        PixelType::F16 => dst[..2].copy_from_slice(&f16::from_f32(v).to_ne_bytes()),
        PixelType::F32 => dst[..4].copy_from_slice(&v.to_ne_bytes()),
    }
}

fn read_rgba(src: &[u8], pixel: Pixel) -> [f32; 4] {
    let step = pixel.ty.byte_count();
    let ch = |i: usize| load_channel(&src[i * step..], pixel.ty);
    match pixel.format {
        PixelFormat::L => {
            let l = ch(0);
            [l, l, l, 1.0]
        }
        PixelFormat::LA => {
            let l = ch(0);
            [l, l, l, ch(1)]
        }
        PixelFormat::Rgb => [ch(0), ch(1), ch(2), 1.0],
        PixelFormat::Rgba => [ch(0), ch(1), ch(2), ch(3)],
    }
}

fn luma(rgba: [f32; 4]) -> f32 {
    let [r, g, b, _] = rgba;
    if r == g && g == b {
        r
    } else {
        0.2126 * r + 0.7152 * g + 0.0722 * b
    }
}

fn write_rgba(dst: &mut [u8], pixel: Pixel, rgba: [f32; 4]) {
    let step = pixel.ty.byte_count();
    let values: [f32; 4];
    let n = match pixel.format {
        PixelFormat::L => {
            values = [luma(rgba), 0.0, 0.0, 0.0];
            1
        }
        PixelFormat::LA => {
            values = [luma(rgba), rgba[3], 0.0, 0.0];
            2
        }
        PixelFormat::Rgb => {
            values = rgba;
            3
        }
        PixelFormat::Rgba => {
            values = rgba;
            4
        }
    };
    for (i, v) in values.iter().take(n).enumerate() {
        store_channel(&mut dst[i * step..], pixel.ty, *v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(info: PixelDataInfo) -> PixelData {
        let mut data = PixelData::new(info);
        for (i, b) in data.data_mut().iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        data
    }

    #[test]
    fn test_row_addressing() {
        let data = ramp(PixelDataInfo::new(4, 3, Pixel::RGB_U8));
        assert_eq!(data.bytes_per_row(), 12);
        assert_eq!(data.row(1)[0], 12);
        assert_eq!(data.row(2).len(), 12);
        assert_eq!(data.row_from_top(0), data.row(2));
    }

    #[test]
    fn test_from_bytes_checks_length() {
        let info = PixelDataInfo::new(2, 2, Pixel::L_U8);
        assert!(PixelData::from_bytes(info.clone(), vec![0; 3]).is_none());
        assert!(PixelData::from_bytes(info, vec![0; 4]).is_some());
    }

    /// Test: flipping mirror.y reverses the row order
    #[test]
    fn test_convert_mirror() {
        let src = ramp(PixelDataInfo::new(3, 2, Pixel::RGBA_U8).with_mirror(Mirror::Y));
        let target = PixelDataInfo::new(3, 2, Pixel::RGBA_U8);
        let out = src.convert(&target);
        assert_eq!(out.row(0), src.row(1));
        assert_eq!(out.row(1), src.row(0));
        assert!(!out.info().mirror.y);
    }

    /// Test: dropping alpha and widening keeps colour values
    #[test]
    fn test_convert_layout_and_type() {
        let mut src = PixelData::new(PixelDataInfo::new(1, 1, Pixel::RGBA_U8));
        src.data_mut().copy_from_slice(&[255, 128, 0, 7]);

        let rgb = src.convert(&PixelDataInfo::new(1, 1, Pixel::RGB_U8));
        assert_eq!(rgb.data(), &[255, 128, 0]);

        let wide = src.convert(&PixelDataInfo::new(1, 1, Pixel::RGBA_U16));
        let r = u16::from_ne_bytes([wide.data()[0], wide.data()[1]]);
        let g = u16::from_ne_bytes([wide.data()[2], wide.data()[3]]);
        assert_eq!(r, 65535);
        assert_eq!(g, 128 * 257);

        let grey = PixelData::from_bytes(PixelDataInfo::new(1, 1, Pixel::L_U8), vec![77]).unwrap();
        let back = grey
            .convert(&PixelDataInfo::new(1, 1, Pixel::RGB_U8))
            .convert(&PixelDataInfo::new(1, 1, Pixel::L_U8));
        assert_eq!(back.data(), &[77]);
    }

    /// Test: proxy rounds the size up and averages partial blocks
    #[test]
    fn test_proxy_scale() {
        let data = PixelData::from_bytes(
            PixelDataInfo::new(3, 1, Pixel::L_U8),
            vec![0, 100, 200],
        )
        .unwrap();
        let half = data.proxy_scale(Proxy::Half);
        assert_eq!((half.width(), half.height()), (2, 1));
        assert_eq!(half.info().proxy, Proxy::Half);
        assert_eq!(half.data(), &[50, 200]);
    }
}
