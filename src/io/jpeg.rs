//! JPEG/JFIF
//!
//! Decoded and encoded with the `image` crate. The description tag travels in
//! a COM marker: read from the first COM segment before the scan, written
//! right after the JFIF APP0 segment. Output is grayscale or RGB 8-bit; alpha
//! is dropped before encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::ReadBackend;
use crate::entities::{tags, Attrs, FileInfo, Image, Pixel, PixelFormat};
use crate::io::error::IoResult;
use crate::io::raster::{encode_error, write_file, RasterLoad, RasterSave};
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "JPEG";
pub const EXTENSIONS: &[&str] = &["jpeg", "jpg", "jfif"];

const SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_APP0: u8 = 0xE0;
const MARKER_COM: u8 = 0xFE;
const MARKER_SOS: u8 = 0xDA;

pub fn probe(header: &[u8]) -> bool {
    header.len() >= 3 && header[..2] == SOI && header[2] == 0xFF
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JpegOptions {
    /// 1..=100
    pub quality: u8,
}

impl Default for JpegOptions {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

/// First COM segment before the scan data, if any.
pub fn read_comment(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 4 || bytes[..2] != SOI {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            // Fill byte.
            pos += 1;
            continue;
        }
        if marker == MARKER_SOS {
            return None;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            return None;
        }
        if marker == MARKER_COM {
            let text = &bytes[pos + 4..pos + 2 + len];
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            return Some(String::from_utf8_lossy(&text[..end]).into_owned());
        }
        pos += 2 + len;
    }
    None
}

/// Insert a COM segment after APP0 (or right after SOI when there is none).
pub fn insert_comment(jpeg: &mut Vec<u8>, comment: &str) {
    if jpeg.len() < 2 || jpeg[..2] != SOI || comment.is_empty() {
        return;
    }
    let mut at = 2;
    if jpeg.len() >= 6 && jpeg[2] == 0xFF && jpeg[3] == MARKER_APP0 {
        at = 4 + u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
    }
    let text = &comment.as_bytes()[..comment.len().min(u16::MAX as usize - 2)];
    let mut segment = Vec::with_capacity(text.len() + 4);
    segment.extend_from_slice(&[0xFF, MARKER_COM]);
    segment.extend_from_slice(&((text.len() + 2) as u16).to_be_bytes());
    segment.extend_from_slice(text);
    jpeg.splice(at..at, segment);
}

fn comment_tags(bytes: &[u8]) -> Attrs {
    let mut tags = Attrs::new();
    if let Some(text) = read_comment(bytes) {
        tags.set_str(tags::DESCRIPTION, text);
    }
    tags
}

#[derive(Debug)]
pub struct JpegLoad {
    inner: RasterLoad,
}

impl JpegLoad {
    pub fn new(backend: ReadBackend) -> Self {
        Self { inner: RasterLoad::new(PLUGIN, ImageFormat::Jpeg, backend).with_tags(comment_tags) }
    }
}

impl ImageLoad for JpegLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        self.inner.open(file)
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        self.inner.read(frame)
    }

    fn close(&mut self) -> IoResult<()> {
        self.inner.close();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct JpegSave {
    options: JpegOptions,
    state: RasterSave,
}

impl JpegSave {
    pub fn new(options: JpegOptions) -> Self {
        Self { options, state: RasterSave::default() }
    }
}

impl ImageSave for JpegSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let pixel = match info.info().pixel.format {
            PixelFormat::L | PixelFormat::LA => Pixel::L_U8,
            PixelFormat::Rgb | PixelFormat::Rgba => Pixel::RGB_U8,
        };
        self.state.open(file, pixel);
        Ok(())
    }

    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let (path, pixels) = self.state.prepare(PLUGIN, image, frame)?;
        let color = if pixels.pixel().format == PixelFormat::L {
            ExtendedColorType::L8
        } else {
            ExtendedColorType::Rgb8
        };

        let mut out = Vec::new();
        let quality = self.options.quality.clamp(1, 100);
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(pixels.data(), pixels.width() as u32, pixels.height() as u32, color)
            .map_err(|e| encode_error(PLUGIN, &path, e))?;
        if let Some(text) = image.tags.get_str(tags::DESCRIPTION) {
            insert_comment(&mut out, text);
        }
        write_file(&path, &out).map_err(|e| e.relabel(PLUGIN))?;

        debug!("JPEG wrote {} (q={}, {} bytes)", path.display(), quality, out.len());
        Ok(())
    }

    fn close(&mut self) -> IoResult<()> {
        self.state.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Mirror, PixelData, PixelDataInfo};

    fn gradient(width: usize, height: usize, pixel: Pixel) -> Image {
        let mut pixels = PixelData::new(PixelDataInfo::new(width, height, pixel));
        let channels = pixel.channels();
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    pixels.set_f32(x, y, c, (x + y) as f32 / (width + height) as f32);
                }
            }
        }
        Image::new(pixels)
    }

    #[test]
    fn test_comment_splice_and_parse() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB, 0xFF, 0xDA, 0x00, 0x02];
        insert_comment(&mut jpeg, "hello");
        assert_eq!(&jpeg[8..10], &[0xFF, MARKER_COM]);
        assert_eq!(read_comment(&jpeg).as_deref(), Some("hello"));
        assert_eq!(read_comment(&[0xFF, 0xD8, 0xFF, 0xDA, 0, 2]), None);
    }

    /// Test: RGBA input is written as RGB with the description in a COM marker
    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        let file = FileInfo::new(&path);

        let mut image = gradient(16, 8, Pixel::RGBA_U8);
        image.tags.set_str(tags::DESCRIPTION, "slate");

        let mut saver = JpegSave::new(JpegOptions { quality: 95 });
        saver.open(&file, &ImageIoInfo::new(image.info().clone())).unwrap();
        saver.write(&image, &FrameInfo::default()).unwrap();
        saver.close().unwrap();

        let mut loader = JpegLoad::new(ReadBackend::Buffered);
        let info = loader.open(&file).unwrap();
        assert_eq!(info.info().pixel, Pixel::RGB_U8);
        assert_eq!((info.width(), info.height()), (16, 8));
        assert_eq!(info.tags.get_str(tags::DESCRIPTION), Some("slate"));

        let read = loader.read(&FrameInfo::default()).unwrap();
        assert_eq!(read.info().mirror, Mirror::Y);
        // Lossy: compare against the flipped source with a tolerance.
        let expected = image.pixels.convert(&read.info().clone());
        let max_diff = read
            .pixels
            .data()
            .iter()
            .zip(expected.data())
            .map(|(a, b)| (*a as i32 - *b as i32).abs())
            .max()
            .unwrap();
        assert!(max_diff <= 12, "max diff {max_diff}");
    }

    #[test]
    fn test_grey_stays_grey() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grey.jpg");
        let file = FileInfo::new(&path);
        let image = gradient(8, 8, Pixel::LA_U8);

        let mut saver = JpegSave::new(JpegOptions::default());
        saver.open(&file, &ImageIoInfo::new(image.info().clone())).unwrap();
        saver.write(&image, &FrameInfo::default()).unwrap();

        let mut loader = JpegLoad::new(ReadBackend::Mapped);
        assert_eq!(loader.open(&file).unwrap().info().pixel, Pixel::L_U8);
    }
}
