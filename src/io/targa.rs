//! Truevision TARGA
//!
//! Little-endian 18-byte header, optional id field, then pixels. Supported
//! image types are 2 (true color), 3 (gray) and their RLE variants 10 and 11;
//! color-mapped files are not. Samples are 8-bit: gray, gray+alpha, BGR or
//! BGRA.
//!
//! Descriptor bit 4 marks right-to-left columns, bit 5 top-to-bottom rows;
//! both map onto `Mirror`. RLE packets may cross scanline boundaries.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::core::memory::{native_endian, Endian};
use crate::entities::{FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType};
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "Targa";
pub const EXTENSIONS: &[&str] = &["tga"];

const HEADER_SIZE: usize = 18;
const TYPE_COLOR: u8 = 2;
const TYPE_GRAY: u8 = 3;
const TYPE_RLE_COLOR: u8 = 10;
const TYPE_RLE_GRAY: u8 = 11;
const RIGHT_TO_LEFT: u8 = 0x10;
const TOP_TO_BOTTOM: u8 = 0x20;

/// No magic number: accept plausible headers only.
pub fn probe(header: &[u8]) -> bool {
    header.len() >= HEADER_SIZE
        && header[1] == 0
        && matches!(header[2], TYPE_COLOR | TYPE_GRAY | TYPE_RLE_COLOR | TYPE_RLE_GRAY)
        && matches!(header[16], 8 | 16 | 24 | 32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargaCompression {
    #[default]
    None,
    Rle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargaOptions {
    pub compression: TargaCompression,
}

struct Header {
    info: ImageIoInfo,
    rle: bool,
}

fn read_header(path: &Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: String| IoError::unsupported(PLUGIN, path, reason);

    io.set_endian(native_endian() != Endian::Lsb);
    let id_length = io.get_u8()? as i64;
    let colormap = io.get_u8()?;
    let image_type = io.get_u8()?;
    io.seek(5)?;
    let _x = io.get_u16()?;
    let _y = io.get_u16()?;
    let width = io.get_u16()? as usize;
    let height = io.get_u16()? as usize;
    let depth = io.get_u8()?;
    let descriptor = io.get_u8()?;
    io.seek(id_length)?;

    if colormap != 0 {
        return Err(unsupported("color-mapped images".to_string()));
    }
    let gray = match image_type {
        TYPE_COLOR | TYPE_RLE_COLOR => false,
        TYPE_GRAY | TYPE_RLE_GRAY => true,
        other => return Err(unsupported(format!("image type {other}"))),
    };
    let format = match (gray, depth) {
        (true, 8) => PixelFormat::L,
        (true, 16) => PixelFormat::LA,
        (false, 24) => PixelFormat::Rgb,
        (false, 32) => PixelFormat::Rgba,
        _ => return Err(unsupported(format!("{depth}-bit {} pixels", if gray { "gray" } else { "color" }))),
    };
    if width == 0 || height == 0 {
        return Err(unsupported(format!("bad size {width}x{height}")));
    }

    let mirror = Mirror {
        x: descriptor & RIGHT_TO_LEFT != 0,
        y: descriptor & TOP_TO_BOTTOM != 0,
    };
    let mut info = ImageIoInfo::new(
        PixelDataInfo::new(width, height, Pixel::new(format, PixelType::U8)).with_mirror(mirror),
    );
    info.file_name = path.to_path_buf();
    Ok(Header { info, rle: image_type >= TYPE_RLE_COLOR })
}

/// Expand RLE packets into `out` (already sized to the whole image).
fn read_rle(src: &[u8], out: &mut [u8], channels: usize) -> Option<()> {
    let mut pos = 0;
    let mut o = 0;
    while o < out.len() {
        let h = *src.get(pos)?;
        pos += 1;
        let count = (h & 0x7F) as usize + 1;
        let bytes = (count * channels).min(out.len() - o);
        if h & 0x80 != 0 {
            let px = src.get(pos..pos + channels)?;
            pos += channels;
            for d in out[o..o + bytes].chunks_exact_mut(channels) {
                d.copy_from_slice(px);
            }
        } else {
            let run = src.get(pos..pos + count * channels)?;
            pos += count * channels;
            out[o..o + bytes].copy_from_slice(&run[..bytes]);
        }
        o += bytes;
    }
    Some(())
}

/// BGR(A) ↔ RGB(A) in place.
fn swap_red_blue(data: &mut [u8], channels: usize) {
    if channels >= 3 {
        for px in data.chunks_exact_mut(channels) {
            px.swap(0, 2);
        }
    }
}

/// TARGA loader
#[derive(Debug, Default)]
pub struct TargaLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl TargaLoad {
    pub fn new(backend: ReadBackend) -> Self {
        Self { backend, file: None }
    }

    fn read_frame(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::read(PLUGIN, "", "loader not open"))?;
        let path = file.file_name(frame.frame);

        let mut io = FileIO::new();
        io.open_with(&path, FileMode::Read, self.backend)?;
        let header = read_header(&path, &mut io)?;
        check_layer(PLUGIN, &path, frame, 1)?;
        io.read_ahead();

        let info = header.info.info();
        let channels = info.pixel.channels();
        let mut pixels = PixelData::new(info.clone());
        if header.rle {
            let data = io.tail()?;
            read_rle(&data, pixels.data_mut(), channels)
                .ok_or_else(|| IoError::read(PLUGIN, &path, "RLE data truncated"))?;
        } else {
            io.get(pixels.data_mut(), 1)?;
        }
        swap_red_blue(pixels.data_mut(), channels);

        debug!("Targa read {} ({}x{} {}, rle={})", path.display(), info.width, info.height, info.pixel, header.rle);
        Ok(Image::new(apply_proxy(pixels, frame)))
    }
}

impl ImageLoad for TargaLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.file_name(-1);
        let mut io = FileIO::new();
        io.open_with(&path, FileMode::Read, self.backend)
            .map_err(|e| e.relabel(PLUGIN))?;
        let mut info = read_header(&path, &mut io).map_err(|e| e.relabel(PLUGIN))?.info;
        if file.is_sequence() {
            info.sequence = file.sequence().clone();
        }
        self.file = Some(file.clone());
        Ok(info)
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        self.read_frame(frame).map_err(|e| e.relabel(PLUGIN))
    }

    fn close(&mut self) -> IoResult<()> {
        self.file = None;
        Ok(())
    }
}

/// Encode one scanline. Runs of two or more identical pixels become run
/// packets; packets never cross scanlines.
fn write_rle(out: &mut Vec<u8>, row: &[u8], channels: usize) {
    let pixels: Vec<&[u8]> = row.chunks_exact(channels).collect();
    let n = pixels.len();
    let mut i = 0;
    while i < n {
        let mut run = 1;
        while i + run < n && run < 128 && pixels[i + run] == pixels[i] {
            run += 1;
        }
        if run >= 2 {
            out.push(0x80 | (run - 1) as u8);
            out.extend_from_slice(pixels[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < n && i - start < 128 && !(i + 1 < n && pixels[i + 1] == pixels[i]) {
            i += 1;
        }
        if i == start {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        for px in &pixels[start..i] {
            out.extend_from_slice(px);
        }
    }
}

/// TARGA saver: 8-bit gray, gray+alpha, RGB or RGBA, stored bottom-up
#[derive(Debug, Default)]
pub struct TargaSave {
    options: TargaOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl TargaSave {
    pub fn new(options: TargaOptions) -> Self {
        Self { options, file: None, info: PixelDataInfo::default() }
    }

    fn write_frame(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::write(PLUGIN, "", "saver not open"))?;
        let path = file.file_name(frame.frame);

        let (width, height) = (image.pixels.width(), image.pixels.height());
        if width > u16::MAX as usize || height > u16::MAX as usize {
            return Err(IoError::write(PLUGIN, &path, format!("image too large ({width}x{height})")));
        }

        let mut pixels = image.pixels.convert(&self.info);
        let pixel = pixels.pixel();
        let channels = pixel.channels();
        swap_red_blue(pixels.data_mut(), channels);
        let rle = self.options.compression == TargaCompression::Rle;
        let gray = matches!(pixel.format, PixelFormat::L | PixelFormat::LA);
        let image_type = match (gray, rle) {
            (true, false) => TYPE_GRAY,
            (true, true) => TYPE_RLE_GRAY,
            (false, false) => TYPE_COLOR,
            (false, true) => TYPE_RLE_COLOR,
        };
        let alpha_bits = if pixel.format.has_alpha() { 8 } else { 0 };

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set_endian(native_endian() != Endian::Lsb);
        io.set(&[0, 0, image_type, 0, 0, 0, 0, 0], 1)?;
        io.set_u16(0)?;
        io.set_u16(0)?;
        io.set_u16(width as u16)?;
        io.set_u16(height as u16)?;
        io.set_u8((channels * 8) as u8)?;
        io.set_u8(alpha_bits)?;

        if rle {
            let mut line = Vec::with_capacity(pixels.bytes_per_row() + pixels.width());
            for y in 0..pixels.height() {
                line.clear();
                write_rle(&mut line, pixels.row(y), channels);
                io.set(&line, 1)?;
            }
        } else {
            io.set(pixels.data(), 1)?;
        }
        io.close()?;

        debug!("Targa wrote {} ({}, rle={})", path.display(), pixel, rle);
        Ok(())
    }
}

impl ImageSave for TargaSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info().pixel;
        self.info = PixelDataInfo::new(0, 0, Pixel::new(src.format, PixelType::U8));
        self.file = Some(file.clone());
        Ok(())
    }

    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        self.write_frame(image, frame).map_err(|e| e.relabel(PLUGIN))
    }

    fn close(&mut self) -> IoResult<()> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::error::ErrorKind;

    fn header(image_type: u8, width: u16, height: u16, depth: u8, descriptor: u8) -> Vec<u8> {
        let mut out = vec![0u8, 0, image_type, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.push(depth);
        out.push(descriptor);
        out
    }

    fn load(path: &Path) -> IoResult<Image> {
        let mut loader = TargaLoad::new(ReadBackend::Buffered);
        loader.open(&FileInfo::new(path))?;
        loader.read(&FrameInfo::default())
    }

    /// Test: BGR samples come back as RGB, descriptor bits become mirror flags
    #[test]
    fn test_uncompressed_bgr() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = header(TYPE_COLOR, 2, 1, 24, TOP_TO_BOTTOM | RIGHT_TO_LEFT);
        bytes.extend_from_slice(&[3, 2, 1, 6, 5, 4]);
        let path = dir.path().join("a.tga");
        std::fs::write(&path, &bytes).unwrap();

        let image = load(&path).unwrap();
        assert_eq!(image.info().mirror, Mirror { x: true, y: true });
        assert_eq!(image.pixels.data(), &[1, 2, 3, 4, 5, 6]);
    }

    /// Test: an RLE packet that spans two scanlines fills both
    #[test]
    fn test_rle_crosses_scanlines() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = header(TYPE_RLE_GRAY, 3, 2, 8, 0);
        // Run of 4, then a literal of 2.
        bytes.extend_from_slice(&[0x83, 9, 0x01, 1, 2]);
        let path = dir.path().join("b.tga");
        std::fs::write(&path, &bytes).unwrap();

        let image = load(&path).unwrap();
        assert_eq!(image.info().pixel, Pixel::L_U8);
        assert_eq!(image.pixels.data(), &[9, 9, 9, 9, 1, 2]);
    }

    #[test]
    fn test_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.tga");
        let mut mapped = header(1, 1, 1, 8, 0);
        mapped[1] = 1;
        std::fs::write(&path, &mapped).unwrap();
        assert_eq!(load(&path).unwrap_err().kind(), ErrorKind::Unsupported);

        std::fs::write(&path, header(TYPE_COLOR, 1, 1, 16, 0)).unwrap();
        assert_eq!(load(&path).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut short = header(TYPE_RLE_COLOR, 4, 4, 24, 0);
        short.extend_from_slice(&[0x85, 1, 2, 3]);
        std::fs::write(&path, &short).unwrap();
        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Read);
        assert_eq!(err.plugin(), PLUGIN);
    }

    /// Test: RGBA and gray frames survive save and load, raw and RLE
    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for pixel in [Pixel::RGBA_U8, Pixel::L_U8] {
            for compression in [TargaCompression::None, TargaCompression::Rle] {
                let info = PixelDataInfo::new(131, 3, pixel);
                let mut pixels = PixelData::new(info.clone());
                for (i, b) in pixels.data_mut().iter_mut().enumerate() {
                    *b = if i % 97 < 60 { 200 } else { (i % 251) as u8 };
                }
                let path = dir.path().join(format!("{compression:?}_{}.tga", pixel.channels()));
                let file = FileInfo::new(&path);
                let mut saver = TargaSave::new(TargaOptions { compression });
                saver.open(&file, &ImageIoInfo::new(info)).unwrap();
                saver.write(&Image::new(pixels.clone()), &FrameInfo::default()).unwrap();
                saver.close().unwrap();

                assert_eq!(load(&path).unwrap().pixels, pixels, "{pixel} {compression:?}");
            }
        }
    }

    /// Test: dimensions past the 16-bit header fields are a write error
    #[test]
    fn test_save_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.tga");
        let info = PixelDataInfo::new(70000, 1, Pixel::L_U8);
        let mut saver = TargaSave::new(TargaOptions::default());
        saver.open(&FileInfo::new(&path), &ImageIoInfo::new(info.clone())).unwrap();
        let err = saver.write(&Image::new(PixelData::new(info)), &FrameInfo::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert!(!path.exists());
    }

    #[test]
    fn test_probe() {
        assert!(probe(&header(TYPE_COLOR, 1, 1, 32, 0)));
        assert!(!probe(&header(1, 1, 1, 8, 0)));
        assert!(!probe(&[0, 0, 2]));
    }
}
