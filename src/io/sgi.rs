//! Silicon Graphics image
//!
//! Big-endian 512-byte header, then planar channel data with rows bottom to
//! top (loaded without `mirror.y`). 8 or 16 bits per channel, 1 to 4 channels.
//!
//! Storage is either verbatim (channel by channel, row by row) or RLE, where
//! two `u32` tables of `height * channels` entries give each scanline's file
//! offset and length. An RLE record is one count word: the low 7 bits are the
//! count, the high bit selects a literal run, zero ends the scanline.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::core::memory::{native_endian, Endian};
use crate::entities::{
    tags, FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelType,
};
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "SGI";
pub const EXTENSIONS: &[&str] = &["sgi", "rgba", "rgb", "bw"];
pub const MAGIC: u16 = 474;

const HEADER_SIZE: usize = 512;
const NAME_SIZE: usize = 80;

pub fn probe(header: &[u8]) -> bool {
    header.len() >= 4
        && u16::from_be_bytes([header[0], header[1]]) == MAGIC
        && header[2] <= 1
        && (header[3] == 1 || header[3] == 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SgiCompression {
    #[default]
    None,
    Rle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgiOptions {
    pub compression: SgiCompression,
}

struct Header {
    info: ImageIoInfo,
    rle: bool,
    /// Bytes per channel sample
    bpc: usize,
}

fn read_header(path: &Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: String| IoError::unsupported(PLUGIN, path, reason);

    io.set_endian(native_endian() != Endian::Msb);
    let magic = io.get_u16()?;
    if magic != MAGIC {
        return Err(unsupported(format!("bad magic number {magic}")));
    }
    let storage = io.get_u8()?;
    let bpc = io.get_u8()? as usize;
    let dimension = io.get_u16()?;
    let width = io.get_u16()? as usize;
    let mut height = io.get_u16()? as usize;
    let mut channels = io.get_u16()? as usize;
    let _pixmin = io.get_i32()?;
    let _pixmax = io.get_i32()?;
    io.seek(4)?;
    let name = io.get_string(NAME_SIZE)?;
    let colormap = io.get_i32()?;
    io.set_pos(HEADER_SIZE)?;

    if storage > 1 {
        return Err(unsupported(format!("unknown storage {storage}")));
    }
    if colormap != 0 {
        return Err(unsupported(format!("color map type {colormap}")));
    }
    match dimension {
        1 => {
            height = 1;
            channels = 1;
        }
        2 => channels = 1,
        3 => {}
        _ => return Err(unsupported(format!("dimension {dimension}"))),
    }
    let ty = match bpc {
        1 => PixelType::U8,
        2 => PixelType::U16,
        _ => return Err(unsupported(format!("{bpc} bytes per channel"))),
    };
    let pixel = Pixel::from_channels(channels, ty)
        .ok_or_else(|| unsupported(format!("{channels} channels")))?;
    if width == 0 || height == 0 {
        return Err(unsupported(format!("bad size {width}x{height}")));
    }

    let mut info = ImageIoInfo::new(PixelDataInfo::new(width, height, pixel));
    info.file_name = path.to_path_buf();
    info.tags.set_str(tags::DESCRIPTION, name);
    Ok(Header { info, rle: storage == 1, bpc })
}

/// Read one sample of `bpc` big-endian bytes.
fn sample(src: &[u8], at: usize, bpc: usize) -> Option<u16> {
    if bpc == 1 {
        src.get(at).map(|&b| b as u16)
    } else {
        let b = src.get(at..at + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }
}

/// Expand one RLE scanline of `width` samples into `out`.
fn read_rle(src: &[u8], bpc: usize, width: usize, out: &mut Vec<u16>) -> Option<()> {
    out.clear();
    let mut pos = 0;
    while out.len() < width {
        let word = sample(src, pos, bpc)?;
        pos += bpc;
        let count = (word & 0x7F) as usize;
        if count == 0 {
            break;
        }
        if word & 0x80 != 0 {
            for _ in 0..count {
                out.push(sample(src, pos, bpc)?);
                pos += bpc;
            }
        } else {
            let v = sample(src, pos, bpc)?;
            pos += bpc;
            out.extend(std::iter::repeat_n(v, count));
        }
    }
    (out.len() >= width).then_some(())
}

fn store(row: &mut [u8], x: usize, c: usize, channels: usize, bpc: usize, v: u16) {
    let i = x * channels + c;
    if bpc == 1 {
        row[i] = v as u8;
    } else {
        row[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
    }
}

/// SGI loader
#[derive(Debug, Default)]
pub struct SgiLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl SgiLoad {
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

        let info = header.info.info();
        let (width, height, channels, bpc) = (info.width, info.height, info.pixel.channels(), header.bpc);
        let mut pixels = PixelData::new(info.clone());

        if header.rle {
            let tables = height * channels;
            let mut starts = vec![0u32; tables];
            let mut lengths = vec![0u32; tables];
            io.get_u32_slice(&mut starts)?;
            io.get_u32_slice(&mut lengths)?;
            io.set_pos(0)?;
            io.read_ahead();
            let data = io.tail()?;

            let mut line = Vec::with_capacity(width);
            for c in 0..channels {
                for y in 0..height {
                    let t = c * height + y;
                    let (start, len) = (starts[t] as usize, lengths[t] as usize);
                    let ok = data
                        .get(start..start + len)
                        .and_then(|src| read_rle(src, bpc, width, &mut line));
                    ok.ok_or_else(|| {
                        IoError::read(PLUGIN, &path, format!("bad RLE scanline {y} channel {c}"))
                    })?;
                    let row = pixels.row_mut(y);
                    for (x, &v) in line.iter().take(width).enumerate() {
                        store(row, x, c, channels, bpc, v);
                    }
                }
            }
        } else {
            io.read_ahead();
            let data = io.tail()?;
            let plane = width * height * bpc;
            if data.len() < plane * channels {
                return Err(IoError::read(
                    PLUGIN,
                    &path,
                    format!("pixel data truncated ({} of {} bytes)", data.len(), plane * channels),
                ));
            }
            for c in 0..channels {
                for y in 0..height {
                    let base = c * plane + y * width * bpc;
                    let row = pixels.row_mut(y);
                    for x in 0..width {
                        let v = sample(&data, base + x * bpc, bpc).unwrap_or(0);
                        store(row, x, c, channels, bpc, v);
                    }
                }
            }
        }

        debug!("SGI read {} ({}x{} {}, rle={})", path.display(), width, height, info.pixel, header.rle);
        Ok(Image::with_tags(apply_proxy(pixels, frame), header.info.tags))
    }
}

impl ImageLoad for SgiLoad {
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

/// Encode one scanline: runs of three or more repeat, everything else is
/// literal. Words are `bpc` bytes, big-endian.
fn write_rle(out: &mut Vec<u8>, line: &[u16], bpc: usize) {
    let push = |out: &mut Vec<u8>, v: u16| {
        if bpc == 1 {
            out.push(v as u8);
        } else {
            out.extend_from_slice(&v.to_be_bytes());
        }
    };
    let n = line.len();
    let mut i = 0;
    while i < n {
        let mut run = 1;
        while i + run < n && run < 127 && line[i + run] == line[i] {
            run += 1;
        }
        if run >= 3 {
            push(out, run as u16);
            push(out, line[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < n
            && i - start < 127
            && !(i + 2 < n && line[i] == line[i + 1] && line[i] == line[i + 2])
        {
            i += 1;
        }
        push(out, 0x80 | (i - start) as u16);
        for &v in &line[start..i] {
            push(out, v);
        }
    }
    push(out, 0);
}

/// SGI saver
#[derive(Debug, Default)]
pub struct SgiSave {
    options: SgiOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl SgiSave {
    pub fn new(options: SgiOptions) -> Self {
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

        let pixels = image.pixels.convert(&self.info);
        let pixel = pixels.pixel();
        let channels = pixel.channels();
        let bpc = pixel.ty.byte_count();
        let rle = self.options.compression == SgiCompression::Rle;

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set_endian(native_endian() != Endian::Msb);
        io.set_u16(MAGIC)?;
        io.set_u8(rle as u8)?;
        io.set_u8(bpc as u8)?;
        io.set_u16(if channels == 1 { 2 } else { 3 })?;
        io.set_u16(width as u16)?;
        io.set_u16(height as u16)?;
        io.set_u16(channels as u16)?;
        io.set_i32(0)?;
        io.set_i32(if bpc == 1 { 255 } else { 65535 })?;
        io.set(&[0; 4], 1)?;
        io.set_string(image.tags.get_str(tags::DESCRIPTION).unwrap_or_default(), NAME_SIZE)?;
        io.set_i32(0)?;
        io.set(&[0; HEADER_SIZE - 108], 1)?;

        // Planar scanlines in (channel, row) order.
        let mut line = vec![0u16; width];
        let scanline = |c: usize, y: usize, line: &mut Vec<u16>| {
            let row = pixels.row(y);
            for (x, v) in line.iter_mut().enumerate() {
                let i = x * channels + c;
                *v = if bpc == 1 { row[i] as u16 } else { u16::from_ne_bytes([row[i * 2], row[i * 2 + 1]]) };
            }
        };

        if rle {
            let tables = height * channels;
            let mut encoded = Vec::new();
            let mut starts = Vec::with_capacity(tables);
            let mut lengths = Vec::with_capacity(tables);
            let data_start = HEADER_SIZE + tables * 8;
            for c in 0..channels {
                for y in 0..height {
                    scanline(c, y, &mut line);
                    let before = encoded.len();
                    write_rle(&mut encoded, &line, bpc);
                    starts.push((data_start + before) as u32);
                    lengths.push((encoded.len() - before) as u32);
                }
            }
            io.set_u32_slice(&starts)?;
            io.set_u32_slice(&lengths)?;
            io.set(&encoded, 1)?;
        } else {
            let mut bytes = Vec::with_capacity(width * bpc);
            for c in 0..channels {
                for y in 0..height {
                    scanline(c, y, &mut line);
                    bytes.clear();
                    for &v in &line {
                        if bpc == 1 {
                            bytes.push(v as u8);
                        } else {
                            bytes.extend_from_slice(&v.to_be_bytes());
                        }
                    }
                    io.set(&bytes, 1)?;
                }
            }
        }
        io.close()?;

        debug!("SGI wrote {} ({}x{} {}, rle={})", path.display(), width, height, pixel, rle);
        Ok(())
    }
}

impl ImageSave for SgiSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info().pixel;
        let ty = if src.ty == PixelType::U8 { PixelType::U8 } else { PixelType::U16 };
        self.info = PixelDataInfo::new(0, 0, Pixel::new(src.format, ty)).with_mirror(Mirror::NONE);
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
    use proptest::prelude::*;

    fn load(path: &Path) -> IoResult<Image> {
        let mut loader = SgiLoad::new(ReadBackend::Mapped);
        loader.open(&FileInfo::new(path))?;
        loader.read(&FrameInfo::default())
    }

    fn header(storage: u8, bpc: u8, dim: u16, w: u16, h: u16, z: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.push(storage);
        out.push(bpc);
        for v in [dim, w, h, z] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.resize(HEADER_SIZE, 0);
        out
    }

    /// Test: verbatim planar data interleaves into bottom-up rows
    #[test]
    fn test_verbatim_planar() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = header(0, 1, 3, 2, 1, 3);
        bytes.extend_from_slice(&[1, 2, 10, 20, 100, 200]);
        let path = dir.path().join("a.rgb");
        std::fs::write(&path, &bytes).unwrap();

        let image = load(&path).unwrap();
        assert_eq!(image.info().pixel, Pixel::RGB_U8);
        assert!(!image.info().mirror.y);
        assert_eq!(image.pixels.data(), &[1, 10, 100, 2, 20, 200]);
    }

    /// Test: hand-built RLE with a run and a literal
    #[test]
    fn test_rle_scanline() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = header(1, 1, 2, 5, 1, 1);
        let start = (HEADER_SIZE + 8) as u32;
        let body = [3, 7, 0x82, 1, 2, 0];
        bytes.extend_from_slice(&start.to_be_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&body);
        let path = dir.path().join("a.bw");
        std::fs::write(&path, &bytes).unwrap();

        let image = load(&path).unwrap();
        assert_eq!(image.pixels.data(), &[7, 7, 7, 1, 2]);
    }

    #[test]
    fn test_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.sgi");
        std::fs::write(&path, header(0, 3, 3, 1, 1, 1)).unwrap();
        assert_eq!(load(&path).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut short = header(0, 1, 3, 4, 4, 3);
        short.extend_from_slice(&[0; 10]);
        std::fs::write(&path, &short).unwrap();
        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Read);
        assert_eq!(err.plugin(), PLUGIN);
    }

    fn round_trip(pixels: &PixelData, compression: SgiCompression) -> PixelData {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sgi");
        let file = FileInfo::new(&path);
        let mut saver = SgiSave::new(SgiOptions { compression });
        saver.open(&file, &ImageIoInfo::new(pixels.info().clone())).unwrap();
        saver.write(&Image::new(pixels.clone()), &FrameInfo::default()).unwrap();
        saver.close().unwrap();
        load(&path).unwrap().pixels
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Test: arbitrary 8-bit RGBA content survives RLE and verbatim storage
        #[test]
        fn test_save_round_trip(data in proptest::collection::vec(0u8..4, 7 * 3 * 4), rle in any::<bool>()) {
            let info = PixelDataInfo::new(7, 3, Pixel::RGBA_U8);
            let pixels = PixelData::from_bytes(info, data).unwrap();
            let compression = if rle { SgiCompression::Rle } else { SgiCompression::None };
            prop_assert_eq!(round_trip(&pixels, compression), pixels);
        }
    }

    #[test]
    fn test_round_trip_u16() {
        let info = PixelDataInfo::new(300, 2, Pixel::L_U16);
        let mut pixels = PixelData::new(info);
        for x in 0..300 {
            pixels.set_f32(x, 0, 0, if x < 200 { 0.5 } else { x as f32 / 300.0 });
            pixels.set_f32(x, 1, 0, 1.0);
        }
        assert_eq!(round_trip(&pixels, SgiCompression::Rle), pixels);
    }

    /// Test: dimensions past the 16-bit header fields are a write error
    #[test]
    fn test_save_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.sgi");
        let info = PixelDataInfo::new(1, 70000, Pixel::L_U8);
        let mut saver = SgiSave::new(SgiOptions::default());
        saver.open(&FileInfo::new(&path), &ImageIoInfo::new(info.clone())).unwrap();
        let err = saver.write(&Image::new(PixelData::new(info)), &FrameInfo::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert!(!path.exists());
    }

    #[test]
    fn test_probe() {
        assert!(probe(&header(1, 2, 3, 1, 1, 3)));
        assert!(!probe(&[0x01, 0xDA, 2, 1]));
        assert!(!probe(&[0x01]));
    }
}
