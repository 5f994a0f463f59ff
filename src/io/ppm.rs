//! NetPBM (PBM/PGM/PPM)
//!
//! Text header `P<n> width height [maxval]` with `#` comments, then samples
//! top to bottom.
//!
//! | magic | samples     | data   |
//! |-------|-------------|--------|
//! | P1    | bitmap      | ASCII  |
//! | P2    | gray        | ASCII  |
//! | P3    | RGB         | ASCII  |
//! | P4    | bitmap      | binary |
//! | P5    | gray        | binary |
//! | P6    | RGB         | binary |
//!
//! Bitmaps use 1 for black and load as 8-bit gray. A maxval above 255 means
//! 16-bit big-endian samples. Other maxvals are rescaled to the full range.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::core::memory::{native_endian, Endian};
use crate::entities::{
    FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType,
};
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "PPM";
pub const EXTENSIONS: &[&str] = &["ppm", "pnm", "pgm", "pbm"];

pub fn probe(header: &[u8]) -> bool {
    header.len() >= 3
        && header[0] == b'P'
        && (b'1'..=b'6').contains(&header[1])
        && header[2].is_ascii_whitespace()
}

/// Sample encoding used when saving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PpmData {
    Ascii,
    #[default]
    Binary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpmOptions {
    pub data: PpmData,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    /// Magic digit, 1..=6
    kind: u8,
    width: usize,
    height: usize,
    maxval: u32,
    pixel: Pixel,
}

impl Header {
    fn is_bitmap(&self) -> bool {
        self.kind == 1 || self.kind == 4
    }

    fn is_ascii(&self) -> bool {
        self.kind <= 3
    }
}

fn read_header(path: &std::path::Path, io: &mut FileIO) -> IoResult<Header> {
    let magic = io.get_word()?;
    let kind = match magic.as_bytes() {
        [b'P', d @ b'1'..=b'6'] => d - b'0',
        _ => return Err(IoError::unsupported(PLUGIN, path, format!("bad magic \"{magic}\""))),
    };
    let width: usize = io.get_word_as()?;
    let height: usize = io.get_word_as()?;
    let maxval: u32 = if kind == 1 || kind == 4 { 1 } else { io.get_word_as()? };
    if width == 0 || height == 0 {
        return Err(IoError::unsupported(PLUGIN, path, format!("bad size {width}x{height}")));
    }
    if maxval == 0 || maxval > u16::MAX as u32 {
        return Err(IoError::unsupported(PLUGIN, path, format!("bad maxval {maxval}")));
    }

    let format = match kind {
        3 | 6 => PixelFormat::Rgb,
        _ => PixelFormat::L,
    };
    let ty = if maxval > 255 { PixelType::U16 } else { PixelType::U8 };
    Ok(Header { kind, width, height, maxval, pixel: Pixel::new(format, ty) })
}

/// Scale `v` in `0..=maxval` to the full range of the destination type.
fn rescale(v: u32, maxval: u32, ty: PixelType) -> u32 {
    let full = if ty == PixelType::U16 { 65535 } else { 255 };
    if maxval == full {
        v.min(full)
    } else {
        (v.min(maxval) * full + maxval / 2) / maxval
    }
}

fn store(row: &mut [u8], i: usize, ty: PixelType, v: u32) {
    match ty {
        PixelType::U16 => row[i * 2..i * 2 + 2].copy_from_slice(&(v as u16).to_ne_bytes()),
        _ => row[i] = v as u8,
    }
}

fn read_pixels(io: &mut FileIO, header: &Header, pixels: &mut PixelData) -> IoResult<()> {
    let (width, height) = (header.width, header.height);
    let samples = width * header.pixel.channels();
    let ty = header.pixel.ty;

    if header.is_bitmap() {
        if header.is_ascii() {
            // Digits may or may not be separated by whitespace.
            let mut bits: Vec<u8> = Vec::with_capacity(samples);
            for y in 0..height {
                bits.clear();
                while bits.len() < samples {
                    let word = io.get_word()?;
                    bits.extend(word.bytes().map(|b| b.wrapping_sub(b'0')));
                }
                let row = pixels.row_mut(y);
                for (dst, bit) in row.iter_mut().zip(&bits) {
                    *dst = if *bit != 0 { 0 } else { 255 };
                }
            }
        } else {
            let stride = width.div_ceil(8);
            for y in 0..height {
                let packed = io.get_bytes(stride)?;
                let row = pixels.row_mut(y);
                for (x, dst) in row.iter_mut().enumerate() {
                    let bit = packed[x / 8] >> (7 - (x % 8)) & 1;
                    *dst = if bit != 0 { 0 } else { 255 };
                }
            }
        }
        return Ok(());
    }

    let scale = header.maxval != 255 && header.maxval != 65535;
    for y in 0..height {
        if header.is_ascii() {
            let row = pixels.row_mut(y);
            for i in 0..samples {
                let v: u32 = io.get_word_as()?;
                store(row, i, ty, rescale(v, header.maxval, ty));
            }
        } else if ty == PixelType::U16 {
            let mut values = vec![0u16; samples];
            io.get_u16_slice(&mut values)?;
            let row = pixels.row_mut(y);
            for (i, v) in values.into_iter().enumerate() {
                let v = if scale { rescale(v as u32, header.maxval, ty) } else { v as u32 };
                store(row, i, ty, v);
            }
        } else {
            let row = pixels.row_mut(y);
            io.get(row, 1)?;
            if scale {
                for v in row.iter_mut() {
                    *v = rescale(*v as u32, header.maxval, ty) as u8;
                }
            }
        }
    }
    Ok(())
}

/// NetPBM loader
#[derive(Debug, Default)]
pub struct PpmLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl PpmLoad {
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
        io.set_endian(native_endian() != Endian::Msb);

        let info = PixelDataInfo::new(header.width, header.height, header.pixel).with_mirror(Mirror::Y);
        let mut pixels = PixelData::new(info);
        read_pixels(&mut io, &header, &mut pixels)?;

        debug!("PPM read {} (P{} {}x{} {})", path.display(), header.kind, header.width, header.height, header.pixel);
        Ok(Image::new(apply_proxy(pixels, frame)))
    }
}

impl ImageLoad for PpmLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.file_name(-1);
        let mut io = FileIO::new();
        io.open_with(&path, FileMode::Read, self.backend)
            .map_err(|e| e.relabel(PLUGIN))?;
        let header = read_header(&path, &mut io).map_err(|e| e.relabel(PLUGIN))?;

        let mut info = ImageIoInfo::new(
            PixelDataInfo::new(header.width, header.height, header.pixel).with_mirror(Mirror::Y),
        );
        info.file_name = path;
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

/// NetPBM saver: gray or RGB, 8 or 16-bit, ASCII or binary
#[derive(Debug, Default)]
pub struct PpmSave {
    options: PpmOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl PpmSave {
    pub fn new(options: PpmOptions) -> Self {
        Self { options, file: None, info: PixelDataInfo::default() }
    }

    fn write_frame(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::write(PLUGIN, "", "saver not open"))?;
        let path = file.file_name(frame.frame);

        let pixels = image.pixels.convert(&self.info);
        let pixel = pixels.pixel();
        let ascii = self.options.data == PpmData::Ascii;
        let kind = match (pixel.format, ascii) {
            (PixelFormat::L, true) => 2,
            (_, true) => 3,
            (PixelFormat::L, false) => 5,
            (_, false) => 6,
        };
        let maxval = if pixel.ty == PixelType::U16 { 65535 } else { 255 };

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set_endian(native_endian() != Endian::Msb);
        io.set_text(&format!("P{kind}\n{} {}\n{maxval}\n", pixels.width(), pixels.height()))?;

        let samples = pixels.width() * pixel.channels();
        let mut line = String::new();
        for y in 0..pixels.height() {
            let row = pixels.row(y);
            match (ascii, pixel.ty) {
                (true, ty) => {
                    line.clear();
                    for i in 0..samples {
                        let v = if ty == PixelType::U16 {
                            u16::from_ne_bytes([row[i * 2], row[i * 2 + 1]]) as u32
                        } else {
                            row[i] as u32
                        };
                        if i > 0 {
                            line.push(' ');
                        }
                        line.push_str(&v.to_string());
                    }
                    line.push('\n');
                    io.set_text(&line)?;
                }
                (false, PixelType::U16) => io.set(row, 2)?,
                (false, _) => io.set(row, 1)?,
            }
        }
        io.close()?;

        debug!("PPM wrote {} (P{kind} {})", path.display(), pixel);
        Ok(())
    }
}

impl ImageSave for PpmSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info().pixel;
        let ty = if src.ty == PixelType::U8 { PixelType::U8 } else { PixelType::U16 };
        self.info = PixelDataInfo::new(0, 0, Pixel::new(src.format.without_alpha(), ty))
            .with_mirror(Mirror::Y);
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
