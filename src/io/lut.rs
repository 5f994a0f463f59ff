//! One-dimensional lookup tables stored as images
//!
//! A LUT with `size` entries and `channels` components loads as a
//! `size` x 1 image. Two text layouts are recognized:
//!
//! - Inferno (`.lut`): `LUT: <channels> <size>` then every entry of channel
//!   0, then channel 1, and so on.
//! - Kodak (`.1dl`): one entry per line, components separated by spaces.
//!
//! The integer range is inferred from the largest value: up to 255 loads as
//! 8-bit, up to 1023 or 4095 is rescaled from 10 or 12 bits to 16-bit, larger
//! values are taken as 16-bit.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::entities::{FileInfo, Image, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType};
use crate::io::error::{IoError, IoResult};
use crate::io::{check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "LUT";
pub const EXTENSIONS: &[&str] = &["lut", "1dl"];

pub fn probe(header: &[u8]) -> bool {
    header.starts_with(b"LUT:")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LutFormat {
    /// Pick from the file extension
    #[default]
    Auto,
    Inferno,
    Kodak,
}

impl LutFormat {
    fn resolve(self, path: &Path) -> LutFormat {
        if self != LutFormat::Auto {
            return self;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if ext.eq_ignore_ascii_case("1dl") {
            LutFormat::Kodak
        } else {
            LutFormat::Inferno
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LutOptions {
    pub format: LutFormat,
}

/// Parsed table: `values[channel][entry]`
struct Table {
    values: Vec<Vec<u32>>,
}

impl Table {
    fn size(&self) -> usize {
        self.values.first().map(Vec::len).unwrap_or(0)
    }

    fn channels(&self) -> usize {
        self.values.len()
    }

    /// Storage type and the source range to rescale from (`None` keeps values).
    fn range(&self) -> (PixelType, Option<u32>) {
        let max = self.values.iter().flatten().copied().max().unwrap_or(0);
        match max {
            0..=255 => (PixelType::U8, None),
            256..=1023 => (PixelType::U16, Some(1023)),
            1024..=4095 => (PixelType::U16, Some(4095)),
            _ => (PixelType::U16, None),
        }
    }

    fn pixel(&self) -> Option<Pixel> {
        Pixel::from_channels(self.channels(), self.range().0)
    }
}

fn parse_inferno(io: &mut FileIO, path: &Path) -> IoResult<Table> {
    let tag = io.get_word()?;
    if tag != "LUT:" {
        return Err(IoError::unsupported(PLUGIN, path, "missing \"LUT:\" header"));
    }
    let channels: usize = io.get_word_as()?;
    let size: usize = io.get_word_as()?;
    if !(1..=4).contains(&channels) || size == 0 {
        return Err(IoError::unsupported(
            PLUGIN,
            path,
            format!("bad table shape ({channels} channels, {size} entries)"),
        ));
    }
    let mut values = vec![Vec::with_capacity(size); channels];
    for channel in values.iter_mut() {
        for _ in 0..size {
            channel.push(io.get_word_as()?);
        }
    }
    Ok(Table { values })
}

fn parse_kodak(io: &mut FileIO, path: &Path) -> IoResult<Table> {
    let mut values: Vec<Vec<u32>> = Vec::new();
    while let Some(line) = io.get_line()? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = line
            .split_whitespace()
            .map(|w| w.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| IoError::read(PLUGIN, path, format!("invalid entry \"{line}\"")))?;
        if values.is_empty() {
            if !(1..=4).contains(&entry.len()) {
                return Err(IoError::unsupported(
                    PLUGIN,
                    path,
                    format!("{} components per entry", entry.len()),
                ));
            }
            values = vec![Vec::new(); entry.len()];
        }
        if entry.len() != values.len() {
            return Err(IoError::read(PLUGIN, path, format!("ragged entry \"{line}\"")));
        }
        for (channel, v) in values.iter_mut().zip(entry) {
            channel.push(v);
        }
    }
    if values.is_empty() {
        return Err(IoError::read(PLUGIN, path, "empty table"));
    }
    Ok(Table { values })
}

fn read_table(path: &Path, backend: ReadBackend, format: LutFormat) -> IoResult<Table> {
    let mut io = FileIO::new();
    io.open_with(path, FileMode::Read, backend)?;
    match format.resolve(path) {
        LutFormat::Kodak => parse_kodak(&mut io, path),
        _ => parse_inferno(&mut io, path),
    }
}

fn table_info(path: &Path, table: &Table) -> IoResult<PixelDataInfo> {
    let pixel = table
        .pixel()
        .ok_or_else(|| IoError::unsupported(PLUGIN, path, "unsupported channel count"))?;
    Ok(PixelDataInfo::new(table.size(), 1, pixel))
}

/// Lookup table loader
#[derive(Debug, Default)]
pub struct LutLoad {
    backend: ReadBackend,
    format: LutFormat,
    file: Option<FileInfo>,
}

impl LutLoad {
    pub fn new(backend: ReadBackend, options: &LutOptions) -> Self {
        Self { backend, format: options.format, file: None }
    }

    fn read_frame(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::read(PLUGIN, "", "loader not open"))?;
        let path = file.file_name(frame.frame);
        check_layer(PLUGIN, &path, frame, 1)?;

        let table = read_table(&path, self.backend, self.format)?;
        let info = table_info(&path, &table)?;
        let (ty, range) = table.range();
        let mut pixels = PixelData::new(info);
        let channels = table.channels();
        let row = pixels.row_mut(0);
        for (c, channel) in table.values.iter().enumerate() {
            for (x, &v) in channel.iter().enumerate() {
                let i = x * channels + c;
                match ty {
                    PixelType::U8 => row[i] = v as u8,
                    _ => {
                        let v = match range {
                            Some(max) => (v.min(max) * 65535 + max / 2) / max,
                            None => v.min(65535),
                        };
                        row[i * 2..i * 2 + 2].copy_from_slice(&(v as u16).to_ne_bytes());
                    }
                }
            }
        }
        debug!("LUT read {} ({} entries, {})", path.display(), table.size(), pixels.pixel());
        Ok(Image::new(pixels))
    }
}

impl ImageLoad for LutLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.file_name(-1);
        let table = read_table(&path, self.backend, self.format).map_err(|e| e.relabel(PLUGIN))?;
        let mut info = ImageIoInfo::new(table_info(&path, &table)?);
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

/// Lookup table saver: writes the first row of the frame
#[derive(Debug, Default)]
pub struct LutSave {
    options: LutOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl LutSave {
    pub fn new(options: LutOptions) -> Self {
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
        let (size, channels) = (pixels.width(), pixel.channels());
        let row = pixels.row(0);
        let value = |x: usize, c: usize| -> u32 {
            let i = x * channels + c;
            match pixel.ty {
                PixelType::U8 => row[i] as u32,
                _ => u16::from_ne_bytes([row[i * 2], row[i * 2 + 1]]) as u32,
            }
        };

        let mut text = String::new();
        match self.options.format.resolve(&path) {
            LutFormat::Kodak => {
                for x in 0..size {
                    let entry: Vec<String> = (0..channels).map(|c| value(x, c).to_string()).collect();
                    text.push_str(&entry.join(" "));
                    text.push('\n');
                }
            }
            _ => {
                text.push_str(&format!("LUT: {channels} {size}\n"));
                for c in 0..channels {
                    for x in 0..size {
                        text.push_str(&value(x, c).to_string());
                        text.push('\n');
                    }
                }
            }
        }

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set_text(&text)?;
        io.close()?;
        debug!("LUT wrote {} ({size} entries, {pixel})", path.display());
        Ok(())
    }
}

impl ImageSave for LutSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info().pixel;
        let ty = if src.ty == PixelType::U8 { PixelType::U8 } else { PixelType::U16 };
        let format = match src.format {
            PixelFormat::LA => PixelFormat::L,
            other => other,
        };
        self.info = PixelDataInfo::new(0, 0, Pixel::new(format, ty));
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

    fn load(path: &Path) -> IoResult<Image> {
        let mut loader = LutLoad::new(ReadBackend::Buffered, &LutOptions::default());
        loader.open(&FileInfo::new(path))?;
        loader.read(&FrameInfo::default())
    }

    /// Test: Inferno layout is channel-major
    #[test]
    fn test_inferno_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lut");
        std::fs::write(&path, "LUT: 3 2\n0\n255\n10\n20\n30\n40\n").unwrap();
        let image = load(&path).unwrap();
        assert_eq!(image.info().pixel, Pixel::RGB_U8);
        assert_eq!((image.pixels.width(), image.pixels.height()), (2, 1));
        assert_eq!(image.pixels.data(), &[0, 10, 30, 255, 20, 40]);
    }

    /// Test: 10-bit Kodak tables load as 16-bit with the range stretched
    #[test]
    fn test_kodak_10bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.1dl");
        std::fs::write(&path, "0 0 0\n1023 512 1023\n").unwrap();
        let image = load(&path).unwrap();
        assert_eq!(image.info().pixel, Pixel::RGB_U16);
        assert_eq!(image.pixels.get_f32(1, 0, 0), 1.0);
        assert_eq!(image.pixels.get_f32(0, 0, 2), 0.0);
    }

    #[test]
    fn test_bad_tables() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ragged.1dl");
        std::fs::write(&p, "1 2 3\n4 5\n").unwrap();
        assert_eq!(load(&p).unwrap_err().kind(), ErrorKind::Read);

        let p = dir.path().join("shape.lut");
        std::fs::write(&p, "LUT: 7 2\n").unwrap();
        let err = load(&p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.plugin(), PLUGIN);
    }

    /// Test: both layouts round-trip a 16-bit table
    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let info = PixelDataInfo::new(5, 1, Pixel::RGB_U16);
        let mut pixels = PixelData::new(info.clone());
        for x in 0..5 {
            for c in 0..3 {
                pixels.set_f32(x, 0, c, (x * 3 + c) as f32 / 14.0);
            }
        }
        let image = Image::new(pixels.clone());

        for name in ["out.lut", "out.1dl"] {
            let path = dir.path().join(name);
            let file = FileInfo::new(&path);
            let mut saver = LutSave::new(LutOptions::default());
            saver.open(&file, &ImageIoInfo::new(info.clone())).unwrap();
            saver.write(&image, &FrameInfo::default()).unwrap();
            saver.close().unwrap();

            let read = load(&path).unwrap();
            assert_eq!(read.pixels, pixels, "{name}");
        }
    }

    #[test]
    fn test_probe() {
        assert!(probe(b"LUT: 3 1024"));
        assert!(!probe(b"0 0 0"));
    }
}
