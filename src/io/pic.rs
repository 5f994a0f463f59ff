//! Softimage PIC
//!
//! Big-endian, 104-byte header followed by one or two channel packet
//! descriptors, then scanlines top to bottom (stored with `mirror.y`).
//!
//! Header: magic `0x5380F634`, f32 version, 80-byte comment, id `"PICT"`,
//! u16 width, u16 height, f32 aspect ratio, u16 fields, 2 pad bytes.
//!
//! Packet descriptor: chained, size (bits), type (0 raw, 2 mixed RLE), channel
//! mask. Legal layouts: RGBA unchained, RGB unchained, or RGB chained to an
//! unchained A packet. Anything else is unsupported.
//!
//! Mixed RLE record: count byte `c`
//! - `c < 128`: `c + 1` literal pixels follow
//! - `c == 128`: u16 count, then one pixel repeated
//! - `c > 128`: `c - 127` repeats of the following pixel

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::core::memory::{native_endian, Endian};
use crate::entities::{
    tags, FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType,
};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};
use crate::io::error::{IoError, IoResult};

pub const PLUGIN: &str = "PIC";
pub const EXTENSIONS: &[&str] = &["pic"];
pub const MAGIC: u32 = 0x5380_F634;

const HEADER_SIZE: usize = 104;
const COMMENT_SIZE: usize = 80;

const CHANNEL_A: u8 = 0x10;
const CHANNEL_B: u8 = 0x20;
const CHANNEL_G: u8 = 0x40;
const CHANNEL_R: u8 = 0x80;
const RGB: u8 = CHANNEL_R | CHANNEL_G | CHANNEL_B;

const TYPE_RAW: u8 = 0;
const TYPE_RLE: u8 = 2;

/// Signature check on the first bytes of a file.
pub fn probe(header: &[u8]) -> bool {
    header.len() >= 4 && u32::from_be_bytes([header[0], header[1], header[2], header[3]]) == MAGIC
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PicCompression {
    None,
    #[default]
    Rle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PicOptions {
    pub compression: PicCompression,
}

/// Channel packet layout of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Rgb,
    Rgba,
    /// RGB packet chained to a separate alpha packet
    RgbA,
}

#[derive(Debug, Clone, Copy)]
struct Packet {
    chained: bool,
    size: u8,
    ty: u8,
    channel: u8,
}

impl Packet {
    fn read(io: &mut FileIO) -> IoResult<Self> {
        Ok(Self {
            chained: io.get_u8()? != 0,
            size: io.get_u8()?,
            ty: io.get_u8()?,
            channel: io.get_u8()?,
        })
    }

    fn write(&self, io: &mut FileIO) -> IoResult<()> {
        io.set_u8(self.chained as u8)?;
        io.set_u8(self.size)?;
        io.set_u8(self.ty)?;
        io.set_u8(self.channel)
    }

    fn has(&self, mask: u8) -> bool {
        self.channel & mask != 0
    }
}

struct Header {
    info: ImageIoInfo,
    layout: Layout,
    /// RLE flag per packet
    compression: [bool; 2],
}

fn read_header(path: &std::path::Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: &str| IoError::unsupported(PLUGIN, path, reason);

    io.set_endian(native_endian() != Endian::Msb);
    let magic = io.get_u32()?;
    if magic != MAGIC {
        return Err(unsupported(&format!("bad magic number 0x{magic:08X}")));
    }
    let _version = io.get_f32()?;
    let comment = io.get_string(COMMENT_SIZE)?;
    let id = io.get_bytes(4)?;
    let width = io.get_u16()? as usize;
    let height = io.get_u16()? as usize;
    let _ratio = io.get_f32()?;
    let _fields = io.get_u16()?;
    io.seek(2)?;
    if id != b"PICT" {
        return Err(unsupported("missing PICT id"));
    }

    let first = Packet::read(io)?;
    let mut compression = [first.ty == TYPE_RLE, false];
    let rgb = first.has(CHANNEL_R) && first.has(CHANNEL_G) && first.has(CHANNEL_B);
    let layout = if rgb && first.has(CHANNEL_A) && first.size == 8 && !first.chained {
        Some(Layout::Rgba)
    } else if rgb && first.size == 8 && !first.chained {
        Some(Layout::Rgb)
    } else if rgb && first.size == 8 && first.chained {
        let second = Packet::read(io)?;
        compression[1] = second.ty == TYPE_RLE;
        let alpha_only = second.channel & RGB == 0 && second.has(CHANNEL_A);
        (alpha_only && second.size == 8 && !second.chained).then_some(Layout::RgbA)
    } else {
        None
    };
    let layout = layout.ok_or_else(|| unsupported("unsupported channel packet layout"))?;

    let pixel = match layout {
        Layout::Rgb => Pixel::RGB_U8,
        Layout::Rgba | Layout::RgbA => Pixel::RGBA_U8,
    };
    let mut info = ImageIoInfo::new(PixelDataInfo::new(width, height, pixel).with_mirror(Mirror::Y));
    info.file_name = path.to_path_buf();
    if !comment.is_empty() {
        info.tags.set_str(tags::DESCRIPTION, comment);
    }

    Ok(Header { info, layout, compression })
}

/// Expand one mixed-RLE packet into `width` pixels of `dst`.
///
/// `offset` is the first channel written, `channels` how many the packet
/// carries, `stride` the destination pixel size. Returns `None` if the
/// source runs out before the scanline is complete.
fn read_rle(
    src: &[u8],
    pos: &mut usize,
    dst: &mut [u8],
    width: usize,
    offset: usize,
    channels: usize,
    stride: usize,
) -> Option<()> {
    let mut x = 0;
    while x < width {
        let count = *src.get(*pos)?;
        *pos += 1;
        if count < 128 {
            let n = count as usize + 1;
            let bytes = n * channels;
            let run = src.get(*pos..*pos + bytes)?;
            *pos += bytes;
            for px in run.chunks_exact(channels).take(width - x) {
                let d = x * stride + offset;
                dst[d..d + channels].copy_from_slice(px);
                x += 1;
            }
        } else {
            let n = if count == 128 {
                let hi = *src.get(*pos)? as usize;
                let lo = *src.get(*pos + 1)? as usize;
                *pos += 2;
                (hi << 8) | lo
            } else {
                count as usize - 127
            };
            let px = src.get(*pos..*pos + channels)?;
            *pos += channels;
            for _ in 0..n.min(width - x) {
                let d = x * stride + offset;
                dst[d..d + channels].copy_from_slice(px);
                x += 1;
            }
        }
    }
    Some(())
}

/// Copy one raw packet (interleaved `channels`) into `dst`.
fn read_raw(
    src: &[u8],
    pos: &mut usize,
    dst: &mut [u8],
    width: usize,
    offset: usize,
    channels: usize,
    stride: usize,
) -> Option<()> {
    let bytes = width * channels;
    let run = src.get(*pos..*pos + bytes)?;
    *pos += bytes;
    if channels == stride {
        dst[..bytes].copy_from_slice(run);
    } else {
        for (x, px) in run.chunks_exact(channels).enumerate() {
            let d = x * stride + offset;
            dst[d..d + channels].copy_from_slice(px);
        }
    }
    Some(())
}

/// Softimage PIC loader
#[derive(Debug, Default)]
pub struct PicLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl PicLoad {
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
        let mut pixels = PixelData::new(info.clone());
        let stride = info.pixel.byte_count();
        let (width, height) = (info.width, info.height);
        let data = io.tail()?;
        let mut pos = 0usize;

        let truncated =
            || IoError::read(PLUGIN, &path, format!("scanline data truncated ({} bytes)", data.len()));

        // (first channel, channel count, RLE) per packet
        let packets: Vec<(usize, usize, bool)> = match header.layout {
            Layout::Rgb => vec![(0, 3, header.compression[0])],
            Layout::Rgba => vec![(0, 4, header.compression[0])],
            Layout::RgbA => vec![(0, 3, header.compression[0]), (3, 1, header.compression[1])],
        };

        for y in 0..height {
            let row = pixels.row_mut(y);
            for &(offset, channels, rle) in &packets {
                let ok = if rle {
                    read_rle(&data, &mut pos, row, width, offset, channels, stride)
                } else {
                    read_raw(&data, &mut pos, row, width, offset, channels, stride)
                };
                ok.ok_or_else(truncated)?;
            }
        }

        debug!("PIC read {} ({}x{} {})", path.display(), width, height, info.pixel);
        Ok(Image::with_tags(apply_proxy(pixels, frame), header.info.tags))
    }
}

impl ImageLoad for PicLoad {
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

/// Append one scanline of `channels`-channel pixels with mixed RLE.
fn write_rle(out: &mut Vec<u8>, row: &[u8], channels: usize) {
    let pixels: Vec<&[u8]> = row.chunks_exact(channels).collect();
    let n = pixels.len();
    let mut i = 0;
    while i < n {
        let mut run = 1;
        while i + run < n && run < u16::MAX as usize && pixels[i + run] == pixels[i] {
            run += 1;
        }
        if run >= 2 {
            if run <= 128 {
                out.push((run + 127) as u8);
            } else {
                out.push(128);
                out.extend_from_slice(&(run as u16).to_be_bytes());
            }
            out.extend_from_slice(pixels[i]);
            i += run;
            continue;
        }
        // Literal run until the next repeat or 128 pixels.
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

/// Softimage PIC saver (RGB or RGBA, 8-bit)
#[derive(Debug, Default)]
pub struct PicSave {
    options: PicOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl PicSave {
    pub fn new(options: PicOptions) -> Self {
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

        let mut target = self.info.clone();
        target.width = width;
        target.height = height;
        let pixels = image.pixels.convert(&target);
        let rle = self.options.compression == PicCompression::Rle;
        let ty = if rle { TYPE_RLE } else { TYPE_RAW };
        let has_alpha = target.pixel.format == PixelFormat::Rgba;
        let channels = target.pixel.channels();

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set_endian(native_endian() != Endian::Msb);
        io.set_u32(MAGIC)?;
        io.set_f32(3.71)?;
        let comment = image.tags.get_str(tags::DESCRIPTION).unwrap_or_default();
        io.set_string(comment, COMMENT_SIZE)?;
        io.set(b"PICT", 1)?;
        io.set_u16(target.width as u16)?;
        io.set_u16(target.height as u16)?;
        io.set_f32(1.0)?;
        io.set_u16(3)?;
        io.set(&[0, 0], 1)?;
        debug_assert_eq!(io.pos(), HEADER_SIZE);

        let mask = if has_alpha { RGB | CHANNEL_A } else { RGB };
        Packet { chained: false, size: 8, ty, channel: mask }.write(&mut io)?;

        let mut line = Vec::with_capacity(target.bytes_per_row() + target.width);
        for y in 0..target.height {
            line.clear();
            let row = pixels.row(y);
            if rle {
                write_rle(&mut line, row, channels);
            } else {
                line.extend_from_slice(row);
            }
            io.set(&line, 1)?;
        }
        io.close()?;

        debug!("PIC wrote {} ({}x{})", path.display(), target.width, target.height);
        Ok(())
    }
}

impl ImageSave for PicSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info();
        let format = if src.pixel.format.has_alpha() { PixelFormat::Rgba } else { PixelFormat::Rgb };
        self.info = PixelDataInfo::new(src.width, src.height, Pixel::new(format, PixelType::U8))
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::error::ErrorKind;
    use std::path::{Path, PathBuf};

    /// Build a PIC file by hand: header, packets, raw scanline bytes.
    pub(crate) fn pic_bytes(width: u16, height: u16, packets: &[[u8; 4]], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&3.71f32.to_be_bytes());
        let mut comment = [0u8; COMMENT_SIZE];
        comment[..4].copy_from_slice(b"test");
        out.extend_from_slice(&comment);
        out.extend_from_slice(b"PICT");
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&1.0f32.to_be_bytes());
        out.extend_from_slice(&3u16.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        for p in packets {
            out.extend_from_slice(p);
        }
        out.extend_from_slice(body);
        out
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn load(path: &Path) -> IoResult<(ImageIoInfo, Image)> {
        let mut loader = PicLoad::new(ReadBackend::Mapped);
        let info = loader.open(&FileInfo::new(path))?;
        let image = loader.read(&FrameInfo::default())?;
        Ok((info, image))
    }

    /// Test: raw RGB scanlines decode in file order with mirror.y set
    #[test]
    fn test_raw_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..12).collect();
        let path = write(dir.path(), "raw.pic", &pic_bytes(2, 2, &[[0, 8, TYPE_RAW, RGB]], &body));

        let (info, image) = load(&path).unwrap();
        assert_eq!(info.info().pixel, Pixel::RGB_U8);
        assert!(info.info().mirror.y);
        assert_eq!(info.tags.get_str(tags::DESCRIPTION), Some("test"));
        assert_eq!(image.pixels.data(), body.as_slice());
    }

    /// Test: a blank comment adds no description tag
    #[test]
    fn test_empty_comment() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = pic_bytes(1, 1, &[[0, 8, TYPE_RAW, RGB]], &[1, 2, 3]);
        bytes[8..8 + COMMENT_SIZE].fill(0);
        let path = write(dir.path(), "blank.pic", &bytes);

        let (info, _) = load(&path).unwrap();
        assert!(!info.tags.contains(tags::DESCRIPTION));
    }

    /// Test: dimensions past the 16-bit header fields are a write error
    #[test]
    fn test_save_too_wide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.pic");
        let info = PixelDataInfo::new(70000, 1, Pixel::RGB_U8);
        let mut saver = PicSave::new(PicOptions::default());
        saver.open(&FileInfo::new(&path), &ImageIoInfo::new(info.clone())).unwrap();
        let err = saver.write(&Image::new(PixelData::new(info)), &FrameInfo::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert!(!path.exists());
    }

    /// Test: all three record kinds of mixed RLE
    #[test]
    fn test_rle_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = Vec::new();
        // Row 0: one literal pixel then a short run of 3.
        body.extend_from_slice(&[0, 1, 2, 3, 4]);
        body.extend_from_slice(&[130, 9, 9, 9, 9]);
        // Row 1: long-run record with a 16-bit count.
        body.extend_from_slice(&[128, 0, 4, 7, 7, 7, 255]);
        let path = write(
            dir.path(),
            "rle.pic",
            &pic_bytes(4, 2, &[[0, 8, TYPE_RLE, RGB | CHANNEL_A]], &body),
        );

        let (_, image) = load(&path).unwrap();
        assert_eq!(image.pixels.row(0), &[1, 2, 3, 4, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9]);
        assert_eq!(image.pixels.row(1), [7u8, 7, 7, 255].repeat(4).as_slice());
    }

    /// Test: RGB packet chained to a separate alpha packet
    #[test]
    fn test_chained_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let body = [10, 11, 12, 20, 21, 22, 200, 201];
        let path = write(
            dir.path(),
            "chain.pic",
            &pic_bytes(2, 1, &[[1, 8, TYPE_RAW, RGB], [0, 8, TYPE_RAW, CHANNEL_A]], &body),
        );

        let (info, image) = load(&path).unwrap();
        assert_eq!(info.info().pixel, Pixel::RGBA_U8);
        assert_eq!(image.pixels.data(), &[10, 11, 12, 200, 20, 21, 22, 201]);
    }

    /// Test: header validation
    /// Validates: bad magic, bad id and illegal packet combinations are unsupported
    #[test]
    fn test_header_rejection() {
        let dir = tempfile::tempdir().unwrap();

        let mut bad_magic = pic_bytes(1, 1, &[[0, 8, TYPE_RAW, RGB]], &[0, 0, 0]);
        bad_magic[0] = 0;
        let p = write(dir.path(), "magic.pic", &bad_magic);
        assert_eq!(load(&p).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut bad_id = pic_bytes(1, 1, &[[0, 8, TYPE_RAW, RGB]], &[0, 0, 0]);
        bad_id[88..92].copy_from_slice(b"PICX");
        let p = write(dir.path(), "id.pic", &bad_id);
        assert_eq!(load(&p).unwrap_err().kind(), ErrorKind::Unsupported);

        for packets in [
            vec![[0u8, 16, TYPE_RAW, RGB]],
            vec![[0, 8, TYPE_RAW, CHANNEL_R | CHANNEL_G]],
            vec![[1, 8, TYPE_RAW, RGB], [0, 8, TYPE_RAW, CHANNEL_A | CHANNEL_R]],
            vec![[1, 8, TYPE_RAW, RGB], [1, 8, TYPE_RAW, CHANNEL_A]],
        ] {
            let p = write(dir.path(), "layout.pic", &pic_bytes(1, 1, &packets, &[0; 8]));
            let err = load(&p).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unsupported, "{packets:?}");
            assert_eq!(err.plugin(), PLUGIN);
        }
    }

    /// Test: RLE records that point past the data are read errors
    /// Validates: literal, short-run and long-run records are bounds checked
    #[test]
    fn test_truncated_rle() {
        let dir = tempfile::tempdir().unwrap();
        let cases: [&[u8]; 4] = [
            &[5, 1, 2, 3],       // literal of 6 pixels, 1 present
            &[140],              // run with no pixel
            &[128, 0],           // long-run count cut short
            &[],                 // no data at all
        ];
        for body in cases {
            let p = write(
                dir.path(),
                "trunc.pic",
                &pic_bytes(8, 1, &[[0, 8, TYPE_RLE, RGB]], body),
            );
            let err = load(&p).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Read, "{body:?}");
        }

        let p = write(dir.path(), "raw.pic", &pic_bytes(4, 2, &[[0, 8, TYPE_RAW, RGB]], &[0; 20]));
        assert_eq!(load(&p).unwrap_err().kind(), ErrorKind::Read);
    }

    /// Test: saver output decodes to the same pixels, RLE and raw
    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let info = PixelDataInfo::new(300, 3, Pixel::RGBA_U8).with_mirror(Mirror::Y);
        let mut pixels = PixelData::new(info.clone());
        for (i, b) in pixels.data_mut().iter_mut().enumerate() {
            // Long flat stretches and noisy stretches.
            *b = if (i / 4) % 150 < 140 { 42 } else { (i * 31 % 256) as u8 };
        }
        let mut image = Image::new(pixels);
        image.tags.set_str(tags::DESCRIPTION, "round trip");

        for compression in [PicCompression::Rle, PicCompression::None] {
            let path = dir.path().join(format!("out_{compression:?}.pic"));
            let file = FileInfo::new(&path);
            let mut saver = PicSave::new(PicOptions { compression });
            saver.open(&file, &ImageIoInfo::new(info.clone())).unwrap();
            saver.write(&image, &FrameInfo::default()).unwrap();
            saver.close().unwrap();

            let (read_info, read) = load(&path).unwrap();
            assert_eq!(read_info.info(), info);
            assert_eq!(read.pixels, image.pixels);
            assert_eq!(read.tags.get_str(tags::DESCRIPTION), Some("round trip"));
        }
    }

    #[test]
    fn test_probe() {
        assert!(probe(&MAGIC.to_be_bytes()));
        assert!(!probe(b"SDPX"));
        assert!(!probe(&[0x53]));
    }
}
