//! Video files as image sequences (FFmpeg)
//!
//! **Why**: Reference movies sit next to frame sequences in most shots; the
//! viewer treats a movie as a numbered sequence of RGBA frames `0..N`.
//!
//! Decoding needs the `ffmpeg` feature (`playa-ffmpeg`). Without it the
//! loader still exists so the registry stays identical, but `open` reports
//! the format as unsupported.

use log::debug;

use crate::entities::{FileInfo, Image};
use crate::io::error::{IoError, IoResult};
use crate::io::{check_layer, FrameInfo, ImageIoInfo, ImageLoad};

pub const PLUGIN: &str = "FFmpeg";
pub const EXTENSIONS: &[&str] = &["mov", "mp4", "avi", "mkv", "m4v"];

/// Container signatures: ISO base media (`ftyp` at 4), RIFF AVI, Matroska.
pub fn probe(header: &[u8]) -> bool {
    (header.len() >= 8 && &header[4..8] == b"ftyp")
        || (header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"AVI ")
        || (header.len() >= 4 && header[..4] == [0x1A, 0x45, 0xDF, 0xA3])
}

/// Video loader; frame numbers are decode order starting at 0.
#[derive(Debug, Default)]
pub struct VideoLoad {
    file: Option<FileInfo>,
    frames: usize,
}

impl VideoLoad {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageLoad for VideoLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.path();
        let info = native::open(&path)?;
        self.frames = info.sequence.len();
        self.file = Some(file.clone());
        debug!("FFmpeg opened {} ({} frames)", path.display(), self.frames);
        Ok(info)
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::read(PLUGIN, "", "loader not open"))?;
        let path = file.path();
        check_layer(PLUGIN, &path, frame, 1)?;
        let index = frame.frame.max(0) as usize;
        if index >= self.frames {
            return Err(IoError::read(
                PLUGIN,
                &path,
                format!("frame {} out of range ({} frames)", frame.frame, self.frames),
            ));
        }
        let pixels = native::decode(&path, index)?;
        Ok(Image::new(crate::io::apply_proxy(pixels, frame)))
    }

    fn close(&mut self) -> IoResult<()> {
        self.file = None;
        self.frames = 0;
        Ok(())
    }
}

#[cfg(feature = "ffmpeg")]
mod native {
    use std::path::Path;
    use std::sync::Once;

    use log::warn;
    use playa_ffmpeg as ffmpeg;

    use super::PLUGIN;
    use crate::entities::{Mirror, Pixel, PixelData, PixelDataInfo, Sequence, Speed};
    use crate::io::error::{IoError, IoResult};
    use crate::io::ImageIoInfo;

    static LOG_INIT: Once = Once::new();

    fn quiet() {
        LOG_INIT.call_once(|| unsafe {
            ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_QUIET);
        });
    }

    fn fail(path: &Path, what: &str, e: impl std::fmt::Display) -> IoError {
        IoError::read(PLUGIN, path, format!("{what}: {e}"))
    }

    pub(super) fn open(path: &Path) -> IoResult<ImageIoInfo> {
        quiet();
        let ictx = ffmpeg::format::input(path)
            .map_err(|e| IoError::open(PLUGIN, path, e.to_string()))?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| IoError::unsupported(PLUGIN, path, "no video stream"))?;

        let rate = stream.avg_frame_rate();
        let time_base = stream.time_base();
        let fps = if rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        let seconds = stream.duration() as f64 * time_base.numerator() as f64
            / time_base.denominator().max(1) as f64;
        let frames = (seconds * fps) as i64;

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| fail(path, "decoder context", e))?;
        let decoder = context.decoder().video().map_err(|e| fail(path, "video decoder", e))?;
        let (width, height) = (decoder.width() as usize, decoder.height() as usize);
        if frames <= 0 || width == 0 || height == 0 {
            return Err(IoError::unsupported(PLUGIN, path, "empty video stream"));
        }

        let speed = if rate.numerator() > 0 && rate.denominator() > 0 {
            Speed::new(rate.numerator() as u32, rate.denominator() as u32)
        } else {
            Speed::default()
        };
        let mut info = ImageIoInfo::new(
            PixelDataInfo::new(width, height, Pixel::RGBA_U8).with_mirror(Mirror::Y),
        );
        info.file_name = path.to_path_buf();
        info.sequence = Sequence::from_range(0, frames - 1, 0, speed);
        Ok(info)
    }

    pub(super) fn decode(path: &Path, index: usize) -> IoResult<PixelData> {
        quiet();
        let mut ictx = ffmpeg::format::input(path)
            .map_err(|e| IoError::open(PLUGIN, path, e.to_string()))?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| IoError::unsupported(PLUGIN, path, "no video stream"))?;
        let stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let time_base = stream.time_base();

        let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| fail(path, "decoder context", e))?;
        unsafe {
            (*context.as_mut_ptr()).thread_type = ffmpeg::ffi::FF_THREAD_FRAME;
            (*context.as_mut_ptr()).thread_count = 0;
        }
        let mut decoder = context.decoder().video().map_err(|e| fail(path, "video decoder", e))?;
        let (width, height) = (decoder.width(), decoder.height());
        let mut scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGBA,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| fail(path, "scaler", e))?;

        let target = (rate.numerator() > 0 && rate.denominator() > 0).then(|| {
            let frame_tb = ffmpeg::ffi::AVRational {
                num: rate.denominator() as i32,
                den: rate.numerator() as i32,
            };
            let stream_tb = ffmpeg::ffi::AVRational {
                num: time_base.numerator() as i32,
                den: time_base.denominator() as i32,
            };
            unsafe { ffmpeg::ffi::av_rescale_q(index as i64, frame_tb, stream_tb) }
        });
        if let Some(ts) = target {
            let ret = unsafe {
                ffmpeg::ffi::av_seek_frame(
                    ictx.as_mut_ptr(),
                    stream_index as i32,
                    ts,
                    ffmpeg::ffi::AVSEEK_FLAG_BACKWARD,
                )
            };
            if ret < 0 {
                warn!("FFmpeg seek failed in {} (ret={ret}), decoding from start", path.display());
            }
        }

        let mut current = 0usize;
        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            decoder.send_packet(&packet).map_err(|e| fail(path, "send packet", e))?;
            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let reached = match target {
                    Some(ts) => decoded.pts().map(|pts| pts >= ts).unwrap_or(current >= index),
                    None => current >= index,
                };
                if reached {
                    let mut rgba = ffmpeg::util::frame::video::Video::empty();
                    scaler.run(&decoded, &mut rgba).map_err(|e| fail(path, "scale", e))?;
                    let (w, h) = (width as usize, height as usize);
                    let info = PixelDataInfo::new(w, h, Pixel::RGBA_U8).with_mirror(Mirror::Y);
                    let mut pixels = PixelData::new(info);
                    let stride = rgba.stride(0) as usize;
                    let src = rgba.data(0);
                    for y in 0..h {
                        pixels.row_mut(y).copy_from_slice(&src[y * stride..y * stride + w * 4]);
                    }
                    return Ok(pixels);
                }
                current += 1;
            }
        }
        Err(IoError::read(PLUGIN, path, format!("frame {index} not found")))
    }
}

#[cfg(not(feature = "ffmpeg"))]
mod native {
    use std::path::Path;

    use super::PLUGIN;
    use crate::entities::PixelData;
    use crate::io::error::{IoError, IoResult};
    use crate::io::ImageIoInfo;

    pub(super) fn open(path: &Path) -> IoResult<ImageIoInfo> {
        Err(IoError::unsupported(PLUGIN, path, "built without the ffmpeg feature"))
    }

    pub(super) fn decode(path: &Path, _index: usize) -> IoResult<PixelData> {
        Err(IoError::unsupported(PLUGIN, path, "built without the ffmpeg feature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::error::ErrorKind;

    #[test]
    fn test_probe() {
        assert!(probe(b"\0\0\0\x20ftypisom"));
        assert!(probe(b"RIFF\0\0\0\0AVI LIST"));
        assert!(probe(&[0x1A, 0x45, 0xDF, 0xA3, 0]));
        assert!(!probe(b"SDPX"));
    }

    #[test]
    fn test_read_before_open() {
        let mut loader = VideoLoad::new();
        assert_eq!(loader.read(&FrameInfo::default()).unwrap_err().kind(), ErrorKind::Read);
    }

    /// Test: without decoder support a movie is reported as unsupported
    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_unsupported_without_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mov");
        std::fs::write(&path, b"\0\0\0\x20ftypqt  ").unwrap();
        let err = VideoLoad::new().open(&FileInfo::new(&path)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.plugin(), PLUGIN);
    }
}
