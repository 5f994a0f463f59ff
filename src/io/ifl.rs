//! Image file lists (IFL)
//!
//! A text file naming one image per line, relative to the list's directory.
//! An optional trailing count repeats the entry that many frames:
//!
//! ```text
//! # comment
//! plate.0001.dpx
//! hold.tga 3
//! ```
//!
//! Frames are numbered from 0 in list order. Each frame is decoded by
//! whichever codec the registry picks for that entry; lists cannot nest.

use std::path::{Path, PathBuf};

use log::debug;

use crate::core::file_io::{FileIO, FileMode};
use crate::entities::{FileInfo, Image, Sequence, Speed};
use crate::io::error::{IoError, IoResult};
use crate::io::registry::Registry;
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, IoOptions};

pub const PLUGIN: &str = "IFL";
pub const EXTENSIONS: &[&str] = &["ifl"];

/// Upper bound on a single entry's repeat count.
const MAX_REPEAT: usize = 10_000;

/// Parse the list, one path per frame.
fn read_list(path: &Path, options: &IoOptions) -> IoResult<Vec<PathBuf>> {
    let mut io = FileIO::new();
    io.open_with(path, FileMode::Read, options.read_backend)?;
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut entries = Vec::new();
    while let Some(line) = io.get_line()? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // A count is only recognized after whitespace, so names with spaces survive.
        let (name, repeat) = match line.rsplit_once(char::is_whitespace) {
            Some((name, count)) => match count.parse::<usize>() {
                Ok(n) => (name.trim_end(), n),
                Err(_) => (line, 1),
            },
            None => (line, 1),
        };
        if repeat == 0 || repeat > MAX_REPEAT {
            return Err(IoError::read(PLUGIN, path, format!("bad repeat count in \"{line}\"")));
        }
        let entry = dir.join(name);
        let nested = entry
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
        if nested {
            return Err(IoError::unsupported(PLUGIN, path, format!("nested list \"{name}\"")));
        }
        entries.extend(std::iter::repeat_n(entry, repeat));
    }
    if entries.is_empty() {
        return Err(IoError::read(PLUGIN, path, "empty file list"));
    }
    Ok(entries)
}

/// IFL loader
#[derive(Debug, Default)]
pub struct IflLoad {
    options: IoOptions,
    entries: Vec<PathBuf>,
    file: Option<FileInfo>,
}

impl IflLoad {
    pub fn new(options: IoOptions) -> Self {
        Self { options, entries: Vec::new(), file: None }
    }

    fn read_frame(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::read(PLUGIN, "", "loader not open"))?;
        let index = frame.frame.max(0) as usize;
        let entry = self.entries.get(index).ok_or_else(|| {
            IoError::read(
                PLUGIN,
                file.path(),
                format!("frame {} out of range ({} frames)", frame.frame, self.entries.len()),
            )
        })?;

        let registry = Registry::new(self.options.clone());
        let (mut loader, _) = registry.load(&FileInfo::new(entry))?;
        let image = loader.read(&FrameInfo { frame: -1, ..*frame });
        loader.close()?;
        image
    }
}

impl ImageLoad for IflLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.path();
        let entries = read_list(&path, &self.options)?;

        let registry = Registry::new(self.options.clone());
        let (mut loader, first) = registry.load(&FileInfo::new(&entries[0]))?;
        loader.close()?;

        let mut info = ImageIoInfo { file_name: path.clone(), ..first };
        info.sequence = Sequence::from_range(0, entries.len() as i64 - 1, 0, Speed::default());
        debug!("IFL opened {} ({} frames)", path.display(), entries.len());

        self.entries = entries;
        self.file = Some(file.clone());
        Ok(info)
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        self.read_frame(frame)
    }

    fn close(&mut self) -> IoResult<()> {
        self.entries.clear();
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Pixel, PixelData, PixelDataInfo};
    use crate::io::error::ErrorKind;
    use crate::io::ImageSave;

    fn write_ppm(path: &Path, value: u8) {
        let info = PixelDataInfo::new(2, 2, Pixel::L_U8);
        let pixels = PixelData::from_bytes(info.clone(), vec![value; 4]).unwrap();
        let registry = Registry::default();
        let mut saver = registry.save(&FileInfo::new(path), &ImageIoInfo::new(info)).unwrap();
        saver.write(&Image::new(pixels), &FrameInfo::default()).unwrap();
        saver.close().unwrap();
    }

    /// Test: list entries with repeat counts become consecutive frames
    #[test]
    fn test_list_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_ppm(&dir.path().join("a.pgm"), 10);
        write_ppm(&dir.path().join("b.pgm"), 200);
        let list = dir.path().join("shot.ifl");
        std::fs::write(&list, "# plates\na.pgm\n\nb.pgm 2\n").unwrap();

        let mut loader = IflLoad::new(IoOptions::default());
        let info = loader.open(&FileInfo::new(&list)).unwrap();
        assert_eq!(info.sequence.frames, vec![0, 1, 2]);
        assert_eq!(info.info().pixel, Pixel::L_U8);
        assert_eq!(info.file_name, list);

        let first = loader.read(&FrameInfo::new(0)).unwrap();
        assert_eq!(first.pixels.data(), &[10u8; 4]);
        let last = loader.read(&FrameInfo::new(2)).unwrap();
        assert_eq!(last.pixels.data(), &[200u8; 4]);
        assert_eq!(loader.read(&FrameInfo::new(3)).unwrap_err().kind(), ErrorKind::Read);
    }

    #[test]
    fn test_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("bad.ifl");

        std::fs::write(&list, "# nothing\n").unwrap();
        let mut loader = IflLoad::new(IoOptions::default());
        assert_eq!(loader.open(&FileInfo::new(&list)).unwrap_err().kind(), ErrorKind::Read);

        std::fs::write(&list, "other.ifl\n").unwrap();
        assert_eq!(loader.open(&FileInfo::new(&list)).unwrap_err().kind(), ErrorKind::Unsupported);

        std::fs::write(&list, "missing.pgm\n").unwrap();
        assert_eq!(loader.open(&FileInfo::new(&list)).unwrap_err().kind(), ErrorKind::Open);
    }
}
