//! File descriptor for a single file or one member of a numbered sequence.
//!
//! A path is split as `<dir>/<base><number><extension>`:
//! `/shots/shot.0001.pic` → dir `/shots`, base `shot.`, number `0001`, extension `.pic`.
//! When the descriptor is a sequence, `file_name(frame)` substitutes the frame
//! number using the sequence pad width.

use std::path::{Path, PathBuf};

use super::sequence::{frame_to_string, string_to_frame, Sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    dir: PathBuf,
    base: String,
    number: String,
    extension: String,
    file_type: FileType,
    sequence: Sequence,
}

impl FileInfo {
    /// Describe a single file. A trailing frame number is parsed but the
    /// descriptor stays `FileType::File` until a sequence is attached.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (stem, extension) = match name.rfind('.') {
            Some(i) if i > 0 => (name[..i].to_string(), name[i..].to_string()),
            _ => (name.clone(), String::new()),
        };
        let (base, number) = split_number(&stem);

        let mut sequence = Sequence::new();
        if !number.is_empty() {
            let (frame, pad) = string_to_frame(&number);
            if frame >= 0 || number.starts_with('-') {
                sequence = Sequence::single(frame, pad);
            }
        }

        Self {
            dir,
            base,
            number,
            extension,
            file_type: FileType::File,
            sequence,
        }
    }

    /// Describe a sequence with an explicit frame list.
    pub fn with_sequence(path: impl AsRef<Path>, sequence: Sequence) -> Self {
        let mut info = Self::new(path);
        info.set_sequence(sequence);
        info
    }

    /// Attach a frame list and mark the descriptor as a sequence.
    pub fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
        self.file_type = FileType::Sequence;
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn is_sequence(&self) -> bool {
        self.file_type == FileType::Sequence
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Extension including the dot, as written.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Lower-case extension without the dot, for codec matching.
    pub fn extension_key(&self) -> String {
        self.extension.trim_start_matches('.').to_ascii_lowercase()
    }

    /// Path as given (number token unchanged).
    pub fn path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", self.base, self.number, self.extension))
    }

    /// Path of one frame.
    ///
    /// For sequences, `-1` means the first frame. Single files always return
    /// their own path.
    pub fn file_name(&self, frame: i64) -> PathBuf {
        if self.file_type != FileType::Sequence || self.sequence.is_empty() {
            return self.path();
        }
        let frame = if frame == -1 { self.sequence.start() } else { frame };
        self.dir.join(format!(
            "{}{}{}",
            self.base,
            frame_to_string(frame, self.sequence.pad),
            self.extension
        ))
    }

    /// `shot.1-10.pic` style label for display.
    pub fn display_name(&self) -> String {
        match self.file_type {
            FileType::File => format!("{}{}{}", self.base, self.number, self.extension),
            FileType::Sequence => {
                format!("{}{}{}", self.base, self.sequence, self.extension)
            }
        }
    }
}

/// Split a trailing frame token (digits, optionally signed) off a file stem.
fn split_number(stem: &str) -> (String, String) {
    let bytes = stem.as_bytes();
    let mut i = bytes.len();
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == bytes.len() {
        return (stem.to_string(), String::new());
    }
    // A '-' directly before the digits is a sign only when it follows a separator.
    if i >= 2 && bytes[i - 1] == b'-' && matches!(bytes[i - 2], b'.' | b'_') {
        i -= 1;
    }
    (stem[..i].to_string(), stem[i..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::sequence::Speed;

    #[test]
    fn test_split_path() {
        let info = FileInfo::new("/shots/shot.0001.pic");
        assert_eq!(info.dir(), Path::new("/shots"));
        assert_eq!(info.base(), "shot.");
        assert_eq!(info.number(), "0001");
        assert_eq!(info.extension(), ".pic");
        assert_eq!(info.extension_key(), "pic");
        assert_eq!(info.file_type(), FileType::File);
        assert_eq!(info.sequence().frames, vec![1]);
        assert_eq!(info.sequence().pad, 4);
        assert_eq!(info.path(), PathBuf::from("/shots/shot.0001.pic"));
    }

    #[test]
    fn test_plain_file() {
        let info = FileInfo::new("lut.LUT");
        assert_eq!(info.number(), "");
        assert_eq!(info.extension_key(), "lut");
        assert!(info.sequence().is_empty());
        assert_eq!(info.file_name(5), PathBuf::from("lut.LUT"));
    }

    #[test]
    fn test_negative_number() {
        let info = FileInfo::new("plate.-005.dpx");
        assert_eq!(info.base(), "plate.");
        assert_eq!(info.number(), "-005");
        assert_eq!(info.sequence().frames, vec![-5]);

        let hyphen = FileInfo::new("take-12.tga");
        assert_eq!(hyphen.base(), "take-");
        assert_eq!(hyphen.number(), "12");
    }

    /// Test: frame substitution uses the sequence pad width
    #[test]
    fn test_sequence_file_names() {
        let seq = Sequence::from_range(1, 3, 4, Speed::default());
        let info = FileInfo::with_sequence("/shots/shot.0001.pic", seq);
        assert!(info.is_sequence());
        assert_eq!(info.file_name(2), PathBuf::from("/shots/shot.0002.pic"));
        assert_eq!(info.file_name(-1), PathBuf::from("/shots/shot.0001.pic"));
        assert_eq!(info.display_name(), "shot.0001-0003.pic");
    }
}
