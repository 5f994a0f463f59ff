//! Error taxonomy for file and codec I/O.
//!
//! Every failure carries the reporting plugin, the offending path and a
//! readable reason. Nothing in the I/O core retries or downgrades these.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type IoResult<T> = Result<T, IoError>;

/// Coarse error category, for callers that branch on the failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Open,
    Unsupported,
    Read,
    Write,
    Seek,
}

/// Errors from the binary reader/writer and codec plugins
#[derive(Error, Debug)]
pub enum IoError {
    /// File could not be opened or created
    #[error("{plugin}: cannot open file \"{}\": {reason}", .path.display())]
    Open {
        plugin: &'static str,
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Signature or header does not match a supported layout
    #[error("{plugin}: unsupported file \"{}\": {reason}", .path.display())]
    Unsupported {
        plugin: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Short read, truncated stream or out-of-bounds access
    #[error("{plugin}: error reading file \"{}\": {reason}", .path.display())]
    Read {
        plugin: &'static str,
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Short write or encoder failure
    #[error("{plugin}: error writing file \"{}\": {reason}", .path.display())]
    Write {
        plugin: &'static str,
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Repositioning outside the file
    #[error("{plugin}: cannot set file position \"{}\": {reason}", .path.display())]
    Seek {
        plugin: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl IoError {
    pub fn open(plugin: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IoError::Open { plugin, path: path.into(), reason: reason.into(), source: None }
    }

    pub fn unsupported(
        plugin: &'static str,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        IoError::Unsupported { plugin, path: path.into(), reason: reason.into() }
    }

    pub fn read(plugin: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IoError::Read { plugin, path: path.into(), reason: reason.into(), source: None }
    }

    pub fn write(plugin: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IoError::Write { plugin, path: path.into(), reason: reason.into(), source: None }
    }

    pub fn seek(plugin: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IoError::Seek { plugin, path: path.into(), reason: reason.into() }
    }

    /// Attach the OS error that caused this failure (ignored for kinds without a source).
    pub fn with_source(mut self, err: std::io::Error) -> Self {
        match &mut self {
            IoError::Open { source, .. }
            | IoError::Read { source, .. }
            | IoError::Write { source, .. } => *source = Some(err),
            IoError::Unsupported { .. } | IoError::Seek { .. } => {}
        }
        self
    }

    /// Report the error under another plugin name, keeping everything else.
    pub fn relabel(mut self, name: &'static str) -> Self {
        match &mut self {
            IoError::Open { plugin, .. }
            | IoError::Unsupported { plugin, .. }
            | IoError::Read { plugin, .. }
            | IoError::Write { plugin, .. }
            | IoError::Seek { plugin, .. } => *plugin = name,
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IoError::Open { .. } => ErrorKind::Open,
            IoError::Unsupported { .. } => ErrorKind::Unsupported,
            IoError::Read { .. } => ErrorKind::Read,
            IoError::Write { .. } => ErrorKind::Write,
            IoError::Seek { .. } => ErrorKind::Seek,
        }
    }

    pub fn plugin(&self) -> &'static str {
        match self {
            IoError::Open { plugin, .. }
            | IoError::Unsupported { plugin, .. }
            | IoError::Read { plugin, .. }
            | IoError::Write { plugin, .. }
            | IoError::Seek { plugin, .. } => plugin,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            IoError::Open { path, .. }
            | IoError::Unsupported { path, .. }
            | IoError::Read { path, .. }
            | IoError::Write { path, .. }
            | IoError::Seek { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_carries_plugin_and_path() {
        let err = IoError::read("PIC", "/tmp/shot.0001.pic", "RLE run past end of data");
        let text = err.to_string();
        assert!(text.contains("PIC"));
        assert!(text.contains("shot.0001.pic"));
        assert!(text.contains("RLE run"));
        assert_eq!(err.kind(), ErrorKind::Read);
    }

    #[test]
    fn test_source_and_relabel() {
        let os = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = IoError::open("FileIO", "a.dpx", "cannot open").with_source(os).relabel("DPX");
        assert_eq!(err.plugin(), "DPX");
        assert_eq!(err.path(), Path::new("a.dpx"));
        assert!(err.source().is_some());
    }
}
