//! Helpers that sit above the codecs: sequence discovery on disk.

pub mod sequences;

pub use sequences::{discover, discover_all, target};
