//! Data model shared by codecs, the registry and the frame cache.

pub mod attrs;
pub mod file_info;
pub mod image;
pub mod pixel;
pub mod pixel_data;
pub mod sequence;

pub use attrs::{tags, AttrValue, Attrs};
pub use file_info::{FileInfo, FileType};
pub use self::image::Image;
pub use pixel::{Pixel, PixelFormat, PixelType};
pub use pixel_data::{Mirror, PixelData, PixelDataInfo, Proxy};
pub use sequence::{Compress, Sequence, Speed};
