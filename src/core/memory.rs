//! Byte order helpers shared by the file reader/writer and codecs.

use serde::{Deserialize, Serialize};

/// Byte order of multi-byte words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endian {
    /// Most significant byte first.
    Msb,
    /// Least significant byte first.
    Lsb,
}

impl Endian {
    pub fn opposite(self) -> Self {
        match self {
            Endian::Msb => Endian::Lsb,
            Endian::Lsb => Endian::Msb,
        }
    }
}

/// Byte order of the host.
pub const fn native_endian() -> Endian {
    if cfg!(target_endian = "big") {
        Endian::Msb
    } else {
        Endian::Lsb
    }
}

/// Reverse the bytes of every `word_size` word in place.
///
/// Word size 1 (and any trailing partial word) is left untouched.
pub fn convert_endian_in_place(data: &mut [u8], word_size: usize) {
    if word_size <= 1 {
        return;
    }
    for word in data.chunks_exact_mut(word_size) {
        word.reverse();
    }
}

/// Copy `src` into `dst` while reversing every `word_size` word.
///
/// Copies `min(src.len(), dst.len())` bytes.
pub fn convert_endian(src: &[u8], dst: &mut [u8], word_size: usize) {
    let n = src.len().min(dst.len());
    match word_size {
        0 | 1 => dst[..n].copy_from_slice(&src[..n]),
        2 => {
            for (d, s) in dst[..n].chunks_exact_mut(2).zip(src[..n].chunks_exact(2)) {
                d[0] = s[1];
                d[1] = s[0];
            }
        }
        4 => {
            for (d, s) in dst[..n].chunks_exact_mut(4).zip(src[..n].chunks_exact(4)) {
                d[0] = s[3];
                d[1] = s[2];
                d[2] = s[1];
                d[3] = s[0];
            }
        }
        _ => {
            for (d, s) in dst[..n]
                .chunks_exact_mut(word_size)
                .zip(src[..n].chunks_exact(word_size))
            {
                for (i, b) in s.iter().rev().enumerate() {
                    d[i] = *b;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_words() {
        let mut data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        convert_endian_in_place(&mut data, 2);
        assert_eq!(data, [2, 1, 4, 3, 6, 5, 8, 7]);

        let mut data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        convert_endian_in_place(&mut data, 8);
        assert_eq!(data, [8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_copy_swap_matches_in_place() {
        let src: Vec<u8> = (0..32).collect();
        for word in [1usize, 2, 4, 8] {
            let mut copied = vec![0u8; src.len()];
            convert_endian(&src, &mut copied, word);
            let mut in_place = src.clone();
            convert_endian_in_place(&mut in_place, word);
            assert_eq!(copied, in_place, "word size {word}");
        }
    }

    #[test]
    fn test_u32_value_swap() {
        let v: u32 = 0x5380_F634;
        let mut bytes = v.to_le_bytes();
        convert_endian_in_place(&mut bytes, 4);
        assert_eq!(bytes, v.to_be_bytes());
    }
}
