//! Decoder for the Unix `compress` (`.Z`) format.
//!
//! The stream is a three-byte header followed by LZW codes packed LSB-first.
//! Codes start nine bits wide and grow by one bit whenever the dictionary
//! outgrows the current width, up to the maximum from the header. The encoder
//! writes codes in groups of eight, so every width change (and every CLEAR)
//! skips to the end of the current group.

use super::CodecError;
use super::constants::*;

struct BitReader<'a> {
    data: &'a [u8],
    /// Position in bits.
    pos: usize,
    /// Start of the current code group, in bits.
    group_start: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            pos: 0,
            group_start: 0,
        }
    }

    fn total_bits(&self) -> usize {
        self.data.len() * 8
    }

    fn read(&mut self, width: u32) -> Option<u32> {
        if self.pos + width as usize > self.total_bits() {
            return None;
        }

        let index = self.pos / 8;
        let byte = |i: usize| self.data.get(index + i).copied().map_or(0, u32::from);
        let window = byte(0) | byte(1) << 8 | byte(2) << 16;
        let code = (window >> (self.pos % 8)) & ((1 << width) - 1);

        self.pos += width as usize;
        Some(code)
    }

    /// Skips to the end of the current group of eight codes.
    fn realign(&mut self, width: u32) {
        let group = width as usize * 8;
        let used = self.pos - self.group_start;
        self.pos = self.group_start + used.div_ceil(group) * group;
        self.group_start = self.pos;
    }
}

fn max_code(width: u32, max_width: u32) -> u32 {
    if width == max_width {
        1 << max_width
    } else {
        (1 << width) - 1
    }
}

/// Decompresses a complete `.Z` stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.len() < HEADER_LEN || data[..2] != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let flags = data[2];
    let max_width = u32::from(flags & MAX_BITS_MASK);
    if !(INIT_BITS..=MAX_BITS).contains(&max_width) {
        return Err(CodecError::UnsupportedWidth(max_width));
    }
    let block_mode = flags & BLOCK_MODE != 0;
    let table_size = 1u32 << max_width;

    let mut prefix = vec![0u16; table_size as usize];
    let mut suffix: Vec<u8> = (0..table_size).map(|c| c as u8).collect();
    let mut stack = Vec::with_capacity(table_size as usize);

    let mut reader = BitReader::new(&data[HEADER_LEN..]);
    let mut width = INIT_BITS;
    let mut limit = max_code(width, max_width);
    let mut free = if block_mode { FIRST } else { CLEAR };
    let mut old: Option<u32> = None;
    let mut finchar = 0u8;
    let mut out = Vec::with_capacity(data.len() * 3);

    loop {
        if free > limit && width < max_width {
            reader.realign(width);
            width += 1;
            limit = max_code(width, max_width);
            continue;
        }

        let position = reader.pos;
        let Some(code) = reader.read(width) else {
            break;
        };

        let Some(previous) = old else {
            if code >= CLEAR {
                return Err(CodecError::InvalidCode { code, position });
            }
            finchar = code as u8;
            out.push(finchar);
            old = Some(code);
            continue;
        };

        if block_mode && code == CLEAR {
            free = CLEAR;
            reader.realign(width);
            width = INIT_BITS;
            limit = max_code(width, max_width);
            continue;
        }

        let mut current = code;
        if current >= free {
            if current > free {
                return Err(CodecError::InvalidCode { code, position });
            }
            // KwKwK: the code being defined right now.
            stack.push(finchar);
            current = previous;
        }

        while current >= CLEAR {
            stack.push(suffix[current as usize]);
            current = u32::from(prefix[current as usize]);
        }
        finchar = suffix[current as usize];
        stack.push(finchar);
        out.extend(stack.drain(..).rev());

        if free < table_size {
            prefix[free as usize] = previous as u16;
            suffix[free as usize] = finchar;
            free += 1;
        }
        old = Some(code);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_byte() {
        // The second code is the KwKwK case.
        let data = [0x1f, 0x9d, 0x90, 0x61, 0x02, 0x02];
        assert_eq!(decompress(&data).unwrap(), b"aaa");
    }

    #[test]
    fn two_literals() {
        let data = [0x1f, 0x9d, 0x90, 0x61, 0xc4, 0x00];
        assert_eq!(decompress(&data).unwrap(), b"ab");
    }

    #[test]
    fn header_only() {
        assert_eq!(decompress(&[0x1f, 0x9d, 0x90]).unwrap(), b"");
    }

    #[test]
    fn width_changes_and_clears() {
        let data = include_bytes!("../../tests/fixtures/lines.txt.Z");
        let out = decompress(data).unwrap();

        let expected: String = (0..3000)
            .map(|i| {
                format!(
                    "line {i}: the quick brown fox jumps over {} lazy dogs\n",
                    i * 7 % 13
                )
            })
            .collect();
        assert_eq!(out.len(), 161_582);
        assert_eq!(out, expected.as_bytes());
    }

    #[test]
    fn bad_magic() {
        assert!(matches!(
            decompress(b"\x1f\x8b\x08\x00"),
            Err(CodecError::BadMagic)
        ));
        assert!(matches!(decompress(b"\x1f"), Err(CodecError::BadMagic)));
    }

    #[test]
    fn unsupported_width() {
        assert!(matches!(
            decompress(&[0x1f, 0x9d, 0x91, 0x00]),
            Err(CodecError::UnsupportedWidth(17))
        ));
        assert!(matches!(
            decompress(&[0x1f, 0x9d, 0x88, 0x00]),
            Err(CodecError::UnsupportedWidth(8))
        ));
    }

    #[test]
    fn first_code_must_be_literal() {
        // Nine-bit code 0x101 as the very first code.
        let data = [0x1f, 0x9d, 0x90, 0x01, 0x01];
        assert!(matches!(
            decompress(&data),
            Err(CodecError::InvalidCode { code: 257, .. })
        ));
    }

    #[test]
    fn code_beyond_dictionary() {
        // 'a' followed by code 300, while only 257 is defined next.
        let code: u32 = 0x61 | 300 << 9;
        let bytes = code.to_le_bytes();
        let data = [0x1f, 0x9d, 0x90, bytes[0], bytes[1], bytes[2]];
        assert!(matches!(
            decompress(&data),
            Err(CodecError::InvalidCode { code: 300, position: 9 })
        ));
    }
}
