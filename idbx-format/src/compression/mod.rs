//! Decompression and checksum services for archive records.
//!
//! Compressed records use the Unix `compress` format and checksums are the
//! BSD `sum`. Both are reached through the [`Codec`] trait:
//! - [`NativeCodec`] decodes in-process with [`lzw::decompress`] and
//!   [`BsdSum`](crate::checksum::BsdSum)
//! - [`ExternalCodec`] pipes the bytes through the `uncompress` and `sum`
//!   tools found in `PATH`

use std::io;
use std::process::ExitStatus;

mod external;
pub mod lzw;

pub use self::external::ExternalCodec;

pub mod constants {
    /// Magic bytes of a `compress` stream.
    pub const MAGIC: [u8; 2] = [0x1f, 0x9d];
    /// Magic plus the flags byte.
    pub const HEADER_LEN: usize = 3;
    /// Flags bits holding the maximum code width.
    pub const MAX_BITS_MASK: u8 = 0x1f;
    /// Flags bit enabling the CLEAR code.
    pub const BLOCK_MODE: u8 = 0x80;

    /// Initial code width.
    pub const INIT_BITS: u32 = 9;
    /// Largest code width any `compress` writes.
    pub const MAX_BITS: u32 = 16;
    /// Code that resets the dictionary in block mode.
    pub const CLEAR: u32 = 256;
    /// First dictionary code in block mode.
    pub const FIRST: u32 = 257;
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("not a compressed stream")]
    BadMagic,

    #[error("unsupported maximum code width {0}")]
    UnsupportedWidth(u32),

    #[error("invalid code {code} at bit {position}")]
    InvalidCode { code: u32, position: usize },

    #[error("`{tool}` not found")]
    ToolNotFound {
        tool: &'static str,
        #[source]
        source: which::Error,
    },

    #[error("running `{tool}` failed")]
    Tool {
        tool: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("`{tool}` failed ({status}): {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    #[error("unexpected checksum output `{0}`")]
    ChecksumOutput(String),
}

/// The two opaque services an extraction needs.
pub trait Codec {
    /// Decompresses one complete compressed extent.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Computes the legacy checksum of some content.
    fn checksum(&self, data: &[u8]) -> Result<u32, CodecError>;
}

/// In-process implementation of [`Codec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCodec;

impl Codec for NativeCodec {
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lzw::decompress(data)
    }

    fn checksum(&self, data: &[u8]) -> Result<u32, CodecError> {
        Ok(u32::from(crate::checksum::bsd_sum(data)))
    }
}
