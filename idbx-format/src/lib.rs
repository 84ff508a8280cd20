//! Reconstructs a filesystem tree from an IDB installation database and the
//! archive files it references.
//!
//! Use [`extract_idb`] to extract a whole package, or build an [`Extractor`]
//! when the lines come from somewhere other than a file.

pub mod archive;
pub mod attrs;
pub mod checksum;
pub mod compression;
pub mod directive;
mod error;
mod extract;
mod fs;
pub mod mach;
pub mod parse;
pub mod path;

pub use archive::{ArchiveCache, ArchiveError, ArchiveHandle, RecordRequest};
pub use checksum::{BsdSum, bsd_sum};
pub use compression::{Codec, CodecError, ExternalCodec, NativeCodec};
pub use directive::{ArchiveRef, Attributes, Command, Directive, DirectiveError, Entry};
pub use error::{ExtractError, SkipError};
pub use extract::{
    ExtractOptions, ExtractProgress, ExtractStats, Extractor, extract_idb, read_lines,
};
pub use mach::{Filter, MachConstraint, MachError, MachineSet, SkipReason};
pub use parse::{Token, TokenizeError, tokenize};
pub use path::{Sanitized, SanitizedPath, sanitize};
