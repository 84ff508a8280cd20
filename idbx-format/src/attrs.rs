//! Well-known attribute names and flags of IDB directives.
//!
//! Attributes are written as `name(value ...)` on a directive line. Flags are
//! bare positional words after the path.

// Conditional installation
/// Machine constraints, `BOARD=VALUE`, `BOARD!=VALUE` or a bare `VALUE`
pub const MACH: &str = "mach";

// Archive extent
/// Absolute offset of the record in its archive
pub const OFF: &str = "off";
/// Size of the file contents
pub const SIZE: &str = "size";
/// Size of the compressed extent, when the contents are compressed
pub const CMPSIZE: &str = "cmpsize";
/// Legacy BSD `sum` of the file contents
pub const SUM: &str = "sum";

// Links
/// Target of a symlink
pub const SYMVAL: &str = "symval";

/// Directory flag marking a historical deletion; nothing is created.
pub const DELHIST: &str = "delhist";
/// Symlink flag suppressing the link.
pub const NOSHARE: &str = "noshare";
