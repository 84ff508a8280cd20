//! Typed IDB directives.
//!
//! A directive line looks like
//!
//! ```text
//! f 0755 root sys usr/bin/foo usr/bin/foo eoe.sw.unix sum(123) size(4) off(96)
//! ```
//!
//! The first word is the command, followed for `d`, `f` and `l` by the mode,
//! owner, group and path. The attributes the extractor understands are
//! validated here; everything else lands in [`Attributes::other`].

use std::collections::BTreeMap;

use crate::attrs;
use crate::mach::MachConstraint;
use crate::parse::{Token, TokenizeError, tokenize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("invalid mode `{0}`")]
    InvalidMode(String),

    #[error("attribute `{name}` expects a single value, got {count}")]
    ValueCount { name: &'static str, count: usize },

    #[error("attribute `{name}` has a non-numeric value `{value}`")]
    InvalidNumber { name: &'static str, value: String },
}

/// The common layout of `d`, `f` and `l` directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub mode: u32,
    pub user: String,
    pub group: String,
    /// The path as declared by the package, before sanitization.
    pub path: String,
    /// Positional words after the path.
    pub extra: Vec<String>,
}

impl Entry {
    fn parse(positional: &[&str]) -> Result<Entry, DirectiveError> {
        let field = |index: usize, name: &'static str| {
            positional
                .get(index)
                .copied()
                .ok_or(DirectiveError::MissingField(name))
        };

        let mode = field(0, "mode")?;
        let mode =
            u32::from_str_radix(mode, 8).map_err(|_| DirectiveError::InvalidMode(mode.into()))?;

        Ok(Entry {
            mode,
            user: field(1, "user")?.to_string(),
            group: field(2, "group")?.to_string(),
            path: field(3, "path")?.to_string(),
            extra: positional[4..].iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Returns true if a positional word after the path equals `flag`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.extra.iter().any(|word| word == flag)
    }

    /// Finds the archive a file directive's contents are stored in.
    ///
    /// The first word after the path is the source path. An archive reference
    /// is a word with at least two dots, such as `eoe.sw.unix`. Words after
    /// the source path are searched first; the source path itself is the
    /// fallback.
    pub fn archive_ref(&self) -> Option<ArchiveRef<'_>> {
        let (source, rest) = self.extra.split_first()?;
        rest.iter()
            .chain(std::iter::once(source))
            .find_map(|word| ArchiveRef::parse(word))
    }
}

/// A reference such as `eoe.sw.unix`: archive `eoe.sw`, tag `unix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveRef<'a> {
    pub token: &'a str,
    pub name: &'a str,
    pub tag: &'a str,
}

impl<'a> ArchiveRef<'a> {
    pub fn parse(token: &'a str) -> Option<ArchiveRef<'a>> {
        if token.matches('.').count() < 2 {
            return None;
        }
        let (name, tag) = token.rsplit_once('.')?;
        Some(ArchiveRef { token, name, tag })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Directory(Entry),
    File(Entry),
    Link(Entry),
    Unknown(String),
}

/// Attributes of a directive, with the well-known ones validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub mach: Vec<MachConstraint>,
    pub symval: Option<String>,
    /// Absolute record offset. Negative offsets mean "no offset".
    pub off: Option<u64>,
    pub size: Option<u64>,
    /// Compressed extent size. Zero means the contents are stored raw.
    pub cmpsize: Option<u64>,
    /// Expected checksum. Negative values mean "no checksum".
    pub sum: Option<u32>,
    pub other: BTreeMap<String, Vec<String>>,
}

impl Attributes {
    fn from_raw(raw: BTreeMap<&str, Vec<String>>) -> Result<Attributes, DirectiveError> {
        let mut attributes = Attributes::default();

        for (name, values) in raw {
            match name {
                attrs::MACH => {
                    attributes.mach = values.iter().map(|v| MachConstraint::parse(v)).collect();
                }
                attrs::SYMVAL => attributes.symval = Some(single(attrs::SYMVAL, values)?),
                attrs::OFF => {
                    let off = number(attrs::OFF, values)?;
                    attributes.off = u64::try_from(off).ok();
                }
                attrs::SIZE => {
                    let size = number(attrs::SIZE, values)?;
                    attributes.size = Some(u64::try_from(size).map_err(|_| {
                        DirectiveError::InvalidNumber {
                            name: attrs::SIZE,
                            value: size.to_string(),
                        }
                    })?);
                }
                attrs::CMPSIZE => {
                    let cmpsize = number(attrs::CMPSIZE, values)?;
                    attributes.cmpsize = u64::try_from(cmpsize).ok().filter(|&c| c > 0);
                }
                attrs::SUM => {
                    let sum = number(attrs::SUM, values)?;
                    attributes.sum = u32::try_from(sum).ok();
                }
                _ => {
                    attributes.other.insert(name.to_string(), values);
                }
            }
        }

        Ok(attributes)
    }
}

fn single(name: &'static str, mut values: Vec<String>) -> Result<String, DirectiveError> {
    if values.len() != 1 {
        return Err(DirectiveError::ValueCount {
            name,
            count: values.len(),
        });
    }
    Ok(values.remove(0))
}

fn number(name: &'static str, values: Vec<String>) -> Result<i64, DirectiveError> {
    let value = single(name, values)?;
    value
        .parse()
        .map_err(|_| DirectiveError::InvalidNumber { name, value })
}

/// One parsed line of an IDB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub command: Command,
    pub attributes: Attributes,
    /// Attribute names that appeared more than once. The last value won.
    pub duplicates: Vec<String>,
}

impl Directive {
    /// Parses one line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Directive>, DirectiveError> {
        let mut positional = vec![];
        let mut raw: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        let mut duplicates = vec![];

        for token in tokenize(line)? {
            match token {
                Token::Positional(word) => positional.push(word),
                Token::Attribute { name, values } => {
                    if raw.insert(name, values).is_some() {
                        duplicates.push(name.to_string());
                    }
                }
            }
        }

        let Some((command, rest)) = positional.split_first() else {
            return Ok(None);
        };

        let command = match *command {
            "d" => Command::Directory(Entry::parse(rest)?),
            "f" => Command::File(Entry::parse(rest)?),
            "l" => Command::Link(Entry::parse(rest)?),
            other => Command::Unknown(other.to_string()),
        };

        Ok(Some(Directive {
            command,
            attributes: Attributes::from_raw(raw)?,
            duplicates,
        }))
    }

    pub fn entry(&self) -> Option<&Entry> {
        match &self.command {
            Command::Directory(entry) | Command::File(entry) | Command::Link(entry) => Some(entry),
            Command::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Directive {
        Directive::parse(line).unwrap().unwrap()
    }

    #[test]
    fn file_directive() {
        let d = parse(
            "f 0755 root sys usr/bin/foo usr/bin/foo eoe.sw.unix sum(49283) size(4) off(96) cmpsize(0)",
        );
        let Command::File(entry) = &d.command else {
            panic!("expected file, got {:?}", d.command);
        };
        assert_eq!(entry.mode, 0o755);
        assert_eq!(entry.user, "root");
        assert_eq!(entry.group, "sys");
        assert_eq!(entry.path, "usr/bin/foo");
        assert_eq!(entry.extra, ["usr/bin/foo", "eoe.sw.unix"]);
        assert_eq!(d.attributes.sum, Some(49283));
        assert_eq!(d.attributes.size, Some(4));
        assert_eq!(d.attributes.off, Some(96));
        assert_eq!(d.attributes.cmpsize, None);
        assert!(d.duplicates.is_empty());
    }

    #[test]
    fn link_directive() {
        let d = parse("l 0777 root sys usr/lib/libc.so usr/lib/libc.so eoe.sw.unix symval(libc.so.1)");
        assert!(matches!(d.command, Command::Link(_)));
        assert_eq!(d.attributes.symval.as_deref(), Some("libc.so.1"));
    }

    #[test]
    fn hash_in_values() {
        let d = parse("l 0777 root sys usr/x usr/x eoe.sw.unix symval(#target)");
        assert_eq!(d.attributes.symval.as_deref(), Some("#target"));

        let d = parse("f 0644 root sys a a x.y.z size(1) postop(\"a\" #c)");
        assert_eq!(d.attributes.other["postop"], ["a", "#c"]);
    }

    #[test]
    fn unknown_command() {
        let d = parse("x something else");
        assert_eq!(d.command, Command::Unknown("x".into()));
        assert!(d.entry().is_none());
    }

    #[test]
    fn blank_line() {
        assert_eq!(Directive::parse("   ").unwrap(), None);
    }

    #[test]
    fn attributes_only_line() {
        assert_eq!(Directive::parse("size(4)").unwrap(), None);
    }

    #[test]
    fn negative_offset_and_sum() {
        let d = parse("f 0644 root sys a a x.y.z off(-1) sum(-1) size(0)");
        assert_eq!(d.attributes.off, None);
        assert_eq!(d.attributes.sum, None);
    }

    #[test]
    fn duplicate_attribute_last_wins() {
        // Compatibility corner case: the later value replaces the earlier one.
        let d = parse("f 0644 root sys a a x.y.z size(1) size(2)");
        assert_eq!(d.attributes.size, Some(2));
        assert_eq!(d.duplicates, ["size"]);
    }

    #[test]
    fn unknown_attributes_are_kept() {
        let d = parse("f 0644 root sys a a x.y.z size(1) config(suggest) postop(\"rm -f /tmp/x\")");
        assert_eq!(d.attributes.other["config"], ["suggest"]);
        assert_eq!(d.attributes.other["postop"], ["rm -f /tmp/x"]);
    }

    #[test]
    fn mach_values() {
        let d = parse("d 0755 root sys usr mach(CPUBOARD=IP22 GFXBOARD!=LIGHT)");
        assert_eq!(d.attributes.mach.len(), 2);
        assert!(d.attributes.mach[1].negated);
    }

    #[test]
    fn missing_fields() {
        assert_eq!(
            Directive::parse("d 0755 root sys").unwrap_err(),
            DirectiveError::MissingField("path")
        );
        assert_eq!(
            Directive::parse("f").unwrap_err(),
            DirectiveError::MissingField("mode")
        );
    }

    #[test]
    fn invalid_mode() {
        assert_eq!(
            Directive::parse("d 0789 root sys usr").unwrap_err(),
            DirectiveError::InvalidMode("0789".into())
        );
    }

    #[test]
    fn bad_numbers() {
        assert!(matches!(
            Directive::parse("f 0644 root sys a a x.y.z size(four)").unwrap_err(),
            DirectiveError::InvalidNumber { name: "size", .. }
        ));
        assert!(matches!(
            Directive::parse("f 0644 root sys a a x.y.z size(1 2)").unwrap_err(),
            DirectiveError::ValueCount { name: "size", count: 2 }
        ));
        assert!(matches!(
            Directive::parse("f 0644 root sys a a x.y.z size(-4)").unwrap_err(),
            DirectiveError::InvalidNumber { name: "size", .. }
        ));
    }

    #[test]
    fn flags() {
        let d = parse("d 0755 root sys usr/lib delhist");
        assert!(d.entry().unwrap().has_flag(attrs::DELHIST));
        assert!(!d.entry().unwrap().has_flag(attrs::NOSHARE));
    }

    #[test]
    fn archive_ref_after_source_path() {
        // Compatibility corner case: the source path has two dots too, the
        // subsystem name after it is the archive reference.
        let d = parse("f 0755 root sys usr/lib/libc.so.1 usr/lib/libc.so.1 eoe.sw.lib size(1)");
        let reference = d.entry().unwrap().archive_ref().unwrap();
        assert_eq!(reference.name, "eoe.sw");
        assert_eq!(reference.tag, "lib");
        assert_eq!(reference.token, "eoe.sw.lib");
    }

    #[test]
    fn archive_ref_falls_back_to_source_position() {
        let d = parse("f 0644 root sys usr/bin/foo pkg.1.tar off(0) size(4)");
        let reference = d.entry().unwrap().archive_ref().unwrap();
        assert_eq!(reference.name, "pkg.1");
        assert_eq!(reference.tag, "tar");
    }

    #[test]
    fn archive_ref_missing() {
        let d = parse("f 0644 root sys usr/bin/foo usr/bin/foo nodots size(4)");
        assert!(d.entry().unwrap().archive_ref().is_none());
        let d = parse("f 0644 root sys usr/bin/foo size(4)");
        assert!(d.entry().unwrap().archive_ref().is_none());
    }
}
