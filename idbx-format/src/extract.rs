//! Applies IDB lines to an output root.
//!
//! Each line is parsed, checked against the active machine bindings and
//! dispatched to the directory, file or link handler. Problems confined to
//! one line are logged and counted in [`ExtractStats`]; an [`ExtractError`]
//! stops the run.

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::archive::{self, ArchiveCache, RecordRequest};
use crate::attrs;
use crate::compression::Codec;
use crate::directive::{Command, Directive, Entry};
use crate::error::{ExtractError, Failure, SkipError};
use crate::fs::Materializer;
use crate::mach::{Filter, MachineSet, SkipReason};
use crate::path::{SanitizedPath, sanitize};

/// Options for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Bits OR'd into the mode of every extracted file.
    pub force_file_mode: u32,
    /// Bits OR'd into the mode of every created directory.
    pub force_dir_mode: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            force_file_mode: 0o600,
            force_dir_mode: 0o700,
        }
    }
}

/// Statistics from one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Number of IDB lines processed.
    pub lines: u64,
    /// Number of directories created.
    pub dirs_created: u64,
    /// Number of files extracted.
    pub files_extracted: u64,
    /// Number of symlinks created.
    pub links_created: u64,
    /// Total bytes written to disk.
    pub bytes_written: u64,
    /// Directives skipped by the mach filter, `delhist` or `noshare`.
    pub filtered: u64,
    /// Directives abandoned because of a recoverable error.
    pub errors: u64,
    /// Files written despite a checksum mismatch.
    pub checksum_mismatches: u64,
}

/// Progress updates, one per processed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractProgress {
    Started { total_lines: u64 },
    Processed { line: u64 },
    Finished,
}

/// Displays an error followed by its sources.
struct Chain<'a>(&'a dyn Error);

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

/// Applies IDB lines to an output root, one at a time.
pub struct Extractor<'a> {
    machines: &'a MachineSet,
    codec: &'a dyn Codec,
    options: ExtractOptions,
    archives: ArchiveCache,
    materializer: Materializer,
    stats: ExtractStats,
}

impl<'a> Extractor<'a> {
    /// Creates the output root if needed. Archives are looked up in
    /// `archive_dir`.
    pub fn new(
        root: &Path,
        archive_dir: impl Into<PathBuf>,
        machines: &'a MachineSet,
        codec: &'a dyn Codec,
        options: ExtractOptions,
    ) -> Result<Extractor<'a>, ExtractError> {
        Ok(Extractor {
            machines,
            codec,
            options,
            archives: ArchiveCache::new(archive_dir),
            materializer: Materializer::new(root)?,
            stats: ExtractStats::default(),
        })
    }

    /// The canonical output root.
    pub fn root(&self) -> &Path {
        self.materializer.root()
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    /// Processes every line in order and returns the final statistics.
    ///
    /// Recoverable problems are logged and counted; the first fatal one stops
    /// the run.
    pub fn run(
        mut self,
        lines: &[String],
        mut progress: Option<&mut dyn FnMut(ExtractProgress)>,
    ) -> Result<ExtractStats, ExtractError> {
        let total = lines.len() as u64;
        if let Some(p) = progress.as_deref_mut() {
            p(ExtractProgress::Started { total_lines: total });
        }

        for (index, line) in lines.iter().enumerate() {
            let n = index as u64 + 1;
            let span = tracing::info_span!("line", n, of = total, path = tracing::field::Empty);
            let _guard = span.enter();

            self.process_line(line)?;

            if let Some(p) = progress.as_deref_mut() {
                p(ExtractProgress::Processed { line: n });
            }
        }

        if let Some(p) = progress.as_deref_mut() {
            p(ExtractProgress::Finished);
        }
        Ok(self.stats)
    }

    /// Processes a single line.
    pub fn process_line(&mut self, line: &str) -> Result<(), ExtractError> {
        self.stats.lines += 1;

        match self.apply(line) {
            Ok(()) => Ok(()),
            Err(Failure::Fatal(error)) => Err(error),
            Err(Failure::Skip(skip)) => {
                self.stats.errors += 1;
                match skip {
                    SkipError::Malformed(_) | SkipError::UnknownCommand(_) => {
                        warn!("{}", Chain(&skip))
                    }
                    _ => error!("{}", Chain(&skip)),
                }
                Ok(())
            }
        }
    }

    fn apply(&mut self, line: &str) -> Result<(), Failure> {
        let Some(directive) = Directive::parse(line)? else {
            debug!("blank line");
            return Ok(());
        };

        for name in &directive.duplicates {
            warn!("duplicate attribute: {name}");
        }

        if let Some(entry) = directive.entry() {
            tracing::Span::current().record("path", entry.path.as_str());
        }

        let applies = match self.machines.evaluate(&directive.attributes.mach) {
            Filter::Apply => true,
            Filter::Skip(reason @ SkipReason::UnknownBoard { .. }) => {
                warn!("{reason}");
                false
            }
            Filter::Skip(reason) => {
                debug!("skipped due to {reason}");
                false
            }
        };

        // File records are still read when filtered so that sequential
        // records stay aligned.
        if !applies && !matches!(directive.command, Command::File(_)) {
            self.stats.filtered += 1;
            return Ok(());
        }

        match &directive.command {
            Command::Unknown(command) => Err(SkipError::UnknownCommand(command.clone()).into()),
            Command::Directory(entry) => {
                let path = self.sanitize(entry);
                self.directory(entry, &path)
            }
            Command::File(entry) => {
                let path = self.sanitize(entry);
                self.file(&directive, entry, &path, applies)
            }
            Command::Link(entry) => {
                let path = self.sanitize(entry);
                self.link(&directive, entry, &path)
            }
        }
    }

    fn sanitize(&self, entry: &Entry) -> SanitizedPath {
        let sanitized = sanitize(&entry.path);
        if sanitized.dropped_parents > 0 {
            warn!("path starts with `..`");
        }
        sanitized.path
    }

    fn directory(&mut self, entry: &Entry, path: &SanitizedPath) -> Result<(), Failure> {
        if entry.has_flag(attrs::DELHIST) {
            self.materializer.prepare(path)?;
            self.stats.filtered += 1;
            return Ok(());
        }

        info!("creating directory `{path}`");
        let mode = entry.mode | self.options.force_dir_mode;
        if self.materializer.create_dir(path, mode)? {
            self.stats.dirs_created += 1;
        }
        Ok(())
    }

    fn file(
        &mut self,
        directive: &Directive,
        entry: &Entry,
        path: &SanitizedPath,
        applies: bool,
    ) -> Result<(), Failure> {
        if applies {
            info!("extracting `{path}`");
        }

        let attributes = &directive.attributes;
        let reference = entry.archive_ref().ok_or(SkipError::NoArchive)?;
        let size = attributes
            .size
            .ok_or(SkipError::MissingAttribute(attrs::SIZE))?;
        let (extent, compressed) = match attributes.cmpsize {
            Some(cmpsize) => (cmpsize, true),
            None => (size, false),
        };

        let archive = self.archives.handle(&reference)?;
        let raw = archive.read_record(&RecordRequest {
            path: entry.path.as_bytes(),
            offset: attributes.off,
            extent,
        })?;

        if !applies {
            self.stats.filtered += 1;
            return Ok(());
        }

        let content: Cow<'_, [u8]> = if compressed {
            Cow::Owned(archive::decompress_extent(self.codec, &raw, size)?)
        } else {
            Cow::Borrowed(&raw)
        };

        if let Some(expected) = attributes.sum {
            match self.codec.checksum(&content) {
                Ok(actual) if actual != expected => {
                    self.stats.checksum_mismatches += 1;
                    warn!("checksum mismatch: got {actual} expected {expected}");
                    match self.codec.checksum(&raw) {
                        Ok(stored) => debug!(stored, ?attributes, "checksum of stored extent"),
                        Err(e) => debug!("checksum of stored extent failed: {}", Chain(&e)),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("computing checksum failed: {}", Chain(&e)),
            }
        }

        let mode = entry.mode | self.options.force_file_mode;
        self.materializer.write_file(path, &content, mode)?;
        self.stats.files_extracted += 1;
        self.stats.bytes_written += content.len() as u64;
        Ok(())
    }

    fn link(&mut self, directive: &Directive, entry: &Entry, path: &SanitizedPath) -> Result<(), Failure> {
        if entry.has_flag(attrs::NOSHARE) {
            self.stats.filtered += 1;
            return Ok(());
        }

        let symval = directive
            .attributes
            .symval
            .as_deref()
            .ok_or(SkipError::MissingAttribute(attrs::SYMVAL))?;
        let target = self.materializer.link_target(symval);

        info!("creating symlink `{path}` -> `{}`", target.display());
        if self.materializer.create_symlink(path, &target)? {
            self.stats.links_created += 1;
        }
        Ok(())
    }
}

/// Reads all lines of an IDB. Invalid UTF-8 is replaced rather than
/// rejected.
pub fn read_lines<R: BufRead>(mut reader: R) -> io::Result<Vec<String>> {
    let mut lines = vec![];
    let mut buf = vec![];
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(lines)
}

/// Extracts the package described by `idb` into `root`.
///
/// Archives are looked up next to the IDB file.
pub fn extract_idb(
    idb: &Path,
    root: &Path,
    machines: &MachineSet,
    codec: &dyn Codec,
    options: ExtractOptions,
    progress: Option<&mut dyn FnMut(ExtractProgress)>,
) -> Result<ExtractStats, ExtractError> {
    let file = File::open(idb).map_err(|e| ExtractError::ReadIdb(e, idb.to_path_buf()))?;
    let lines =
        read_lines(BufReader::new(file)).map_err(|e| ExtractError::ReadIdb(e, idb.to_path_buf()))?;

    let archive_dir = match idb.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Extractor::new(root, archive_dir, machines, codec, options)?.run(&lines, progress)
}
