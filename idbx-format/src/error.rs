use std::io;
use std::path::PathBuf;

use crate::archive::ArchiveError;
use crate::directive::DirectiveError;

/// A condition that aborts the whole extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Reading IDB failed. Path: '{}'", .1.display())]
    ReadIdb(#[source] io::Error, PathBuf),

    #[error("Creating output root failed. Path: '{}'", .1.display())]
    CreateRoot(#[source] io::Error, PathBuf),

    #[error("Creating directory failed. Path: '{}'", .1.display())]
    CreateDirFailed(#[source] io::Error, PathBuf),

    #[error("Path escapes the output root. Path: '{}' -> '{}'", .path.display(), .resolved.display())]
    Containment { path: PathBuf, resolved: PathBuf },

    #[error("Resolving path failed. Path: '{}'", .1.display())]
    ResolveFailed(#[source] io::Error, PathBuf),

    #[error(
        "Conflicting link. Path: '{}' resolves to '{}', expected '{}'",
        .path.display(),
        .existing.display(),
        .intended.display()
    )]
    LinkConflict {
        path: PathBuf,
        existing: PathBuf,
        intended: PathBuf,
    },
}

/// A condition that abandons one directive. The run continues with the
/// next line.
#[derive(Debug, thiserror::Error)]
pub enum SkipError {
    #[error("malformed line")]
    Malformed(#[from] DirectiveError),

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("no archive file specified")]
    NoArchive,

    #[error("missing `{0}` attribute")]
    MissingAttribute(&'static str),

    #[error("path resolves to the output root")]
    EmptyPath,

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Creating directory failed. Path: '{}'", .1.display())]
    CreateDirFailed(#[source] io::Error, PathBuf),

    #[error("Not a directory. Path: '{}'", .0.display())]
    NotADirectory(PathBuf),

    #[error("Creating file failed. Path: '{}'", .1.display())]
    WriteFailed(#[source] io::Error, PathBuf),

    #[error("Creating link failed. Path: '{}' -> '{}'", .1.display(), .2.display())]
    CreateLinkFailed(#[source] io::Error, PathBuf, PathBuf),
}

/// Either kind of failure, as returned by the per-directive steps.
#[derive(Debug)]
pub(crate) enum Failure {
    Fatal(ExtractError),
    Skip(SkipError),
}

impl From<ExtractError> for Failure {
    fn from(error: ExtractError) -> Self {
        Failure::Fatal(error)
    }
}

impl From<SkipError> for Failure {
    fn from(error: SkipError) -> Self {
        Failure::Skip(error)
    }
}

impl From<ArchiveError> for Failure {
    fn from(error: ArchiveError) -> Self {
        Failure::Skip(SkipError::Archive(error))
    }
}

impl From<DirectiveError> for Failure {
    fn from(error: DirectiveError) -> Self {
        Failure::Skip(SkipError::Malformed(error))
    }
}
