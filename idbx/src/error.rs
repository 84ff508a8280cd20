use idbx_format::{ExtractError, MachError};
use miette::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error("Invalid machine binding")]
    #[diagnostic(help("Bind each board at most once, as BOARD=VALUE or a bare CPUBOARD value"))]
    Mach {
        #[source]
        source: MachError,
    },

    #[error("Cannot extract package")]
    Extract {
        #[source]
        source: ExtractError,
    },
}
