use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;

use super::{Codec, CodecError};

const UNCOMPRESS: &str = "uncompress";
const SUM: &str = "sum";

/// [`Codec`] backed by the system `uncompress` and `sum` tools.
///
/// Each tool is looked up in `PATH` the first time it is needed, so a
/// package without compressed or checksummed records never requires it.
#[derive(Debug, Clone)]
pub struct ExternalCodec {
    uncompress: Tool,
    sum: Tool,
}

impl ExternalCodec {
    pub fn new() -> ExternalCodec {
        ExternalCodec {
            uncompress: Tool::search(UNCOMPRESS),
            sum: Tool::search(SUM),
        }
    }

    pub fn with_tools(uncompress: impl Into<PathBuf>, sum: impl Into<PathBuf>) -> ExternalCodec {
        ExternalCodec {
            uncompress: Tool::at(UNCOMPRESS, uncompress.into()),
            sum: Tool::at(SUM, sum.into()),
        }
    }
}

impl Default for ExternalCodec {
    fn default() -> Self {
        ExternalCodec::new()
    }
}

#[derive(Debug, Clone)]
struct Tool {
    name: &'static str,
    program: OnceLock<Result<PathBuf, which::Error>>,
}

impl Tool {
    fn search(name: &'static str) -> Tool {
        Tool {
            name,
            program: OnceLock::new(),
        }
    }

    fn at(name: &'static str, program: PathBuf) -> Tool {
        Tool {
            name,
            program: OnceLock::from(Ok(program)),
        }
    }

    fn program(&self) -> Result<&Path, CodecError> {
        let found = self.program.get_or_init(|| {
            let found = which::which(self.name);
            tracing::debug!(tool = self.name, ?found, "tool lookup");
            found
        });
        match found {
            Ok(program) => Ok(program.as_path()),
            Err(source) => Err(CodecError::ToolNotFound {
                tool: self.name,
                source: *source,
            }),
        }
    }

    fn run(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        pipe(self.program()?, self.name, input)
    }
}

/// Runs `program` with `input` on stdin and returns its stdout.
fn pipe(program: &Path, tool: &'static str, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CodecError::Tool { tool, source })?;

    let stdin = child.stdin.take();
    let (written, output) = thread::scope(|scope| {
        // Feeds stdin while stdout is drained, so large extents cannot
        // deadlock on full pipes. Dropping the handle closes the pipe.
        let writer = scope.spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(input),
            None => Ok(()),
        });
        let output = child.wait_with_output();
        (writer.join(), output)
    });

    let output = output.map_err(|source| CodecError::Tool { tool, source })?;
    if !output.status.success() {
        return Err(CodecError::ToolFailed {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    match written {
        Ok(Ok(())) => Ok(output.stdout),
        Ok(Err(source)) => Err(CodecError::Tool { tool, source }),
        Err(_) => Err(CodecError::Tool {
            tool,
            source: std::io::Error::other("stdin writer panicked"),
        }),
    }
}

/// Takes the checksum from the first word of `sum`'s output.
fn parse_sum(output: &[u8]) -> Result<u32, CodecError> {
    let text = String::from_utf8_lossy(output);
    text.split_whitespace()
        .next()
        .and_then(|word| word.parse().ok())
        .ok_or_else(|| CodecError::ChecksumOutput(text.trim().to_string()))
}

impl Codec for ExternalCodec {
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.uncompress.run(data)
    }

    fn checksum(&self, data: &[u8]) -> Result<u32, CodecError> {
        parse_sum(&self.sum.run(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_output() {
        assert_eq!(parse_sum(b"03762     1\n").unwrap(), 3762);
        assert_eq!(parse_sum(b"49283 1 -\n").unwrap(), 49283);
        assert!(matches!(
            parse_sum(b"sum: error\n"),
            Err(CodecError::ChecksumOutput(_))
        ));
        assert!(matches!(parse_sum(b""), Err(CodecError::ChecksumOutput(_))));
    }

    #[cfg(unix)]
    #[test]
    fn pipes_through_a_tool() {
        let Ok(cat) = which::which("cat") else {
            return;
        };
        let codec = ExternalCodec::with_tools(&cat, &cat);
        assert_eq!(codec.decompress(b"payload").unwrap(), b"payload");
        assert_eq!(codec.checksum(b"  42 extra").unwrap(), 42);
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool() {
        let Ok(false_tool) = which::which("false") else {
            return;
        };
        let codec = ExternalCodec::with_tools(&false_tool, &false_tool);
        assert!(matches!(
            codec.decompress(b"x"),
            Err(CodecError::ToolFailed { tool: "uncompress", .. })
        ));
    }

    #[test]
    fn lookup_is_deferred_and_cached() {
        let tool = Tool::search("idbx-no-such-tool");
        assert!(tool.program.get().is_none());
        for _ in 0..2 {
            assert!(matches!(
                tool.run(b"x"),
                Err(CodecError::ToolNotFound { tool: "idbx-no-such-tool", .. })
            ));
        }
        assert!(tool.program.get().is_some());
    }

    #[test]
    fn missing_program() {
        let codec = ExternalCodec::with_tools("/nonexistent/uncompress", "/nonexistent/sum");
        assert!(matches!(
            codec.checksum(b"x"),
            Err(CodecError::Tool { tool: "sum", .. })
        ));
    }
}
