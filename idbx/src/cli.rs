use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::util::parse_octal;

#[derive(Debug, Parser)]
#[command(
    name = "idbx",
    about = "Extract files from an IDB software distribution package.",
    version
)]
pub struct Cli {
    /// Output root; created if missing
    #[arg(short = 'r', long = "rbase", value_name = "DIR")]
    pub root: PathBuf,

    /// IDB file describing the package; archives are looked up next to it
    #[arg(short = 'i', long = "idb", value_name = "FILE")]
    pub idb: PathBuf,

    /// Machine binding, as BOARD=VALUE or bare VALUE for CPUBOARD (repeatable)
    #[arg(short = 'm', long = "mach", value_name = "BINDING")]
    pub mach: Vec<String>,

    /// Show a progress bar
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Octal permission bits OR-ed into every extracted file
    #[arg(short = 'M', long, value_name = "MODE", default_value = "0600", value_parser = parse_octal)]
    pub force_mode: u32,

    /// Octal permission bits OR-ed into every created directory
    #[arg(short = 'F', long, value_name = "MODE", default_value = "0700", value_parser = parse_octal)]
    pub force_dir_mode: u32,

    /// Decompression and checksum implementation
    #[arg(long, value_enum, default_value_t = CodecChoice::External)]
    pub codec: CodecChoice,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecChoice {
    /// Run the system `uncompress` and `sum` tools
    External,
    /// Built-in LZW decoder and BSD checksum
    Native,
}
