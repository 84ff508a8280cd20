use humansize::{BINARY, FormatSize};
use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar over IDB lines
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})") {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    bytes.format_size(BINARY)
}

/// Parse an octal permission value such as `0644` or `755`
pub fn parse_octal(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode `{s}`: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode `{s}` is out of range"));
    }
    Ok(mode)
}

/// Map the `-v` count to a default log filter
pub fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
