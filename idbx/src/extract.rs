use idbx_format::{
    Codec, ExternalCodec, ExtractOptions, ExtractProgress, ExtractStats, MachineSet, NativeCodec,
    extract_idb,
};
use indicatif::ProgressBar;

use crate::cli::{Cli, CodecChoice};
use crate::error::{Error, Result};
use crate::util::{create_progress_bar, format_size};

pub fn run(args: Cli) -> Result<()> {
    let machines =
        MachineSet::from_bindings(&args.mach).map_err(|source| Error::Mach { source })?;
    for (board, value) in machines.iter() {
        tracing::debug!(board, value, "active machine binding");
    }

    let codec: Box<dyn Codec> = match args.codec {
        CodecChoice::External => Box::new(ExternalCodec::new()),
        CodecChoice::Native => Box::new(NativeCodec),
    };

    let options = ExtractOptions {
        force_file_mode: args.force_mode,
        force_dir_mode: args.force_dir_mode,
    };

    let mut bar: Option<ProgressBar> = None;
    let mut on_progress = |event: ExtractProgress| match event {
        ExtractProgress::Started { total_lines } => {
            bar = Some(create_progress_bar(total_lines, "Extracting"));
        }
        ExtractProgress::Processed { line } => {
            if let Some(pb) = &bar {
                pb.set_position(line);
            }
        }
        ExtractProgress::Finished => {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
        }
    };
    let progress = if args.progress {
        Some(&mut on_progress as &mut dyn FnMut(ExtractProgress))
    } else {
        None
    };

    let result = extract_idb(
        &args.idb,
        &args.root,
        &machines,
        codec.as_ref(),
        options,
        progress,
    );
    if let Some(pb) = bar.take() {
        pb.abandon();
    }
    let stats = result.map_err(|source| Error::Extract { source })?;

    print_summary(&stats);
    Ok(())
}

fn print_summary(stats: &ExtractStats) {
    if stats.lines == 0 {
        return;
    }

    println!(
        "Extracted {} files ({}), {} directories, {} links",
        stats.files_extracted,
        format_size(stats.bytes_written),
        stats.dirs_created,
        stats.links_created
    );
    if stats.filtered > 0 {
        println!("  {} directives filtered out", stats.filtered);
    }
    if stats.errors > 0 {
        println!("  {} directives skipped due to errors", stats.errors);
    }
    if stats.checksum_mismatches > 0 {
        println!("  {} checksum mismatches", stats.checksum_mismatches);
    }
}
