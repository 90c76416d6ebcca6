//! Extract command implementation.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use arclift_core::ArchiveReader;
use arclift_core::ReaderOptions;
use console::style;

use crate::cli::ExtractArgs;
use crate::progress::CliProgress;

pub fn execute(args: &ExtractArgs, quiet: bool) -> Result<()> {
    let mut options = ReaderOptions::new();
    if let Some(password) = &args.password {
        options = options.password(password);
    }
    if args.flatten {
        options = options.flatten();
    }

    let mut reader = ArchiveReader::open_with(&args.archive, options)
        .with_context(|| format!("cannot open \"{}\"", args.archive.display()))?;

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut progress = CliProgress::new(quiet, args.force);
    let report = reader.extract_to_dir(&output_dir, &mut progress)?;
    progress.finish();

    for failure in &report.failures {
        eprintln!("{} {failure}", style("error:").red().bold());
    }

    if !quiet {
        println!(
            "extracted {} files, {} directories ({} bytes)",
            report.files_extracted, report.directories_created, report.bytes_written
        );
        if report.skipped > 0 {
            println!("skipped {} items", report.skipped);
        }
    }

    if report.cancelled {
        bail!("extraction was cancelled");
    }
    if !report.failures.is_empty() {
        bail!("{} items failed to extract", report.failures.len());
    }

    Ok(())
}
