//! Create command implementation.

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use arclift_core::ArchiveFormat;
use arclift_core::ArchiveWriter;

use crate::cli::CreateArgs;
use crate::progress::CliProgress;

/// Picks the output format from the flag or the file extension.
fn resolve_format(args: &CreateArgs) -> Result<ArchiveFormat> {
    if let Some(format) = args.format {
        return Ok(format.into());
    }

    let extension = args
        .output
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let format = ArchiveFormat::from_extension(extension)
        .with_context(|| format!("cannot infer an archive format from \"{extension}\""))?;

    if !format.can_compress() {
        bail!("{format} archives cannot be created, only extracted");
    }
    Ok(format)
}

pub fn execute(args: &CreateArgs, quiet: bool) -> Result<()> {
    let format = resolve_format(args)?;

    let mut writer = ArchiveWriter::new(format).level(args.level.into());
    if let Some(method) = args.method {
        writer = writer.method(method.into());
    }
    if let Some(password) = &args.password {
        writer = writer.password(password);
    }
    if args.encrypt_headers {
        writer = writer.encrypt_headers(true);
    }
    if let Some(volume_size) = args.volume_size {
        writer = writer.volume_size(volume_size);
    }
    if args.flatten {
        writer = writer.flatten();
    }

    let mut progress = CliProgress::new(quiet, true);

    // A single directory source archives its contents; anything else is
    // taken as an explicit file list.
    let report = match args.sources.as_slice() {
        [single] if single.is_dir() => {
            writer.compress_directory(&args.output, single, &mut progress)?
        }
        sources => writer.compress_files(&args.output, sources, &mut progress)?,
    };
    progress.finish();

    for failure in &report.failures {
        eprintln!("error: {failure}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }

    if !quiet {
        println!(
            "created \"{}\" with {} files ({} bytes read)",
            args.output.display(),
            report.files_added,
            report.bytes_read
        );
    }

    if report.cancelled {
        bail!("compression was cancelled");
    }
    if !report.failures.is_empty() {
        bail!("{} items failed to compress", report.failures.len());
    }

    Ok(())
}
