//! Verify command implementation.

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use arclift_core::ArchiveReader;
use arclift_core::ReaderOptions;
use console::style;

use crate::cli::VerifyArgs;

pub fn execute(args: &VerifyArgs, quiet: bool) -> Result<()> {
    let mut options = ReaderOptions::new();
    if let Some(password) = &args.password {
        options = options.password(password);
    }

    let mut reader = ArchiveReader::open_with(&args.archive, options)
        .with_context(|| format!("cannot open \"{}\"", args.archive.display()))?;

    let ok = reader.verify()?;

    if ok {
        if !quiet {
            println!("{} archive is intact", style("ok:").green().bold());
        }
        Ok(())
    } else {
        bail!("archive \"{}\" is damaged", args.archive.display());
    }
}
