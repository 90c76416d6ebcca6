//! List command implementation.

use anyhow::Result;
use arclift_core::ArchiveReader;
use arclift_core::ReaderOptions;
use console::style;
use serde::Serialize;

use crate::cli::ListArgs;

#[derive(Serialize)]
struct EntryRow<'a> {
    path: &'a str,
    size: u64,
    directory: bool,
    encrypted: bool,
    method: &'a str,
    crc: u32,
}

pub fn execute(args: &ListArgs, json: bool, quiet: bool) -> Result<()> {
    let mut options = ReaderOptions::new();
    if let Some(password) = &args.password {
        options = options.password(password);
    }

    let reader = ArchiveReader::open_with(&args.archive, options)?;

    if json {
        let rows: Vec<EntryRow<'_>> = reader
            .entries()
            .iter()
            .map(|entry| EntryRow {
                path: &entry.path,
                size: entry.size,
                directory: entry.is_directory,
                encrypted: entry.is_encrypted,
                method: &entry.method,
                crc: entry.crc,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if !quiet {
        println!(
            "{} archive, {} entries",
            style(reader.format()).bold(),
            reader.entries().len()
        );
    }

    for entry in reader.entries() {
        if args.long {
            let marker = if entry.is_directory { "d" } else { "-" };
            println!(
                "{marker} {:>12}  {:<10} {}",
                entry.size,
                entry.method,
                entry.path
            );
        } else {
            println!("{}", entry.path);
        }
    }

    Ok(())
}
