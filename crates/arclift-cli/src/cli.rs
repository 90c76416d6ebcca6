//! CLI argument parsing using clap.

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use std::path::PathBuf;

use arclift_core::ArchiveFormat;
use arclift_core::CompressionLevel;
use arclift_core::CompressionMethod;

#[derive(Parser)]
#[command(name = "arclift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output results in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Path to the engine library (default: probe beside the executable)
    #[arg(long, global = true, value_name = "PATH")]
    pub engine: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List archive contents without extraction
    List(ListArgs),
    /// Extract archive contents
    Extract(ExtractArgs),
    /// Create a new archive
    Create(CreateArgs),
    /// Verify archive integrity
    Verify(VerifyArgs),
}

#[derive(clap::Args)]
pub struct ListArgs {
    /// Path to the archive file
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Archive password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Show size, method and timestamp columns
    #[arg(short, long)]
    pub long: bool,
}

#[derive(clap::Args)]
pub struct ExtractArgs {
    /// Path to the archive file
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Output directory (default: current directory)
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Archive password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Extract entries flat, without their directory structure
    #[arg(long)]
    pub flatten: bool,

    /// Overwrite existing files (default: skip them)
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct CreateArgs {
    /// Output archive file path
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Source files or directories to archive
    #[arg(value_name = "SOURCE", required = true)]
    pub sources: Vec<PathBuf>,

    /// Archive format (default: from the output extension)
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Compression level
    #[arg(short = 'l', long, value_enum, default_value = "normal")]
    pub level: LevelArg,

    /// Compression method (default: the container's own default)
    #[arg(short = 'm', long, value_enum)]
    pub method: Option<MethodArg>,

    /// Archive password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Also encrypt the archive headers (7z only)
    #[arg(long, requires = "password")]
    pub encrypt_headers: bool,

    /// Split the output into volumes of this size (e.g. 100m)
    #[arg(long, value_name = "SIZE", value_parser = parse_byte_size)]
    pub volume_size: Option<u64>,

    /// Store entries flat, by file name only
    #[arg(long)]
    pub flatten: bool,
}

#[derive(clap::Args)]
pub struct VerifyArgs {
    /// Path to the archive file
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Archive password
    #[arg(short, long)]
    pub password: Option<String>,
}

/// Writable container formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    #[value(name = "7z")]
    SevenZip,
    Zip,
    Gzip,
    Bzip2,
    Tar,
    Xz,
}

impl From<FormatArg> for ArchiveFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::SevenZip => Self::SevenZip,
            FormatArg::Zip => Self::Zip,
            FormatArg::Gzip => Self::GZip,
            FormatArg::Bzip2 => Self::BZip2,
            FormatArg::Tar => Self::Tar,
            FormatArg::Xz => Self::Xz,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LevelArg {
    Store,
    Fast,
    Low,
    Normal,
    High,
    Ultra,
}

impl From<LevelArg> for CompressionLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Store => Self::None,
            LevelArg::Fast => Self::Fast,
            LevelArg::Low => Self::Low,
            LevelArg::Normal => Self::Normal,
            LevelArg::High => Self::High,
            LevelArg::Ultra => Self::Ultra,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Copy,
    Deflate,
    Deflate64,
    Bzip2,
    Lzma,
    Lzma2,
    Ppmd,
}

impl From<MethodArg> for CompressionMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Copy => Self::Copy,
            MethodArg::Deflate => Self::Deflate,
            MethodArg::Deflate64 => Self::Deflate64,
            MethodArg::Bzip2 => Self::BZip2,
            MethodArg::Lzma => Self::Lzma,
            MethodArg::Lzma2 => Self::Lzma2,
            MethodArg::Ppmd => Self::Ppmd,
        }
    }
}

/// Parses sizes like `1048576`, `512k`, `100m`, `4g`.
fn parse_byte_size(text: &str) -> Result<u64, String> {
    let text = text.trim().to_ascii_lowercase();
    let (digits, factor) = match text.as_bytes().last() {
        Some(b'k') => (&text[..text.len() - 1], 1024u64),
        Some(b'm') => (&text[..text.len() - 1], 1024 * 1024),
        Some(b'g') => (&text[..text.len() - 1], 1024 * 1024 * 1024),
        _ => (text.as_str(), 1),
    };

    digits
        .parse::<u64>()
        .map_err(|_| format!("invalid size \"{text}\""))?
        .checked_mul(factor)
        .ok_or_else(|| format!("size \"{text}\" overflows"))
}
