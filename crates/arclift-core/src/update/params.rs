//! Compression parameter assembly.
//!
//! The engine takes its tuning as a flat list of named parameters, set
//! once per session. The level and method knobs, header/entry encryption
//! switches and caller-supplied custom parameters all funnel into that one
//! list here; names the session already derives itself are reserved and
//! only warned about, never silently double-set.

use std::collections::BTreeMap;

use crate::engine::ParamValue;
use crate::formats::ArchiveFormat;

/// Compression effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Store without compression.
    None,
    /// Fastest compression.
    Fast,
    /// Low compression.
    Low,
    /// The default trade-off.
    #[default]
    Normal,
    /// High compression.
    High,
    /// Best compression, slowest.
    Ultra,
}

impl CompressionLevel {
    /// The numeric intensity the engine understands.
    #[must_use]
    pub const fn intensity(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::Low => 3,
            Self::Normal => 5,
            Self::High => 7,
            Self::Ultra => 9,
        }
    }
}

/// Compression method override. Not every method fits every container;
/// see [`CompressionMethod::is_valid_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// Store entries uncompressed.
    Copy,
    /// Deflate (zip).
    Deflate,
    /// Deflate64 (zip).
    Deflate64,
    /// Bzip2.
    BZip2,
    /// LZMA.
    Lzma,
    /// LZMA2.
    Lzma2,
    /// PPMd.
    Ppmd,
    /// Let the container pick its default method.
    #[default]
    Default,
}

impl CompressionMethod {
    /// The parameter value the engine expects, `None` for
    /// [`CompressionMethod::Default`].
    #[must_use]
    pub const fn parameter_name(self) -> Option<&'static str> {
        match self {
            Self::Copy => Some("Copy"),
            Self::Deflate => Some("Deflate"),
            Self::Deflate64 => Some("Deflate64"),
            Self::BZip2 => Some("BZip2"),
            Self::Lzma => Some("LZMA"),
            Self::Lzma2 => Some("LZMA2"),
            Self::Ppmd => Some("PPMd"),
            Self::Default => None,
        }
    }

    /// Whether this method can be used with `format`.
    #[must_use]
    pub const fn is_valid_for(self, format: ArchiveFormat) -> bool {
        match format {
            _ if matches!(self, Self::Default) => true,
            ArchiveFormat::GZip => matches!(self, Self::Deflate),
            ArchiveFormat::BZip2 => matches!(self, Self::BZip2),
            ArchiveFormat::SevenZip => !matches!(self, Self::Deflate | Self::Deflate64),
            ArchiveFormat::Tar => matches!(self, Self::Copy),
            ArchiveFormat::Zip => !matches!(self, Self::Lzma2),
            _ => true,
        }
    }
}

/// Entry encryption method for zip output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZipEncryptionMethod {
    /// The legacy zip stream cipher (the container default).
    #[default]
    ZipCrypto,
    /// AES with a 128-bit key.
    Aes128,
    /// AES with a 192-bit key.
    Aes192,
    /// AES with a 256-bit key.
    Aes256,
}

impl ZipEncryptionMethod {
    const fn parameter_name(self) -> &'static str {
        match self {
            Self::ZipCrypto => "ZipCrypto",
            Self::Aes128 => "Aes128",
            Self::Aes192 => "Aes192",
            Self::Aes256 => "Aes256",
        }
    }
}

/// Estimated dictionary memory in MiB for a method/level pair.
///
/// Used for memory planning only; the engine derives its own sizes from
/// the intensity parameter.
#[must_use]
pub fn dictionary_size_mib(method: CompressionMethod, level: CompressionLevel) -> f32 {
    match method {
        CompressionMethod::Default | CompressionMethod::Lzma | CompressionMethod::Lzma2 => {
            match level {
                CompressionLevel::None => 0.001,
                CompressionLevel::Fast => 1.0 / 16.0 * 7.5 + 4.0,
                CompressionLevel::Low => 7.5 * 11.5 + 4.0,
                CompressionLevel::Normal => 16.0 * 11.5 + 4.0,
                CompressionLevel::High => 32.0 * 11.5 + 4.0,
                CompressionLevel::Ultra => 64.0 * 11.5 + 4.0,
            }
        }
        CompressionMethod::BZip2 => match level {
            CompressionLevel::None => 0.0,
            CompressionLevel::Fast => 0.095,
            CompressionLevel::Low => 0.477,
            _ => 0.858,
        },
        CompressionMethod::Deflate | CompressionMethod::Deflate64 => 32.0,
        CompressionMethod::Ppmd => 16.0,
        CompressionMethod::Copy => 0.001,
    }
}

/// Parameter names the session derives itself; supplying them as custom
/// parameters collides with the corresponding setting.
const RESERVED: &[(&str, &str)] = &[
    ("x", "use the compression level setting instead of the \"x\" parameter"),
    ("m", "use the compression method setting instead of the \"m\" parameter"),
    ("em", "use the zip encryption setting instead of the \"em\" parameter"),
];

pub(crate) struct AssembledParams {
    pub props: Vec<(String, ParamValue)>,
    /// Non-fatal complaints about the custom parameter set. Recorded, not
    /// thrown, so the session still runs.
    pub warnings: Vec<String>,
}

/// Builds the parameter list for one update session.
pub(crate) fn assemble(
    format: ArchiveFormat,
    level: CompressionLevel,
    method: CompressionMethod,
    custom: &BTreeMap<String, String>,
    encrypt_headers: bool,
    zip_encryption: ZipEncryptionMethod,
) -> AssembledParams {
    let mut props = Vec::new();
    let mut warnings = Vec::new();

    // The tar handler has no parameter surface at all.
    if format == ArchiveFormat::Tar {
        return AssembledParams { props, warnings };
    }

    props.push(("x".to_string(), ParamValue::U32(level.intensity())));

    if let Some(name) = method.parameter_name() {
        // Zip takes the method under "m"; the other containers bind it to
        // coder slot 0.
        let key = if format == ArchiveFormat::Zip { "m" } else { "0" };
        props.push((key.to_string(), ParamValue::Str(name.to_string())));
    }

    for (key, value) in custom {
        if let Some((_, hint)) = RESERVED.iter().find(|(name, _)| name == key) {
            warnings.push((*hint).to_string());
            continue;
        }

        if (key == "mem" || key == "o") && method != CompressionMethod::Ppmd {
            warnings.push(format!(
                "parameter \"{key}\" is only valid with the PPMd compression method"
            ));
        }

        let param = if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            value
                .parse::<u32>()
                .map_or_else(|_| ParamValue::Str(value.clone()), ParamValue::U32)
        } else {
            ParamValue::Str(value.clone())
        };
        props.push((key.clone(), param));
    }

    if encrypt_headers && format == ArchiveFormat::SevenZip && !custom.contains_key("he") {
        props.push(("he".to_string(), ParamValue::Str("on".to_string())));
    }

    if format == ArchiveFormat::Zip
        && zip_encryption != ZipEncryptionMethod::ZipCrypto
        && !custom.contains_key("em")
    {
        props.push((
            "em".to_string(),
            ParamValue::Str(zip_encryption.parameter_name().to_string()),
        ));
    }

    AssembledParams { props, warnings }
}
