//! Loading the native engine library.
//!
//! The engine ships as a dynamic library exporting a single factory entry
//! point. The provider here locates a candidate library (an explicit path,
//! a process-wide override, or the well-known file names beside the
//! executable), loads it, and verifies the expected exports before trusting
//! it. Handler objects are then minted through the factory and released
//! through their identity vtable.
//!
//! The callback bridge that lets the engine call back into Rust sessions is
//! Windows-only for now, like the original front-end this crate grew out
//! of.
// TODO: port the callback bridge to the unix 7z.so builds; the blocker is
// the engine-allocated string convention, which is only well-defined
// through the OS allocator on Windows.

use std::path::Path;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::engine::Engine;
use crate::engine::EngineProvider;
use crate::engine::registry;
use crate::error::ArchiveError;
use crate::error::Result;

#[cfg(windows)]
mod bridge;

/// Exported factory symbol every engine build carries.
pub const FACTORY_SYMBOL: &str = "CreateObject";

/// Secondary export used to verify a candidate library is really the
/// engine and not an unrelated file with the same name.
pub const HANDLER_PROPERTY_SYMBOL: &str = "GetHandlerProperty";

static LIBRARY_PATH_OVERRIDE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Overrides where the process-wide registry looks for the engine library.
///
/// # Errors
///
/// Rejects the change while the engine is loaded — swapping the library
/// under live handler instances would free code still in use — and when
/// `path` does not exist.
pub fn set_library_path<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if registry::global().is_loaded() {
        return Err(ArchiveError::EngineLoad {
            reason: "cannot change the library path while the engine is loaded".to_string(),
        });
    }

    if !path.exists() {
        return Err(ArchiveError::EngineLoad {
            reason: format!("library file \"{}\" does not exist", path.display()),
        });
    }

    *LIBRARY_PATH_OVERRIDE.lock() = Some(path.to_path_buf());
    Ok(())
}

/// Well-known engine file names for the running platform, in probe order.
#[must_use]
pub fn default_library_names() -> &'static [&'static str] {
    if cfg!(windows) {
        if cfg!(target_pointer_width = "64") {
            &["7z64.dll", "7z.dll"]
        } else {
            &["7z.dll"]
        }
    } else {
        &["7z.so", "lib7z.so"]
    }
}

/// Locates the engine library using the provider's explicit path, the
/// process-wide override, or the default names beside the executable.
fn resolve_library_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = LIBRARY_PATH_OVERRIDE.lock().clone() {
        return Ok(path);
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .ok_or_else(|| ArchiveError::EngineLoad {
            reason: "cannot determine the executable directory".to_string(),
        })?;

    for name in default_library_names() {
        let candidate = exe_dir.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(ArchiveError::EngineLoad {
        reason: format!(
            "no engine library ({}) found in \"{}\"",
            default_library_names().join(", "),
            exe_dir.display()
        ),
    })
}

/// Production provider: loads the native engine library on demand.
///
/// The default instance probes the standard locations; an explicit path
/// wins over everything.
#[derive(Debug, Default)]
pub struct NativeProvider {
    path: Option<PathBuf>,
}

impl NativeProvider {
    /// A provider pinned to an explicit library path.
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
        }
    }
}

impl EngineProvider for NativeProvider {
    #[cfg(windows)]
    fn load(&self) -> Result<Box<dyn Engine>> {
        let path = resolve_library_path(self.path.as_deref())?;
        let engine = bridge::NativeEngine::load(&path)?;
        log::debug!("loaded engine library from \"{}\"", path.display());
        Ok(Box::new(engine))
    }

    #[cfg(not(windows))]
    fn load(&self) -> Result<Box<dyn Engine>> {
        // Resolution still runs so configuration errors surface the same
        // way on every platform.
        let path = resolve_library_path(self.path.as_deref())?;
        Err(ArchiveError::EngineLoad {
            reason: format!(
                "found engine library \"{}\", but the callback bridge is only available on Windows",
                path.display()
            ),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_library_names_are_nonempty() {
        assert!(!default_library_names().is_empty());
    }

    #[test]
    fn test_set_library_path_rejects_missing_file() {
        let err = set_library_path("/definitely/not/here/7z.dll").unwrap_err();
        assert!(matches!(err, ArchiveError::EngineLoad { .. }));
    }

    #[test]
    fn test_explicit_path_wins() {
        let resolved = resolve_library_path(Some(Path::new("/opt/engine/7z.so"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/opt/engine/7z.so"));
    }
}
