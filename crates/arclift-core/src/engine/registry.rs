//! Process-wide, reference-counted engine lifecycle.
//!
//! The native library is not designed for concurrent load/unload, so every
//! mutation here is serialized by one coarse lock. That is intentional:
//! acquire and release block briefly around library load/unload and never
//! during archive I/O, and archive operations are not a contention hot
//! path.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::engine::Engine;
use crate::engine::EngineProvider;
use crate::engine::InArchive;
use crate::engine::OutArchive;
use crate::engine::native::NativeProvider;
use crate::error::ArchiveError;
use crate::error::Result;
use crate::formats::ArchiveFormat;

/// Engine versions from this major on support in-place archive
/// modification.
const MODIFY_CAPABLE_MAJOR: u32 = 9;

/// Opaque identity of a registry client.
///
/// Every session mints its own id, so reference counts of independent
/// sessions never alias even when they use the same format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(u64);

impl UserId {
    /// Mints a fresh identity.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct State {
    engine: Option<Box<dyn Engine>>,
    reader_refs: HashMap<(UserId, ArchiveFormat), usize>,
    writer_refs: HashMap<(UserId, ArchiveFormat), usize>,
    total_refs: usize,
    modify_capable: Option<bool>,
}

/// Lock-guarded owner of the native engine handle.
///
/// Exactly one engine exists per registry; it is loaded lazily on the
/// first acquire and unloaded when the reference count across all
/// `(user, format)` keys drops to zero. The process-wide instance is
/// reachable through [`global`]; tests construct their own registries with
/// scripted providers so state never leaks between cases.
pub struct EngineRegistry {
    provider: Box<dyn EngineProvider>,
    state: Mutex<State>,
}

impl EngineRegistry {
    /// Creates a registry backed by `provider`.
    #[must_use]
    pub fn new(provider: Box<dyn EngineProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(State::default()),
        }
    }

    /// Whether the engine is currently loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.lock().engine.is_some()
    }

    /// Acquires a reader instance for `(user, format)`.
    ///
    /// Loads the engine on first use. Each acquire increments the key's
    /// reference count and must be paired with one
    /// [`EngineRegistry::release_reader`].
    ///
    /// # Errors
    ///
    /// [`ArchiveError::EngineLoad`] when the library cannot be loaded;
    /// [`ArchiveError::UnsupportedFormat`] when the engine build has no
    /// handler for `format`.
    pub fn acquire_reader(
        &self,
        user: UserId,
        format: ArchiveFormat,
    ) -> Result<Box<dyn InArchive>> {
        let mut state = self.state.lock();
        let instance = {
            let engine = Self::engine(&mut state, &*self.provider)?;
            engine.create_reader(format)
        };

        match instance {
            Some(instance) => {
                *state.reader_refs.entry((user, format)).or_insert(0) += 1;
                state.total_refs += 1;
                Ok(instance)
            }
            None => {
                Self::unload_if_unused(&mut state);
                Err(ArchiveError::UnsupportedFormat { format })
            }
        }
    }

    /// Acquires a writer instance for `(user, format)`.
    ///
    /// # Errors
    ///
    /// Same contract as [`EngineRegistry::acquire_reader`].
    pub fn acquire_writer(
        &self,
        user: UserId,
        format: ArchiveFormat,
    ) -> Result<Box<dyn OutArchive>> {
        let mut state = self.state.lock();
        let instance = {
            let engine = Self::engine(&mut state, &*self.provider)?;
            engine.create_writer(format)
        };

        match instance {
            Some(instance) => {
                *state.writer_refs.entry((user, format)).or_insert(0) += 1;
                state.total_refs += 1;
                Ok(instance)
            }
            None => {
                Self::unload_if_unused(&mut state);
                Err(ArchiveError::UnsupportedFormat { format })
            }
        }
    }

    /// Releases one reader reference of `(user, format)`.
    ///
    /// The caller must have dropped the instance first; release only
    /// adjusts bookkeeping. Releasing an unknown key is a no-op, so
    /// teardown code may call this in any order, any number of times.
    pub fn release_reader(&self, user: UserId, format: ArchiveFormat) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        Self::drop_ref(&mut state.reader_refs, &mut state.total_refs, user, format);
        Self::unload_if_unused(state);
    }

    /// Releases one writer reference of `(user, format)`.
    pub fn release_writer(&self, user: UserId, format: ArchiveFormat) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        Self::drop_ref(&mut state.writer_refs, &mut state.total_refs, user, format);
        Self::unload_if_unused(state);
    }

    /// Whether the loaded engine supports in-place archive modification.
    ///
    /// The version check runs once and is cached. When no engine is loaded
    /// yet, one is loaded for the probe and unloaded again if nothing else
    /// holds a reference.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::EngineLoad`] when the library cannot be loaded.
    pub fn modify_capable(&self) -> Result<bool> {
        let mut state = self.state.lock();

        if let Some(cached) = state.modify_capable {
            return Ok(cached);
        }

        let capable = {
            let engine = Self::engine(&mut state, &*self.provider)?;
            engine.major_version() >= MODIFY_CAPABLE_MAJOR
        };
        state.modify_capable = Some(capable);
        Self::unload_if_unused(&mut state);
        Ok(capable)
    }

    /// Drops all state: instances, counts, the engine, and the cached
    /// capability probe. Intended for test teardown.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = State::default();
        log::debug!("engine registry reset");
    }

    fn engine<'a>(
        state: &'a mut State,
        provider: &dyn EngineProvider,
    ) -> Result<&'a dyn Engine> {
        if state.engine.is_none() {
            state.engine = Some(provider.load()?);
            log::debug!("native engine loaded");
        }

        // The branch above just filled the slot.
        match &state.engine {
            Some(engine) => Ok(&**engine),
            None => unreachable!(),
        }
    }

    fn drop_ref(
        refs: &mut HashMap<(UserId, ArchiveFormat), usize>,
        total: &mut usize,
        user: UserId,
        format: ArchiveFormat,
    ) {
        if let Some(count) = refs.get_mut(&(user, format)) {
            *count -= 1;
            if *count == 0 {
                refs.remove(&(user, format));
            }
            *total -= 1;
        }
    }

    fn unload_if_unused(state: &mut State) {
        if state.total_refs == 0 && state.engine.is_some() {
            state.engine = None;
            log::debug!("native engine unloaded");
        }
    }
}

static GLOBAL: Lazy<EngineRegistry> =
    Lazy::new(|| EngineRegistry::new(Box::new(NativeProvider::default())));

/// The process-wide registry backed by the native engine library.
#[must_use]
pub fn global() -> &'static EngineRegistry {
    &GLOBAL
}
