// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Native module loader using abi_stable and libloading.
//!
//! Native modules are shared libraries (.so on Linux) that export a
//! `procwrap_module_entry` function returning a `ModuleEntry` struct. The load
//! source payload is the library path as byte-range text.

use super::{
    InnerInstance, LoadError, LoadResult, ModuleFactory, ModuleInstance, ModuleLoader,
};
use crate::message::Message;
use libloading::{Library, Symbol};
use procwrap_module_api::{
    ActivationContext, ModuleEntry, ModuleFactoryFn, ModuleInfo, API_VERSION_MAJOR,
    API_VERSION_MINOR,
};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point function name that modules must export.
const ENTRY_POINT_NAME: &[u8] = b"procwrap_module_entry\0";

/// Check that a module file and its parent directory do not have insecure permissions.
/// Rejects world-writable files or files in world-writable directories.
pub(super) fn check_module_permissions(path: &Path) -> LoadResult<()> {
    let metadata = std::fs::metadata(path)?;
    let mode = metadata.mode();

    if mode & 0o002 != 0 {
        warn!(
            "Rejecting module with world-writable permissions: {:?} (mode {:o})",
            path, mode
        );
        return Err(LoadError::InsecurePermissions(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        if let Ok(dir_meta) = std::fs::metadata(parent) {
            let dir_mode = dir_meta.mode();
            if dir_mode & 0o002 != 0 {
                warn!(
                    "Rejecting module in world-writable directory: {:?} (dir mode {:o})",
                    path, dir_mode
                );
                return Err(LoadError::InsecurePermissions(path.to_path_buf()));
            }
        }
    }

    Ok(())
}

/// Open `path` and resolve its entry point.
fn open_entry(path: &Path) -> LoadResult<(Library, ModuleEntry)> {
    // SAFETY: We trust that modules on the configured paths are safe to load.
    // Users should only install modules from trusted sources.
    let library = unsafe { Library::new(path).map_err(|e| LoadError::LibraryLoad(e.to_string()))? };

    let entry: ModuleEntry = unsafe {
        let entry_fn: Symbol<extern "C" fn() -> ModuleEntry> =
            library.get(ENTRY_POINT_NAME).map_err(|e| {
                LoadError::EntryPointNotFound(format!("procwrap_module_entry: {}", e))
            })?;

        entry_fn()
    };

    if entry.api_version_major != API_VERSION_MAJOR {
        return Err(LoadError::VersionMismatch {
            module_major: entry.api_version_major,
            module_minor: entry.api_version_minor,
            host_major: API_VERSION_MAJOR,
            host_minor: API_VERSION_MINOR,
        });
    }

    // Minor version: module must be <= host (host is backwards compatible)
    if entry.api_version_minor > API_VERSION_MINOR {
        warn!(
            "Module API minor version ({}) is newer than host ({}), some features may not work",
            entry.api_version_minor, API_VERSION_MINOR
        );
    }

    Ok((library, entry))
}

/// A loaded shared library.
pub struct NativeModule {
    path: PathBuf,
    name: String,
    create: ModuleFactoryFn,
    library: Arc<Library>,
}

impl NativeModule {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModuleFactory for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, context: &ActivationContext) -> LoadResult<Box<dyn InnerInstance>> {
        let mut module = (self.create)();
        module.activate(context.clone());
        debug!(
            "Instantiated {} (sr={}, block={})",
            self.name, context.sample_rate, context.max_block_size
        );
        Ok(Box::new(ModuleInstance::new(
            module,
            Some(Arc::clone(&self.library)),
        )))
    }
}

/// Native module loader.
pub struct NativeLoader {
    /// Directories searched for relative module paths.
    search_paths: Vec<PathBuf>,
    /// Reject world-writable modules.
    check_permissions: bool,
}

impl NativeLoader {
    /// Create a new native module loader.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            check_permissions: true,
        }
    }

    pub fn with_search_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_paths.extend(paths);
        self
    }

    pub fn with_permission_check(mut self, enabled: bool) -> Self {
        self.check_permissions = enabled;
        self
    }

    /// Resolve a module path: as given if it exists, else relative to the
    /// search paths.
    pub fn resolve(&self, path: &Path) -> LoadResult<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }

        if path.is_relative() {
            if let Some(found) = self
                .search_paths
                .iter()
                .map(|dir| dir.join(path))
                .find(|candidate| candidate.exists())
            {
                return Ok(found);
            }
        }

        Err(LoadError::NotFound(path.to_path_buf()))
    }

    /// Load a module from a shared library.
    pub fn load_path(&self, path: &Path) -> LoadResult<NativeModule> {
        let path = self.resolve(path)?;

        if self.check_permissions {
            check_module_permissions(&path)?;
        }

        debug!("Loading native module: {:?}", path);

        let (library, entry) = open_entry(&path)?;

        // Instantiate once to read the metadata; that instance is dropped untouched.
        let info = (entry.create)().info();
        info!(
            "Loaded native module: {} v{} by {}",
            info.name, info.version, info.vendor
        );

        Ok(NativeModule {
            path,
            name: info.name.to_string(),
            create: entry.create,
            library: Arc::new(library),
        })
    }

    /// Validate a module file without keeping it loaded.
    ///
    /// Returns module info if valid, or an error.
    pub fn validate(&self, path: &Path) -> LoadResult<ModuleInfo> {
        let path = self.resolve(path)?;

        if self.check_permissions {
            check_module_permissions(&path)?;
        }

        let (_library, entry) = open_entry(&path)?;
        let info = (entry.create)().info();

        // Library will be unloaded when dropped
        Ok(info)
    }
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for NativeLoader {
    fn load(&self, source: &Message) -> LoadResult<Arc<dyn ModuleFactory>> {
        if source.is_empty() {
            return Err(LoadError::EmptySource);
        }
        let path = PathBuf::from(source.text());
        Ok(Arc::new(self.load_path(&path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_load_nonexistent() {
        let loader = NativeLoader::new();
        let result = loader.load_path(Path::new("/nonexistent/module.so"));
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_empty_source() {
        let loader = NativeLoader::new();
        assert!(matches!(
            loader.load(&Message::default()),
            Err(LoadError::EmptySource)
        ));
    }

    #[test]
    fn test_resolve_uses_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libthing.so");
        fs::write(&file, b"").unwrap();

        let loader = NativeLoader::new().with_search_paths([dir.path().to_path_buf()]);
        assert_eq!(loader.resolve(Path::new("libthing.so")).unwrap(), file);
        assert!(loader.resolve(Path::new("libother.so")).is_err());
    }

    #[test]
    fn test_rejects_world_writable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libopen.so");
        fs::write(&file, b"").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o666)).unwrap();

        let result = check_module_permissions(&file);
        assert!(matches!(result, Err(LoadError::InsecurePermissions(_))));
    }

    #[test]
    fn test_garbage_library_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libgarbage.so");
        fs::write(&file, b"definitely not an ELF file").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();

        let source = Message::from_text(file.to_str().unwrap()).unwrap();
        let result = NativeLoader::new().load(&source);
        assert!(matches!(result, Err(LoadError::LibraryLoad(_))));
    }
}
