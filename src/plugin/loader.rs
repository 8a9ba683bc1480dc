//! Opening backend modules and looking up their exports.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::debug;

use super::abi::OperationExport;
use super::export::ExportTable;
use crate::{Error, Result};

/// A loaded module's exported operations.
pub trait SymbolTable: Send {
    /// Where the module was loaded from.
    fn path(&self) -> &Path;

    /// Look up the export named `symbol`. The error is the loader's cause text.
    fn lookup(&self, symbol: &str) -> std::result::Result<&OperationExport, String>;
}

/// Opens a module path into a [`SymbolTable`].
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn SymbolTable>>;
}

/// Loads shared libraries through the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModuleLoader for NativeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn SymbolTable>> {
        Ok(Box::new(LoadedModule::open(path)?))
    }
}

/// A shared library mapped into the process.
///
/// The library is never closed: code and threads belonging to the backend
/// may outlive the adapter, so the mapping stays for the process lifetime.
pub struct LoadedModule {
    path: PathBuf,
    library: ManuallyDrop<Library>,
}

impl LoadedModule {
    /// Map the module at `path`, running its static initializers.
    ///
    /// `path` is resolved against the current directory first. A bare file
    /// name is never handed to the linker's library search.
    pub fn open(path: &Path) -> Result<Self> {
        let resolved = std::fs::canonicalize(path).map_err(|e| Error::ModuleLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;

        // SAFETY: Loading a backend runs foreign initializers. ABI
        // compatibility of the module is a precondition of the load path.
        let library = unsafe { Library::new(&resolved) }.map_err(|e| Error::ModuleLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        debug!("mapped plugin module {}", resolved.display());

        Ok(Self {
            path: resolved,
            library: ManuallyDrop::new(library),
        })
    }
}

impl SymbolTable for LoadedModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, symbol: &str) -> std::result::Result<&OperationExport, String> {
        // SAFETY: Contract exports are `OperationExport` statics. Their ABI
        // version is checked before the signature or entry is trusted.
        let export: Symbol<*const OperationExport> =
            unsafe { self.library.get(symbol.as_bytes()) }.map_err(|e| e.to_string())?;
        let ptr = *export;

        // SAFETY: The static lives as long as the library, which is never closed.
        unsafe { ptr.as_ref() }.ok_or_else(|| format!("symbol {} resolved to null", symbol))
    }
}

/// Serves in-process [`ExportTable`]s registered under a path.
///
/// Lets a statically linked backend written against the plugin ABI be driven
/// through the same adapter as one loaded from disk.
#[derive(Debug, Default, Clone)]
pub struct StaticLoader {
    modules: HashMap<PathBuf, ExportTable>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `table` when `path` is loaded.
    pub fn register<P: Into<PathBuf>>(mut self, path: P, table: ExportTable) -> Self {
        self.modules.insert(path.into(), table);
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn SymbolTable>> {
        let table = self.modules.get(path).ok_or_else(|| Error::ModuleLoad {
            path: path.to_path_buf(),
            cause: "no module registered at this path".into(),
        })?;
        Ok(Box::new(table.clone().located_at(path)))
    }
}
