//! Module loading through the platform dynamic linker.
//!
//! Path handling and failure paths. Calls into a loaded module are covered
//! in `native_plugin.rs`.

mod common;

use std::env;
use std::fs;
use std::path::Path;

use hv_plugin::plugin::loader::{ModuleLoader, NativeLoader, SymbolTable};
use hv_plugin::plugin::LoadedModule;
use hv_plugin::prelude::*;

fn pod_with_plugin(path: &Path) -> PodDescriptor {
    PodDescriptor::new(PodConfig {
        id: "load-test".into(),
        hypervisor: HypervisorConfig::new().plugin_path(path),
        ..Default::default()
    })
}

#[test]
fn init_with_nonexistent_path_is_module_load_failure() {
    let path = Path::new("/nonexistent/hv-plugin/libmissing_hv.so");
    let mut hv = PluginHypervisor::new();

    let err = hv.init(&pod_with_plugin(path)).unwrap_err();
    match err {
        Error::ModuleLoad {
            path: reported,
            cause,
        } => {
            assert_eq!(reported, path);
            assert!(!cause.is_empty());
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!hv.is_loaded());
    assert!(!hv.is_initialized());

    // No instance, so every other call is refused or falls back.
    assert!(matches!(hv.start_pod(), Err(Error::NotInitialized(_))));
    assert_eq!(hv.get_pod_console("load-test"), "");
    assert_eq!(hv.capabilities(), Capabilities::default());
}

#[test]
fn garbage_artifact_is_module_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("libgarbage_hv.so");
    fs::write(&path, b"this is not a shared object").unwrap();

    let err = NativeLoader.load(&path).err().unwrap();
    match err {
        Error::ModuleLoad {
            path: reported,
            cause,
        } => {
            assert_eq!(reported, path);
            assert!(!cause.is_empty());
        }
        other => panic!("unexpected error: {}", other),
    }

    let mut hv = PluginHypervisor::new();
    assert!(matches!(
        hv.init(&pod_with_plugin(&path)),
        Err(Error::ModuleLoad { .. })
    ));
    assert!(!hv.is_initialized());
}

#[test]
fn directory_is_not_a_module() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        LoadedModule::open(dir.path()),
        Err(Error::ModuleLoad { .. })
    ));
}

#[test]
fn error_message_names_path() {
    let path = Path::new("/nonexistent/libhv.so");
    let err = LoadedModule::open(path).err().unwrap();
    assert!(err.to_string().starts_with("failed to open plugin path /nonexistent/libhv.so"));
}

#[test]
fn bare_file_name_resolves_against_current_dir() {
    let dir = tempfile::tempdir().unwrap();
    let name = format!(
        "{}hv_fixture_rel{}",
        env::consts::DLL_PREFIX,
        env::consts::DLL_SUFFIX
    );
    fs::copy(common::fixture_module(), dir.path().join(&name)).unwrap();

    // Other tests in this binary only use absolute paths.
    let previous = env::current_dir().unwrap();
    env::set_current_dir(dir.path()).unwrap();
    let opened = LoadedModule::open(Path::new(&name));
    env::set_current_dir(previous).unwrap();

    let module = opened.unwrap();
    let expected = fs::canonicalize(dir.path().join(&name)).unwrap();
    assert_eq!(module.path(), expected);
    assert!(ExportReport::verify(&module).supports(Operation::Init));
}

#[test]
fn missing_relative_name_reports_given_path() {
    let err = LoadedModule::open(Path::new("libhv_not_here.so")).err().unwrap();
    match err {
        Error::ModuleLoad { path, .. } => assert_eq!(path, Path::new("libhv_not_here.so")),
        other => panic!("unexpected error: {}", other),
    }
}
