//! Shared helpers for tests that load a real backend module.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Build the `hv-fixture` backend once per test binary and return the path
/// of its shared library.
pub fn fixture_module() -> &'static Path {
    static MODULE: OnceLock<PathBuf> = OnceLock::new();
    MODULE.get_or_init(|| build_fixture().unwrap_or_else(|e| panic!("fixture backend: {e}")))
}

fn build_fixture() -> Result<PathBuf, String> {
    // A separate target dir keeps the nested build off the outer build lock.
    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("hv-fixture");
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");

    let status = Command::new(env!("CARGO"))
        .args(["build", "--quiet", "--offline", "--package", "hv-fixture"])
        .arg("--manifest-path")
        .arg(&manifest)
        .arg("--target-dir")
        .arg(&target_dir)
        .status()
        .map_err(|e| format!("failed to run cargo: {e}"))?;
    if !status.success() {
        return Err(format!("cargo build exited with {status}"));
    }

    let path = target_dir
        .join("debug")
        .join(format!("{DLL_PREFIX}hv_fixture{DLL_SUFFIX}"));
    if !path.is_file() {
        return Err(format!("build produced no module at {}", path.display()));
    }
    Ok(path)
}
