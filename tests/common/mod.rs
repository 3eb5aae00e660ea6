#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub use backy_test_utils::init_tracing;

/// Write `contents` to `<dir>/backy.yml` and return its path.
pub fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("backy.yml");
    std::fs::write(&path, contents).expect("write config");
    path
}

/// Path of a file under `demos/`.
pub fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}
