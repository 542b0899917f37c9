//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` / parent-directory checks.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Extension of the input containers the scanner picks up.
pub const INPUT_EXTENSION: &str = "ts";

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists.
pub fn ensure_parent_dir_sync(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    ensure_dir_all_sync_with_op("creating directory", parent)
}

/// List the top-level input containers of a folder, sorted by path.
///
/// Sub-directories are not descended into. The extension match is
/// case-insensitive.
pub fn scan_inputs(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(folder).map_err(|e| io_error("reading directory", folder, e))?;

    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error("reading directory", folder, e))?;
        let path = entry.path();
        if path.is_file() && has_input_extension(&path) {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

fn has_input_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(INPUT_EXTENSION))
}

/// Compare two paths the way the host filesystem would.
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    if cfg!(windows) {
        a.to_string_lossy()
            .eq_ignore_ascii_case(&b.to_string_lossy())
    } else {
        a == b
    }
}
