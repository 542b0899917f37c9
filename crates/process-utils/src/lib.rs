//! Child-process helpers shared across the workspace.
//!
//! Every external tool the converter launches goes through these builders so
//! the process never pops a console window on Windows, never inherits the
//! terminal's stdin, and dies with its handle.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
#[cfg(feature = "tokio")]
use std::process::Stdio;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Create a `tokio::process::Command` for a tool whose diagnostics are read
/// from stderr.
///
/// stdin and stdout are detached, stderr is piped, the locale is forced to
/// `C` so diagnostic text is stable, and the child is killed when its handle
/// is dropped.
#[cfg(feature = "tokio")]
pub fn diagnostic_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window()
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Resolve the location of an executable without spawning it.
///
/// Paths containing a separator are returned as-is when they point at a
/// file. Bare program names are looked up in every `PATH` entry (with the
/// `.exe` suffix on Windows).
pub fn locate_executable(program: impl AsRef<Path>) -> Option<PathBuf> {
    let program = program.as_ref();
    if program.as_os_str().is_empty() {
        return None;
    }

    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        candidates(&dir, program)
            .into_iter()
            .find(|candidate| candidate.is_file())
    })
}

fn candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    let plain = dir.join(program);
    if cfg!(windows) && program.extension().is_none() {
        vec![plain.with_extension("exe"), plain]
    } else {
        vec![plain]
    }
}
