use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Last failure message per input file.
#[derive(Debug, Default)]
pub struct ErrorIndex {
    entries: Mutex<HashMap<PathBuf, String>>,
}

impl ErrorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, input: &Path, message: impl Into<String>) {
        self.entries.lock().insert(input.to_path_buf(), message.into());
    }

    pub fn get(&self, input: &Path) -> Option<String> {
        self.entries.lock().get(input).cloned()
    }

    /// Returns whether an entry was removed.
    pub fn clear(&self, input: &Path) -> bool {
        self.entries.lock().remove(input).is_some()
    }
}
