//! Project-wide constants.

use std::path::PathBuf;

/// Default journal path: `~/.mule/journal.db`.
pub fn default_journal_path() -> PathBuf {
    dirs::home_dir()
        .expect("cannot determine home directory")
        .join(".mule")
        .join("journal.db")
}
