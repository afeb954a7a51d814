//! State setup (spec §4.2): lock acquisition, state load, journal replay.

use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

use super::journal::{self, Journal};
use super::lock::LockFile;
use super::state::StateFile;

pub fn journal_path(state_path: &Path) -> PathBuf {
    let mut s = state_path.as_os_str().to_os_string();
    s.push(".journal");
    PathBuf::from(s)
}

pub struct SetupResult {
    pub lock: LockFile,
    pub state: StateFile,
    pub journal: Journal,
    /// Whether a state file already existed before this run (spec
    /// §4.3's "the pair existed previously" test).
    pub existed: bool,
}

/// Acquire the lock, load the previous state file (if any), and
/// replay the journal (if any) on top of it. UIDVALIDITY re-approval
/// itself happens later, during `load` (spec §4.4) — this step only
/// reconstructs the record set a prior interrupted run had reached.
pub fn setup(state_path: &Path) -> Result<SetupResult> {
    let lock = LockFile::acquire(state_path)?;
    let loaded = StateFile::load(state_path)?;
    let existed = loaded.is_some();
    let mut state = loaded.unwrap_or_default();

    let jpath = journal_path(state_path);
    let lines = journal::read_lines(&jpath)?;
    if let Some(header_line) = lines.first() {
        if !journal::header_matches(header_line, &state) {
            return Err(SyncError::EnvironmentDefect(format!(
                "journal {} header doesn't match state file {} — refusing to replay",
                jpath.display(),
                state_path.display()
            )));
        }
        journal::replay(&mut state, &lines)?;
    }

    let journal = Journal::open(&jpath, &state)?;
    Ok(SetupResult { lock, state, journal, existed })
}
