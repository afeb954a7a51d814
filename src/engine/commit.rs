//! Final state reconciliation and atomic commit (spec §4.10, §5).
//!
//! Once every record for a pair has gone through load/resolve/flags/
//! propagate/expire/trash, this is the last step of a run: fold the
//! ephemeral decisions into the durable `Status`/`flags` fields, bump
//! the per-side UID watermarks, write the new state file atomically,
//! and only then remove the journal that made the run resumable.

use std::path::Path;

use crate::error::Result;

use super::journal::{Journal, JournalOp};
use super::record::SyncRecord;
use super::side::Side;
use super::state::StateFile;

/// Drop any record that has become fully resolved-away: dead, or both
/// UIDs zero with nothing pending.
pub fn prune_resolved(state: &mut StateFile) {
    state.records.retain(|r| !r.is_dead());
}

/// Update the header UID watermarks from the highest UID seen this run
/// on each side, and journal the bump before it's folded into the
/// header (so a crash between journaling and commit still recovers
/// the correct watermark on replay).
pub fn bump_watermarks(state: &mut StateFile, journal: &mut Journal, side: Side, max_uid_seen: u32) -> Result<()> {
    let current = match side {
        Side::Far => state.header.max_pulled_uid,
        Side::Near => state.header.max_pushed_uid,
    };
    if max_uid_seen <= current {
        return Ok(());
    }
    journal.append(&JournalOp::BumpMaxUid { side, maxuid: max_uid_seen })?;
    match side {
        Side::Far => state.header.max_pulled_uid = max_uid_seen,
        Side::Near => state.header.max_pushed_uid = max_uid_seen,
    }
    Ok(())
}

/// Commit one record's merged flags, journaling the `CommitFlags` op
/// first (spec §4.10's ordering requirement).
pub fn commit_flags(rec: &mut SyncRecord, merged: crate::driver::MsgFlags, journal: &mut Journal) -> Result<()> {
    if rec.flags == merged {
        return Ok(());
    }
    journal.append(&JournalOp::CommitFlags {
        far: rec.uid[Side::Far],
        near: rec.uid[Side::Near],
        flags: merged,
    })?;
    rec.flags = merged;
    Ok(())
}

/// Write the new state file atomically and drop the journal that
/// covered this run, in that order (spec §5: state replacement is the
/// commit point; the journal is only safe to discard once it has
/// landed).
pub fn commit(state: &StateFile, state_path: &Path, mut journal: Journal) -> Result<()> {
    journal.fsync()?;
    state.commit(state_path)?;
    journal.remove()
}
