//! Placeholder upgrade and purge transactions (spec §4.5/§4.6/§4.11).
//!
//! A placeholder (DUMMY) message is only ever a stub; the real copy
//! lives on the opposite side. Flagging the stub directly (not the
//! real message — `F_FLAGGED` on the real side is never mirrored onto
//! a stub, see `flags::placeholder_allowed_flags`) is the user asking
//! for something:
//!  - `F_DELETED` on the stub: PURGE. Drop the stub; nothing else to
//!    keep.
//!  - `F_FLAGGED` on the stub: UPGRADE. The user wants the real
//!    content.
//!
//! Either way the stub is removed and the pairing retired rather than
//! rewritten in place: the surviving side's message then falls out as
//! unmatched on the next run and is delivered through the ordinary
//! new-message path (§4.7), so delivery stays crash-safe without a
//! second code path to get right.

use crate::driver::{Driver, MsgFlags};
use crate::error::Result;

use super::journal::{Journal, JournalOp};
use super::record::SyncRecord;
use super::side::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Upgrade,
    Purge,
}

/// Whether flags freshly observed directly on a placeholder's own
/// side ask for an upgrade or a purge. Only a bit that's new relative
/// to the last committed base counts — a flag already folded in from
/// an earlier run isn't a fresh request.
pub fn detect_trigger(rec: &SyncRecord, observed_dummy_flags: MsgFlags) -> Option<Trigger> {
    let newly_added = observed_dummy_flags & !rec.flags;
    if newly_added.contains(MsgFlags::DELETED) {
        Some(Trigger::Purge)
    } else if newly_added.contains(MsgFlags::FLAGGED) {
        Some(Trigger::Upgrade)
    } else {
        None
    }
}

/// Carry out a detected trigger: journal it, drop the stub on its own
/// side, and retire the record.
pub fn resolve_trigger(
    trigger: Trigger,
    dummy_side: Side,
    rec: &mut SyncRecord,
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    journal: &mut Journal,
) -> Result<()> {
    let far_uid = rec.uid[Side::Far];
    let near_uid = rec.uid[Side::Near];
    let pflags = rec.flags;

    match trigger {
        Trigger::Upgrade => {
            journal.append(&JournalOp::PlaceholderUpgrade { far: far_uid, near: near_uid, pflags })?;
        }
        Trigger::Purge => {
            journal.append(&JournalOp::PlaceholderPurged { far: far_uid, near: near_uid })?;
        }
    }

    let dummy_uid = rec.uid[dummy_side];
    let driver: &mut dyn Driver = match dummy_side {
        Side::Far => far,
        Side::Near => near,
    };
    driver.trash_msg(dummy_uid)?;

    journal.append(&JournalOp::Kill { far: far_uid, near: near_uid })?;
    rec.mark_dead();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::{SyncRecord, Status};

    #[test]
    fn deleting_the_stub_triggers_purge() {
        let mut rec = SyncRecord::new(1, 2);
        rec.status.insert(Status::DUMMY_NEAR);
        let observed = MsgFlags::SEEN | MsgFlags::DELETED;
        assert_eq!(detect_trigger(&rec, observed), Some(Trigger::Purge));
    }

    #[test]
    fn flagging_the_stub_triggers_upgrade() {
        let mut rec = SyncRecord::new(1, 2);
        rec.status.insert(Status::DUMMY_FAR);
        let observed = MsgFlags::FLAGGED;
        assert_eq!(detect_trigger(&rec, observed), Some(Trigger::Upgrade));
    }

    #[test]
    fn already_flagged_base_is_not_a_fresh_trigger() {
        let mut rec = SyncRecord::new(1, 2);
        rec.status.insert(Status::DUMMY_FAR);
        rec.flags.insert(MsgFlags::FLAGGED);
        assert_eq!(detect_trigger(&rec, MsgFlags::FLAGGED), None);
    }
}
