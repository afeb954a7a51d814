//! Flag synchronization (spec §4.6).
//!
//! A stable, paired record's flags may have changed independently on
//! either side since the last run. The prior committed flag set
//! (`SyncRecord::flags`) is the three-way-merge base: anything a side
//! added/removed relative to that base propagates to the other side,
//! and the merged result becomes the new base once both sides confirm
//! it (`CommitFlags`, spec §4.10).

use crate::driver::MsgFlags;

use super::record::{Status, SyncRecord};
use super::side::{PerSide, Side};

/// Per-side flags to apply (add, then delete) to converge on the
/// merged set. Empty on a side means nothing to send there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagDelta {
    pub add: MsgFlags,
    pub del: MsgFlags,
}

/// Diff `current` against `base` and return what changed.
fn changes(base: MsgFlags, current: MsgFlags) -> (MsgFlags, MsgFlags) {
    (current & !base, base & !current)
}

/// Compute the bidirectional flag propagation for one record, given
/// each side's currently observed flags (spec §4.6): each side's
/// delta-from-base is applied to the *other* side, and flags that
/// changed identically on both sides cancel out rather than bouncing.
pub fn compute_flag_sync(rec: &SyncRecord, observed: PerSide<MsgFlags>) -> PerSide<FlagDelta> {
    let base = rec.flags;
    let (far_add, far_del) = changes(base, observed[Side::Far]);
    let (near_add, near_del) = changes(base, observed[Side::Near]);

    // What Near needs applied comes from Far's change, minus whatever
    // Near already independently agrees with.
    let to_near = FlagDelta {
        add: far_add & !observed[Side::Near],
        del: far_del & observed[Side::Near],
    };
    let to_far = FlagDelta {
        add: near_add & !observed[Side::Far],
        del: near_del & observed[Side::Far],
    };

    PerSide::new(to_far, to_near)
}

/// The flag set both sides should end up holding, and thus the new
/// committed base (spec §4.10's `CommitFlags`): the old base plus
/// every addition observed on either side, minus every deletion
/// observed on either side.
pub fn merged_flags(rec: &SyncRecord, observed: PerSide<MsgFlags>) -> MsgFlags {
    let base = rec.flags;
    let (far_add, far_del) = changes(base, observed[Side::Far]);
    let (near_add, near_del) = changes(base, observed[Side::Near]);
    (base | far_add | near_add) & !(far_del | near_del)
}

/// Placeholder records (spec §4.6's placeholder flag policy) only
/// ever accept a narrower flag set mirrored in from the real side —
/// `F_FLAGGED` is never written onto a stub (it would misfire as an
/// upgrade request the next cycle; flagging the stub itself is what
/// `upgrade::detect_trigger` watches for instead), and ANSWERED/
/// FORWARDED make no sense until the real body is upgraded in. SEEN
/// and DELETED still pass through.
pub fn placeholder_allowed_flags() -> MsgFlags {
    MsgFlags::SEEN | MsgFlags::DELETED
}

pub fn clamp_for_placeholder(rec: &SyncRecord, side: Side, delta: FlagDelta) -> FlagDelta {
    if !rec.is_dummy(side) {
        return delta;
    }
    let allowed = placeholder_allowed_flags();
    FlagDelta { add: delta.add & allowed, del: delta.del & allowed }
}

pub fn apply_delta(flags: MsgFlags, delta: FlagDelta) -> MsgFlags {
    (flags | delta.add) & !delta.del
}

/// Whether this record's status bits need rewriting in the state file
/// this run (e.g. a fresh EXPIRE/EXPIRED mark from the expire phase).
pub fn status_dirty(old: Status, new: Status) -> bool {
    old != new
}
