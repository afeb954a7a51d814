//! Pair resolution (spec §4.5): deciding what to do with each
//! sync-record once both sides have been loaded — propagate a new
//! message, propagate a deletion, or leave the pair alone.

use super::policy::{ChannelPolicy, Ops};
use super::record::{EphemeralStatus, Status, SyncRecord};
use super::side::Side;

/// What the engine should do next with a given record, decided purely
/// from its current flags plus which sides still have a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Both sides present and paired: nothing to resolve here, flag
    /// sync handles it.
    Stable,
    /// Exactly one side has a message and the other never did:
    /// propagate to `.0`.
    PropagateTo(Side),
    /// One side had a message and it's now gone there: the record
    /// should be killed and the partner possibly expunged, depending
    /// on OP_GONE / OP_EXPUNGE.
    PropagateDeletion { gone: Side },
    /// Both sides are gone; purge the record outright.
    Purge,
    /// Leave untouched this run (e.g. still PENDING on a TUID that
    /// hasn't resolved yet).
    Defer,
}

/// Resolve a single record given which sides are still known-present
/// after the load phase (spec §4.5's decision table).
pub fn resolve_record(rec: &SyncRecord, present: &super::side::PerSide<bool>, ops: Ops) -> Resolution {
    if rec.is_dead() {
        return Resolution::Defer;
    }
    if rec.is_pending() {
        // A TUID-tagged record still awaiting its partner to show up
        // under FIND_OLD/FIND_NEW; load's match_messages will resolve
        // it when the message appears. Nothing to do yet.
        return Resolution::Defer;
    }

    let far_has = rec.uid[Side::Far] != 0 && present[Side::Far];
    let near_has = rec.uid[Side::Near] != 0 && present[Side::Near];
    let far_known = rec.uid[Side::Far] != 0;
    let near_known = rec.uid[Side::Near] != 0;

    match (far_known, near_known, far_has, near_has) {
        (true, true, true, true) => Resolution::Stable,
        (true, false, _, _) => {
            if ops.contains(Ops::NEW) {
                Resolution::PropagateTo(Side::Near)
            } else {
                Resolution::Defer
            }
        }
        (false, true, _, _) => {
            if ops.contains(Ops::NEW) {
                Resolution::PropagateTo(Side::Far)
            } else {
                Resolution::Defer
            }
        }
        (true, true, false, true) => Resolution::PropagateDeletion { gone: Side::Far },
        (true, true, true, false) => Resolution::PropagateDeletion { gone: Side::Near },
        (true, true, false, false) => Resolution::Purge,
        (false, false, _, _) => Resolution::Purge,
    }
}

/// Apply the ephemeral bookkeeping for a deletion decision (spec
/// §4.9): mark which side went away so `trash` can decide whether to
/// expunge the partner, without yet touching the durable `Status`.
pub fn mark_gone(rec: &mut SyncRecord, side: Side) {
    rec.ephemeral.insert(EphemeralStatus::gone(side));
}

/// A record is eligible for purge once both sides have confirmed gone
/// and neither OP_EXPUNGE_SOLO nor a pending placeholder upgrade holds
/// it back.
pub fn eligible_for_purge(rec: &SyncRecord) -> bool {
    !rec.status.contains(Status::DEAD)
        && rec.ephemeral.contains(EphemeralStatus::gone(Side::Far))
        && rec.ephemeral.contains(EphemeralStatus::gone(Side::Near))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::side::PerSide;

    fn present(far: bool, near: bool) -> PerSide<bool> {
        PerSide::new(far, near)
    }

    #[test]
    fn stable_pair_needs_no_action() {
        let rec = SyncRecord::new(1, 2);
        let r = resolve_record(&rec, &present(true, true), Ops::default());
        assert_eq!(r, Resolution::Stable);
    }

    #[test]
    fn far_only_propagates_to_near_when_op_new_set() {
        let rec = SyncRecord::new(1, 0);
        let r = resolve_record(&rec, &present(true, false), Ops::default());
        assert_eq!(r, Resolution::PropagateTo(Side::Near));

        let r2 = resolve_record(&rec, &present(true, false), Ops::FLAGS);
        assert_eq!(r2, Resolution::Defer);
    }

    #[test]
    fn vanished_near_side_propagates_deletion() {
        let rec = SyncRecord::new(1, 2);
        let r = resolve_record(&rec, &present(true, false), Ops::default());
        assert_eq!(r, Resolution::PropagateDeletion { gone: Side::Near });
    }

    #[test]
    fn both_sides_missing_uids_purge_immediately() {
        let rec = SyncRecord::new(0, 0);
        let r = resolve_record(&rec, &present(false, false), Ops::default());
        assert_eq!(r, Resolution::Purge);
    }

    #[test]
    fn pending_record_defers() {
        let mut rec = SyncRecord::new(1, 0);
        rec.status.insert(Status::PENDING);
        let r = resolve_record(&rec, &present(true, false), Ops::default());
        assert_eq!(r, Resolution::Defer);
    }
}
