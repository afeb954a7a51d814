//! Trashing, expunge, and box close (spec §4.9).
//!
//! A deletion detected during `resolve` doesn't remove a record on the
//! spot: it's staged as a trash/expunge request, sent to the store,
//! and only turned into `Status::DEAD` once `close_box` confirms the
//! message is actually gone (or, when the store can't report which
//! UIDs it expunged, once the engine has no better information and
//! must trust its own request).

use std::collections::HashSet;

use crate::driver::Driver;
use crate::error::Result;

use super::journal::{Journal, JournalOp};
use super::policy::Ops;
use super::record::{EphemeralStatus, SyncRecord};
use super::side::Side;

/// What to do with a message on the side it vanished from, and its
/// partner on the opposite side (spec §4.9's trash-vs-expunge split).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashPlan {
    /// Move to Trash on `side` (soft delete, e.g. Maildir's Trash
    /// folder or IMAP COPY-then-flag).
    MoveToTrash(Side),
    /// Hard delete: flag \Deleted and rely on `close_box`'s EXPUNGE.
    Expunge(Side),
    /// No remote action needed; only the local record bookkeeping.
    RecordOnly,
}

pub fn plan_for(gone_side: Side, ops: Ops) -> TrashPlan {
    let partner = gone_side.other();
    if ops.contains(Ops::GONE) {
        if ops.intersects(Ops::EXPUNGE | Ops::EXPUNGE_SOLO) {
            TrashPlan::Expunge(partner)
        } else {
            TrashPlan::MoveToTrash(partner)
        }
    } else {
        TrashPlan::RecordOnly
    }
}

/// Apply a plan against whichever of `far`/`near` the plan names as
/// the side to act on, journaling the delete marker before sending it
/// (spec §5's before-acting-journal rule). `rec`'s delete-requested bit
/// for `partner_side` is only set when the plan actually sends a
/// trash/expunge request to the driver — a `RecordOnly` plan (no
/// `OP_GONE`) never touches the partner side's message, so
/// `reconcile_close` must not later treat it as gone.
#[allow(clippy::too_many_arguments)]
pub fn execute_plan(
    plan: TrashPlan,
    partner_side: Side,
    partner_uid: u32,
    rec: &mut SyncRecord,
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    journal: &mut Journal,
) -> Result<()> {
    let pick = |side: Side, far: &mut dyn Driver, near: &mut dyn Driver| -> &mut dyn Driver {
        match side {
            Side::Far => far,
            Side::Near => near,
        }
    };
    match plan {
        TrashPlan::MoveToTrash(side) => {
            journal.append(&JournalOp::Trashed { side, uid: partner_uid })?;
            pick(side, far, near).trash_msg(partner_uid)?;
            mark_delete_requested(rec, partner_side);
        }
        TrashPlan::Expunge(side) => {
            journal.append(&JournalOp::Trashed { side, uid: partner_uid })?;
            pick(side, far, near).set_msg_flags(
                partner_uid,
                crate::driver::MsgFlags::DELETED,
                crate::driver::MsgFlags::empty(),
            )?;
            mark_delete_requested(rec, partner_side);
        }
        TrashPlan::RecordOnly => {}
    }
    Ok(())
}

/// Close one side's box and reconcile which of its DELETED-flagged,
/// in-flight records actually got removed (spec §4.9's `reported`
/// case split). When the driver can't report specific UIDs
/// (`reported == false`), every record already marked gone-on-this-
/// side via `EphemeralStatus` is assumed expunged.
pub fn reconcile_close(
    side: Side,
    records: &mut [SyncRecord],
    reported: bool,
    expunged_uids: &[u32],
) {
    let expunged: HashSet<u32> = expunged_uids.iter().copied().collect();
    for rec in records.iter_mut() {
        if rec.is_dead() || rec.uid[side] == 0 {
            continue;
        }
        if !rec.ephemeral.contains(EphemeralStatus::del(side)) {
            continue;
        }
        let gone = if reported {
            expunged.contains(&rec.uid[side])
        } else {
            true
        };
        if gone {
            rec.uid[side] = 0;
            if !rec.has_any_uid() {
                rec.mark_dead();
            }
        }
    }
}

/// Mark both sides' ephemeral delete-request bit so `reconcile_close`
/// knows to look for this record once each box closes.
pub fn mark_delete_requested(rec: &mut SyncRecord, side: Side) {
    rec.ephemeral.insert(EphemeralStatus::del(side));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_without_op_gone_is_record_only() {
        assert_eq!(plan_for(Side::Far, Ops::FLAGS), TrashPlan::RecordOnly);
    }

    #[test]
    fn gone_with_op_gone_but_no_expunge_moves_to_trash() {
        assert_eq!(plan_for(Side::Far, Ops::GONE), TrashPlan::MoveToTrash(Side::Near));
    }

    #[test]
    fn gone_with_expunge_flag_hard_deletes() {
        assert_eq!(
            plan_for(Side::Near, Ops::GONE | Ops::EXPUNGE),
            TrashPlan::Expunge(Side::Far)
        );
    }

    #[test]
    fn reconcile_with_reported_uids_only_kills_listed_ones() {
        let mut rec_a = SyncRecord::new(1, 10);
        mark_delete_requested(&mut rec_a, Side::Far);
        let mut rec_b = SyncRecord::new(2, 20);
        mark_delete_requested(&mut rec_b, Side::Far);
        let mut records = vec![rec_a, rec_b];

        reconcile_close(Side::Far, &mut records, true, &[1]);
        assert_eq!(records[0].uid[Side::Far], 0);
        assert_eq!(records[1].uid[Side::Far], 2);
    }

    #[test]
    fn reconcile_without_reporting_trusts_every_requested_delete() {
        let mut rec = SyncRecord::new(1, 0);
        mark_delete_requested(&mut rec, Side::Far);
        let mut records = vec![rec];
        reconcile_close(Side::Far, &mut records, false, &[]);
        assert!(records[0].is_dead());
    }

    #[test]
    fn record_only_plan_never_marks_delete_requested() {
        use super::super::journal::Journal;
        use super::super::state::StateFile;
        use crate::driver::{Capabilities, Driver, LoadRange, LoadResult, MsgFlags, OpenFlags, StoreOutcome};
        use crate::error::{DriverOutcome, FailState, Result as DriverResult};
        use crate::engine::message::Message;

        struct NullDriver;
        impl Driver for NullDriver {
            fn get_caps(&self) -> Capabilities {
                Capabilities::default()
            }
            fn connect(&mut self) -> DriverResult<DriverOutcome> {
                Ok(DriverOutcome::Ok)
            }
            fn list_boxes(&mut self) -> DriverResult<Vec<String>> {
                Ok(Vec::new())
            }
            fn open_box(&mut self, _name: &str) -> DriverResult<Option<u32>> {
                Ok(None)
            }
            fn create_box(&mut self, _name: &str) -> DriverResult<DriverOutcome> {
                Ok(DriverOutcome::Ok)
            }
            fn delete_box(&mut self, _name: &str) -> DriverResult<DriverOutcome> {
                Ok(DriverOutcome::Ok)
            }
            fn confirm_box_empty(&mut self, _name: &str) -> DriverResult<bool> {
                Ok(true)
            }
            fn prepare_load_box(&mut self, opts: OpenFlags) -> DriverResult<OpenFlags> {
                Ok(opts)
            }
            fn load_box(&mut self, _range: &LoadRange) -> DriverResult<LoadResult> {
                Ok(LoadResult::default())
            }
            fn get_uidnext(&mut self) -> DriverResult<u32> {
                Ok(1)
            }
            fn get_supported_flags(&self) -> MsgFlags {
                MsgFlags::all()
            }
            fn fetch_msg(&mut self, _uid: u32, _minimal: bool) -> DriverResult<Vec<u8>> {
                Ok(Vec::new())
            }
            fn store_msg(&mut self, _data: &[u8], _to_trash: bool) -> DriverResult<StoreOutcome> {
                Ok(StoreOutcome::Unknown)
            }
            fn find_new_msgs(&mut self, _uidnext: u32) -> DriverResult<Vec<Message>> {
                Ok(Vec::new())
            }
            fn set_msg_flags(&mut self, _uid: u32, _add: MsgFlags, _del: MsgFlags) -> DriverResult<DriverOutcome> {
                Ok(DriverOutcome::Ok)
            }
            fn trash_msg(&mut self, _uid: u32) -> DriverResult<DriverOutcome> {
                Ok(DriverOutcome::Ok)
            }
            fn close_box(&mut self) -> DriverResult<(bool, Vec<u32>)> {
                Ok((false, Vec::new()))
            }
            fn cancel_cmds(&mut self) {}
            fn commit_cmds(&mut self) -> DriverResult<DriverOutcome> {
                Ok(DriverOutcome::Ok)
            }
            fn get_memory_usage(&self) -> usize {
                0
            }
            fn get_fail_state(&self) -> FailState {
                FailState::Ok
            }
            fn cancel_store(&mut self) {}
        }

        let mut far = NullDriver;
        let mut near = NullDriver;
        let dir = tempfile::tempdir().unwrap();
        let jpath = dir.path().join("journal");
        let state = StateFile::default();
        let mut journal = Journal::open(&jpath, &state).unwrap();

        let mut rec = SyncRecord::new(5, 7);
        execute_plan(TrashPlan::RecordOnly, Side::Near, 7, &mut rec, &mut far, &mut near, &mut journal).unwrap();
        assert!(!rec.ephemeral.contains(EphemeralStatus::del(Side::Near)));
    }
}
