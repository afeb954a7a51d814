//! New-message propagation (spec §4.7).
//!
//! Crash safety here hinges on ordering: a record is journaled as
//! PENDING with a TUID *before* the message is stored on the target
//! side, and the journal is fsynced right after the TUID block so a
//! crash mid-append can always be resumed by matching the stored
//! message back to its TUID on the next run (spec §5, scenario S5).

use rand::Rng;

use crate::driver::{Driver, StoreOutcome};
use crate::error::Result;

use super::convert::{convert, ConvertOptions, PlaceholderInfo};
use super::journal::{Journal, JournalOp};
use super::policy::ChannelPolicy;
use super::record::{Status, SyncRecord};
use super::side::Side;

/// Generate a fresh TUID: unique within a single run is all the spec
/// requires, since it only ever needs to disambiguate in-flight
/// records against messages freshly reloaded from the same store.
pub fn new_tuid() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            std::char::from_digit(n as u32, 36).unwrap()
        })
        .collect()
}

pub struct PropagateOutcome {
    pub stored_uid: Option<u32>,
    pub used_placeholder: bool,
}

/// Propagate one message from `src_side` to the opposite store,
/// creating (or completing) `rec` along the way. `rec` must already
/// be journaled as PENDING with `rec.tuid` set before this is called —
/// the caller (`engine::mod::run_pair`) owns that fsync boundary.
#[allow(clippy::too_many_arguments)]
pub fn propagate_new(
    src: &mut dyn Driver,
    dst: &mut dyn Driver,
    src_side: Side,
    rec: &mut SyncRecord,
    src_uid: u32,
    policy: &ChannelPolicy,
    journal: &mut Journal,
) -> Result<PropagateOutcome> {
    let dst_side = src_side.other();
    let raw = src.fetch_msg(src_uid, false)?;

    let oversized = policy.max_size > 0 && raw.len() as u64 > policy.max_size;
    let placeholder = if oversized {
        Some(PlaceholderInfo {
            original_size: raw.len() as u64,
            flagged: rec.flags.contains(crate::driver::MsgFlags::FLAGGED),
        })
    } else {
        None
    };
    if oversized {
        rec.status.insert(Status::dummy(dst_side));
    }

    let opts = ConvertOptions {
        target_crlf: false,
        tuid: Some(rec.tuid.clone()),
        placeholder,
    };
    let converted = convert(&raw, &opts).map_err(|e| {
        crate::error::SyncError::MessageDefect(format!("conversion failed for uid {src_uid}: {e}"))
    })?;

    let outcome = dst.store_msg(&converted, false)?;
    let stored_uid = match outcome {
        StoreOutcome::Uid(uid) => Some(uid),
        StoreOutcome::Unknown => None,
    };

    if let Some(uid) = stored_uid {
        // `find_index` during replay locates a record by its
        // *pre*-assignment UID pair (a still-PENDING record has 0 on
        // `dst_side`), so the identifying far/near fields here must be
        // the old values, not the one just assigned.
        let old_far = rec.uid[Side::Far];
        let old_near = rec.uid[Side::Near];
        rec.uid[dst_side] = uid;
        rec.status.remove(Status::PENDING);
        let op = match dst_side {
            Side::Far => JournalOp::AssignFar {
                far: old_far,
                near: old_near,
                new_far: uid,
            },
            Side::Near => JournalOp::AssignNear {
                far: old_far,
                near: old_near,
                new_near: uid,
            },
        };
        journal.append(&op)?;
        rec.tuid.clear();
    }
    // else: left PENDING with its TUID; `load`'s FIND_NEW/FIND_OLD pass
    // on the next run (or later this run, if the driver supports it)
    // resolves the UID by matching the X-TUID header back.

    Ok(PropagateOutcome { stored_uid, used_placeholder: oversized })
}

/// Start a brand-new pairing for a message seen on only one side:
/// journal the PENDING record and its TUID, fsync, then return the
/// record ready for `propagate_new`.
pub fn begin_new_pairing(src_side: Side, src_uid: u32, journal: &mut Journal) -> Result<SyncRecord> {
    let (far, near) = match src_side {
        Side::Far => (src_uid, 0),
        Side::Near => (0, src_uid),
    };
    let mut rec = SyncRecord::new(far, near);
    rec.status.insert(Status::PENDING);
    let tuid = new_tuid();
    rec.tuid = tuid.clone();

    journal.append(&JournalOp::NewPending { far, near })?;
    journal.append(&JournalOp::TuidBegin { far, near })?;
    journal.append(&JournalOp::TuidValue { far, near, tuid })?;
    journal.fsync()?;

    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuids_are_eight_base36_chars() {
        let t = new_tuid();
        assert_eq!(t.len(), 8);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn tuids_are_unlikely_to_collide_across_many_draws() {
        let set: std::collections::HashSet<String> = (0..1000).map(|_| new_tuid()).collect();
        assert!(set.len() > 990);
    }
}
