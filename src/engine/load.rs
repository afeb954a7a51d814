//! Load and pair matching (spec §4.4).

use std::collections::HashMap;

use crate::driver::{LoadRange, OpenFlags};

use super::message::Message;
use super::policy::{ChannelPolicy, Ops};
use super::record::{Status, SyncRecord};
use super::side::Side;
use super::state::StateFile;

/// Derive the `OPEN_*` bitset a driver is told to populate (spec
/// §4.4): from the channel's requested operations, from any in-flight
/// records discovered during journal replay, and from whether the
/// expire side has messages beyond `maxxfuid`.
pub fn derive_open_flags(policy: &ChannelPolicy, state: &StateFile, side: Side) -> OpenFlags {
    let mut flags = OpenFlags::PAIRED | OpenFlags::PAIRED_IDS;
    if policy.ops.contains(Ops::FLAGS) {
        flags |= OpenFlags::FLAGS | OpenFlags::SETFLAGS;
    }
    if policy.ops.contains(Ops::NEW) {
        flags |= OpenFlags::NEW | OpenFlags::APPEND;
    }
    if policy.ops.contains(Ops::OLD) {
        flags |= OpenFlags::OLD | OpenFlags::OLD_SIZE;
    }
    if policy.ops.intersects(Ops::EXPUNGE | Ops::EXPUNGE_SOLO) {
        flags |= OpenFlags::EXPUNGE | OpenFlags::UID_EXPUNGE;
    }
    if state.records.iter().any(|r| r.is_pending() && !r.tuid.is_empty()) {
        flags |= OpenFlags::FIND;
    }
    if side == policy.expire_side && policy.expire_enabled() {
        flags |= OpenFlags::NEW_SIZE;
    }
    flags
}

/// Build the `[minuid, maxuid]` window plus the exception list of
/// below-`minuid` UIDs still paired with a live record on the other
/// side (spec §4.4) — this is what keeps the bulk load bounded even
/// with very old paired messages still around.
pub fn build_load_range(state: &StateFile, side: Side, min_uid: u32) -> LoadRange {
    let exceptions: Vec<u32> = state
        .records
        .iter()
        .filter(|r| !r.is_dead() && r.uid[side] != 0 && r.uid[side] < min_uid && r.uid[side.other()] != 0)
        .map(|r| r.uid[side])
        .collect();
    LoadRange { min_uid, max_uid: u32::MAX, exceptions }
}

/// Index records by UID on one side, for O(1) match during load.
pub fn index_records_by_uid(state: &StateFile, side: Side) -> HashMap<u32, usize> {
    state
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_dead() && r.uid[side] != 0)
        .map(|(i, r)| (r.uid[side], i))
        .collect()
}

/// Match loaded messages against sync-records: first by UID, then —
/// for still-unmatched messages carrying a TUID — against any record
/// in the FIND_OLD set (a PENDING record whose TUID was journaled
/// before an interruption, spec §4.4/§4.7/S5).
pub fn match_messages(state: &mut StateFile, side: Side, messages: &mut [Message]) {
    let by_uid = index_records_by_uid(state, side);
    let mut by_tuid: HashMap<&str, usize> = HashMap::new();
    for (i, r) in state.records.iter().enumerate() {
        if r.is_pending() && !r.tuid.is_empty() {
            by_tuid.insert(r.tuid.as_str(), i);
        }
    }

    for msg in messages.iter_mut() {
        if let Some(&idx) = by_uid.get(&msg.uid) {
            msg.srec = Some(idx);
            state.records[idx].uid[side] = msg.uid;
            continue;
        }
        if let Some(tuid) = &msg.tuid {
            if let Some(&idx) = by_tuid.get(tuid.as_str()) {
                msg.srec = Some(idx);
                state.records[idx].uid[side] = msg.uid;
                state.records[idx].status.remove(Status::PENDING);
                state.records[idx].tuid.clear();
            }
        }
    }
}

/// UIDVALIDITY re-approval (spec §4.4): when exactly one side's
/// UIDVALIDITY changed, require Message-ID agreement on every record
/// still paired on both sides. Accept if either at least 20 pairs
/// agree, or at least 80% of previously-known pairs still agree.
pub fn reapprove_uid_validity(matches: usize, total_checked: usize) -> bool {
    if total_checked == 0 {
        // Nothing to check against: neither confirms nor refutes.
        return false;
    }
    matches >= 20 || (matches as f64) >= 0.8 * (total_checked as f64)
}

/// Classify a loaded message ID list for re-approval: compares
/// `(far_msgid, near_msgid)` pairs for every record still paired on
/// both sides, and reports how many agree.
pub fn count_msgid_agreement(pairs: &[(Option<String>, Option<String>)]) -> (usize, usize) {
    let mut checked = 0usize;
    let mut agree = 0usize;
    for (far, near) in pairs {
        if let (Some(f), Some(n)) = (far, near) {
            checked += 1;
            if f == n {
                agree += 1;
            }
        }
    }
    (agree, checked)
}

/// Every loaded-but-unmatched source message becomes eligible for a
/// new record, per the UID-vs-maxuid split in spec §4.5 (the decision
/// of whether to actually propagate it happens in `resolve`).
pub fn unmatched_messages<'a>(messages: &'a [Message]) -> impl Iterator<Item = &'a Message> {
    messages.iter().filter(|m| m.srec.is_none() && !m.is_dead())
}

pub fn new_record_for(far_uid: u32, near_uid: u32) -> SyncRecord {
    let mut rec = SyncRecord::new(far_uid, near_uid);
    rec.status.insert(Status::PENDING);
    rec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reapproval_accepts_on_twenty_matches() {
        assert!(reapprove_uid_validity(20, 20));
        assert!(!reapprove_uid_validity(19, 100));
    }

    #[test]
    fn reapproval_accepts_on_eighty_percent() {
        assert!(reapprove_uid_validity(8, 10));
        assert!(!reapprove_uid_validity(7, 10));
    }

    #[test]
    fn msgid_agreement_counts_only_fully_known_pairs() {
        let pairs = vec![
            (Some("a".to_string()), Some("a".to_string())),
            (Some("b".to_string()), Some("x".to_string())),
            (None, Some("c".to_string())),
        ];
        let (agree, checked) = count_msgid_agreement(&pairs);
        assert_eq!(checked, 2);
        assert_eq!(agree, 1);
    }
}
