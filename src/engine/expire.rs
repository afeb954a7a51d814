//! Expiration (spec §4.8): once a box holds more than `MaxMessages`
//! live pairs, mark the oldest ones EXPIRE so the propagate/flags
//! phases stop refreshing them, and promote EXPIRE to EXPIRED once
//! they're confirmed gone from the expiring side's live view.

use crate::driver::MsgFlags;

use super::policy::ChannelPolicy;
use super::record::{Status, SyncRecord};
use super::side::Side;

/// Decide which live, non-expired records on `policy.expire_side`
/// should be newly marked EXPIRE this run, oldest-UID-first, so that
/// at most `max_messages` remain un-marked.
///
/// `important` messages — FLAGGED, or unread when `expire_unread ==
/// Some(false)` (i.e. "don't expire unread") — are skipped over and
/// never counted against the living total, per spec §4.8 point 5/6.
pub fn select_for_expiry(records: &mut [SyncRecord], policy: &ChannelPolicy) -> Vec<usize> {
    if !policy.expire_enabled() {
        return Vec::new();
    }

    let side = policy.expire_side;
    let mut candidates: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            !r.is_dead()
                && r.uid[side] != 0
                && !r.status.contains(Status::EXPIRE)
                && !r.status.contains(Status::EXPIRED)
        })
        .map(|(i, _)| i)
        .collect();
    candidates.sort_by_key(|&i| records[i].uid[side]);

    let live_count = records
        .iter()
        .filter(|r| !r.is_dead() && r.uid[side] != 0 && !r.status.contains(Status::EXPIRED))
        .count();
    if live_count <= policy.max_messages as usize {
        return Vec::new();
    }
    let mut to_mark = live_count - policy.max_messages as usize;

    let mut marked = Vec::new();
    for idx in candidates {
        if to_mark == 0 {
            break;
        }
        if is_important(&records[idx], policy) {
            continue;
        }
        marked.push(idx);
        to_mark -= 1;
    }
    for &idx in &marked {
        records[idx].status.insert(Status::EXPIRE);
    }
    marked
}

fn is_important(rec: &SyncRecord, policy: &ChannelPolicy) -> bool {
    if rec.flags.contains(MsgFlags::FLAGGED) {
        return true;
    }
    match policy.expire_unread {
        Some(false) => !rec.flags.contains(MsgFlags::SEEN),
        _ => false,
    }
}

/// Promote EXPIRE to EXPIRED once the record's presence on the
/// expiring side has actually been dropped from this run's live set
/// (i.e. it's been trashed/expunged already, per spec §4.9's ordering
/// with expiry). `side` is the box just closed; `expire_side` is the
/// channel's configured `MaxMessages` side (far or near) — only a
/// close of that side can ever confirm an expiration.
pub fn confirm_expired(rec: &mut SyncRecord, side: Side, expire_side: Side, still_present: bool) {
    if rec.status.contains(Status::EXPIRE) && !still_present && side == expire_side {
        rec.status.remove(Status::EXPIRE);
        rec.status.insert(Status::EXPIRED);
    }
}

/// `maxxfuid` (spec §4.8 point 7): the highest far-side UID ever
/// expired, persisted so a later MaxMessages increase doesn't
/// resurrect already-expired messages older than it.
pub fn bump_max_expired_uid(current: u32, rec_far_uid: u32) -> u32 {
    current.max(rec_far_uid)
}
