//! The mailbox-pair synchronization engine (spec §2, §4).
//!
//! `run_pair` drives one far/near box pair through the phases spec §2
//! lists in order: state setup, box selection, load, pair resolution,
//! flag sync, new-message propagation, expiration, trashing/expunge,
//! and state commit. Each submodule here implements one phase; this
//! file is the `match`-driven state machine spec §9 asks a systems
//! reimplementation to lift the original's continuation-passing
//! callbacks into.

pub mod boxes;
pub mod commit;
pub mod convert;
pub mod expire;
pub mod flags;
pub mod journal;
pub mod load;
pub mod lock;
pub mod message;
pub mod phase;
pub mod policy;
pub mod propagate;
pub mod record;
pub mod resolve;
pub mod setup;
pub mod side;
pub mod state;
pub mod trash;
pub mod upgrade;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::driver::{Driver, MsgFlags, OpenFlags};
use crate::error::Result;

use journal::JournalOp;
use message::Message;
use phase::PairOutcome;
use policy::{ChannelPolicy, Ops};
use record::Status;
use resolve::Resolution;
use side::{PerSide, Side};
use state::StateFile;

/// Everything this run needed to know to address one box pair.
pub struct PairRequest<'a> {
    pub policy: &'a ChannelPolicy,
    pub far_name: &'a str,
    pub near_name: &'a str,
    pub state_path: &'a Path,
    /// Compute decisions and log them, but never call a driver method
    /// that mutates the far/near store (SPEC_FULL §C).
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct PairReport {
    pub outcome: Option<PairOutcome>,
    pub propagated: PerSide<u32>,
    pub expired: u32,
    pub lost_track: Vec<String>,
}

/// Run one box pair to completion (or to the point `dry_run` allows),
/// following the phase order of spec §2/§4.1.
#[instrument(skip(far, near, req), fields(far_box = req.far_name, near_box = req.near_name))]
pub fn run_pair(far: &mut dyn Driver, near: &mut dyn Driver, req: &PairRequest) -> Result<PairReport> {
    let policy = req.policy;
    let mut report = PairReport::default();

    // --- §4.2: state setup ---------------------------------------------
    let setup::SetupResult { lock, mut state, mut journal, existed } = setup::setup(req.state_path)?;

    // --- §4.3: box confirmation / creation -------------------------------
    let boxes_result = boxes::confirm_boxes(far, near, req.far_name, req.near_name, existed, policy.ops)?;
    if boxes_result.disposition == boxes::PairDisposition::Skip {
        commit::prune_resolved(&mut state);
        commit::commit(&state, req.state_path, journal)?;
        drop(lock);
        report.outcome = Some(PairOutcome::Ok);
        return Ok(report);
    }

    // --- UIDVALIDITY handling (spec §4.2/§4.4) --------------------------
    let prev_uv = state.header.uid_validity;
    reconcile_uid_validity(&mut state, &boxes_result.uid_validity, &mut journal)?;

    // --- §4.4: load ------------------------------------------------------
    let far_flags = far.prepare_load_box(load::derive_open_flags(policy, &state, Side::Far))?;
    let near_flags = near.prepare_load_box(load::derive_open_flags(policy, &state, Side::Near))?;

    let far_min = load_floor(far_flags, state.header.max_pulled_uid);
    let near_min = load_floor(near_flags, state.header.max_pushed_uid);
    let far_range = load::build_load_range(&state, Side::Far, far_min);
    let near_range = load::build_load_range(&state, Side::Near, near_min);

    let mut far_loaded = far.load_box(&far_range)?;
    let mut near_loaded = near.load_box(&near_range)?;
    load::match_messages(&mut state, Side::Far, &mut far_loaded.messages);
    load::match_messages(&mut state, Side::Near, &mut near_loaded.messages);

    reapprove_after_load(
        &mut state,
        prev_uv,
        &boxes_result.uid_validity,
        &far_loaded.messages,
        &near_loaded.messages,
        &mut journal,
    )?;

    if req.dry_run {
        info!("dry-run: stopping before any driver mutation");
        drop(lock);
        report.outcome = Some(PairOutcome::Ok);
        return Ok(report);
    }

    // --- §4.5: pair resolution + §4.7: new-message propagation ----------
    // Records `propagate_unmatched` creates below are freshly stored
    // this run, so naturally absent from the pre-propagation load
    // snapshot the `_present` sets below are built from. Resolving
    // deletions only over records that existed before this boundary
    // keeps a message this run just copied in from being read back as
    // "gone" on the side it was only just written to.
    let existing_record_count = state.records.len();
    resume_pending_propagations(far, near, policy, &mut state, &mut journal, &mut report, existing_record_count)?;
    propagate_unmatched(
        far,
        near,
        &far_loaded.messages,
        &near_loaded.messages,
        policy,
        &mut state,
        &mut journal,
        &mut report,
    )?;

    let far_present: HashSet<u32> = far_loaded.messages.iter().map(|m| m.uid).collect();
    let near_present: HashSet<u32> = near_loaded.messages.iter().map(|m| m.uid).collect();

    resolve_existing(far, near, &far_present, &near_present, policy, existing_record_count, &mut state, &mut journal)?;

    // --- §4.6: flag synchronization --------------------------------------
    sync_flags(far, near, &far_loaded.messages, &near_loaded.messages, &mut state, &mut journal)?;

    // --- §4.8: expiration --------------------------------------------------
    if policy.expire_enabled() {
        report.expired = run_expiry(far, near, policy, &mut state, &mut journal)?;
    }

    // --- §4.9: trashing, expunge, close -------------------------------------
    close_side(far, Side::Far, policy.expire_side, &mut state)?;
    close_side(near, Side::Near, policy.expire_side, &mut state)?;

    // --- §4.10: state commit ------------------------------------------------
    let far_max = far_loaded.messages.iter().map(|m| m.uid).max().unwrap_or(0);
    let near_max = near_loaded.messages.iter().map(|m| m.uid).max().unwrap_or(0);
    commit::bump_watermarks(&mut state, &mut journal, Side::Far, far_max)?;
    commit::bump_watermarks(&mut state, &mut journal, Side::Near, near_max)?;
    commit::prune_resolved(&mut state);
    commit::commit(&state, req.state_path, journal)?;
    drop(lock);

    report.outcome = Some(PairOutcome::Ok);
    Ok(report)
}

/// `OPEN_OLD` (or a pending FIND lookup) widens the load floor back to
/// the start of the box; otherwise only messages past the previous
/// run's high-water mark are fetched fresh (spec §4.4's bounded load —
/// still-paired older messages come back in via the exception list).
fn load_floor(flags: OpenFlags, max_uid_seen: u32) -> u32 {
    if flags.intersects(OpenFlags::OLD | OpenFlags::FIND) {
        1
    } else {
        max_uid_seen + 1
    }
}

/// UIDVALIDITY handling (spec §4.2, §4.4): record it on first open,
/// fail outright if both sides changed, and otherwise leave the
/// decision to `reapprove_after_load` once Message-IDs are in hand.
fn reconcile_uid_validity(
    state: &mut StateFile,
    seen: &PerSide<Option<u32>>,
    journal: &mut journal::Journal,
) -> Result<()> {
    let prev = state.header.uid_validity;
    let far_changed = matches!(seen[Side::Far], Some(v) if prev[Side::Far] != 0 && v != prev[Side::Far]);
    let near_changed = matches!(seen[Side::Near], Some(v) if prev[Side::Near] != 0 && v != prev[Side::Near]);

    if far_changed && near_changed {
        return Err(crate::error::SyncError::BoxDefect(
            "UIDVALIDITY changed on both sides: cannot reconcile".to_string(),
        ));
    }

    let mut new_uv = prev;
    if let Some(v) = seen[Side::Far] {
        if prev[Side::Far] == 0 {
            new_uv[Side::Far] = v;
        }
    }
    if let Some(v) = seen[Side::Near] {
        if prev[Side::Near] == 0 {
            new_uv[Side::Near] = v;
        }
    }
    if new_uv != prev {
        journal.append(&JournalOp::NewUidValidity { far_uv: new_uv[Side::Far], near_uv: new_uv[Side::Near] })?;
        state.header.uid_validity = new_uv;
    }
    // A single-side change is reconciled once messages (and their
    // Message-IDs) are loaded; see `reapprove_after_load`, called from
    // the caller right after load returns.
    Ok(())
}

/// Message-ID agreement check for the single-side-changed case (spec
/// §4.4). Called after load with both sides' Message-IDs in hand;
/// accepts the new UIDVALIDITY into the header on success, fails the
/// pair otherwise.
fn reapprove_after_load(
    state: &mut StateFile,
    prev_uv: PerSide<u32>,
    seen: &PerSide<Option<u32>>,
    far_msgs: &[Message],
    near_msgs: &[Message],
    journal: &mut journal::Journal,
) -> Result<()> {
    let far_changed = matches!(seen[Side::Far], Some(v) if prev_uv[Side::Far] != 0 && v != prev_uv[Side::Far]);
    let near_changed = matches!(seen[Side::Near], Some(v) if prev_uv[Side::Near] != 0 && v != prev_uv[Side::Near]);
    if !far_changed && !near_changed {
        return Ok(());
    }

    let far_by_uid: HashMap<u32, &Message> = far_msgs.iter().map(|m| (m.uid, m)).collect();
    let near_by_uid: HashMap<u32, &Message> = near_msgs.iter().map(|m| (m.uid, m)).collect();

    let pairs: Vec<(Option<String>, Option<String>)> = state
        .records
        .iter()
        .filter(|r| !r.is_dead() && r.uid[Side::Far] != 0 && r.uid[Side::Near] != 0)
        .map(|r| {
            let f = far_by_uid.get(&r.uid[Side::Far]).and_then(|m| m.msgid.clone());
            let n = near_by_uid.get(&r.uid[Side::Near]).and_then(|m| m.msgid.clone());
            (f, n)
        })
        .collect();

    let (agree, checked) = load::count_msgid_agreement(&pairs);
    if !load::reapprove_uid_validity(agree, checked) {
        return Err(crate::error::SyncError::BoxDefect(format!(
            "UIDVALIDITY change could not be re-approved ({agree}/{checked} Message-IDs agree)"
        )));
    }

    let new_far = seen[Side::Far].unwrap_or(prev_uv[Side::Far]);
    let new_near = seen[Side::Near].unwrap_or(prev_uv[Side::Near]);
    journal.append(&JournalOp::NewUidValidity { far_uv: new_far, near_uv: new_near })?;
    state.header.uid_validity = PerSide::new(new_far, new_near);
    info!(agree, checked, "UIDVALIDITY change re-approved by Message-ID agreement");
    Ok(())
}

/// Default `BufferLimit` (spec §4.7): caps driver-held body buffers
/// before new copies suspend.
const BUFFER_LIMIT: usize = 10 * 1024 * 1024;

/// New-message propagation for every loaded-but-unmatched message on
/// either side (spec §4.5's "no sync-record" branch, §4.7's copy).
#[allow(clippy::too_many_arguments)]
fn propagate_unmatched(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    far_msgs: &[Message],
    near_msgs: &[Message],
    policy: &ChannelPolicy,
    state: &mut StateFile,
    journal: &mut journal::Journal,
    report: &mut PairReport,
) -> Result<()> {
    propagate_unmatched_one_side(far, near, Side::Far, far_msgs, state.header.max_pulled_uid, policy, state, journal, report)?;
    propagate_unmatched_one_side(near, far, Side::Near, near_msgs, state.header.max_pushed_uid, policy, state, journal, report)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn propagate_unmatched_one_side(
    src: &mut dyn Driver,
    dst: &mut dyn Driver,
    src_side: Side,
    src_msgs: &[Message],
    max_uid_seen: u32,
    policy: &ChannelPolicy,
    state: &mut StateFile,
    journal: &mut journal::Journal,
    report: &mut PairReport,
) -> Result<()> {
    let candidates: Vec<&Message> = load::unmatched_messages(src_msgs).collect();
    for msg in candidates {
        let is_new = msg.uid > max_uid_seen;
        let eligible = if is_new { policy.ops.contains(Ops::NEW) } else { policy.ops.contains(Ops::OLD) };
        if !eligible {
            continue;
        }

        let mut rec = propagate::begin_new_pairing(src_side, msg.uid, journal)?;
        attempt_propagation(src, dst, src_side, &mut rec, msg.uid, policy, journal, report)?;
        state.records.push(rec);
    }
    Ok(())
}

/// Re-attempt delivery for records already `PENDING` with a TUID
/// before this run started (i.e. restored by journal replay) whose
/// target side is still unset — a crash between the TUID being
/// journaled and `store_msg` actually being called (spec §5, scenario
/// S5). `load::match_messages`'s FIND_OLD pass already resolved any
/// record whose target-side message turned out to exist after all
/// (the store succeeded but the UID assignment was never
/// acknowledged); what's left here genuinely never reached
/// `store_msg`, so the only way forward is to drive the copy again
/// with the same TUID.
#[allow(clippy::too_many_arguments)]
fn resume_pending_propagations(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    policy: &ChannelPolicy,
    state: &mut StateFile,
    journal: &mut journal::Journal,
    report: &mut PairReport,
    existing_record_count: usize,
) -> Result<()> {
    for idx in 0..existing_record_count {
        let (far_uid, near_uid, is_pending, has_tuid) = {
            let r = &state.records[idx];
            (r.uid[Side::Far], r.uid[Side::Near], r.is_pending(), !r.tuid.is_empty())
        };
        if !is_pending || !has_tuid {
            continue;
        }
        let (src_side, src_uid) = if far_uid != 0 { (Side::Far, far_uid) } else { (Side::Near, near_uid) };
        if state.records[idx].uid[src_side.other()] != 0 {
            continue;
        }
        let (src, dst): (&mut dyn Driver, &mut dyn Driver) = match src_side {
            Side::Far => (far, near),
            Side::Near => (near, far),
        };
        attempt_propagation(src, dst, src_side, &mut state.records[idx], src_uid, policy, journal, report)?;
    }
    Ok(())
}

/// Drive one message's copy from `src_side` to the opposite store for
/// `rec` (already `PENDING` with its TUID set and journaled), handling
/// backpressure, the UIDPLUS-direct-UID case, and the FIND_NEW-by-TUID
/// fallback (spec §4.7). Shared by a freshly discovered message this
/// run and by a record resumed from a previous run's journal.
#[allow(clippy::too_many_arguments)]
fn attempt_propagation(
    src: &mut dyn Driver,
    dst: &mut dyn Driver,
    src_side: Side,
    rec: &mut record::SyncRecord,
    src_uid: u32,
    policy: &ChannelPolicy,
    journal: &mut journal::Journal,
    report: &mut PairReport,
) -> Result<()> {
    // Backpressure (spec §4.7): a synchronous driver has nowhere to
    // "suspend to" between ticks, so the nearest equivalent is to
    // flush whatever it's holding before piling on more.
    if dst.get_memory_usage() > BUFFER_LIMIT {
        dst.commit_cmds()?;
    }

    let uidnext_before = dst.get_uidnext().ok();

    let outcome = match propagate::propagate_new(src, dst, src_side, rec, src_uid, policy, journal) {
        Ok(o) => o,
        Err(crate::error::SyncError::MessageDefect(detail)) => {
            warn!(uid = src_uid, detail = %detail, "message defect during propagation, skipping");
            rec.mark_dead();
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if outcome.stored_uid.is_some() {
        report.propagated[src_side.other()] += 1;
        return Ok(());
    }
    let Some(uidnext) = uidnext_before else {
        return Ok(());
    };
    journal.append(&JournalOp::SaveUidNext { side: src_side.other(), uidnext })?;
    match dst.find_new_msgs(uidnext) {
        Ok(found) => {
            if let Some(m) = found.iter().find(|m| m.tuid.as_deref() == Some(rec.tuid.as_str())) {
                // Identifying far/near fields must be the
                // pre-assignment UIDs (0 on the just-assigned side),
                // matching how replay's `find_index` locates the
                // still-PENDING record.
                let old_far = rec.uid[Side::Far];
                let old_near = rec.uid[Side::Near];
                rec.uid[src_side.other()] = m.uid;
                rec.status.remove(Status::PENDING);
                rec.tuid.clear();
                let op = match src_side.other() {
                    Side::Far => JournalOp::AssignFar { far: old_far, near: old_near, new_far: m.uid },
                    Side::Near => JournalOp::AssignNear { far: old_far, near: old_near, new_near: m.uid },
                };
                journal.append(&op)?;
                report.propagated[src_side.other()] += 1;
            } else {
                report.lost_track.push(rec.tuid.clone());
                warn!(tuid = %rec.tuid, "lost track of propagated message");
            }
        }
        Err(_) => {
            report.lost_track.push(rec.tuid.clone());
        }
    }
    Ok(())
}

/// Deletion propagation and purge for records already paired before
/// this run (spec §4.5's existing-record branch, §4.9's trash plan).
/// `existing_record_count` bounds the loop to those records, excluding
/// ones `propagate_unmatched` just pushed this run.
fn resolve_existing(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    far_present: &HashSet<u32>,
    near_present: &HashSet<u32>,
    policy: &ChannelPolicy,
    existing_record_count: usize,
    state: &mut StateFile,
    journal: &mut journal::Journal,
) -> Result<()> {
    for idx in 0..existing_record_count {
        let (far_uid, near_uid, is_dead, is_pending) = {
            let r = &state.records[idx];
            (r.uid[Side::Far], r.uid[Side::Near], r.is_dead(), r.is_pending())
        };
        if is_dead || is_pending || (far_uid == 0 && near_uid == 0) {
            continue;
        }
        let present = PerSide::new(far_present.contains(&far_uid), near_present.contains(&near_uid));
        let resolution = resolve::resolve_record(&state.records[idx], &present, policy.ops);

        match resolution {
            Resolution::PropagateDeletion { gone } => {
                // An active expire transaction authorizes this
                // disappearance without treating it as a user deletion
                // (spec §4.5's expire-aware row, §4.9's trash guard).
                if state.records[idx].status.contains(Status::EXPIRE) {
                    continue;
                }
                resolve::mark_gone(&mut state.records[idx], gone);
                // The gone side's message is already absent from this
                // run's load, not merely flagged for removal — clear
                // its UID now rather than waiting on a close-time
                // confirmation that will never arrive for this side
                // (spec §4.10: "one side is gone ... orphan the
                // non-gone UID" once the partner's own removal is
                // confirmed; here it's this side that's already gone).
                state.records[idx].uid[gone] = 0;
                let partner_side = gone.other();
                let partner_uid = state.records[idx].uid[partner_side];
                if partner_uid != 0 {
                    let plan = trash::plan_for(gone, policy.ops);
                    trash::execute_plan(plan, partner_side, partner_uid, &mut state.records[idx], far, near, journal)?;
                } else {
                    state.records[idx].mark_dead();
                }
            }
            Resolution::Purge => {
                journal.append(&JournalOp::Kill { far: far_uid, near: near_uid })?;
                state.records[idx].mark_dead();
            }
            Resolution::Stable | Resolution::PropagateTo(_) | Resolution::Defer => {}
        }
    }
    Ok(())
}

/// Flag synchronization for every stable, paired record (spec §4.6).
fn sync_flags(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    far_msgs: &[Message],
    near_msgs: &[Message],
    state: &mut StateFile,
    journal: &mut journal::Journal,
) -> Result<()> {
    let far_observed: HashMap<usize, MsgFlags> =
        far_msgs.iter().filter_map(|m| m.srec.map(|i| (i, m.flags))).collect();
    let near_observed: HashMap<usize, MsgFlags> =
        near_msgs.iter().filter_map(|m| m.srec.map(|i| (i, m.flags))).collect();
    let far_supported = far.get_supported_flags();
    let near_supported = near.get_supported_flags();

    for idx in 0..state.records.len() {
        let rec = &state.records[idx];
        if rec.is_dead() || rec.is_pending() || rec.uid[Side::Far] == 0 || rec.uid[Side::Near] == 0 {
            continue;
        }
        let observed = PerSide::new(
            far_observed.get(&idx).copied().unwrap_or(rec.flags),
            near_observed.get(&idx).copied().unwrap_or(rec.flags),
        );

        // A placeholder stub flagged or deleted directly (spec §4.5's
        // "Placeholder becomes flagged" row, §4.11) retires the whole
        // pairing instead of going through ordinary flag sync below —
        // see `upgrade` for why that's enough to redeliver the real
        // copy on the next run.
        let dummy_side = if rec.is_dummy(Side::Far) {
            Some(Side::Far)
        } else if rec.is_dummy(Side::Near) {
            Some(Side::Near)
        } else {
            None
        };
        if let Some(dside) = dummy_side {
            if let Some(trigger) = upgrade::detect_trigger(rec, observed[dside]) {
                upgrade::resolve_trigger(trigger, dside, &mut state.records[idx], far, near, journal)?;
                continue;
            }
        }

        let deltas = flags::compute_flag_sync(&state.records[idx], observed);
        let far_delta = clamp(&state.records[idx], Side::Far, deltas[Side::Far], far_supported);
        let near_delta = clamp(&state.records[idx], Side::Near, deltas[Side::Near], near_supported);

        if !far_delta.add.is_empty() || !far_delta.del.is_empty() {
            far.set_msg_flags(rec.uid[Side::Far], far_delta.add, far_delta.del)?;
        }
        if !near_delta.add.is_empty() || !near_delta.del.is_empty() {
            near.set_msg_flags(rec.uid[Side::Near], near_delta.add, near_delta.del)?;
        }

        let merged = flags::merged_flags(&state.records[idx], observed);
        commit::commit_flags(&mut state.records[idx], merged, journal)?;
    }
    far.commit_cmds()?;
    near.commit_cmds()?;
    Ok(())
}

fn clamp(rec: &record::SyncRecord, side: Side, delta: flags::FlagDelta, supported: MsgFlags) -> flags::FlagDelta {
    let delta = flags::clamp_for_placeholder(rec, side, delta);
    flags::FlagDelta { add: delta.add & supported, del: delta.del & supported }
}

/// Expiration (spec §4.8): mark the oldest over-the-limit records,
/// then synthesize the DELETED flag on the expire side so the normal
/// flag-sync/trash/close machinery carries out the actual removal.
fn run_expiry(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    policy: &ChannelPolicy,
    state: &mut StateFile,
    journal: &mut journal::Journal,
) -> Result<u32> {
    let side = policy.expire_side;
    let mut live: Vec<usize> = state
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_dead() && r.uid[side] != 0 && !r.status.contains(Status::EXPIRED))
        .map(|(i, _)| i)
        .collect();
    live.sort_by_key(|&i| state.records[i].uid[side]);
    let todel = live.len().saturating_sub(policy.max_messages as usize);

    if todel > 0 && policy.expire_unread.is_none() {
        let unseen = live[..todel].iter().filter(|&&i| !state.records[i].flags.contains(MsgFlags::SEEN)).count();
        if unseen * 2 > todel {
            return Err(crate::error::SyncError::BoxDefect(
                "refusing to expire: more than half the over-limit messages are unread and ExpireUnread is unset"
                    .to_string(),
            ));
        }
    }

    let marked = expire::select_for_expiry(&mut state.records, policy);
    for &idx in &marked {
        let rec = &state.records[idx];
        journal.append(&JournalOp::SetStatus { far: rec.uid[Side::Far], near: rec.uid[Side::Near], status: rec.status })?;
    }

    let mut max_expired = state.header.max_expired_far_uid;
    for &idx in &marked {
        let uid = state.records[idx].uid[side];
        let driver = match side {
            Side::Far => &mut *far,
            Side::Near => &mut *near,
        };
        driver.set_msg_flags(uid, MsgFlags::DELETED, MsgFlags::empty())?;
        trash::mark_delete_requested(&mut state.records[idx], side);
        if side == Side::Far {
            max_expired = expire::bump_max_expired_uid(max_expired, state.records[idx].uid[Side::Far]);
        }
    }
    if max_expired != state.header.max_expired_far_uid {
        state.header.max_expired_far_uid = max_expired;
    }
    Ok(marked.len() as u32)
}

/// Box close for one side (spec §4.9): expunge, then reconcile which
/// DELETED-flagged records actually disappeared, promoting any active
/// expire transaction from EXPIRE to EXPIRED on confirmation.
fn close_side(driver: &mut dyn Driver, side: Side, expire_side: Side, state: &mut StateFile) -> Result<()> {
    let (reported, expunged) = driver.close_box()?;
    trash::reconcile_close(side, &mut state.records, reported, &expunged);
    for rec in state.records.iter_mut() {
        if rec.status.contains(Status::EXPIRE) {
            let still_present = rec.uid[side] != 0;
            expire::confirm_expired(rec, side, expire_side, still_present);
        }
    }
    Ok(())
}
