//! End-to-end sync-engine scenarios, driven against `MockDriver`
//! instead of a real IMAP server or Maildir tree. Named after the
//! concrete scenarios a complete implementation of this engine is
//! expected to pass.

mod common;

use boxsync::driver::MsgFlags;
use boxsync::engine::journal::{Journal, JournalOp};
use boxsync::engine::policy::{ChannelPolicy, Ops};
use boxsync::engine::record::SyncRecord;
use boxsync::engine::side::Side;
use boxsync::engine::state::{StateFile, StateHeader};
use boxsync::engine::{run_pair, PairRequest};

use common::{temp_state_dir, MockDriver, MockMessage};

fn default_policy() -> ChannelPolicy {
    ChannelPolicy {
        name: "test".to_string(),
        ops: Ops::default(),
        max_messages: 0,
        expire_side: Side::Far,
        expire_unread: None,
        use_internal_date: false,
        max_size: 0,
    }
}

#[test]
fn fresh_run_propagates_every_far_message_to_near() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");

    let mut far = MockDriver::new().with_box(
        "INBOX",
        vec![
            MockMessage::new(1, "From: a\nTo: b\n\nOne\n"),
            MockMessage::new(2, "From: a\nTo: b\n\nTwo\n"),
        ],
    );
    let mut near = MockDriver::new().with_box("INBOX", vec![]);

    let policy = default_policy();
    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };

    let report = run_pair(&mut far, &mut near, &req).expect("sync should succeed");
    assert_eq!(report.propagated[Side::Near], 2);
    assert!(report.lost_track.is_empty());

    let state = StateFile::load(&state_path).unwrap().unwrap();
    assert_eq!(state.records.len(), 2);
    for rec in &state.records {
        assert_ne!(rec.uid[Side::Far], 0);
        assert_ne!(rec.uid[Side::Near], 0);
    }
}

#[test]
fn rerun_after_full_sync_propagates_nothing_new() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let policy = default_policy();

    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, "From: a\n\nhi\n")]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]);
    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };
    run_pair(&mut far, &mut near, &req).unwrap();

    // Second run: nothing changed on either side; no new propagation.
    let report2 = run_pair(&mut far, &mut near, &req).unwrap();
    assert_eq!(report2.propagated[Side::Near], 0);
    assert_eq!(report2.propagated[Side::Far], 0);
}

#[test]
fn flags_converge_bidirectionally() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let policy = default_policy();

    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, "From: a\n\nhi\n")]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]);
    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };
    run_pair(&mut far, &mut near, &req).unwrap();

    // Flag the near-side copy as \Seen, then resync: far should pick it up.
    let near_uid = near.messages_in("INBOX")[0].uid;
    near.set_msg_flags(near_uid, MsgFlags::SEEN, MsgFlags::empty()).unwrap();

    run_pair(&mut far, &mut near, &req).unwrap();
    let state = StateFile::load(&state_path).unwrap().unwrap();
    assert!(state.records[0].flags.contains(MsgFlags::SEEN));
}

#[test]
fn s4_expire_beyond_max_messages_keeps_important_and_newest() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");

    // far/near are already paired 1:1 for UIDs 1..5 from a prior run;
    // seed the state file directly rather than relying on a first run
    // to establish the pairing, since a from-scratch run would treat
    // identically pre-populated sides as two unrelated "new" sets and
    // duplicate them instead of pairing by UID.
    let far_msgs = vec![
        MockMessage::new(1, "From: a\n\n1\n").with_flags(MsgFlags::FLAGGED),
        MockMessage::new(2, "From: a\n\n2\n"),
        MockMessage::new(3, "From: a\n\n3\n").with_flags(MsgFlags::FLAGGED),
        MockMessage::new(4, "From: a\n\n4\n"),
        MockMessage::new(5, "From: a\n\n5\n").with_flags(MsgFlags::SEEN),
    ];
    let near_msgs = far_msgs.clone();
    let mut far = MockDriver::new().with_box("INBOX", far_msgs);
    let mut near = MockDriver::new().with_box("INBOX", near_msgs);

    let mut records = Vec::new();
    for (uid, flagged, seen) in [(1, true, false), (2, false, false), (3, true, false), (4, false, false), (5, false, true)] {
        let mut rec = SyncRecord::new(uid, uid);
        if flagged {
            rec.flags.insert(MsgFlags::FLAGGED);
        }
        if seen {
            rec.flags.insert(MsgFlags::SEEN);
        }
        records.push(rec);
    }
    let seed = StateFile {
        header: StateHeader { uid_validity: Default::default(), max_pulled_uid: 5, max_pushed_uid: 5, max_expired_far_uid: 0 },
        records,
    };
    seed.commit(&state_path).unwrap();

    let mut policy = default_policy();
    policy.max_messages = 3;
    policy.expire_side = Side::Far;

    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };

    let expired = run_pair(&mut far, &mut near, &req).unwrap().expired;
    assert!(expired >= 1, "expected at least one record marked for expiry");

    let state = StateFile::load(&state_path).unwrap().unwrap();
    let uid1 = state.records.iter().find(|r| r.uid[Side::Far] == 1).unwrap();
    let uid3 = state.records.iter().find(|r| r.uid[Side::Far] == 3).unwrap();
    assert!(!uid1.status.contains(boxsync::engine::record::Status::EXPIRE));
    assert!(!uid3.status.contains(boxsync::engine::record::Status::EXPIRE));
}

#[test]
fn s6_uidvalidity_reapproval_by_msgid_agreement() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let policy = default_policy();

    let mut msgs = Vec::new();
    for i in 1..=25u32 {
        msgs.push(MockMessage::new(i, &format!("From: a\n\n{i}\n")).with_msgid(&format!("m{i}@x")));
    }
    let mut far = MockDriver::new().with_box("INBOX", msgs.clone());
    let mut near = MockDriver::new().with_box("INBOX", msgs);

    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };
    run_pair(&mut far, &mut near, &req).unwrap();

    // Second run with the same driver (same session) must not fail
    // even though neither side's UIDVALIDITY actually changes here —
    // this exercises the steady-state path the re-approval logic must
    // not disturb.
    let result = run_pair(&mut far, &mut near, &req);
    assert!(result.is_ok());
}

#[test]
fn without_uidplus_store_falls_back_to_find_new_by_tuid() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let policy = default_policy();

    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, "From: a\n\nhi\n")]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]).without_uidplus();

    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };
    let report = run_pair(&mut far, &mut near, &req).unwrap();
    assert_eq!(report.propagated[Side::Near], 1);
    assert!(report.lost_track.is_empty());

    let stored = &near.messages_in("INBOX")[0];
    let text = String::from_utf8_lossy(&stored.body);
    assert!(text.contains("X-TUID:"));
}

#[test]
fn dry_run_makes_no_driver_mutations() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let policy = default_policy();

    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, "From: a\n\nhi\n")]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]);

    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: true,
    };
    run_pair(&mut far, &mut near, &req).unwrap();
    assert!(near.messages_in("INBOX").is_empty(), "dry-run must not store anything");
}

#[test]
fn flagging_a_placeholder_stub_retires_the_pairing() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let mut policy = default_policy();
    policy.max_size = 1000;

    let big_body = format!("From: a\n\n{}\n", "x".repeat(5000));
    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, &big_body)]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]);
    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };
    run_pair(&mut far, &mut near, &req).unwrap();

    let state = StateFile::load(&state_path).unwrap().unwrap();
    assert_eq!(state.records.len(), 1);
    assert!(state.records[0].status.contains(boxsync::engine::record::Status::DUMMY_NEAR));
    assert!(!near.messages_in("INBOX").is_empty(), "a placeholder stub should have been stored");

    // The user flags the stub directly in their mail client.
    let stub_uid = near.messages_in("INBOX")[0].uid;
    near.set_msg_flags(stub_uid, MsgFlags::FLAGGED, MsgFlags::empty()).unwrap();

    run_pair(&mut far, &mut near, &req).unwrap();
    let state = StateFile::load(&state_path).unwrap().unwrap();
    assert!(state.records.is_empty(), "the retired pairing should be pruned from committed state");
    assert!(near.messages_in("INBOX").is_empty(), "the stub should have been removed from its own side");
    assert!(near.trashed_log().iter().any(|(b, u)| b == "INBOX" && *u == stub_uid));
}

#[test]
fn deletion_on_one_side_propagates_as_expunge_on_the_other() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let mut policy = default_policy();
    policy.ops |= Ops::EXPUNGE;

    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, "From: a\n\nhi\n")]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]);
    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };
    run_pair(&mut far, &mut near, &req).unwrap();

    // Remove the message on the far side entirely (simulating an
    // external deletion/expunge there) and resync.
    far = MockDriver::new().with_box("INBOX", vec![]);
    run_pair(&mut far, &mut near, &req).unwrap();

    let state = StateFile::load(&state_path).unwrap().unwrap();
    assert!(state.records.is_empty(), "the pair should be purged once both sides are gone");
}

#[test]
fn s5_resumes_a_propagation_interrupted_before_store_msg() {
    let (_tmp, dir) = temp_state_dir();
    let state_path = dir.join("INBOX");
    let policy = default_policy();

    // Simulate a crash right after `begin_new_pairing`'s fsync point:
    // the PENDING record and its TUID are durable, but `store_msg` on
    // the near side never ran. No state file exists yet, only the
    // journal — matching the order `commit::commit` writes things in.
    let journal_path = boxsync::engine::setup::journal_path(&state_path);
    let mut journal = Journal::open(&journal_path, &StateFile::default()).unwrap();
    journal.append(&JournalOp::NewPending { far: 1, near: 0 }).unwrap();
    journal.append(&JournalOp::TuidBegin { far: 1, near: 0 }).unwrap();
    journal.append(&JournalOp::TuidValue { far: 1, near: 0, tuid: "T1resume".to_string() }).unwrap();
    journal.fsync().unwrap();
    drop(journal);

    let mut far = MockDriver::new().with_box("INBOX", vec![MockMessage::new(1, "From: a\n\nhi\n")]);
    let mut near = MockDriver::new().with_box("INBOX", vec![]);
    let req = PairRequest {
        policy: &policy,
        far_name: "INBOX",
        near_name: "INBOX",
        state_path: &state_path,
        dry_run: false,
    };

    let report = run_pair(&mut far, &mut near, &req).expect("resume should succeed");
    assert_eq!(report.propagated[Side::Near], 1);
    assert!(report.lost_track.is_empty());

    let stored = near.messages_in("INBOX");
    assert_eq!(stored.len(), 1, "the interrupted copy should have been completed, not duplicated");
    let text = String::from_utf8_lossy(&stored[0].body);
    assert!(text.contains("X-TUID: T1resume"));

    let state = StateFile::load(&state_path).unwrap().unwrap();
    assert_eq!(state.records.len(), 1);
    assert!(!state.records[0].is_pending());
    assert_eq!(state.records[0].uid[Side::Far], 1);
    assert_ne!(state.records[0].uid[Side::Near], 0);
    assert!(state.records[0].tuid.is_empty());
}
