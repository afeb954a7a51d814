//! Shared test fixtures: an in-memory `Driver` plus small helpers for
//! building sync-state/journal fixtures on disk, so the engine's state
//! machine and journal replay can be exercised without a real IMAP
//! server or Maildir tree.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use tempfile::TempDir;

use boxsync::driver::{
    Capabilities, Driver, LoadRange, LoadResult, MsgFlags, OpenFlags, StoreOutcome,
};
use boxsync::engine::message::{Message, MsgStatus};
use boxsync::error::{DriverOutcome, FailState, Result};

/// Create a temp directory to hold per-pair state/journal fixtures.
pub fn temp_state_dir() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let dir = tmp.path().to_path_buf();
    (tmp, dir)
}

/// One message held by a `MockDriver`.
#[derive(Debug, Clone)]
pub struct MockMessage {
    pub uid: u32,
    pub body: Vec<u8>,
    pub flags: MsgFlags,
    pub msgid: Option<String>,
}

impl MockMessage {
    pub fn new(uid: u32, body: &str) -> Self {
        MockMessage {
            uid,
            body: body.as_bytes().to_vec(),
            flags: MsgFlags::empty(),
            msgid: None,
        }
    }

    pub fn with_msgid(mut self, id: &str) -> Self {
        self.msgid = Some(id.to_string());
        self
    }

    pub fn with_flags(mut self, flags: MsgFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// An in-memory store standing in for one side (far or near) of a
/// mailbox pair. Implements the full `Driver` contract synchronously
/// so the engine's phases can be driven deterministically in tests,
/// including crash/resume scenarios (spec §8 S5).
pub struct MockDriver {
    boxes: HashMap<String, Vec<MockMessage>>,
    selected: Option<String>,
    uidnext: HashMap<String, u32>,
    next_uid: u32,
    supported: MsgFlags,
    caps: Capabilities,
    memory_usage: usize,
    trashed: Vec<(String, u32)>,
    closed_uids: Vec<u32>,
    report_expunge: bool,
    store_returns_uid: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver {
            boxes: HashMap::new(),
            selected: None,
            uidnext: HashMap::new(),
            next_uid: 1,
            supported: MsgFlags::all(),
            caps: Capabilities { uidplus: true, uid_expunge: true },
            memory_usage: 0,
            trashed: Vec::new(),
            closed_uids: Vec::new(),
            report_expunge: true,
            store_returns_uid: true,
        }
    }

    /// Build a box pre-populated with the given messages, assigning
    /// `uidnext` as one past the highest seeded UID.
    pub fn with_box(mut self, name: &str, msgs: Vec<MockMessage>) -> Self {
        let max_uid = msgs.iter().map(|m| m.uid).max().unwrap_or(0);
        self.uidnext.insert(name.to_string(), max_uid + 1);
        self.next_uid = self.next_uid.max(max_uid + 1);
        self.boxes.insert(name.to_string(), msgs);
        self
    }

    /// Simulate a driver that never hands back the assigned UID from
    /// `store_msg` (no UIDPLUS), forcing the engine into FIND_NEW.
    pub fn without_uidplus(mut self) -> Self {
        self.store_returns_uid = false;
        self.caps.uidplus = false;
        self
    }

    /// Simulate a `close_box` that can't report which UIDs it expunged
    /// (spec §4.9, §9's open question).
    pub fn without_expunge_reporting(mut self) -> Self {
        self.report_expunge = false;
        self
    }

    fn selected_box(&self) -> &str {
        self.selected.as_deref().expect("no box selected")
    }

    pub fn messages_in(&self, name: &str) -> &[MockMessage] {
        self.boxes.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn trashed_log(&self) -> &[(String, u32)] {
        &self.trashed
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MockDriver {
    fn get_caps(&self) -> Capabilities {
        self.caps
    }

    fn connect(&mut self) -> Result<DriverOutcome> {
        Ok(DriverOutcome::Ok)
    }

    fn list_boxes(&mut self) -> Result<Vec<String>> {
        Ok(self.boxes.keys().cloned().collect())
    }

    fn open_box(&mut self, name: &str) -> Result<Option<u32>> {
        if !self.boxes.contains_key(name) {
            return Ok(None);
        }
        self.selected = Some(name.to_string());
        Ok(Some(1))
    }

    fn create_box(&mut self, name: &str) -> Result<DriverOutcome> {
        self.boxes.entry(name.to_string()).or_default();
        self.uidnext.entry(name.to_string()).or_insert(1);
        self.selected = Some(name.to_string());
        Ok(DriverOutcome::Ok)
    }

    fn delete_box(&mut self, name: &str) -> Result<DriverOutcome> {
        self.boxes.remove(name);
        Ok(DriverOutcome::Ok)
    }

    fn confirm_box_empty(&mut self, name: &str) -> Result<bool> {
        Ok(self.boxes.get(name).is_none_or(|v| v.is_empty()))
    }

    fn prepare_load_box(&mut self, opts: OpenFlags) -> Result<OpenFlags> {
        Ok(opts)
    }

    fn load_box(&mut self, range: &LoadRange) -> Result<LoadResult> {
        let name = self.selected_box().to_string();
        let msgs: Vec<Message> = self
            .boxes
            .get(&name)
            .into_iter()
            .flatten()
            .filter(|m| m.uid >= range.min_uid || range.exceptions.contains(&m.uid))
            .map(|m| {
                let mut msg = Message::new(m.uid);
                msg.flags = m.flags;
                msg.msgid = m.msgid.clone();
                msg.size = m.body.len() as u64;
                msg.status = MsgStatus::FLAGS_KNOWN | MsgStatus::SIZE_KNOWN;
                msg
            })
            .collect();
        let total = msgs.len() as u32;
        Ok(LoadResult { messages: msgs, total, recent: 0 })
    }

    fn get_uidnext(&mut self) -> Result<u32> {
        let name = self.selected_box().to_string();
        Ok(*self.uidnext.get(&name).unwrap_or(&1))
    }

    fn get_supported_flags(&self) -> MsgFlags {
        self.supported
    }

    fn fetch_msg(&mut self, uid: u32, _minimal: bool) -> Result<Vec<u8>> {
        let name = self.selected_box().to_string();
        let body = self
            .boxes
            .get(&name)
            .into_iter()
            .flatten()
            .find(|m| m.uid == uid)
            .map(|m| m.body.clone())
            .unwrap_or_default();
        Ok(body)
    }

    fn store_msg(&mut self, data: &[u8], to_trash: bool) -> Result<StoreOutcome> {
        let name = self.selected_box().to_string();
        let target = if to_trash { format!("{name}.Trash") } else { name.clone() };
        let uid = self.next_uid;
        self.next_uid += 1;
        let tuid = extract_x_tuid(data);
        let mut msg = MockMessage::new(uid, "");
        msg.body = data.to_vec();
        if let Some(t) = &tuid {
            msg.msgid = Some(format!("tuid:{t}"));
        }
        self.boxes.entry(target.clone()).or_default().push(msg);
        let next = self.boxes[&target].iter().map(|m| m.uid).max().unwrap_or(0) + 1;
        self.uidnext.insert(target, next);
        self.memory_usage += data.len();

        if self.store_returns_uid {
            Ok(StoreOutcome::Uid(uid))
        } else {
            Ok(StoreOutcome::Unknown)
        }
    }

    fn find_new_msgs(&mut self, uidnext: u32) -> Result<Vec<Message>> {
        let name = self.selected_box().to_string();
        let msgs = self
            .boxes
            .get(&name)
            .into_iter()
            .flatten()
            .filter(|m| m.uid >= uidnext)
            .map(|m| {
                let mut msg = Message::new(m.uid);
                msg.tuid = extract_x_tuid(&m.body);
                msg
            })
            .collect();
        Ok(msgs)
    }

    fn set_msg_flags(&mut self, uid: u32, add: MsgFlags, del: MsgFlags) -> Result<DriverOutcome> {
        let name = self.selected_box().to_string();
        if let Some(msgs) = self.boxes.get_mut(&name) {
            if let Some(m) = msgs.iter_mut().find(|m| m.uid == uid) {
                m.flags = (m.flags | add) & !del;
            }
        }
        Ok(DriverOutcome::Ok)
    }

    fn trash_msg(&mut self, uid: u32) -> Result<DriverOutcome> {
        let name = self.selected_box().to_string();
        self.trashed.push((name.clone(), uid));
        self.closed_uids.push(uid);
        if let Some(msgs) = self.boxes.get_mut(&name) {
            msgs.retain(|m| m.uid != uid);
        }
        Ok(DriverOutcome::Ok)
    }

    fn close_box(&mut self) -> Result<(bool, Vec<u32>)> {
        let name = self.selected_box().to_string();
        let expunged: Vec<u32> = if let Some(msgs) = self.boxes.get_mut(&name) {
            let (gone, kept): (Vec<_>, Vec<_>) =
                msgs.drain(..).partition(|m| m.flags.contains(MsgFlags::DELETED));
            *msgs = kept;
            gone.into_iter().map(|m| m.uid).collect()
        } else {
            Vec::new()
        };
        Ok((self.report_expunge, expunged))
    }

    fn cancel_cmds(&mut self) {}

    fn commit_cmds(&mut self) -> Result<DriverOutcome> {
        self.memory_usage = 0;
        Ok(DriverOutcome::Ok)
    }

    fn get_memory_usage(&self) -> usize {
        self.memory_usage
    }

    fn get_fail_state(&self) -> FailState {
        FailState::Ok
    }

    fn cancel_store(&mut self) {}
}

fn extract_x_tuid(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    for line in text.lines() {
        if line.len() >= 8 && line[..8].eq_ignore_ascii_case("x-tuid: ") {
            return Some(line[8..].trim().to_string());
        }
    }
    None
}
