//! Maildir-backed `Driver` (spec §6.1), grounded on the `maildir`
//! crate's own entry model as used by the `inboxid` reference crate —
//! here generalized into the full read/write `Driver` contract instead
//! of a one-off indexing pass.

use std::path::PathBuf;

use maildir::Maildir;

use crate::engine::message::{Message, MsgStatus};
use crate::error::{DriverOutcome, FailState, Result, SyncError};

use super::{Capabilities, Driver, LoadRange, LoadResult, MsgFlags, OpenFlags, StoreOutcome};

/// A Maildir "store" is a directory of per-box Maildir subdirectories,
/// the way a plain `~/Mail/<box>` layout works.
pub struct MaildirDriver {
    root: PathBuf,
    current_box: Option<String>,
    next_synthetic_uid: u32,
    fail_state: FailState,
}

impl MaildirDriver {
    pub fn new(root: PathBuf) -> Self {
        MaildirDriver { root, current_box: None, next_synthetic_uid: 1, fail_state: FailState::Ok }
    }

    fn box_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn current(&self) -> Result<Maildir> {
        let name = self
            .current_box
            .as_ref()
            .ok_or_else(|| SyncError::BoxDefect("no maildir box selected".into()))?;
        Ok(Maildir::from(self.box_path(name)))
    }
}

fn maildir_flags_to_msgflags(flags: &str) -> MsgFlags {
    let mut out = MsgFlags::empty();
    for c in flags.chars() {
        match c {
            'S' => out |= MsgFlags::SEEN,
            'F' => out |= MsgFlags::FLAGGED,
            'D' => out |= MsgFlags::DRAFT,
            'R' => out |= MsgFlags::ANSWERED,
            'T' => out |= MsgFlags::DELETED,
            'P' => out |= MsgFlags::FORWARDED,
            _ => {}
        }
    }
    out
}

fn msgflags_to_maildir_flags(flags: MsgFlags) -> String {
    // Maildir's `info` flag letters are conventionally written sorted:
    // D F P R S T.
    let mut s = String::new();
    if flags.contains(MsgFlags::DRAFT) {
        s.push('D');
    }
    if flags.contains(MsgFlags::FLAGGED) {
        s.push('F');
    }
    if flags.contains(MsgFlags::FORWARDED) {
        s.push('P');
    }
    if flags.contains(MsgFlags::ANSWERED) {
        s.push('R');
    }
    if flags.contains(MsgFlags::SEEN) {
        s.push('S');
    }
    if flags.contains(MsgFlags::DELETED) {
        s.push('T');
    }
    s
}

/// Maildir has no native UID concept; the engine's sync records still
/// need a stable integer. Derive one deterministically from the
/// message's unique filename component so repeated loads agree.
fn synthetic_uid_from_id(id: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for b in id.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    // Never return 0: that's reserved for "no message" in the engine.
    hash.max(1)
}

fn extract_tuid(headers: &str) -> Option<String> {
    extract_header(headers, "X-TUID:")
}

fn extract_header(headers: &str, name: &str) -> Option<String> {
    let name = name.to_ascii_lowercase();
    for line in headers.lines() {
        if let Some(idx) = line.to_ascii_lowercase().find(&name) {
            if idx == 0 {
                return Some(line[name.len()..].trim().to_string());
            }
        }
    }
    None
}

/// Rewrite an entry's maildir filename to carry a new flag set,
/// moving it into `cur` if it was still in `new` (spec-external:
/// Maildir's own flag convention, not something the `Driver` trait
/// needs to know about).
fn rewrite_flags(maildir: &Maildir, entry_path: &std::path::Path, flags: &str) -> std::io::Result<PathBuf> {
    let file_name = entry_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad maildir entry name"))?;
    let unique = file_name.split(":2,").next().unwrap_or(file_name);
    let new_name = format!("{unique}:2,{flags}");
    let dest = maildir.path().join("cur").join(new_name);
    std::fs::rename(entry_path, &dest)?;
    Ok(dest)
}

impl Driver for MaildirDriver {
    fn get_caps(&self) -> Capabilities {
        Capabilities { uidplus: false, uid_expunge: false }
    }

    fn connect(&mut self) -> Result<DriverOutcome> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)
                .map_err(|e| SyncError::EnvironmentDefect(format!("create maildir root: {e}")))?;
        }
        Ok(DriverOutcome::Ok)
    }

    fn list_boxes(&mut self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        out.push(name.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    fn open_box(&mut self, name: &str) -> Result<Option<u32>> {
        let path = self.box_path(name);
        if !path.join("cur").exists() && !path.join("new").exists() {
            return Ok(None);
        }
        self.current_box = Some(name.to_string());
        // Maildir has no UIDVALIDITY; the directory's own existence is
        // the only thing that can change underneath us, so a constant
        // stand-in is stable across runs.
        Ok(Some(1))
    }

    fn create_box(&mut self, name: &str) -> Result<DriverOutcome> {
        let maildir = Maildir::from(self.box_path(name));
        maildir
            .create_dirs()
            .map_err(|e| SyncError::BoxDefect(format!("create maildir {name}: {e}")))?;
        Ok(DriverOutcome::Ok)
    }

    fn delete_box(&mut self, name: &str) -> Result<DriverOutcome> {
        let path = self.box_path(name);
        std::fs::remove_dir_all(&path)
            .map_err(|e| SyncError::BoxDefect(format!("remove maildir {name}: {e}")))?;
        Ok(DriverOutcome::Ok)
    }

    fn confirm_box_empty(&mut self, name: &str) -> Result<bool> {
        let maildir = Maildir::from(self.box_path(name));
        Ok(maildir.count_cur() == 0 && maildir.count_new() == 0)
    }

    fn prepare_load_box(&mut self, opts: OpenFlags) -> Result<OpenFlags> {
        Ok(opts | OpenFlags::FLAGS)
    }

    fn load_box(&mut self, range: &LoadRange) -> Result<LoadResult> {
        let maildir = self.current()?;
        let mut messages = Vec::new();

        for entry in maildir.list_new().chain(maildir.list_cur()).flatten() {
            let mut entry = entry;
            let id = entry.id().to_string();
            let uid = synthetic_uid_from_id(&id);
            if uid < range.min_uid && !range.exceptions.contains(&uid) {
                continue;
            }
            let flags = maildir_flags_to_msgflags(entry.flags());

            let mut msg = Message::new(uid);
            msg.flags = flags;
            msg.status |= MsgStatus::FLAGS_KNOWN;
            if let Ok(headers) = entry.headers() {
                let headers = String::from_utf8_lossy(headers);
                msg.tuid = extract_tuid(&headers);
                msg.msgid = extract_header(&headers, "Message-ID:");
                msg.status |= MsgStatus::HEADER_KNOWN;
            }
            if let Ok(meta) = std::fs::metadata(entry.path()) {
                msg.size = meta.len();
                msg.status |= MsgStatus::SIZE_KNOWN;
            }
            messages.push(msg);
        }

        let total = messages.len() as u32;
        Ok(LoadResult { messages, total, recent: 0 })
    }

    fn get_uidnext(&mut self) -> Result<u32> {
        Ok(self.next_synthetic_uid)
    }

    fn get_supported_flags(&self) -> MsgFlags {
        MsgFlags::all()
    }

    fn fetch_msg(&mut self, uid: u32, _minimal: bool) -> Result<Vec<u8>> {
        let maildir = self.current()?;
        for entry in maildir.list_new().chain(maildir.list_cur()).flatten() {
            if synthetic_uid_from_id(entry.id()) == uid {
                return std::fs::read(entry.path())
                    .map_err(|e| SyncError::MessageDefect(format!("read uid {uid}: {e}")));
            }
        }
        Err(SyncError::MessageDefect(format!("uid {uid} not found in maildir")))
    }

    fn store_msg(&mut self, data: &[u8], to_trash: bool) -> Result<StoreOutcome> {
        let maildir = self.current()?;
        let id = if to_trash {
            maildir.store_cur_with_flags(data, "T")
        } else {
            maildir.store_new(data)
        }
        .map_err(|e| SyncError::MessageDefect(format!("store message: {e}")))?;
        Ok(StoreOutcome::Uid(synthetic_uid_from_id(&id)))
    }

    fn find_new_msgs(&mut self, uidnext: u32) -> Result<Vec<Message>> {
        let range = LoadRange { min_uid: uidnext, max_uid: u32::MAX, exceptions: Vec::new() };
        Ok(self.load_box(&range)?.messages)
    }

    fn set_msg_flags(&mut self, uid: u32, add: MsgFlags, del: MsgFlags) -> Result<DriverOutcome> {
        let maildir = self.current()?;
        for entry in maildir.list_new().chain(maildir.list_cur()).flatten() {
            if synthetic_uid_from_id(entry.id()) != uid {
                continue;
            }
            let current = maildir_flags_to_msgflags(entry.flags());
            let merged = (current | add) & !del;
            rewrite_flags(&maildir, entry.path(), &msgflags_to_maildir_flags(merged))
                .map_err(|e| SyncError::MessageDefect(format!("set flags uid {uid}: {e}")))?;
            return Ok(DriverOutcome::Ok);
        }
        Ok(DriverOutcome::MsgBad)
    }

    fn trash_msg(&mut self, uid: u32) -> Result<DriverOutcome> {
        self.set_msg_flags(uid, MsgFlags::DELETED, MsgFlags::empty())
    }

    fn close_box(&mut self) -> Result<(bool, Vec<u32>)> {
        let maildir = self.current()?;
        let mut expunged = Vec::new();
        for entry in maildir.list_cur().flatten() {
            if maildir_flags_to_msgflags(entry.flags()).contains(MsgFlags::DELETED) {
                let uid = synthetic_uid_from_id(entry.id());
                if std::fs::remove_file(entry.path()).is_ok() {
                    expunged.push(uid);
                }
            }
        }
        Ok((true, expunged))
    }

    fn cancel_cmds(&mut self) {}

    fn commit_cmds(&mut self) -> Result<DriverOutcome> {
        Ok(DriverOutcome::Ok)
    }

    fn get_memory_usage(&self) -> usize {
        0
    }

    fn get_fail_state(&self) -> FailState {
        self.fail_state
    }

    fn cancel_store(&mut self) {}
}
