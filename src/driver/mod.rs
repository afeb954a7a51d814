//! Driver contract (spec §6.1).
//!
//! The engine talks to each store only through this trait. A real IMAP
//! or Maildir implementation lives in `imap.rs` / `maildir.rs`; tests
//! use an in-memory mock (`tests/common`). Nothing in `engine/` may
//! depend on which side of the trait it is talking to.

pub mod imap;
pub mod maildir;

use bitflags::bitflags;

use crate::engine::message::Message;
use crate::error::{DriverOutcome, Result};

bitflags! {
    /// Field groups the driver is asked to populate on load (spec §4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const OLD          = 1 << 0;
        const NEW          = 1 << 1;
        const PAIRED       = 1 << 2;
        const PAIRED_IDS   = 1 << 3;
        const FLAGS        = 1 << 4;
        const FIND         = 1 << 5;
        const NEW_SIZE     = 1 << 6;
        const OLD_SIZE     = 1 << 7;
        const APPEND       = 1 << 8;
        const SETFLAGS     = 1 << 9;
        const EXPUNGE      = 1 << 10;
        const UID_EXPUNGE  = 1 << 11;
    }
}

bitflags! {
    /// Per-message flags (spec §3.2's `flags` field).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct MsgFlags: u8 {
        const SEEN      = 1 << 0;
        const FLAGGED   = 1 << 1;
        const DRAFT     = 1 << 2;
        const ANSWERED  = 1 << 3;
        const DELETED   = 1 << 4;
        const FORWARDED = 1 << 5;
    }
}

impl MsgFlags {
    /// Encode as the `DFPRST` letter subset used by the state file
    /// (spec §3.4). Order: D(raft) F(lagged) P(assed/forwarded)
    /// R(answered) S(een) T(rashed/deleted).
    pub fn to_chars(self) -> String {
        let mut s = String::new();
        if self.contains(MsgFlags::DRAFT) {
            s.push('D');
        }
        if self.contains(MsgFlags::FLAGGED) {
            s.push('F');
        }
        if self.contains(MsgFlags::FORWARDED) {
            s.push('P');
        }
        if self.contains(MsgFlags::ANSWERED) {
            s.push('R');
        }
        if self.contains(MsgFlags::SEEN) {
            s.push('S');
        }
        if self.contains(MsgFlags::DELETED) {
            s.push('T');
        }
        s
    }

    pub fn from_chars(chars: &str) -> Self {
        let mut f = MsgFlags::empty();
        for c in chars.chars() {
            match c {
                'D' => f |= MsgFlags::DRAFT,
                'F' => f |= MsgFlags::FLAGGED,
                'P' => f |= MsgFlags::FORWARDED,
                'R' => f |= MsgFlags::ANSWERED,
                'S' => f |= MsgFlags::SEEN,
                'T' => f |= MsgFlags::DELETED,
                _ => {}
            }
        }
        f
    }
}

/// A `[minuid, maxuid]` load window plus the exception list of
/// below-`minuid` UIDs that must be fetched anyway because they are
/// still paired with a live record on the other side (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct LoadRange {
    pub min_uid: u32,
    pub max_uid: u32,
    pub exceptions: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub messages: Vec<Message>,
    pub total: u32,
    pub recent: u32,
}

/// Result of `store_msg`: either the driver hands back the assigned
/// UID directly (UIDPLUS-like stores), or it doesn't, and the engine
/// must fall back to FIND_NEW (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub enum StoreOutcome {
    Uid(u32),
    Unknown,
}

/// Everything the engine needs from one side of a mailbox pair.
///
/// Method names follow spec §6.1. All of them are synchronous here:
/// the suspension-point model of §5 is preserved at the engine's state
/// machine layer (`engine::phase`), not pushed into this trait — a
/// driver is free to block internally (the real IMAP driver blocks on
/// socket I/O the way the `imap` crate's session API already does).
pub trait Driver {
    /// Capability bits the engine must respect (e.g. whether the store
    /// can report exactly which UIDs an EXPUNGE removed).
    fn get_caps(&self) -> Capabilities;

    fn connect(&mut self) -> Result<DriverOutcome>;

    fn list_boxes(&mut self) -> Result<Vec<String>>;

    /// Open or select a box, returning its UIDVALIDITY if it already
    /// existed.
    fn open_box(&mut self, name: &str) -> Result<Option<u32>>;

    fn create_box(&mut self, name: &str) -> Result<DriverOutcome>;

    fn delete_box(&mut self, name: &str) -> Result<DriverOutcome>;

    fn confirm_box_empty(&mut self, name: &str) -> Result<bool>;

    /// Declares the field groups this run needs; a driver may widen
    /// the request (e.g. always fetching FLAGS) but never narrow it.
    fn prepare_load_box(&mut self, opts: OpenFlags) -> Result<OpenFlags>;

    fn load_box(&mut self, range: &LoadRange) -> Result<LoadResult>;

    fn get_uidnext(&mut self) -> Result<u32>;

    fn get_supported_flags(&self) -> MsgFlags;

    /// `minimal` requests only enough of the message to build a
    /// placeholder (spec §4.7); a real driver may still fetch the
    /// full body and let the conversion layer discard it.
    fn fetch_msg(&mut self, uid: u32, minimal: bool) -> Result<Vec<u8>>;

    fn store_msg(&mut self, data: &[u8], to_trash: bool) -> Result<StoreOutcome>;

    fn find_new_msgs(&mut self, uidnext: u32) -> Result<Vec<Message>>;

    fn set_msg_flags(&mut self, uid: u32, add: MsgFlags, del: MsgFlags) -> Result<DriverOutcome>;

    fn trash_msg(&mut self, uid: u32) -> Result<DriverOutcome>;

    /// Returns `(reported, expunged_uids)`. `reported == false` means
    /// the store can't tell us which UIDs it actually expunged and the
    /// engine must fall back to assuming every `DEL`-marked record is
    /// gone (spec §4.9, §9 open question).
    fn close_box(&mut self) -> Result<(bool, Vec<u32>)>;

    fn cancel_cmds(&mut self);

    fn commit_cmds(&mut self) -> Result<DriverOutcome>;

    fn get_memory_usage(&self) -> usize;

    fn get_fail_state(&self) -> crate::error::FailState;

    fn cancel_store(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub uidplus: bool,
    pub uid_expunge: bool,
}
