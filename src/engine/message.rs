//! Ephemeral message model (spec §3.3).

use bitflags::bitflags;

use crate::driver::MsgFlags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MsgStatus: u8 {
        const RECENT       = 1 << 0;
        const DEAD         = 1 << 1;
        const FLAGS_KNOWN  = 1 << 2;
        const DATE_KNOWN   = 1 << 3;
        const SIZE_KNOWN   = 1 << 4;
        const BODY_KNOWN   = 1 << 5;
        const HEADER_KNOWN = 1 << 6;
    }
}

/// One message as loaded from a store this run. `srec` is a weak
/// back-pointer (an index into the run's record table) rather than a
/// reference, so messages and records can be dropped together without
/// a cycle (spec §9).
#[derive(Debug, Clone)]
pub struct Message {
    pub uid: u32,
    pub size: u64,
    pub flags: MsgFlags,
    pub status: MsgStatus,
    pub msgid: Option<String>,
    pub tuid: Option<String>,
    pub srec: Option<usize>,
}

impl Message {
    pub fn new(uid: u32) -> Self {
        Message {
            uid,
            size: 0,
            flags: MsgFlags::empty(),
            status: MsgStatus::empty(),
            msgid: None,
            tuid: None,
            srec: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.status.contains(MsgStatus::DEAD)
    }
}
