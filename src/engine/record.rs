//! Sync record (spec §3.2) — the persistent pairing of a far-side and
//! near-side message.

use bitflags::bitflags;

use super::side::{PerSide, Side};
use crate::driver::MsgFlags;

bitflags! {
    /// Persistent status bits, written to the state file (spec §3.4's
    /// `statusChar*`) and to journal `~` lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u16 {
        const DEAD      = 1 << 0;
        const EXPIRE    = 1 << 1;
        const EXPIRED   = 1 << 2;
        const PENDING   = 1 << 3;
        const DUMMY_FAR  = 1 << 4;
        const DUMMY_NEAR = 1 << 5;
        /// Legacy read-only input; converted to PENDING|DUMMY on sight
        /// and never written back out (spec §3.2, §9 open question).
        const SKIPPED   = 1 << 6;
    }
}

impl Status {
    pub fn dummy(side: Side) -> Status {
        match side {
            Side::Far => Status::DUMMY_FAR,
            Side::Near => Status::DUMMY_NEAR,
        }
    }

    /// Encode to the single-letter-per-bit form used in the state file.
    pub fn to_chars(self) -> String {
        let mut s = String::new();
        if self.contains(Status::EXPIRE) {
            s.push('E');
        }
        if self.contains(Status::EXPIRED) {
            s.push('e');
        }
        if self.contains(Status::PENDING) {
            s.push('P');
        }
        if self.contains(Status::DUMMY_FAR) {
            s.push('A');
        }
        if self.contains(Status::DUMMY_NEAR) {
            s.push('a');
        }
        if self.contains(Status::SKIPPED) {
            s.push('S');
        }
        s
    }

    pub fn from_chars(chars: &str) -> Status {
        let mut st = Status::empty();
        for c in chars.chars() {
            match c {
                'E' => st |= Status::EXPIRE,
                'e' => st |= Status::EXPIRED,
                'P' => st |= Status::PENDING,
                'A' => st |= Status::DUMMY_FAR,
                'a' => st |= Status::DUMMY_NEAR,
                'S' => st |= Status::SKIPPED,
                _ => {}
            }
        }
        st
    }
}

bitflags! {
    /// Ephemeral, reconstructible-each-run status (spec §3.2's
    /// "Ephemeral status bits"). Never written to the state file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EphemeralStatus: u16 {
        const GONE_FAR   = 1 << 0;
        const GONE_NEAR  = 1 << 1;
        const DEL_FAR    = 1 << 2;
        const DEL_NEAR   = 1 << 3;
        const DELETE     = 1 << 4;
        const UPGRADE    = 1 << 5;
        const PURGE      = 1 << 6;
        const PURGED     = 1 << 7;
    }
}

impl EphemeralStatus {
    pub fn gone(side: Side) -> EphemeralStatus {
        match side {
            Side::Far => EphemeralStatus::GONE_FAR,
            Side::Near => EphemeralStatus::GONE_NEAR,
        }
    }

    pub fn del(side: Side) -> EphemeralStatus {
        match side {
            Side::Far => EphemeralStatus::DEL_FAR,
            Side::Near => EphemeralStatus::DEL_NEAR,
        }
    }
}

/// One pairing of a far-side and near-side message, as defined in
/// spec §3.2. `uid[s] == 0` means "no message present on side s".
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub uid: PerSide<u32>,
    pub flags: MsgFlags,
    pub status: Status,
    pub tuid: String,
    pub msg: PerSide<Option<usize>>,
    pub pflags: MsgFlags,
    pub aflags: PerSide<MsgFlags>,
    pub dflags: PerSide<MsgFlags>,
    pub ephemeral: EphemeralStatus,
}

impl SyncRecord {
    pub fn new(far_uid: u32, near_uid: u32) -> Self {
        SyncRecord {
            uid: PerSide::new(far_uid, near_uid),
            flags: MsgFlags::empty(),
            status: Status::empty(),
            tuid: String::new(),
            msg: PerSide::default(),
            pflags: MsgFlags::empty(),
            aflags: PerSide::default(),
            dflags: PerSide::default(),
            ephemeral: EphemeralStatus::empty(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.status.contains(Status::DEAD)
    }

    pub fn is_pending(&self) -> bool {
        self.status.contains(Status::PENDING)
    }

    pub fn is_dummy(&self, side: Side) -> bool {
        self.status.contains(Status::dummy(side))
    }

    /// Invariant: at least one UID is non-zero for a non-DEAD record.
    pub fn has_any_uid(&self) -> bool {
        self.uid[Side::Far] != 0 || self.uid[Side::Near] != 0
    }

    /// Invariant: PENDING implies exactly one UID is zero.
    pub fn pending_is_consistent(&self) -> bool {
        if !self.is_pending() {
            return true;
        }
        (self.uid[Side::Far] == 0) != (self.uid[Side::Near] == 0)
    }

    pub fn mark_dead(&mut self) {
        self.status = Status::DEAD;
        self.uid = PerSide::default();
    }
}
