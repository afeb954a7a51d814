//! Channel policy (spec §3.1 "Channel config").
//!
//! The config parser itself is out of spec's core scope (§1); this is
//! just the resolved, in-memory shape the engine consumes, however it
//! was produced.

use bitflags::bitflags;

use super::side::Side;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ops: u16 {
        /// Sync flag changes bidirectionally (spec §4.6).
        const FLAGS         = 1 << 0;
        /// Propagate brand-new messages (spec §4.5, "UID > maxuid").
        const NEW           = 1 << 1;
        /// Propagate messages discovered below maxuid — the pre-1.4
        /// `SKIPPED` recovery path (spec §4.5).
        const OLD           = 1 << 2;
        /// Propagate a deletion (expunge on one side) to the other.
        const GONE          = 1 << 3;
        const EXPUNGE       = 1 << 4;
        /// Only expunge messages with no live paired partner.
        const EXPUNGE_SOLO  = 1 << 5;
        const CREATE        = 1 << 6;
        const REMOVE        = 1 << 7;
    }
}

impl Default for Ops {
    fn default() -> Self {
        Ops::FLAGS | Ops::NEW | Ops::GONE | Ops::EXPUNGE | Ops::CREATE
    }
}

#[derive(Debug, Clone)]
pub struct ChannelPolicy {
    pub name: String,
    pub ops: Ops,
    /// 0 means unlimited (expiration disabled, spec §4.8).
    pub max_messages: u32,
    pub expire_side: Side,
    /// Tri-state: `None` is the unset/-1 case from spec §4.8 point 6.
    pub expire_unread: Option<bool>,
    pub use_internal_date: bool,
    /// 0 means unlimited.
    pub max_size: u64,
}

impl ChannelPolicy {
    pub fn expire_enabled(&self) -> bool {
        self.max_messages > 0 && self.ops.intersects(Ops::FLAGS | Ops::NEW)
    }
}
