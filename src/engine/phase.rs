//! Per-side progress state (spec §4.1).
//!
//! The original design advances this state machine from continuation
//! passing callbacks, each one firing when a suspended driver call
//! completes. Here driver calls are synchronous (the cooperative event
//! loop and socket multiplexer are an external collaborator per
//! spec §1), so the ordering contract below is enforced simply by the
//! order `engine::mod::run_pair` calls these phases in rather than by
//! a reference-counted precondition check. The bitflags still model
//! the same states, both so a run can log a side's status the way a
//! callback-driven implementation's debug output would, and so
//! `status` inspection (SPEC_FULL §C) has something to report.
//!
//! Ordering contract preserved by call order in `engine::mod`:
//! ```text
//! select(x):         unconditional
//! load(x):           after select(x)
//! flags(F), flags(N), new(F), new(N): after load(F) and load(N)
//! find_new(x):       after new(x)
//! trash(x):          after flags(x)
//! close(x):          after trash(x), flags(¬x), find_new(x), new(¬x)
//! cleanup:           after close(F) and close(N)
//! ```

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PhaseState: u16 {
        const FRESH       = 1 << 0;
        const CONNECTED   = 1 << 1;
        const OPEN        = 1 << 2;
        const PRESENT     = 1 << 3;
        const CONFIRMED   = 1 << 4;
        const SELECTED    = 1 << 5;
        const LOADED      = 1 << 6;
        const SENT_FLAGS  = 1 << 7;
        const SENT_NEW    = 1 << 8;
        const FOUND_NEW   = 1 << 9;
        const SENT_TRASH  = 1 << 10;
        const CLOSING     = 1 << 11;
        const CLOSED      = 1 << 12;
        /// Transverse: a TUID lookup is required at load time for
        /// records still mid-propagation (spec §4.4).
        const FIND_OLD    = 1 << 13;
        /// Transverse: a TUID lookup is required after a copy whose
        /// driver didn't report the new UID directly (spec §4.7).
        const FIND_NEW    = 1 << 14;
        const SENT_CANCEL = 1 << 15;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Ok,
    Canceled,
}

/// Per-side run state, plus the cross-side cancellation flag (spec
/// §4.1: "any fatal error on a side sets SENT_CANCEL ... when both
/// sides have reached CANCELED, journal and new-state files are
/// closed and the next pair begins").
#[derive(Debug, Clone, Copy, Default)]
pub struct SideProgress {
    pub state: PhaseState,
    pub canceled: bool,
    pub trash_bad: bool,
}

impl SideProgress {
    pub fn enter(&mut self, s: PhaseState) {
        self.state.insert(s);
    }

    pub fn has(&self, s: PhaseState) -> bool {
        self.state.contains(s)
    }

    pub fn cancel(&mut self) {
        self.state.insert(PhaseState::SENT_CANCEL);
        self.canceled = true;
    }
}
