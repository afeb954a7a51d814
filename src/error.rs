//! Core error taxonomy (spec §7).
//!
//! Mirrors the five error kinds the design calls out: a message defect
//! only kills one message, a box defect kills one pair, a store defect
//! kills every remaining pair on that store, and config/environment
//! defects abort the run before any pair starts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A single message couldn't be fetched, converted, or stored.
    /// Local recovery: mark the record DEAD and continue the pair.
    #[error("message defect: {0}")]
    MessageDefect(String),

    /// A box-level failure: unresolvable UIDVALIDITY change, a box that
    /// won't open. Local recovery: fail the pair, cancel its sync.
    #[error("box defect: {0}")]
    BoxDefect(String),

    /// The store itself is unusable: connection lost, auth failed.
    /// Local recovery: mark the store failed, skip remaining pairs.
    #[error("store defect ({store}): {detail}")]
    StoreDefect { store: String, detail: String },

    /// A configuration problem caught before any pair is attempted.
    #[error("config defect: {0}")]
    ConfigDefect(String),

    /// Local environment failure: can't lock, can't write state/journal.
    #[error("environment defect: {0}")]
    EnvironmentDefect(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of a driver call (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Ok,
    MsgBad,
    BoxBad,
    StoreBad,
    Canceled,
}

/// Persistent per-store failure state (spec §7, "store failed-state
/// persisted across runs").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailState {
    #[default]
    Ok,
    FailTemp,
    FailWait,
    FailFinal,
}

impl FailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailState::Ok => "ok",
            FailState::FailTemp => "fail_temp",
            FailState::FailWait => "fail_wait",
            FailState::FailFinal => "fail_final",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "fail_temp" => FailState::FailTemp,
            "fail_wait" => FailState::FailWait,
            "fail_final" => FailState::FailFinal,
            _ => FailState::Ok,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, FailState::Ok | FailState::FailTemp)
    }
}
