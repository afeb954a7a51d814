//! Box confirmation and creation (spec §4.3).

use crate::driver::Driver;
use crate::error::{DriverOutcome, Result, SyncError};

use super::policy::Ops;
use super::side::{PerSide, Side};

#[derive(Debug, Clone, Copy)]
pub enum BoxState {
    Present(u32),
    Missing,
}

/// What happened to this pair as a whole after box confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairDisposition {
    /// Both sides are open; proceed to load.
    Proceed,
    /// One side was missing and got deleted on the other side too, or
    /// a missing-and-unopenable side was warned about and skipped.
    Skip,
}

pub struct BoxesResult {
    pub uid_validity: PerSide<Option<u32>>,
    pub disposition: PairDisposition,
}

pub fn confirm_boxes(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    far_name: &str,
    near_name: &str,
    had_prior_state: bool,
    ops: Ops,
) -> Result<BoxesResult> {
    let far_state = open_one(far, far_name)?;
    let near_state = open_one(near, near_name)?;

    let mut uid_validity = PerSide::default();
    if let BoxState::Present(uv) = far_state {
        uid_validity[Side::Far] = Some(uv);
    }
    if let BoxState::Present(uv) = near_state {
        uid_validity[Side::Near] = Some(uv);
    }

    let disposition = match (far_state, near_state) {
        (BoxState::Present(_), BoxState::Present(_)) => PairDisposition::Proceed,
        (BoxState::Missing, BoxState::Present(_)) => {
            reconcile_missing(near, near_name, far, far_name, had_prior_state, ops)?
        }
        (BoxState::Present(_), BoxState::Missing) => {
            reconcile_missing(far, far_name, near, near_name, had_prior_state, ops)?
        }
        (BoxState::Missing, BoxState::Missing) => {
            if had_prior_state {
                PairDisposition::Skip
            } else {
                return Err(SyncError::BoxDefect(format!(
                    "neither {far_name} nor {near_name} exists"
                )));
            }
        }
    };

    Ok(BoxesResult { uid_validity, disposition })
}

fn open_one(driver: &mut dyn Driver, name: &str) -> Result<BoxState> {
    match driver.open_box(name)? {
        Some(uv) => Ok(BoxState::Present(uv)),
        None => Ok(BoxState::Missing),
    }
}

/// `present` is the side that opened fine; `missing` is the side that
/// didn't. Spec §4.3: a missing side with prior state is a deletion
/// propagation (delete the opposite side if OP_REMOVE and it's empty,
/// else warn and skip); a missing side with no prior state is created
/// if OP_CREATE is set, else the pair fails.
fn reconcile_missing(
    missing: &mut dyn Driver,
    missing_name: &str,
    present: &mut dyn Driver,
    present_name: &str,
    had_prior_state: bool,
    ops: Ops,
) -> Result<PairDisposition> {
    if had_prior_state {
        if ops.contains(Ops::REMOVE) {
            if present.confirm_box_empty(present_name)? {
                present.delete_box(present_name)?;
                return Ok(PairDisposition::Skip);
            }
            tracing::warn!(
                box_name = present_name,
                "opposite side of a deleted box is not empty — refusing to delete, skipping pair"
            );
            return Ok(PairDisposition::Skip);
        }
        tracing::warn!(
            missing = missing_name,
            "box missing on one side but OP_REMOVE is not set — skipping pair"
        );
        return Ok(PairDisposition::Skip);
    }
    if ops.contains(Ops::CREATE) {
        missing.create_box(missing_name)?;
        return Ok(PairDisposition::Proceed);
    }
    Err(SyncError::BoxDefect(format!(
        "{missing_name} doesn't exist and OP_CREATE is not set"
    )))
}

pub fn cancel_both(far: &mut dyn Driver, near: &mut dyn Driver) -> DriverOutcome {
    far.cancel_cmds();
    near.cancel_cmds();
    DriverOutcome::Canceled
}
