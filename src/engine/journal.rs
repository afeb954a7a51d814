//! Append-only journal (spec §3.5) and replay (spec §4.2, §8 property 1/2).
//!
//! Every decision is journaled before it is acted on. Replaying the
//! journal against the previous state file must reproduce the
//! in-memory record set a run had reached at the point of
//! interruption — that's what makes the engine crash-safe without a
//! separate recovery code path.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::driver::MsgFlags;
use crate::error::{Result, SyncError};

use super::record::{EphemeralStatus, Status, SyncRecord};
use super::side::{PerSide, Side};
use super::state::{StateFile, StateHeader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    NewPending { far: u32, near: u32 },
    Kill { far: u32, near: u32 },
    AssignNear { far: u32, near: u32, new_near: u32 },
    AssignFar { far: u32, near: u32, new_far: u32 },
    TuidBegin { far: u32, near: u32 },
    TuidValue { far: u32, near: u32, tuid: String },
    CommitFlags { far: u32, near: u32, flags: MsgFlags },
    SetStatus { far: u32, near: u32, status: Status },
    PlaceholderUpgrade { far: u32, near: u32, pflags: MsgFlags },
    PlaceholderCopied { far: u32, near: u32, pflags: MsgFlags },
    AppliedUpgradeFlags { far: u32, near: u32, add: MsgFlags, del: MsgFlags },
    PlaceholderPurged { far: u32, near: u32 },
    Trashed { side: Side, uid: u32 },
    SaveUidNext { side: Side, uidnext: u32 },
    BumpMaxUid { side: Side, maxuid: u32 },
    NewUidValidity { far_uv: u32, near_uv: u32 },
}

fn side_char(side: Side) -> char {
    match side {
        Side::Far => 'F',
        Side::Near => 'N',
    }
}

fn parse_side(s: &str) -> Result<Side> {
    match s {
        "F" => Ok(Side::Far),
        "N" => Ok(Side::Near),
        _ => Err(SyncError::EnvironmentDefect(format!("bad side: {s}"))),
    }
}

impl JournalOp {
    pub fn to_line(&self) -> String {
        match self {
            JournalOp::NewPending { far, near } => format!("+ {far} {near}"),
            JournalOp::Kill { far, near } => format!("- {far} {near}"),
            JournalOp::AssignNear { far, near, new_near } => {
                format!("> {far} {near} {new_near}")
            }
            JournalOp::AssignFar { far, near, new_far } => format!("< {far} {near} {new_far}"),
            JournalOp::TuidBegin { far, near } => format!("& {far} {near}"),
            JournalOp::TuidValue { far, near, tuid } => format!("# {far} {near} {tuid}"),
            JournalOp::CommitFlags { far, near, flags } => {
                let chars = flags.to_chars();
                format!(
                    "* {far} {near} {}",
                    if chars.is_empty() { "-" } else { &chars }
                )
            }
            JournalOp::SetStatus { far, near, status } => {
                let chars = status.to_chars();
                format!(
                    "~ {far} {near} {}",
                    if chars.is_empty() { "-" } else { &chars }
                )
            }
            JournalOp::PlaceholderUpgrade { far, near, pflags } => {
                format!("^ {far} {near} {}", pflags.to_chars())
            }
            JournalOp::PlaceholderCopied { far, near, pflags } => {
                format!("% {far} {near} {}", pflags.to_chars())
            }
            JournalOp::AppliedUpgradeFlags { far, near, add, del } => {
                let a = add.to_chars();
                let d = del.to_chars();
                format!(
                    "$ {far} {near} {} {}",
                    if a.is_empty() { "-" } else { &a },
                    if d.is_empty() { "-" } else { &d }
                )
            }
            JournalOp::PlaceholderPurged { far, near } => format!("P {far} {near}"),
            JournalOp::Trashed { side, uid } => format!("T {} {uid}", side_char(*side)),
            JournalOp::SaveUidNext { side, uidnext } => format!("F {} {uidnext}", side_char(*side)),
            JournalOp::BumpMaxUid { side, maxuid } => format!("N {} {maxuid}", side_char(*side)),
            JournalOp::NewUidValidity { far_uv, near_uv } => format!("| {far_uv} {near_uv}"),
        }
    }

    pub fn from_line(line: &str) -> Result<JournalOp> {
        let bad = || SyncError::EnvironmentDefect(format!("malformed journal line: {line}"));
        let mut parts = line.splitn(2, ' ');
        let op = parts.next().ok_or_else(bad)?;
        let rest = parts.next().unwrap_or("").trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let u32_at = |i: usize| -> Result<u32> { args.get(i).ok_or_else(bad)?.parse().map_err(|_| bad()) };

        Ok(match op {
            "+" => JournalOp::NewPending { far: u32_at(0)?, near: u32_at(1)? },
            "-" => JournalOp::Kill { far: u32_at(0)?, near: u32_at(1)? },
            ">" => JournalOp::AssignNear {
                far: u32_at(0)?,
                near: u32_at(1)?,
                new_near: u32_at(2)?,
            },
            "<" => JournalOp::AssignFar {
                far: u32_at(0)?,
                near: u32_at(1)?,
                new_far: u32_at(2)?,
            },
            "&" => JournalOp::TuidBegin { far: u32_at(0)?, near: u32_at(1)? },
            "#" => JournalOp::TuidValue {
                far: u32_at(0)?,
                near: u32_at(1)?,
                tuid: args.get(2).ok_or_else(bad)?.to_string(),
            },
            "*" => JournalOp::CommitFlags {
                far: u32_at(0)?,
                near: u32_at(1)?,
                flags: MsgFlags::from_chars(args.get(2).copied().unwrap_or("")),
            },
            "~" => JournalOp::SetStatus {
                far: u32_at(0)?,
                near: u32_at(1)?,
                status: Status::from_chars(args.get(2).copied().unwrap_or("")),
            },
            "^" => JournalOp::PlaceholderUpgrade {
                far: u32_at(0)?,
                near: u32_at(1)?,
                pflags: MsgFlags::from_chars(args.get(2).copied().unwrap_or("")),
            },
            "%" => JournalOp::PlaceholderCopied {
                far: u32_at(0)?,
                near: u32_at(1)?,
                pflags: MsgFlags::from_chars(args.get(2).copied().unwrap_or("")),
            },
            "$" => JournalOp::AppliedUpgradeFlags {
                far: u32_at(0)?,
                near: u32_at(1)?,
                add: MsgFlags::from_chars(args.get(2).copied().unwrap_or("")),
                del: MsgFlags::from_chars(args.get(3).copied().unwrap_or("")),
            },
            "P" => JournalOp::PlaceholderPurged { far: u32_at(0)?, near: u32_at(1)? },
            "T" => JournalOp::Trashed {
                side: parse_side(args.first().ok_or_else(bad)?)?,
                uid: u32_at(1)?,
            },
            "F" => JournalOp::SaveUidNext {
                side: parse_side(args.first().ok_or_else(bad)?)?,
                uidnext: u32_at(1)?,
            },
            "N" => JournalOp::BumpMaxUid {
                side: parse_side(args.first().ok_or_else(bad)?)?,
                maxuid: u32_at(1)?,
            },
            "|" => JournalOp::NewUidValidity { far_uv: u32_at(0)?, near_uv: u32_at(1)? },
            _ => return Err(bad()),
        })
    }
}

/// An open, append-only journal file.
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Create (or reopen for append) the journal, writing the header
    /// line first if the file is new.
    pub fn open(path: &Path, header: &StateFile) -> Result<Journal> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SyncError::EnvironmentDefect(format!("open journal {}: {e}", path.display())))?;
        if is_new {
            file.write_all(header.header_line().as_bytes())
                .map_err(|e| SyncError::EnvironmentDefect(format!("write journal header: {e}")))?;
        }
        Ok(Journal { path: path.to_path_buf(), file })
    }

    pub fn append(&mut self, op: &JournalOp) -> Result<()> {
        writeln!(self.file, "{}", op.to_line())
            .map_err(|e| SyncError::EnvironmentDefect(format!("append journal: {e}")))
    }

    /// Forced fsync point: after a TUID-assignment block, and before
    /// the state file is replaced (spec §5).
    pub fn fsync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| SyncError::EnvironmentDefect(format!("fsync journal: {e}")))
    }

    pub fn remove(self) -> Result<()> {
        drop(self.file);
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| SyncError::EnvironmentDefect(format!("remove journal: {e}")))?;
        }
        Ok(())
    }
}

/// Read a journal file's lines, tolerating a truncated/partial last
/// line (spec §6.3: "treated as operation never committed").
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| SyncError::EnvironmentDefect(format!("read journal {}: {e}", path.display())))?;
    let ends_with_newline = text.ends_with('\n');
    let mut lines: Vec<String> = text.lines().map(|s| s.to_string()).collect();
    if !ends_with_newline && !lines.is_empty() {
        // Last line wasn't terminated: it may be a half-written
        // operation. Drop it rather than risk parsing garbage.
        lines.pop();
    }
    Ok(lines)
}

/// Replay parsed journal lines against the loaded state, in order,
/// skipping the header line (already used to build `state`, or
/// verified against it by the caller).
pub fn replay(state: &mut StateFile, lines: &[String]) -> Result<()> {
    for line in lines.iter().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let op = match JournalOp::from_line(line) {
            Ok(op) => op,
            // A truncated trailing op-line: stop replay here, as if
            // it was never committed.
            Err(_) => break,
        };
        apply_op(state, &op);
    }
    Ok(())
}

fn find_index(state: &StateFile, far: u32, near: u32) -> Option<usize> {
    state
        .records
        .iter()
        .position(|r| r.uid[Side::Far] == far && r.uid[Side::Near] == near && !r.is_dead())
}

fn apply_op(state: &mut StateFile, op: &JournalOp) {
    match op {
        JournalOp::NewPending { far, near } => {
            let mut rec = SyncRecord::new(*far, *near);
            rec.status.insert(Status::PENDING);
            state.records.push(rec);
        }
        JournalOp::Kill { far, near } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].mark_dead();
            }
        }
        JournalOp::AssignNear { far, near, new_near } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].uid[Side::Near] = *new_near;
                state.records[i].status.remove(Status::PENDING);
                state.records[i].tuid.clear();
            }
        }
        JournalOp::AssignFar { far, near, new_far } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].uid[Side::Far] = *new_far;
                state.records[i].status.remove(Status::PENDING);
                state.records[i].tuid.clear();
            }
        }
        JournalOp::TuidBegin { .. } => {
            // Boundary marker only; the concrete value arrives via
            // the following `#` line.
        }
        JournalOp::TuidValue { far, near, tuid } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].tuid = tuid.clone();
            }
        }
        JournalOp::CommitFlags { far, near, flags } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].flags = *flags;
            }
        }
        JournalOp::SetStatus { far, near, status } => {
            if let Some(i) = find_index(state, *far, *near) {
                // Persistent status bits are set wholesale except
                // PENDING/DUMMY which are managed by the UID-assign
                // and upgrade ops above.
                let keep = state.records[i].status
                    & (Status::PENDING | Status::DUMMY_FAR | Status::DUMMY_NEAR);
                state.records[i].status = *status | keep;
            }
        }
        JournalOp::PlaceholderUpgrade { far, near, pflags } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].pflags = *pflags;
                state.records[i].ephemeral.insert(EphemeralStatus::UPGRADE);
            }
        }
        JournalOp::PlaceholderCopied { far, near, pflags } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].pflags = *pflags;
            }
        }
        JournalOp::AppliedUpgradeFlags { far, near, add, del } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].flags = (state.records[i].flags | *add) & !*del;
            }
        }
        JournalOp::PlaceholderPurged { far, near } => {
            if let Some(i) = find_index(state, *far, *near) {
                state.records[i].ephemeral.insert(EphemeralStatus::PURGED);
            }
        }
        JournalOp::Trashed { .. } => {
            // Tracked by the trash-replay set in `engine::trash`, not
            // the record table itself.
        }
        JournalOp::SaveUidNext { .. } => {}
        JournalOp::BumpMaxUid { side, maxuid } => match side {
            Side::Far => state.header.max_pulled_uid = (*maxuid).max(state.header.max_pulled_uid),
            Side::Near => state.header.max_pushed_uid = (*maxuid).max(state.header.max_pushed_uid),
        },
        JournalOp::NewUidValidity { far_uv, near_uv } => {
            state.header.uid_validity = PerSide::new(*far_uv, *near_uv);
        }
    }
}

pub fn header_matches(journal_header_line: &str, state: &StateFile) -> bool {
    journal_header_line.trim() == state.header_line().trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(s: &str) -> MsgFlags {
        MsgFlags::from_chars(s)
    }

    #[test]
    fn op_round_trips_through_text() {
        let ops = vec![
            JournalOp::NewPending { far: 10, near: 0 },
            JournalOp::Kill { far: 1, near: 2 },
            JournalOp::AssignNear { far: 10, near: 0, new_near: 55 },
            JournalOp::AssignFar { far: 0, near: 7, new_far: 3 },
            JournalOp::TuidBegin { far: 10, near: 0 },
            JournalOp::TuidValue { far: 10, near: 0, tuid: "abc123".into() },
            JournalOp::CommitFlags { far: 10, near: 55, flags: flags("FS") },
            JournalOp::SetStatus { far: 10, near: 55, status: Status::EXPIRE },
            JournalOp::Trashed { side: Side::Far, uid: 12 },
            JournalOp::SaveUidNext { side: Side::Near, uidnext: 101 },
            JournalOp::BumpMaxUid { side: Side::Far, maxuid: 9001 },
            JournalOp::NewUidValidity { far_uv: 111, near_uv: 222 },
        ];
        for op in ops {
            let line = op.to_line();
            let parsed = JournalOp::from_line(&line).unwrap();
            assert_eq!(parsed, op, "line={line}");
        }
    }

    #[test]
    fn replay_assigns_pending_then_resolves_uid() {
        let mut state = StateFile::default();
        let lines = vec![
            "header".to_string(),
            JournalOp::NewPending { far: 10, near: 0 }.to_line(),
            JournalOp::TuidBegin { far: 10, near: 0 }.to_line(),
            JournalOp::TuidValue { far: 10, near: 0, tuid: "T1".into() }.to_line(),
            JournalOp::AssignNear { far: 10, near: 0, new_near: 55 }.to_line(),
        ];
        replay(&mut state, &lines).unwrap();
        assert_eq!(state.records.len(), 1);
        let rec = &state.records[0];
        assert_eq!(rec.uid[Side::Far], 10);
        assert_eq!(rec.uid[Side::Near], 55);
        assert!(!rec.status.contains(Status::PENDING));
        assert!(rec.tuid.is_empty());
    }

    #[test]
    fn replay_stops_at_truncated_trailing_line() {
        let mut state = StateFile::default();
        let lines = vec![
            "header".to_string(),
            JournalOp::NewPending { far: 10, near: 0 }.to_line(),
            "& 10".to_string(), // truncated: missing near arg
        ];
        replay(&mut state, &lines).unwrap();
        assert_eq!(state.records.len(), 1);
    }
}
