//! On-disk state file (spec §3.4, §4.10).
//!
//! Text, one directive per line. The header is echoed verbatim into
//! the journal so replay can reject a journal that doesn't match
//! (spec §3.5). Forward-compatible: unknown status letters are kept
//! only across a journal replay that produced them, never accepted
//! cold from a state file (spec §6.2).

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::driver::MsgFlags;
use crate::error::{Result, SyncError};

use super::record::{Status, SyncRecord};
use super::side::{PerSide, Side};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateHeader {
    pub uid_validity: PerSide<u32>,
    pub max_pulled_uid: u32,
    pub max_pushed_uid: u32,
    /// Highest expired far-side UID (`maxxfuid`, spec §4.8). Zero when
    /// this channel has no expire side.
    pub max_expired_far_uid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct StateFile {
    pub header: StateHeader,
    pub records: Vec<SyncRecord>,
}

impl StateFile {
    pub fn header_line(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "FarUidValidity {} NearUidValidity {}",
            self.header.uid_validity[Side::Far], self.header.uid_validity[Side::Near]
        );
        let _ = writeln!(
            s,
            "MaxPulledUid {} MaxPushedUid {}",
            self.header.max_pulled_uid, self.header.max_pushed_uid
        );
        let _ = writeln!(s, "MaxExpiredFarUid {}", self.header.max_expired_far_uid);
        s
    }

    fn record_line(rec: &SyncRecord) -> String {
        let flags = rec.flags.to_chars();
        let status = rec.status.to_chars();
        format!(
            "{} {} {} {}",
            rec.uid[Side::Far],
            rec.uid[Side::Near],
            if flags.is_empty() { "-" } else { &flags },
            if status.is_empty() { "-" } else { &status },
        )
    }

    pub fn serialize(&self) -> String {
        let mut out = self.header_line();
        for rec in &self.records {
            if rec.is_dead() {
                continue;
            }
            out.push_str(&Self::record_line(rec));
            out.push('\n');
        }
        out
    }

    /// Atomically replace `path` with this state (spec §4.10): write
    /// to `<path>.new`, fsync, rename over the original, then the
    /// caller removes the journal.
    pub fn commit(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("new");
        let data = self.serialize();
        fs::write(&tmp, &data)
            .map_err(|e| SyncError::EnvironmentDefect(format!("write {}: {e}", tmp.display())))?;
        let file = fs::File::open(&tmp)
            .map_err(|e| SyncError::EnvironmentDefect(format!("reopen {}: {e}", tmp.display())))?;
        file.sync_all()
            .map_err(|e| SyncError::EnvironmentDefect(format!("fsync {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| SyncError::EnvironmentDefect(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Option<StateFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)
            .map_err(|e| SyncError::EnvironmentDefect(format!("read {}: {e}", path.display())))?;
        Self::parse(&text).map(Some)
    }

    pub fn parse(text: &str) -> Result<StateFile> {
        let mut lines = text.lines();
        let header = parse_header(&mut lines)?;
        let mut records = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(parse_record_line(line)?);
        }
        Ok(StateFile { header, records })
    }
}

fn parse_header<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Result<StateHeader> {
    let bad = |msg: &str| SyncError::EnvironmentDefect(format!("malformed state header: {msg}"));

    let line1 = lines.next().ok_or_else(|| bad("missing UIDVALIDITY line"))?;
    let parts: Vec<&str> = line1.split_whitespace().collect();
    if parts.len() != 4 || parts[0] != "FarUidValidity" || parts[2] != "NearUidValidity" {
        return Err(bad(line1));
    }
    let far_uv: u32 = parts[1].parse().map_err(|_| bad(line1))?;
    let near_uv: u32 = parts[3].parse().map_err(|_| bad(line1))?;

    let line2 = lines.next().ok_or_else(|| bad("missing MaxPulledUid line"))?;
    let parts: Vec<&str> = line2.split_whitespace().collect();
    if parts.len() != 4 || parts[0] != "MaxPulledUid" || parts[2] != "MaxPushedUid" {
        return Err(bad(line2));
    }
    let max_pulled: u32 = parts[1].parse().map_err(|_| bad(line2))?;
    let max_pushed: u32 = parts[3].parse().map_err(|_| bad(line2))?;

    let line3 = lines
        .next()
        .ok_or_else(|| bad("missing MaxExpiredFarUid line"))?;
    let parts: Vec<&str> = line3.split_whitespace().collect();
    if parts.len() != 2 || parts[0] != "MaxExpiredFarUid" {
        return Err(bad(line3));
    }
    let max_expired: u32 = parts[1].parse().map_err(|_| bad(line3))?;

    Ok(StateHeader {
        uid_validity: PerSide::new(far_uv, near_uv),
        max_pulled_uid: max_pulled,
        max_pushed_uid: max_pushed,
        max_expired_far_uid: max_expired,
    })
}

fn parse_record_line(line: &str) -> Result<SyncRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(SyncError::EnvironmentDefect(format!(
            "malformed record line: {line}"
        )));
    }
    let far_uid: u32 = parts[0]
        .parse()
        .map_err(|_| SyncError::EnvironmentDefect(format!("bad far uid in: {line}")))?;
    let near_uid: u32 = parts[1]
        .parse()
        .map_err(|_| SyncError::EnvironmentDefect(format!("bad near uid in: {line}")))?;
    let flags = parts.get(2).copied().unwrap_or("-");
    let status = parts.get(3).copied().unwrap_or("-");
    let flags = if flags == "-" { "" } else { flags };
    let status = if status == "-" { "" } else { status };

    let mut rec = SyncRecord::new(far_uid, near_uid);
    rec.flags = MsgFlags::from_chars(flags);
    rec.status = Status::from_chars(status);

    // Legacy SKIPPED recovery (spec §3.2, §9): treat as PENDING|DUMMY
    // of whichever side is currently empty, and never re-emit SKIPPED.
    if rec.status.contains(Status::SKIPPED) {
        rec.status.remove(Status::SKIPPED);
        rec.status.insert(Status::PENDING);
        let dummy_side = if rec.uid[Side::Far] == 0 {
            Side::Far
        } else {
            Side::Near
        };
        rec.status.insert(Status::dummy(dummy_side));
    }

    Ok(rec)
}
