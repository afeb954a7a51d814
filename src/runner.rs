//! Channel-level orchestration (SPEC_FULL §B.2/§C): turns a parsed
//! config into connected drivers, discovers the box pairs a channel's
//! `patterns` select, and drives each pair through `engine::run_pair`.
//!
//! Everything in `engine/` only knows about one box pair at a time; this
//! is the layer above it that knows about stores, channels, and the
//! filesystem layout of per-pair state files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::config::{ChannelConfig, RootConfig, StoreConfig};
use crate::driver::imap::{ImapConfig, ImapDriver};
use crate::driver::maildir::MaildirDriver;
use crate::driver::Driver;
use crate::engine::{self, PairRequest, PairReport};
use crate::engine::policy::Ops;
use crate::engine::record::Status;
use crate::engine::side::Side;
use crate::engine::state::StateFile;
use crate::error::{FailState, Result, SyncError};

/// One box pair's outcome within a channel run.
pub struct PairRun {
    pub far_box: String,
    pub near_box: String,
    pub outcome: Result<PairReport>,
}

pub struct ChannelRun {
    pub channel: String,
    pub pairs: Vec<PairRun>,
}

impl ChannelRun {
    /// Spec §6.4's exit-code inputs: did anything fail.
    pub fn any_failed(&self) -> bool {
        self.pairs.iter().any(|p| p.outcome.is_err())
    }
}

fn build_driver(store: &StoreConfig) -> Result<Box<dyn Driver>> {
    match store {
        StoreConfig::Imap { host, port, starttls, user, password, password_cmd, trash_box } => {
            let password = crate::config::resolve_password(password, password_cmd)
                .map_err(|e| SyncError::ConfigDefect(e.to_string()))?;
            Ok(Box::new(ImapDriver::new(ImapConfig {
                host: host.clone(),
                port: *port,
                starttls: *starttls,
                user: user.clone(),
                password,
                box_name_trash: trash_box.clone(),
            })))
        }
        StoreConfig::Maildir { path } => Ok(Box::new(MaildirDriver::new(path.clone()))),
    }
}

/// `patterns` selection (SPEC_FULL §B.1): glob list, `!`-prefixed
/// entries exclude, and whichever pattern in the list matches last
/// wins. An empty pattern list selects every box the store reports.
fn pattern_selected(patterns: &[String], name: &str) -> bool {
    let mut selected = patterns.is_empty();
    for raw in patterns {
        let (negate, glob_str) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };
        match glob::Pattern::new(glob_str) {
            Ok(pat) if pat.matches(name) => selected = !negate,
            Ok(_) => {}
            Err(e) => warn!(pattern = glob_str, error = %e, "ignoring malformed channel pattern"),
        }
    }
    selected
}

/// Pair each selected far box with an identically-named near box.
/// Folders are matched by name rather than by some separate mapping
/// table — the same assumption isync's own `Far`/`Near` channel model
/// makes when neither side names an explicit box override.
fn discover_pairs(
    far: &mut dyn Driver,
    near: &mut dyn Driver,
    channel: &ChannelConfig,
    ops: Ops,
) -> Result<Vec<(String, String)>> {
    let far_boxes = far.list_boxes()?;
    let near_boxes: HashSet<String> = near.list_boxes()?.into_iter().collect();

    let mut pairs = Vec::new();
    for name in far_boxes {
        if !pattern_selected(&channel.patterns, &name) {
            continue;
        }
        if !near_boxes.contains(&name) && !ops.contains(Ops::CREATE) {
            warn!(box_name = %name, "no matching near-side box and OP_CREATE is not set, skipping");
            continue;
        }
        pairs.push((name.clone(), name));
    }
    Ok(pairs)
}

fn sanitize_box_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Per-pair state file path: `<channel.sync_state>/<sanitized box name>`.
pub fn state_path_for_box(channel: &ChannelConfig, box_name: &str) -> PathBuf {
    Path::new(&channel.sync_state).join(sanitize_box_name(box_name))
}

/// Per-store failed-state sidecar path (SPEC_FULL §C), kept alongside
/// the channel's per-pair state files.
fn failstate_path(channel: &ChannelConfig, store_name: &str) -> PathBuf {
    Path::new(&channel.sync_state).join(format!("{store_name}.failstate"))
}

fn read_failstate(path: &Path) -> FailState {
    std::fs::read_to_string(path).map(|s| FailState::parse(&s)).unwrap_or_default()
}

fn write_failstate(path: &Path, state: FailState) -> Result<()> {
    if state == FailState::Ok {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }
    std::fs::write(path, state.as_str())
        .map_err(|e| SyncError::EnvironmentDefect(format!("write {}: {e}", path.display())))
}

/// Run every box pair a channel's patterns select (spec §1's "a
/// channel synchronizes a set of box pairs between a far and a near
/// store"). A store connect failure marks that store's `.failstate`
/// and aborts the remaining pairs on this channel (spec §7: a store
/// defect kills every remaining pair on that store); a single box
/// pair's defect only kills that pair and the run continues.
#[instrument(skip(cfg), fields(channel = channel_name))]
pub fn run_channel(cfg: &RootConfig, channel_name: &str, dry_run: bool) -> Result<ChannelRun> {
    let channel = cfg
        .channels
        .get(channel_name)
        .ok_or_else(|| SyncError::ConfigDefect(format!("unknown channel: {channel_name}")))?;
    let policy = channel
        .to_policy(channel_name)
        .map_err(|e| SyncError::ConfigDefect(e.to_string()))?;

    std::fs::create_dir_all(&channel.sync_state)
        .map_err(|e| SyncError::EnvironmentDefect(format!("create state dir {}: {e}", channel.sync_state)))?;

    let far_store = cfg
        .stores
        .get(&channel.far)
        .ok_or_else(|| SyncError::ConfigDefect(format!("unknown store: {}", channel.far)))?;
    let near_store = cfg
        .stores
        .get(&channel.near)
        .ok_or_else(|| SyncError::ConfigDefect(format!("unknown store: {}", channel.near)))?;

    let far_fail = failstate_path(channel, &channel.far);
    let near_fail = failstate_path(channel, &channel.near);
    if !read_failstate(&far_fail).is_usable() {
        return Err(SyncError::StoreDefect {
            store: channel.far.clone(),
            detail: "store is in a persisted failed state from a previous run".to_string(),
        });
    }
    if !read_failstate(&near_fail).is_usable() {
        return Err(SyncError::StoreDefect {
            store: channel.near.clone(),
            detail: "store is in a persisted failed state from a previous run".to_string(),
        });
    }

    let mut far = build_driver(far_store)?;
    let mut near = build_driver(near_store)?;

    if let Err(e) = far.connect() {
        write_failstate(&far_fail, FailState::FailTemp)?;
        return Err(e);
    }
    if let Err(e) = near.connect() {
        write_failstate(&near_fail, FailState::FailTemp)?;
        return Err(e);
    }
    write_failstate(&far_fail, FailState::Ok)?;
    write_failstate(&near_fail, FailState::Ok)?;

    let pairs = discover_pairs(far.as_mut(), near.as_mut(), channel, policy.ops)?;
    info!(count = pairs.len(), "discovered box pairs");

    let mut run = ChannelRun { channel: channel_name.to_string(), pairs: Vec::new() };
    for (far_box, near_box) in pairs {
        let state_path = state_path_for_box(channel, &far_box);
        let req = PairRequest {
            policy: &policy,
            far_name: &far_box,
            near_name: &near_box,
            state_path: &state_path,
            dry_run,
        };
        let outcome = engine::run_pair(far.as_mut(), near.as_mut(), &req);
        let store_defect = matches!(outcome, Err(SyncError::StoreDefect { .. }));
        if let Err(ref e) = outcome {
            warn!(far_box = %far_box, near_box = %near_box, error = %e, "pair failed");
        }
        run.pairs.push(PairRun { far_box, near_box, outcome });
        if store_defect {
            write_failstate(&far_fail, FailState::FailTemp)?;
            break;
        }
    }
    Ok(run)
}

/// Per-pair summary for the `status` command (SPEC_FULL §C): read-only,
/// never touches the write-lock path so it can run alongside a live
/// sync.
#[derive(Debug, Clone, Default)]
pub struct PairStatus {
    pub box_name: String,
    pub locked: bool,
    pub paired: usize,
    pub pending: usize,
    pub expiring: usize,
    pub expired: usize,
}

fn lock_marker_path(state_path: &Path) -> PathBuf {
    let mut s = state_path.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

/// Summarize every per-pair state file under a channel's `sync_state`
/// directory, skipping the journal/lock/tmp/failstate sidecars that
/// live alongside them.
pub fn status(cfg: &RootConfig, channel_name: &str) -> Result<Vec<PairStatus>> {
    let channel = cfg
        .channels
        .get(channel_name)
        .ok_or_else(|| SyncError::ConfigDefect(format!("unknown channel: {channel_name}")))?;

    let dir = Path::new(&channel.sync_state);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if name.ends_with(".lock") || name.ends_with(".journal") || name.ends_with(".new") || name.ends_with(".failstate") {
            continue;
        }
        let Some(state) = StateFile::load(&path)? else { continue };

        let mut s = PairStatus { box_name: name.to_string(), locked: lock_marker_path(&path).exists(), ..Default::default() };
        for rec in &state.records {
            if rec.uid[Side::Far] != 0 && rec.uid[Side::Near] != 0 {
                s.paired += 1;
            }
            if rec.is_pending() {
                s.pending += 1;
            }
            if rec.status.contains(Status::EXPIRE) {
                s.expiring += 1;
            }
            if rec.status.contains(Status::EXPIRED) {
                s.expired += 1;
            }
        }
        out.push(s);
    }
    out.sort_by(|a, b| a.box_name.cmp(&b.box_name));
    Ok(out)
}
