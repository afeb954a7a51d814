//! IMAP-backed `Driver` (spec §6.1), grounded on the connect/select/
//! fetch sequence the teacher's own IMAP sync uses, generalized from a
//! read-mostly pull into the full read/write set a `Driver` needs.

use std::net::TcpStream;

use imap::types::Flag;
use imap::Session;
use native_tls::TlsStream;

use crate::engine::message::{Message, MsgStatus};
use crate::error::{DriverOutcome, FailState, Result, SyncError};

use super::{Capabilities, Driver, LoadRange, LoadResult, MsgFlags, OpenFlags, StoreOutcome};

type ImapSession = Session<TlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    pub user: String,
    pub password: String,
    pub box_name_trash: Option<String>,
}

pub struct ImapDriver {
    config: ImapConfig,
    session: Option<ImapSession>,
    selected_box: Option<String>,
    fail_state: FailState,
}

impl ImapDriver {
    pub fn new(config: ImapConfig) -> Self {
        ImapDriver { config, session: None, selected_box: None, fail_state: FailState::Ok }
    }

    fn session_mut(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| SyncError::StoreDefect {
                store: self.config.host.clone(),
                detail: "not connected".to_string(),
            })
    }

    fn store_fail(&mut self, detail: impl Into<String>) -> SyncError {
        self.fail_state = FailState::FailTemp;
        SyncError::StoreDefect { store: self.config.host.clone(), detail: detail.into() }
    }
}

fn imap_flags_to_msgflags(flags: &[Flag]) -> MsgFlags {
    let mut out = MsgFlags::empty();
    for f in flags {
        match f {
            Flag::Seen => out |= MsgFlags::SEEN,
            Flag::Flagged => out |= MsgFlags::FLAGGED,
            Flag::Draft => out |= MsgFlags::DRAFT,
            Flag::Answered => out |= MsgFlags::ANSWERED,
            Flag::Deleted => out |= MsgFlags::DELETED,
            Flag::Custom(name) if name.eq_ignore_ascii_case("$Forwarded") => {
                out |= MsgFlags::FORWARDED
            }
            _ => {}
        }
    }
    out
}

fn msgflags_to_imap_strs(flags: MsgFlags) -> Vec<&'static str> {
    let mut out = Vec::new();
    if flags.contains(MsgFlags::SEEN) {
        out.push("\\Seen");
    }
    if flags.contains(MsgFlags::FLAGGED) {
        out.push("\\Flagged");
    }
    if flags.contains(MsgFlags::DRAFT) {
        out.push("\\Draft");
    }
    if flags.contains(MsgFlags::ANSWERED) {
        out.push("\\Answered");
    }
    if flags.contains(MsgFlags::DELETED) {
        out.push("\\Deleted");
    }
    if flags.contains(MsgFlags::FORWARDED) {
        out.push("$Forwarded");
    }
    out
}

impl Driver for ImapDriver {
    fn get_caps(&self) -> Capabilities {
        // The `imap` crate doesn't expose UIDPLUS capability parsing
        // directly here; assume the common case and let a real
        // deployment override via config if a server lacks it.
        Capabilities { uidplus: true, uid_expunge: true }
    }

    fn connect(&mut self) -> Result<DriverOutcome> {
        let mut tls_builder = native_tls::TlsConnector::builder();
        // Relaxed cert/hostname checks are only ever acceptable talking
        // to a loopback server (e.g. a test fixture), never just
        // because STARTTLS is in play — a real STARTTLS deployment
        // still needs full certificate validation.
        if self.config.host == "127.0.0.1" || self.config.host == "::1" || self.config.host == "localhost" {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls = tls_builder
            .build()
            .map_err(|e| self.store_fail(format!("tls setup: {e}")))?;

        let client = if self.config.starttls {
            imap::connect_starttls((self.config.host.as_str(), self.config.port), &self.config.host, &tls)
        } else {
            imap::connect((self.config.host.as_str(), self.config.port), &self.config.host, &tls)
        }
        .map_err(|e| self.store_fail(format!("connect: {e}")))?;

        let session = client
            .login(&self.config.user, &self.config.password)
            .map_err(|(e, _)| self.store_fail(format!("login: {e}")))?;
        self.session = Some(session);
        self.fail_state = FailState::Ok;
        Ok(DriverOutcome::Ok)
    }

    fn list_boxes(&mut self) -> Result<Vec<String>> {
        let session = self.session_mut()?;
        let names = session
            .list(None, Some("*"))
            .map_err(|e| SyncError::StoreDefect { store: "imap".into(), detail: e.to_string() })?;
        Ok(names.iter().map(|n| n.name().to_string()).collect())
    }

    fn open_box(&mut self, name: &str) -> Result<Option<u32>> {
        let session = self.session_mut()?;
        match session.select(name) {
            Ok(mailbox) => {
                self.selected_box = Some(name.to_string());
                Ok(Some(mailbox.uid_validity.unwrap_or(0)))
            }
            Err(imap::error::Error::No(_)) => Ok(None),
            Err(e) => Err(SyncError::BoxDefect(format!("select {name}: {e}"))),
        }
    }

    fn create_box(&mut self, name: &str) -> Result<DriverOutcome> {
        let session = self.session_mut()?;
        session
            .create(name)
            .map_err(|e| SyncError::BoxDefect(format!("create {name}: {e}")))?;
        Ok(DriverOutcome::Ok)
    }

    fn delete_box(&mut self, name: &str) -> Result<DriverOutcome> {
        let session = self.session_mut()?;
        session
            .delete(name)
            .map_err(|e| SyncError::BoxDefect(format!("delete {name}: {e}")))?;
        Ok(DriverOutcome::Ok)
    }

    fn confirm_box_empty(&mut self, name: &str) -> Result<bool> {
        let uidvalidity = self.open_box(name)?;
        if uidvalidity.is_none() {
            return Ok(true);
        }
        let session = self.session_mut()?;
        let uids = session
            .uid_search("ALL")
            .map_err(|e| SyncError::BoxDefect(format!("search {name}: {e}")))?;
        Ok(uids.is_empty())
    }

    fn prepare_load_box(&mut self, opts: OpenFlags) -> Result<OpenFlags> {
        // IMAP always returns FLAGS for free on a FETCH; widen the
        // request rather than narrow it, per the trait's contract.
        Ok(opts | OpenFlags::FLAGS)
    }

    fn load_box(&mut self, range: &LoadRange) -> Result<LoadResult> {
        let session = self.session_mut()?;
        let mut uid_set = format!("{}:*", range.min_uid.max(1));
        for extra in &range.exceptions {
            uid_set.push_str(&format!(",{extra}"));
        }
        let fetches = session
            .uid_fetch(&uid_set, "(UID FLAGS RFC822.SIZE RFC822.HEADER)")
            .map_err(|e| SyncError::BoxDefect(format!("fetch: {e}")))?;

        let mut messages = Vec::new();
        for f in fetches.iter() {
            let Some(uid) = f.uid else { continue };
            let mut msg = Message::new(uid);
            msg.size = f.size.unwrap_or(0) as u64;
            msg.flags = imap_flags_to_msgflags(f.flags());
            msg.status |= MsgStatus::FLAGS_KNOWN | MsgStatus::SIZE_KNOWN;
            if let Some(header) = f.header() {
                msg.tuid = extract_tuid(header);
                msg.msgid = extract_header(header, "Message-ID:");
                msg.status |= MsgStatus::HEADER_KNOWN;
            }
            messages.push(msg);
        }
        let total = messages.len() as u32;
        Ok(LoadResult { messages, total, recent: 0 })
    }

    fn get_uidnext(&mut self) -> Result<u32> {
        let Some(name) = self.selected_box.clone() else {
            return Err(SyncError::BoxDefect("no box selected".into()));
        };
        let session = self.session_mut()?;
        let mailbox = session
            .examine(&name)
            .map_err(|e| SyncError::BoxDefect(format!("examine {name}: {e}")))?;
        Ok(mailbox.uid_next.unwrap_or(1))
    }

    fn get_supported_flags(&self) -> MsgFlags {
        MsgFlags::all()
    }

    fn fetch_msg(&mut self, uid: u32, minimal: bool) -> Result<Vec<u8>> {
        let section = if minimal { "RFC822.HEADER" } else { "RFC822" };
        let session = self.session_mut()?;
        let fetches = session
            .uid_fetch(uid.to_string(), section)
            .map_err(|e| SyncError::MessageDefect(format!("fetch uid {uid}: {e}")))?;
        let fetch = fetches
            .iter()
            .next()
            .ok_or_else(|| SyncError::MessageDefect(format!("uid {uid} vanished before fetch")))?;
        let body = if minimal {
            fetch.header()
        } else {
            fetch.body()
        };
        Ok(body.unwrap_or(&[]).to_vec())
    }

    fn store_msg(&mut self, data: &[u8], to_trash: bool) -> Result<StoreOutcome> {
        let target = if to_trash {
            self.config.box_name_trash.clone()
        } else {
            self.selected_box.clone()
        };
        let Some(target) = target else {
            return Err(SyncError::BoxDefect("no target box for append".into()));
        };
        let session = self.session_mut()?;
        session
            .append(&target, data)
            .finish()
            .map_err(|e| SyncError::MessageDefect(format!("append to {target}: {e}")))?;
        // The `imap` crate's APPEND response doesn't surface the
        // APPENDUID response code through this API; callers fall back
        // to FIND_NEW to resolve the UID.
        Ok(StoreOutcome::Unknown)
    }

    fn find_new_msgs(&mut self, uidnext: u32) -> Result<Vec<Message>> {
        let range = LoadRange { min_uid: uidnext, max_uid: u32::MAX, exceptions: Vec::new() };
        Ok(self.load_box(&range)?.messages)
    }

    fn set_msg_flags(&mut self, uid: u32, add: MsgFlags, del: MsgFlags) -> Result<DriverOutcome> {
        let session = self.session_mut()?;
        if !add.is_empty() {
            let query = format!("+FLAGS ({})", msgflags_to_imap_strs(add).join(" "));
            session
                .uid_store(uid.to_string(), query)
                .map_err(|e| SyncError::MessageDefect(format!("store flags uid {uid}: {e}")))?;
        }
        if !del.is_empty() {
            let query = format!("-FLAGS ({})", msgflags_to_imap_strs(del).join(" "));
            session
                .uid_store(uid.to_string(), query)
                .map_err(|e| SyncError::MessageDefect(format!("store flags uid {uid}: {e}")))?;
        }
        Ok(DriverOutcome::Ok)
    }

    fn trash_msg(&mut self, uid: u32) -> Result<DriverOutcome> {
        if let Some(trash) = self.config.box_name_trash.clone() {
            let session = self.session_mut()?;
            session
                .uid_copy(uid.to_string(), &trash)
                .map_err(|e| SyncError::MessageDefect(format!("copy to trash uid {uid}: {e}")))?;
        }
        self.set_msg_flags(uid, MsgFlags::DELETED, MsgFlags::empty())
    }

    fn close_box(&mut self) -> Result<(bool, Vec<u32>)> {
        let session = self.session_mut()?;
        session
            .expunge()
            .map_err(|e| SyncError::BoxDefect(format!("expunge: {e}")))?;
        // Plain EXPUNGE responses (sequence numbers) aren't UIDs; the
        // engine must fall back to trusting its own delete requests.
        Ok((false, Vec::new()))
    }

    fn cancel_cmds(&mut self) {
        // Nothing buffered client-side in this synchronous driver.
    }

    fn commit_cmds(&mut self) -> Result<DriverOutcome> {
        Ok(DriverOutcome::Ok)
    }

    fn get_memory_usage(&self) -> usize {
        0
    }

    fn get_fail_state(&self) -> FailState {
        self.fail_state
    }

    fn cancel_store(&mut self) {}
}

fn extract_tuid(header: &[u8]) -> Option<String> {
    extract_header(header, "X-TUID:")
}

/// Case-insensitive single-line header lookup. Good enough for
/// `X-TUID` and `Message-ID`, neither of which folds across lines in
/// messages this engine itself produces or needs to re-approve
/// UIDVALIDITY against (spec §4.4).
fn extract_header(header: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(header);
    let name = name.to_ascii_lowercase();
    for line in text.lines() {
        if let Some(idx) = line.to_ascii_lowercase().find(&name) {
            if idx == 0 {
                return Some(line[name.len()..].trim().to_string());
            }
        }
    }
    None
}
