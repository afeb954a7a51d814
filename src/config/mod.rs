//! Channel/store configuration (SPEC_FULL §B.1).
//!
//! The sync engine itself treats configuration as an external
//! collaborator (spec §1); this is the thin TOML reader that turns a
//! file on disk into the `ChannelPolicy` and store connection details
//! the engine actually consumes, the same way the teacher parses its
//! own `.corky.toml` with `serde` + `toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::engine::policy::{ChannelPolicy, Ops};
use crate::engine::side::Side;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RootConfig {
    #[serde(default, rename = "store")]
    pub stores: HashMap<String, StoreConfig>,
    #[serde(default, rename = "channel")]
    pub channels: HashMap<String, ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Imap {
        host: String,
        #[serde(default = "default_imap_port")]
        port: u16,
        #[serde(default)]
        starttls: bool,
        user: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        password_cmd: String,
        #[serde(default)]
        trash_box: Option<String>,
    },
    Maildir {
        path: PathBuf,
    },
}

fn default_imap_port() -> u16 {
    993
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub far: String,
    pub near: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_sync_ops")]
    pub sync: Vec<String>,
    #[serde(default)]
    pub max_messages: u32,
    #[serde(default = "default_expire_side")]
    pub expire_side: String,
    /// Tri-state: absent means "no preference" (spec §4.8 point 6).
    #[serde(default)]
    pub expire_unread: Option<bool>,
    #[serde(default)]
    pub use_internal_date: bool,
    #[serde(default)]
    pub max_size: u64,
    pub sync_state: String,
}

fn default_sync_ops() -> Vec<String> {
    vec![
        "pull".to_string(),
        "push".to_string(),
        "flags".to_string(),
        "new".to_string(),
        "delete".to_string(),
        "expunge".to_string(),
    ]
}

fn default_expire_side() -> String {
    "far".to_string()
}

pub fn load(path: &Path) -> Result<RootConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: RootConfig =
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config)
}

/// Resolve a store's IMAP password: inline value if set, else shell
/// out to `password_cmd`, the same two-path resolution the teacher
/// uses for its own accounts.
pub fn resolve_password(password: &str, password_cmd: &str) -> Result<String> {
    if !password.is_empty() {
        return Ok(password.to_string());
    }
    if !password_cmd.is_empty() {
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(password_cmd)
            .output()
            .with_context(|| format!("running password_cmd: {password_cmd}"))?;
        if !output.status.success() {
            bail!(
                "password_cmd failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    bail!("store has neither `password` nor `password_cmd` set")
}

fn parse_ops(sync: &[String]) -> Result<Ops> {
    let mut ops = Ops::empty();
    for token in sync {
        ops |= match token.as_str() {
            "pull" | "push" => Ops::empty(), // direction is implied by far/near, not a bit
            "flags" => Ops::FLAGS,
            "new" => Ops::NEW,
            "renew" => Ops::OLD,
            "delete" => Ops::GONE,
            "expunge" => Ops::EXPUNGE,
            "expunge_solo" => Ops::EXPUNGE_SOLO,
            "create" => Ops::CREATE,
            "remove" => Ops::REMOVE,
            "all" => Ops::default() | Ops::OLD | Ops::EXPUNGE_SOLO | Ops::REMOVE,
            other => bail!("unknown sync operation: {other}"),
        };
    }
    if ops.is_empty() {
        ops = Ops::default();
    }
    Ok(ops)
}

impl ChannelConfig {
    pub fn to_policy(&self, name: &str) -> Result<ChannelPolicy> {
        let expire_side = match self.expire_side.as_str() {
            "far" => Side::Far,
            "near" => Side::Near,
            other => bail!("channel {name}: expire_side must be 'far' or 'near', got {other}"),
        };
        Ok(ChannelPolicy {
            name: name.to_string(),
            ops: parse_ops(&self.sync)?,
            max_messages: self.max_messages,
            expire_side,
            expire_unread: self.expire_unread,
            use_internal_date: self.use_internal_date,
            max_size: self.max_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_imap_maildir_channel() {
        let text = r#"
[store.gmail]
kind = "imap"
host = "imap.gmail.com"
user = "me@example.com"
password_cmd = "pass email/me"

[store.local]
kind = "maildir"
path = "/home/me/Mail"

[channel.inbox]
far = "gmail"
near = "local"
sync = ["pull", "push", "flags", "new"]
max_messages = 500
expire_side = "far"
sync_state = "/home/me/.boxsync/inbox"
"#;
        let cfg: RootConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.stores.len(), 2);
        let channel = &cfg.channels["inbox"];
        let policy = channel.to_policy("inbox").unwrap();
        assert_eq!(policy.max_messages, 500);
        assert!(policy.ops.contains(Ops::FLAGS | Ops::NEW));
    }

    #[test]
    fn all_expands_to_the_full_op_set() {
        let policy_ops = parse_ops(&["all".to_string()]).unwrap();
        assert!(policy_ops.contains(Ops::FLAGS | Ops::NEW | Ops::OLD | Ops::GONE));
    }

    #[test]
    fn unknown_sync_token_is_a_config_error() {
        assert!(parse_ops(&["bogus".to_string()]).is_err());
    }
}
