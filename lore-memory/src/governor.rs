//! Mid-session read rate limiting
//!
//! `mid_session` reads fire from hot host paths (file search, tool calls),
//! so each session gets a fixed number of them with a cooldown in between.
//! Session start and pre-compaction reads are never limited.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::durable::{file_age, read_json, write_json_atomic, FileLock};
use crate::error::{MemoryError, Result};
use crate::project::{lock_path_for, ProjectLayout};

const MAX_SESSION_NAME_LEN: usize = 64;

/// Read governor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub max_mid_session_reads: u32,
    pub cooldown_secs: i64,
    /// Session state untouched for this long is removed by maintenance
    pub session_retention_secs: u64,
    pub lock_timeout_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_mid_session_reads: 8,
            cooldown_secs: 30,
            session_retention_secs: 24 * 3600,
            lock_timeout_ms: 50,
        }
    }
}

/// Lifecycle point that asks for memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadTrigger {
    SessionStart,
    MidSession,
    PreCompaction,
}

impl ReadTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::MidSession => "mid_session",
            Self::PreCompaction => "pre_compaction",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::MidSession)
    }
}

impl fmt::Display for ReadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadTrigger {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "session_start" => Ok(Self::SessionStart),
            "mid_session" => Ok(Self::MidSession),
            "pre_compaction" => Ok(Self::PreCompaction),
            other => Err(MemoryError::invalid_record(format!("unknown trigger: {other}"))),
        }
    }
}

/// Whether a read may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDecision {
    Allowed,
    ReadLimitReached,
    CoolingDown,
}

impl ReadDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionState {
    reads: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_read_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

/// Per-session mid-session read limiter
#[derive(Debug, Clone)]
pub struct ReadGovernor {
    sessions_dir: PathBuf,
    config: GovernorConfig,
}

impl ReadGovernor {
    pub fn new(layout: &ProjectLayout, config: GovernorConfig) -> Self {
        Self {
            sessions_dir: layout.sessions_dir(),
            config,
        }
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }

    /// Decide whether a read may run, counting it if so
    pub fn admit(&self, trigger: ReadTrigger, session_id: &str, now: DateTime<Utc>) -> Result<ReadDecision> {
        if !trigger.is_rate_limited() {
            return Ok(ReadDecision::Allowed);
        }

        fs::create_dir_all(&self.sessions_dir)?;
        let path = self.state_path(session_id);
        let _guard = FileLock::acquire(
            lock_path_for(&path),
            StdDuration::from_millis(self.config.lock_timeout_ms),
            StdDuration::from_secs(10),
        )?;

        let mut state = read_json::<SessionState>(&path)
            .unwrap_or_else(|e| {
                log::warn!("Session state unreadable, resetting: {}", e);
                None
            })
            .unwrap_or(SessionState {
                reads: 0,
                last_read_at: None,
                started_at: now,
            });

        if state.reads >= self.config.max_mid_session_reads {
            return Ok(ReadDecision::ReadLimitReached);
        }
        if let Some(last) = state.last_read_at {
            if now - last < Duration::seconds(self.config.cooldown_secs) {
                return Ok(ReadDecision::CoolingDown);
            }
        }

        state.reads += 1;
        state.last_read_at = Some(now);
        write_json_atomic(&path, &state)?;
        Ok(ReadDecision::Allowed)
    }

    /// Remove session state files older than the retention age
    pub fn prune(&self) -> Result<usize> {
        let retention = StdDuration::from_secs(self.config.session_retention_secs);
        let entries = match fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if file_age(&path).is_some_and(|age| age > retention) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// File-name-safe form of a host session id
fn sanitize_session_id(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_SESSION_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectKey;
    use std::path::Path;
    use tempfile::TempDir;

    fn governor(dir: &TempDir) -> ReadGovernor {
        let layout = ProjectLayout::new(dir.path(), &ProjectKey::derive("", Path::new("/p")));
        layout.ensure().unwrap();
        ReadGovernor::new(&layout, GovernorConfig::default())
    }

    #[test]
    fn test_mid_session_read_limit() {
        let dir = TempDir::new().unwrap();
        let gov = governor(&dir);
        let t0 = Utc::now();

        for i in 0..8 {
            let at = t0 + Duration::seconds(31 * i);
            assert!(gov.admit(ReadTrigger::MidSession, "s1", at).unwrap().is_allowed());
        }
        assert_eq!(
            gov.admit(ReadTrigger::MidSession, "s1", t0 + Duration::hours(1)).unwrap(),
            ReadDecision::ReadLimitReached
        );
        // other sessions are independent
        assert!(gov.admit(ReadTrigger::MidSession, "s2", t0).unwrap().is_allowed());
    }

    #[test]
    fn test_cooldown() {
        let dir = TempDir::new().unwrap();
        let gov = governor(&dir);
        let t0 = Utc::now();

        assert!(gov.admit(ReadTrigger::MidSession, "s", t0).unwrap().is_allowed());
        assert_eq!(
            gov.admit(ReadTrigger::MidSession, "s", t0 + Duration::seconds(10)).unwrap(),
            ReadDecision::CoolingDown
        );
        assert!(gov
            .admit(ReadTrigger::MidSession, "s", t0 + Duration::seconds(30))
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_unlimited_triggers() {
        let dir = TempDir::new().unwrap();
        let gov = governor(&dir);
        let now = Utc::now();
        for _ in 0..20 {
            assert!(gov.admit(ReadTrigger::SessionStart, "s", now).unwrap().is_allowed());
            assert!(gov.admit(ReadTrigger::PreCompaction, "s", now).unwrap().is_allowed());
        }
    }

    #[test]
    fn test_trigger_parsing() {
        assert_eq!("mid-session".parse::<ReadTrigger>().unwrap(), ReadTrigger::MidSession);
        assert_eq!(
            "session_start".parse::<ReadTrigger>().unwrap(),
            ReadTrigger::SessionStart
        );
        assert!("later".parse::<ReadTrigger>().is_err());
    }

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_session_id(""), "default");
        assert_eq!(sanitize_session_id(&"a".repeat(100)).len(), MAX_SESSION_NAME_LEN);
    }

    #[test]
    fn test_prune_keeps_fresh_sessions() {
        let dir = TempDir::new().unwrap();
        let gov = governor(&dir);
        gov.admit(ReadTrigger::MidSession, "s", Utc::now()).unwrap();
        assert_eq!(gov.prune().unwrap(), 0);
        assert!(gov.state_path("s").exists());
    }
}
