//! Project isolation keys
//!
//! Each project's data lives under a directory named by a one-way hash of
//! its remote URL and local root, so raw paths never appear in the store.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex length of a project key (128 bits of the SHA-256 digest)
const KEY_HEX_LEN: usize = 32;

/// Stable, opaque per-project key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Derive the key from a remote URL and a root path
    pub fn derive(remote_url: &str, root: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(remote_url.trim().as_bytes());
        hasher.update([0u8]);
        hasher.update(root.to_string_lossy().as_bytes());
        let digest = hasher.finalize();

        let mut key = hex::encode(digest);
        key.truncate(KEY_HEX_LEN);
        Self(key)
    }

    /// Derive the key for a checkout, reading its remote from `.git/config`
    /// when `remote_url` is not supplied
    pub fn for_checkout(root: &Path, remote_url: Option<&str>) -> Self {
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let remote = match remote_url {
            Some(url) => url.to_string(),
            None => discover_remote_url(&root).unwrap_or_default(),
        };
        Self::derive(&remote, &root)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-disk locations for one project
///
/// Each component receives only the paths it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(data_root: &Path, key: &ProjectKey) -> Self {
        Self {
            root: data_root.join("projects").join(key.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn injection_log(&self) -> PathBuf {
        self.root.join("injection_log.json")
    }

    pub fn scorer_state(&self) -> PathBuf {
        self.root.join("scorer.json")
    }

    pub fn core_assertions(&self) -> PathBuf {
        self.root.join("core_assertions.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Create the project directories if missing
    pub fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.events_dir())?;
        fs::create_dir_all(self.sessions_dir())
    }
}

/// Lock file guarding a mutable JSON file
pub fn lock_path_for(file: &Path) -> PathBuf {
    file.with_extension("lock")
}

/// Read the `origin` remote URL (or the first remote) from `.git/config`
pub fn discover_remote_url(root: &Path) -> Option<String> {
    let config = fs::read_to_string(root.join(".git").join("config")).ok()?;
    parse_remote_url(&config)
}

fn parse_remote_url(config: &str) -> Option<String> {
    let mut current_remote: Option<String> = None;
    let mut first_url: Option<String> = None;

    for line in config.lines().map(str::trim) {
        if line.starts_with('[') {
            current_remote = line
                .strip_prefix("[remote \"")
                .and_then(|rest| rest.strip_suffix("\"]"))
                .map(String::from);
            continue;
        }

        let Some(remote) = current_remote.as_deref() else {
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != "url" {
            continue;
        }

        let url = value.trim().to_string();
        if remote == "origin" {
            return Some(url);
        }
        first_url.get_or_insert(url);
    }

    first_url
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_is_stable_and_opaque() {
        let a = ProjectKey::derive("git@github.com:acme/app.git", Path::new("/home/me/app"));
        let b = ProjectKey::derive("git@github.com:acme/app.git", Path::new("/home/me/app"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), KEY_HEX_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(!a.as_str().contains("app"));
    }

    #[test]
    fn test_key_depends_on_both_inputs() {
        let base = ProjectKey::derive("https://x/repo", Path::new("/a"));
        assert_ne!(base, ProjectKey::derive("https://x/other", Path::new("/a")));
        assert_ne!(base, ProjectKey::derive("https://x/repo", Path::new("/b")));
    }

    #[test]
    fn test_parse_prefers_origin() {
        let config = r#"
[core]
    bare = false
[remote "upstream"]
    url = https://example.com/upstream.git
[remote "origin"]
    url = git@example.com:me/fork.git
    fetch = +refs/heads/*:refs/remotes/origin/*
"#;
        assert_eq!(
            parse_remote_url(config).as_deref(),
            Some("git@example.com:me/fork.git")
        );
    }

    #[test]
    fn test_parse_falls_back_to_first_remote() {
        let config = "[remote \"mirror\"]\n\turl = https://mirror/repo.git\n";
        assert_eq!(
            parse_remote_url(config).as_deref(),
            Some("https://mirror/repo.git")
        );
        assert_eq!(parse_remote_url("[core]\n\tbare = false\n"), None);
    }

    #[test]
    fn test_layout_paths() {
        let key = ProjectKey::derive("r", Path::new("/p"));
        let layout = ProjectLayout::new(Path::new("/data"), &key);
        assert_eq!(
            layout.events_dir(),
            Path::new("/data/projects").join(key.as_str()).join("events")
        );
        assert_eq!(
            lock_path_for(&layout.injection_log()).file_name().unwrap(),
            "injection_log.lock"
        );
    }

    #[test]
    fn test_for_checkout_reads_git_config() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(
            dir.path().join(".git").join("config"),
            "[remote \"origin\"]\n\turl = https://example.com/r.git\n",
        )
        .unwrap();

        let discovered = ProjectKey::for_checkout(dir.path(), None);
        let explicit = ProjectKey::for_checkout(dir.path(), Some("https://example.com/r.git"));
        assert_eq!(discovered, explicit);
    }
}
