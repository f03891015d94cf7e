//! Mount-related types.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How a canonical path is tested against a mount prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The prefix may appear anywhere in the path string.
    #[default]
    Substring,
    /// The prefix must cover whole leading path segments.
    Prefix,
}

impl MatchMode {
    /// Returns the byte index just past the matched prefix, if `path` matches.
    pub fn find(&self, path: &str, prefix: &str) -> Option<usize> {
        if prefix.is_empty() {
            return None;
        }

        match self {
            MatchMode::Substring => path.find(prefix).map(|start| start + prefix.len()),
            MatchMode::Prefix => {
                let rest = path.strip_prefix(prefix)?;
                if prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/') {
                    Some(prefix.len())
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Substring => write!(f, "substring"),
            MatchMode::Prefix => write!(f, "prefix"),
        }
    }
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "substring" => Ok(MatchMode::Substring),
            "prefix" | "segment" => Ok(MatchMode::Prefix),
            other => Err(format!("Unknown mount match mode: {}", other)),
        }
    }
}

/// A logical mount prefix and the physical roots backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    /// Logical prefix string as configured
    pub prefix: String,
    /// Physical backend roots, in configuration order
    pub backends: Vec<PathBuf>,
}

impl MountEntry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            backends: Vec::new(),
        }
    }

    pub fn with_backend(mut self, root: impl Into<PathBuf>) -> Self {
        self.backends.push(root.into());
        self
    }

    /// The root the local backend stores this mount under.
    pub fn primary_backend(&self) -> Option<&PathBuf> {
        self.backends.first()
    }
}

/// The loaded, immutable set of mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountTable {
    entries: Vec<MountEntry>,
    mode: MatchMode,
}

impl MountTable {
    pub fn new(entries: Vec<MountEntry>, mode: MatchMode) -> Self {
        let mut table = Self {
            entries: Vec::with_capacity(entries.len()),
            mode,
        };
        for entry in entries {
            let backends = entry.backends.clone();
            let index = table.add_mount(entry.prefix);
            if let Some(index) = index {
                table.entries[index].backends.extend(backends);
            }
        }
        table
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First mount (in registry order) that `path` falls under, and the byte
    /// index where the remainder of the path starts.
    pub fn find(&self, path: &str) -> Option<(&MountEntry, usize)> {
        self.entries
            .iter()
            .find_map(|entry| self.mode.find(path, &entry.prefix).map(|end| (entry, end)))
    }

    pub fn is_managed(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Registers `prefix` unless it is empty or already known; returns the
    /// index of the entry either way.
    pub(crate) fn add_mount(&mut self, prefix: String) -> Option<usize> {
        if prefix.is_empty() {
            return None;
        }
        if let Some(index) = self.entries.iter().position(|e| e.prefix == prefix) {
            return Some(index);
        }
        self.entries.push(MountEntry::new(prefix));
        Some(self.entries.len() - 1)
    }

    pub(crate) fn add_backends(&mut self, index: usize, roots: impl IntoIterator<Item = PathBuf>) {
        if let Some(entry) = self.entries.get_mut(index) {
            for root in roots {
                if !entry.backends.contains(&root) {
                    entry.backends.push(root);
                }
            }
        }
    }

    pub(crate) fn set_mode(&mut self, mode: MatchMode) {
        self.mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_matches_anywhere() {
        let mode = MatchMode::Substring;
        assert_eq!(mode.find("/mnt/plfs/a", "/mnt/plfs"), Some(9));
        assert_eq!(mode.find("/home/x/mnt/plfs/a", "/mnt/plfs"), Some(16));
        assert_eq!(mode.find("/home/usermount_point_data", "mount_point_data"), Some(26));
        assert_eq!(mode.find("/tmp/a", "/mnt/plfs"), None);
    }

    #[test]
    fn test_prefix_matches_whole_segments() {
        let mode = MatchMode::Prefix;
        assert_eq!(mode.find("/mnt/plfs", "/mnt/plfs"), Some(9));
        assert_eq!(mode.find("/mnt/plfs/a", "/mnt/plfs"), Some(9));
        assert_eq!(mode.find("/mnt/plfsx/a", "/mnt/plfs"), None);
        assert_eq!(mode.find("/home/mnt/plfs/a", "/mnt/plfs"), None);
        assert_eq!(mode.find("/mnt/plfs/a", "/mnt/plfs/"), Some(10));
    }

    #[test]
    fn test_empty_prefix_never_matches() {
        assert_eq!(MatchMode::Substring.find("/a", ""), None);
        assert_eq!(MatchMode::Prefix.find("/a", ""), None);
    }

    #[test]
    fn test_match_mode_from_str() {
        assert_eq!("substring".parse::<MatchMode>().unwrap(), MatchMode::Substring);
        assert_eq!(" Prefix ".parse::<MatchMode>().unwrap(), MatchMode::Prefix);
        assert_eq!("segment".parse::<MatchMode>().unwrap(), MatchMode::Prefix);
        assert!("glob".parse::<MatchMode>().is_err());
    }

    #[test]
    fn test_table_dedups_prefixes() {
        let table = MountTable::new(
            vec![
                MountEntry::new("/mnt/a").with_backend("/data/a"),
                MountEntry::new("/mnt/b"),
                MountEntry::new("/mnt/a").with_backend("/data/a2"),
            ],
            MatchMode::Substring,
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].backends, vec![PathBuf::from("/data/a"), PathBuf::from("/data/a2")]);
        assert_eq!(table.entries()[1].prefix, "/mnt/b");
    }

    #[test]
    fn test_find_uses_registry_order() {
        let table = MountTable::new(
            vec![MountEntry::new("/mnt"), MountEntry::new("/mnt/plfs")],
            MatchMode::Substring,
        );
        let (entry, end) = table.find("/mnt/plfs/x").unwrap();
        assert_eq!(entry.prefix, "/mnt");
        assert_eq!(end, 4);
        assert!(!table.is_managed("/opt/x"));
    }
}
