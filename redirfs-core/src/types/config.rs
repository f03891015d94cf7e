//! Configuration sources for redirfs.

use super::mount::{MatchMode, MountTable};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an override configuration file.
pub const ENV_RC: &str = "REDIRFS_RC";
/// Environment variable holding the preload library's log filter.
pub const ENV_LOG: &str = "REDIRFS_LOG";
/// Per-user configuration file, relative to `$HOME`.
pub const USER_RC: &str = ".redirfsrc";
/// System-wide configuration file.
pub const SYSTEM_RC: &str = "/etc/redirfsrc";

const MOUNT_POINT_KEY: &str = "mount_point:";
const BACKENDS_KEY: &str = "backends:";
const MATCH_KEY: &str = "mount_match:";

/// The ordered list of configuration files scanned for mounts.
///
/// Sources are cumulative: every readable source contributes its directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    paths: Vec<PathBuf>,
}

impl ConfigSources {
    /// Creates sources from an explicit list.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// The standard lookup order: `$REDIRFS_RC`, `$HOME/.redirfsrc`,
    /// `/etc/redirfsrc`.
    pub fn from_env() -> Self {
        let mut paths = Vec::with_capacity(3);
        if let Some(rc) = std::env::var_os(ENV_RC) {
            paths.push(PathBuf::from(rc));
        }
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(Path::new(&home).join(USER_RC));
        }
        paths.push(PathBuf::from(SYSTEM_RC));
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Reads every source and accumulates the mounts they declare.
    pub fn load(&self) -> MountTable {
        let mut table = MountTable::default();

        for path in &self.paths {
            match std::fs::read(path) {
                Ok(bytes) => {
                    debug!("Reading mounts from {}", path.display());
                    apply_rc(&mut table, &String::from_utf8_lossy(&bytes));
                }
                Err(e) => debug!("Skipping config source {}: {}", path.display(), e),
            }
        }

        table
    }
}

/// Returns the trimmed value following `key` on `line`, if the key appears.
fn directive<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let value = line[start..].trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n');
    (!value.is_empty()).then_some(value)
}

/// Applies the directives of one configuration text to `table`.
///
/// `backends:` attaches to the most recent `mount_point:` of the same text.
pub fn apply_rc(table: &mut MountTable, text: &str) {
    let mut current: Option<usize> = None;

    for line in text.lines() {
        if let Some(prefix) = directive(line, MOUNT_POINT_KEY) {
            current = table.add_mount(prefix.to_string());
        } else if let Some(roots) = directive(line, BACKENDS_KEY) {
            match current {
                Some(index) => {
                    let roots = roots
                        .split(',')
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(PathBuf::from);
                    table.add_backends(index, roots);
                }
                None => warn!("Ignoring backends directive before any mount_point: {}", roots),
            }
        } else if let Some(mode) = directive(line, MATCH_KEY) {
            match mode.parse::<MatchMode>() {
                Ok(mode) => table.set_mode(mode),
                Err(e) => warn!("{}", e),
            }
        }
    }
}
