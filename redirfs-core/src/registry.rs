//! The process-wide mount registry.
//!
//! Holds the configured mount prefixes, loaded lazily on first use and kept
//! for the process lifetime unless [`MountRegistry::reset`] is called, plus a
//! cached map from each prefix to its physical backend path used to report
//! the current directory in logical form.

use crate::types::{Classification, ConfigSources, MountTable};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the registry gets its mounts from.
#[derive(Debug, Clone)]
enum Loader {
    Sources(ConfigSources),
    Fixed(MountTable),
}

/// Registry of backend mount prefixes.
#[derive(Debug)]
pub struct MountRegistry {
    loader: Loader,
    table: RwLock<Option<Arc<MountTable>>>,
    physical: RwLock<Option<Arc<Vec<(String, String)>>>>,
}

impl MountRegistry {
    /// Creates a registry that reads `sources` on first use.
    pub fn new(sources: ConfigSources) -> Self {
        Self::with_loader(Loader::Sources(sources))
    }

    /// Creates a registry over a fixed mount table.
    pub fn with_table(table: MountTable) -> Self {
        Self::with_loader(Loader::Fixed(table))
    }

    fn with_loader(loader: Loader) -> Self {
        Self {
            loader,
            table: RwLock::new(None),
            physical: RwLock::new(None),
        }
    }

    /// Returns the mount table, loading it on first call.
    pub fn table(&self) -> Arc<MountTable> {
        if let Some(table) = self.table.read().as_ref() {
            return table.clone();
        }

        let mut slot = self.table.write();
        if let Some(table) = slot.as_ref() {
            return table.clone();
        }

        let table = Arc::new(match &self.loader {
            Loader::Sources(sources) => sources.load(),
            Loader::Fixed(table) => table.clone(),
        });
        if table.is_empty() {
            warn!("There were no mount points defined");
        } else {
            debug!("Loaded {} mount point(s) ({} matching)", table.len(), table.mode());
        }
        *slot = Some(table.clone());
        table
    }

    /// Classifies a canonical path.
    pub fn classify(&self, canonical: &str) -> Classification {
        if self.table().is_managed(canonical) {
            Classification::Backend
        } else {
            Classification::Native
        }
    }

    /// Drops the loaded table so the next use reloads it.
    pub fn reset(&self) {
        // Lock order: table before physical, same as physical_paths.
        let mut table = self.table.write();
        let mut physical = self.physical.write();
        *table = None;
        *physical = None;
    }

    /// Returns `(prefix, physical path)` pairs in registry order, computing
    /// them with `expand` on first call. Prefixes `expand` cannot resolve are
    /// left out.
    pub fn physical_paths<F>(&self, expand: F) -> Arc<Vec<(String, String)>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let table = self.table();

        if let Some(paths) = self.physical.read().as_ref() {
            return paths.clone();
        }

        let mut slot = self.physical.write();
        if let Some(paths) = slot.as_ref() {
            return paths.clone();
        }

        let paths: Vec<(String, String)> = table
            .entries()
            .iter()
            .filter_map(|entry| expand(&entry.prefix).map(|phys| (entry.prefix.clone(), phys)))
            .collect();
        let paths = Arc::new(paths);
        *slot = Some(paths.clone());
        paths
    }

    /// Rewrites a native directory path that lies inside a mount's physical
    /// path into its logical form. The first matching mount wins.
    pub fn to_logical<F>(&self, native: &str, expand: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        for (prefix, phys) in self.physical_paths(expand).iter() {
            let phys = phys.trim_end_matches('/');
            if phys.is_empty() {
                continue;
            }
            if let Some(rest) = native.strip_prefix(phys) {
                if rest.is_empty() || rest.starts_with('/') {
                    let mut logical = prefix.trim_end_matches('/').to_string();
                    logical.push_str(rest);
                    return logical;
                }
            }
        }
        native.to_string()
    }
}
