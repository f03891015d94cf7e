use crate::types::OpenFlags;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Where a record stands: its passthrough descriptor and logical offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Native descriptor on the backend's mounted view.
    pub passthrough: RawFd,
    /// Logical offset of the record.
    pub offset: u64,
}

/// Mutable part of an open backend file, guarded by the record's mutex.
///
/// Holding the guard makes the offset synchronization of one data-moving call
/// atomic with respect to other calls on the same record.
#[derive(Debug)]
pub struct FileState<H> {
    /// The backend handle; `None` once the record has been released.
    pub handle: Option<H>,
    pub position: Position,
}

/// A backend-bound open file, shared by every exposed descriptor aliasing it.
#[derive(Debug)]
pub struct OpenFile<H> {
    path: String,
    flags: OpenFlags,
    refs: AtomicUsize,
    state: Mutex<FileState<H>>,
}

impl<H> OpenFile<H> {
    pub fn new(path: String, flags: OpenFlags, handle: H, passthrough: RawFd, offset: u64) -> Self {
        Self {
            path,
            flags,
            refs: AtomicUsize::new(1),
            state: Mutex::new(FileState {
                handle: Some(handle),
                position: Position { passthrough, offset },
            }),
        }
    }

    /// Canonical logical path the record was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Number of exposed descriptors aliasing this record.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn lock(&self) -> MutexGuard<'_, FileState<H>> {
        self.state.lock()
    }
}

/// Map from exposed descriptor to backend-bound file record.
///
/// Shape changes (insert, alias, remove) take the write lock and adjust the
/// record's reference count under it, so a count of zero is observed exactly
/// once.
#[derive(Debug)]
pub struct DescriptorTable<H> {
    files: RwLock<HashMap<RawFd, Arc<OpenFile<H>>>>,
}

impl<H> Default for DescriptorTable<H> {
    fn default() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }
}

impl<H> DescriptorTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fd: RawFd) -> Option<Arc<OpenFile<H>>> {
        self.files.read().get(&fd).cloned()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.files.read().contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Registers a freshly opened record under `fd`.
    ///
    /// A record already registered under `fd` is stale (its descriptor was
    /// closed behind the layer's back). It is unlinked, and returned if that
    /// dropped its last reference so the caller can release it.
    pub fn insert(&self, fd: RawFd, record: Arc<OpenFile<H>>) -> Option<Arc<OpenFile<H>>> {
        let mut files = self.files.write();
        let stale = files.insert(fd, record)?;
        warn!("Descriptor {} still mapped to {}, replacing", fd, stale.path());
        Self::unref(stale)
    }

    /// Makes `to` an alias of the record behind `from`. Returns false if
    /// `from` is not registered. `to` must not be registered.
    pub fn alias(&self, from: RawFd, to: RawFd) -> bool {
        let mut files = self.files.write();
        let Some(record) = files.get(&from).cloned() else {
            return false;
        };
        record.refs.fetch_add(1, Ordering::AcqRel);
        if let Some(stale) = files.insert(to, record) {
            // Callers remove `to` first; drop the extra reference regardless.
            warn!("Alias target {} was still mapped to {}", to, stale.path());
            stale.refs.fetch_sub(1, Ordering::AcqRel);
        }
        true
    }

    /// Unregisters `fd`. Returns the record and whether this was its last
    /// alias.
    pub fn remove(&self, fd: RawFd) -> Option<(Arc<OpenFile<H>>, bool)> {
        let record = self.files.write().remove(&fd)?;
        let last = record.refs.fetch_sub(1, Ordering::AcqRel) == 1;
        Some((record, last))
    }

    /// Every distinct record currently registered.
    pub fn records(&self) -> Vec<Arc<OpenFile<H>>> {
        let files = self.files.read();
        let mut records: Vec<Arc<OpenFile<H>>> = Vec::with_capacity(files.len());
        for record in files.values() {
            if !records.iter().any(|seen| Arc::ptr_eq(seen, record)) {
                records.push(record.clone());
            }
        }
        records
    }

    fn unref(record: Arc<OpenFile<H>>) -> Option<Arc<OpenFile<H>>> {
        (record.refs.fetch_sub(1, Ordering::AcqRel) == 1).then_some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> Arc<OpenFile<u32>> {
        Arc::new(OpenFile::new(path.to_string(), OpenFlags::READ_WRITE, 7, 100, 0))
    }

    #[test]
    fn test_insert_get_remove() {
        let table = DescriptorTable::new();
        assert!(table.insert(10, record("/mnt/plfs/a")).is_none());
        assert!(table.contains(10));
        assert_eq!(table.get(10).unwrap().path(), "/mnt/plfs/a");

        let (removed, last) = table.remove(10).unwrap();
        assert!(last);
        assert_eq!(removed.refs(), 0);
        assert!(table.remove(10).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_alias_shares_record() {
        let table = DescriptorTable::new();
        table.insert(10, record("/mnt/plfs/a"));
        assert!(table.alias(10, 11));
        assert!(!table.alias(12, 13));

        let a = table.get(10).unwrap();
        let b = table.get(11).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.refs(), 2);
        assert_eq!(table.records().len(), 1);

        let (_, last) = table.remove(10).unwrap();
        assert!(!last);
        let (_, last) = table.remove(11).unwrap();
        assert!(last);
    }

    #[test]
    fn test_insert_over_stale_entry() {
        let table = DescriptorTable::new();
        table.insert(10, record("/mnt/plfs/old"));
        table.alias(10, 11);

        // Still aliased by 11, so nothing to release yet.
        assert!(table.insert(10, record("/mnt/plfs/new")).is_none());
        let evicted = table.insert(11, record("/mnt/plfs/newer")).unwrap();
        assert_eq!(evicted.path(), "/mnt/plfs/old");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_state_lock() {
        let file = record("/mnt/plfs/a");
        {
            let mut state = file.lock();
            state.position.offset = 42;
            assert_eq!(state.handle.take(), Some(7));
        }
        let state = file.lock();
        assert_eq!(state.position, Position { passthrough: 100, offset: 42 });
        assert!(state.handle.is_none());
    }
}
