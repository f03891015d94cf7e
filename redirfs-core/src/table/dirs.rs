use crate::native::DirHandle;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;

/// A backend directory opened for iteration.
///
/// The entry names are captured once, at open time; later changes to the
/// directory are not observed. `scratch` is the entry handed back by each
/// `readdir` on this handle and is overwritten by the next one.
pub struct DirectoryRecord {
    path: String,
    entries: Vec<String>,
    cursor: usize,
    dir_fd: RawFd,
    scratch: Box<libc::dirent>,
}

impl std::fmt::Debug for DirectoryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryRecord")
            .field("path", &self.path)
            .field("entries", &self.entries)
            .field("cursor", &self.cursor)
            .field("dir_fd", &self.dir_fd)
            .finish()
    }
}

impl DirectoryRecord {
    pub fn new(path: String, entries: impl IntoIterator<Item = String>, dir_fd: RawFd) -> Self {
        Self {
            path,
            entries: entries.into_iter().collect(),
            cursor: 0,
            dir_fd,
            // SAFETY: dirent is plain old data; all-zero is a valid value.
            scratch: Box::new(unsafe { std::mem::zeroed() }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Native descriptor of the placeholder stream.
    pub fn dir_fd(&self) -> RawFd {
        self.dir_fd
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the next entry name and moves the cursor past it.
    pub fn advance(&mut self) -> Option<String> {
        let name = self.entries.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(name)
    }

    /// Writes one entry into the scratch buffer and returns it.
    ///
    /// Names longer than `NAME_MAX` are truncated.
    pub fn fill(&mut self, name: &str, ino: u64, d_type: u8) -> NonNull<libc::dirent> {
        let entry = &mut *self.scratch;
        entry.d_ino = ino as _;
        entry.d_off = self.cursor as _;
        entry.d_reclen = std::mem::size_of::<libc::dirent>() as u16;
        entry.d_type = d_type;

        let capacity = entry.d_name.len() - 1;
        let bytes = &name.as_bytes()[..name.len().min(capacity)];
        for (dst, src) in entry.d_name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        entry.d_name[bytes.len()] = 0;

        NonNull::from(entry)
    }
}

/// Map from exposed directory stream to backend directory record.
#[derive(Debug, Default)]
pub struct DirectoryTable {
    dirs: DashMap<DirHandle, Arc<Mutex<DirectoryRecord>>>,
    by_fd: DashMap<RawFd, DirHandle>,
}

impl DirectoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dir: DirHandle, record: DirectoryRecord) {
        self.by_fd.insert(record.dir_fd(), dir);
        self.dirs.insert(dir, Arc::new(Mutex::new(record)));
    }

    pub fn get(&self, dir: DirHandle) -> Option<Arc<Mutex<DirectoryRecord>>> {
        self.dirs.get(&dir).map(|entry| entry.value().clone())
    }

    /// Looks a record up by the native descriptor of its placeholder.
    pub fn by_fd(&self, fd: RawFd) -> Option<Arc<Mutex<DirectoryRecord>>> {
        let dir = *self.by_fd.get(&fd)?;
        self.get(dir)
    }

    pub fn remove(&self, dir: DirHandle) -> Option<Arc<Mutex<DirectoryRecord>>> {
        let (_, record) = self.dirs.remove(&dir)?;
        let fd = record.lock().dir_fd();
        self.by_fd.remove_if(&fd, |_, owner| *owner == dir);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cursor() {
        let mut record = DirectoryRecord::new("/mnt/plfs/d".into(), names(&["a", "b"]), 5);
        assert_eq!(record.len(), 2);
        assert_eq!(record.advance().as_deref(), Some("a"));
        assert_eq!(record.advance().as_deref(), Some("b"));
        assert_eq!(record.advance(), None);
        assert_eq!(record.advance(), None);
    }

    #[test]
    fn test_fill_entry() {
        let mut record = DirectoryRecord::new("/mnt/plfs/d".into(), names(&["file"]), 5);
        let name = record.advance().unwrap();
        let entry = record.fill(&name, 99, libc::DT_REG);

        // SAFETY: the entry lives in record's scratch buffer, untouched since.
        let entry = unsafe { entry.as_ref() };
        assert_eq!(entry.d_ino, 99);
        assert_eq!(entry.d_type, libc::DT_REG);
        let got = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) };
        assert_eq!(got.to_str().unwrap(), "file");
    }

    #[test]
    fn test_fill_truncates_long_names() {
        let long = "x".repeat(400);
        let mut record = DirectoryRecord::new("/d".into(), vec![long.clone()], 5);
        let entry = record.fill(&long, 1, libc::DT_UNKNOWN);
        let entry = unsafe { entry.as_ref() };
        let got = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) };
        assert_eq!(got.to_bytes().len(), entry.d_name.len() - 1);
    }

    #[test]
    fn test_table() {
        let table = DirectoryTable::new();
        let dir = DirHandle::from_ptr(0x1000 as *mut libc::DIR);
        table.insert(dir, DirectoryRecord::new("/mnt/plfs/d".into(), names(&["a"]), 9));

        assert_eq!(table.get(dir).unwrap().lock().path(), "/mnt/plfs/d");
        assert_eq!(table.by_fd(9).unwrap().lock().path(), "/mnt/plfs/d");
        assert!(table.by_fd(10).is_none());

        assert!(table.remove(dir).is_some());
        assert!(table.by_fd(9).is_none());
        assert!(table.is_empty());
    }
}
