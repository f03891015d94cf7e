//! A backend that stores each mount under a physical root directory.

use super::{BackendError, BackendResult};
use crate::registry::MountRegistry;
use crate::traits::Backend;
use crate::types::{FileAttr, Identity, OpenFlags};
use libc::{mode_t, pid_t};
use std::collections::BTreeSet;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// An open file in a [`LocalBackend`].
#[derive(Debug)]
pub struct LocalHandle {
    file: File,
    path: PathBuf,
}

impl LocalHandle {
    /// Physical path the handle was opened on.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

/// Backend mapping `prefix/rest` to `root/rest`, where `root` is the first
/// `backends:` directory configured for the mount.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    registry: Arc<MountRegistry>,
}

impl LocalBackend {
    pub fn new(registry: Arc<MountRegistry>) -> Self {
        Self { registry }
    }

    /// Physical path of a logical one.
    pub fn physical(&self, logical: &str) -> BackendResult<PathBuf> {
        let table = self.registry.table();
        let (entry, end) = table
            .find(logical)
            .ok_or(BackendError::failed(libc::ENOENT))?;
        let root = entry
            .primary_backend()
            .ok_or(BackendError::failed(libc::ENOENT))?;

        let rest = logical[end..].trim_start_matches('/');
        Ok(if rest.is_empty() { root.clone() } else { root.join(rest) })
    }
}

impl Backend for LocalBackend {
    type Handle = LocalHandle;

    fn open(&self, path: &str, flags: OpenFlags, mode: mode_t, _pid: pid_t) -> BackendResult<LocalHandle> {
        let physical = self.physical(path)?;
        trace!("local open {} ({})", physical.display(), flags);

        // Appends are positioned by the caller; an O_APPEND file would ignore
        // the offsets handed to write_at.
        let extra = (flags - OpenFlags::APPEND).bits() & !libc::O_ACCMODE;
        let file = OpenOptions::new()
            .read(flags.can_read())
            .write(flags.can_write())
            .custom_flags(extra)
            .mode(mode)
            .open(&physical)?;

        Ok(LocalHandle { file, path: physical })
    }

    fn close(&self, handle: LocalHandle, _identity: Identity, _flags: OpenFlags) -> BackendResult<usize> {
        drop(handle);
        Ok(0)
    }

    fn read(&self, handle: &LocalHandle, buf: &mut [u8], offset: u64) -> BackendResult<usize> {
        Ok(handle.file.read_at(buf, offset)?)
    }

    fn write(&self, handle: &LocalHandle, buf: &[u8], offset: u64, _pid: pid_t) -> BackendResult<usize> {
        Ok(handle.file.write_at(buf, offset)?)
    }

    fn sync(&self, handle: &LocalHandle) -> BackendResult<()> {
        Ok(handle.file.sync_all()?)
    }

    fn getattr(&self, path: &str) -> BackendResult<FileAttr> {
        let meta = fs::metadata(self.physical(path)?)?;
        Ok(FileAttr::from(&meta))
    }

    fn fgetattr(&self, handle: &LocalHandle) -> BackendResult<FileAttr> {
        let meta = handle.file.metadata()?;
        Ok(FileAttr::from(&meta))
    }

    fn mkdir(&self, path: &str, mode: mode_t) -> BackendResult<()> {
        Ok(DirBuilder::new().mode(mode).create(self.physical(path)?)?)
    }

    fn rmdir(&self, path: &str) -> BackendResult<()> {
        Ok(fs::remove_dir(self.physical(path)?)?)
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        Ok(fs::rename(self.physical(from)?, self.physical(to)?)?)
    }

    fn chmod(&self, path: &str, mode: mode_t) -> BackendResult<()> {
        Ok(fs::set_permissions(self.physical(path)?, Permissions::from_mode(mode))?)
    }

    fn readdir(&self, path: &str) -> BackendResult<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(self.physical(path)?)? {
            names.insert(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn expand_path(&self, path: &str) -> BackendResult<PathBuf> {
        self.physical(path)
    }

    fn mode(&self, path: &str) -> BackendResult<mode_t> {
        Ok(fs::metadata(self.physical(path)?)?.mode() as mode_t)
    }

    fn mounted_view(&self, path: &str) -> BackendResult<PathBuf> {
        self.physical(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchMode, MountEntry, MountTable};

    fn backend(root: &std::path::Path) -> LocalBackend {
        let table = MountTable::new(
            vec![
                MountEntry::new("/mnt/plfs").with_backend(root),
                MountEntry::new("/mnt/rootless"),
            ],
            MatchMode::Substring,
        );
        LocalBackend::new(Arc::new(MountRegistry::with_table(table)))
    }

    #[test]
    fn test_physical_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        assert_eq!(backend.physical("/mnt/plfs").unwrap(), dir.path());
        assert_eq!(backend.physical("/mnt/plfs/a/b").unwrap(), dir.path().join("a/b"));
        assert_eq!(
            backend.physical("/tmp/elsewhere"),
            Err(BackendError::failed(libc::ENOENT))
        );
        assert_eq!(
            backend.physical("/mnt/rootless/x"),
            Err(BackendError::failed(libc::ENOENT))
        );
    }

    #[test]
    fn test_open_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let pid = std::process::id() as pid_t;

        let flags = OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        let handle = backend.open("/mnt/plfs/data", flags, 0o644, pid).unwrap();
        assert_eq!(backend.write(&handle, b"hello world", 0, pid).unwrap(), 11);
        assert_eq!(backend.write(&handle, b"HELLO", 0, pid).unwrap(), 5);

        let mut buf = [0u8; 32];
        let n = backend.read(&handle, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"HELLO world");
        assert_eq!(backend.fgetattr(&handle).unwrap().size, 11);
        assert_eq!(backend.close(handle, Identity::current(), flags).unwrap(), 0);

        assert_eq!(fs::read(dir.path().join("data")).unwrap(), b"HELLO world");
    }

    #[test]
    fn test_append_flag_is_not_passed_down() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("log"), b"0123456789").unwrap();
        let backend = backend(dir.path());

        let flags = OpenFlags::WRITE_ONLY | OpenFlags::APPEND;
        let handle = backend.open("/mnt/plfs/log", flags, 0, 0).unwrap();
        backend.write(&handle, b"ab", 2, 0).unwrap();
        assert_eq!(fs::read(dir.path().join("log")).unwrap(), b"01ab456789");
    }

    #[test]
    fn test_namespace_verbs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        backend.mkdir("/mnt/plfs/d", 0o750).unwrap();
        assert!(backend.getattr("/mnt/plfs/d").unwrap().is_dir());
        assert_eq!(backend.mode("/mnt/plfs/d").unwrap() & 0o777, 0o750 & !current_umask());

        fs::write(dir.path().join("d/x"), b"").unwrap();
        fs::write(dir.path().join("d/y"), b"").unwrap();
        let names: Vec<_> = backend.readdir("/mnt/plfs/d").unwrap().into_iter().collect();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);

        backend.rename("/mnt/plfs/d/x", "/mnt/plfs/d/z").unwrap();
        assert!(dir.path().join("d/z").exists());

        backend.chmod("/mnt/plfs/d/z", 0o600).unwrap();
        assert_eq!(backend.mode("/mnt/plfs/d/z").unwrap() & 0o777, 0o600);

        assert_eq!(
            backend.rmdir("/mnt/plfs/d"),
            Err(BackendError::failed(libc::ENOTEMPTY))
        );
        assert_eq!(
            backend.getattr("/mnt/plfs/missing"),
            Err(BackendError::failed(libc::ENOENT))
        );
    }

    fn current_umask() -> mode_t {
        // SAFETY: umask only swaps the process mask; it is restored at once.
        unsafe {
            let mask = libc::umask(0o022);
            libc::umask(mask);
            mask
        }
    }
}
