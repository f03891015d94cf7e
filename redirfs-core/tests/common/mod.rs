#![allow(dead_code)]

use libc::{mode_t, pid_t};
use redirfs_core::backend::{BackendError, BackendResult, LocalBackend, LocalHandle};
use redirfs_core::dispatch::Dispatcher;
use redirfs_core::native::System;
use redirfs_core::registry::MountRegistry;
use redirfs_core::retry::RetryPolicy;
use redirfs_core::types::{FileAttr, Identity, MatchMode, MountEntry, MountTable, OpenFlags};
use redirfs_core::Backend;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A [`LocalBackend`] that can be told to answer "try again" and to accept
/// only part of each write.
pub struct FlakyBackend {
    inner: LocalBackend,
    again: AtomicUsize,
    write_limit: AtomicUsize,
    closes: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            again: AtomicUsize::new(0),
            write_limit: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// The next `n` verbs answer `Again`.
    pub fn inject_again(&self, n: usize) {
        self.again.store(n, Ordering::SeqCst);
    }

    /// Caps every write at `limit` bytes; 0 lifts the cap.
    pub fn limit_writes(&self, limit: usize) {
        self.write_limit.store(limit, Ordering::SeqCst);
    }

    /// Number of handles released so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn flake(&self) -> BackendResult<()> {
        match self
            .again
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(BackendError::Again),
            Err(_) => Ok(()),
        }
    }
}

impl Backend for FlakyBackend {
    type Handle = LocalHandle;

    fn open(&self, path: &str, flags: OpenFlags, mode: mode_t, pid: pid_t) -> BackendResult<LocalHandle> {
        self.flake()?;
        self.inner.open(path, flags, mode, pid)
    }

    fn close(&self, handle: LocalHandle, identity: Identity, flags: OpenFlags) -> BackendResult<usize> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close(handle, identity, flags)
    }

    fn read(&self, handle: &LocalHandle, buf: &mut [u8], offset: u64) -> BackendResult<usize> {
        self.flake()?;
        self.inner.read(handle, buf, offset)
    }

    fn write(&self, handle: &LocalHandle, buf: &[u8], offset: u64, pid: pid_t) -> BackendResult<usize> {
        self.flake()?;
        let limit = match self.write_limit.load(Ordering::SeqCst) {
            0 => buf.len(),
            limit => limit.min(buf.len()),
        };
        self.inner.write(handle, &buf[..limit], offset, pid)
    }

    fn sync(&self, handle: &LocalHandle) -> BackendResult<()> {
        self.flake()?;
        self.inner.sync(handle)
    }

    fn getattr(&self, path: &str) -> BackendResult<FileAttr> {
        self.flake()?;
        self.inner.getattr(path)
    }

    fn fgetattr(&self, handle: &LocalHandle) -> BackendResult<FileAttr> {
        self.flake()?;
        self.inner.fgetattr(handle)
    }

    fn mkdir(&self, path: &str, mode: mode_t) -> BackendResult<()> {
        self.flake()?;
        self.inner.mkdir(path, mode)
    }

    fn rmdir(&self, path: &str) -> BackendResult<()> {
        self.inner.rmdir(path)
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        self.inner.rename(from, to)
    }

    fn chmod(&self, path: &str, mode: mode_t) -> BackendResult<()> {
        self.inner.chmod(path, mode)
    }

    fn readdir(&self, path: &str) -> BackendResult<BTreeSet<String>> {
        self.flake()?;
        self.inner.readdir(path)
    }

    fn expand_path(&self, path: &str) -> BackendResult<PathBuf> {
        self.inner.expand_path(path)
    }

    fn mode(&self, path: &str) -> BackendResult<mode_t> {
        self.flake()?;
        self.inner.mode(path)
    }

    fn mounted_view(&self, path: &str) -> BackendResult<PathBuf> {
        self.inner.mounted_view(path)
    }
}

static NEXT_MOUNT: AtomicUsize = AtomicUsize::new(0);

/// A dispatcher over a fresh backend root, mounted at a logical prefix no
/// other harness shares.
pub struct Harness {
    pub root: TempDir,
    pub prefix: String,
    pub shim: Dispatcher<FlakyBackend, System>,
}

impl Harness {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let prefix = format!(
            "/redirfs-test-{}-{}/mnt",
            std::process::id(),
            NEXT_MOUNT.fetch_add(1, Ordering::SeqCst)
        );
        let table = MountTable::new(
            vec![MountEntry::new(prefix.clone()).with_backend(root.path())],
            MatchMode::Substring,
        );
        let registry = Arc::new(MountRegistry::with_table(table));
        let backend = FlakyBackend::new(LocalBackend::new(registry.clone()));
        let shim = Dispatcher::new(backend, System, registry).with_retry_policy(RetryPolicy::busy_wait());
        Self { root, prefix, shim }
    }

    /// Logical path of `rel` under the mount.
    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.prefix, rel)
    }

    /// Physical path of `rel` under the backend root.
    pub fn physical(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn backend(&self) -> &FlakyBackend {
        self.shim.backend()
    }

    /// Opens `rel` through the dispatcher, which must route it.
    pub fn open(&self, rel: &str, flags: libc::c_int) -> i32 {
        self.shim
            .open(&self.path(rel), flags, 0o644)
            .expect("path should be backend-bound")
            .expect("backend open should succeed")
    }

    /// Native position of the exposed descriptor.
    pub fn tell(&self, fd: i32) -> i64 {
        // SAFETY: querying the position of a descriptor has no preconditions.
        unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) as i64 }
    }

    pub fn rewind(&self, fd: i32, offset: i64) {
        // SAFETY: see tell.
        let pos = unsafe { libc::lseek(fd, offset as libc::off_t, libc::SEEK_SET) };
        assert_eq!(pos as i64, offset);
    }
}

/// `len` bytes of a non-repeating-at-page-size pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
