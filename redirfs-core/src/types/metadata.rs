//! File attributes as reported by a backend.

use serde::Serialize;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// Seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

impl Timestamp {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

/// Backend attributes of a file or directory, independent of the `stat`
/// layout the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FileAttr {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

macro_rules! fill_stat_fields {
    ($attr:expr, $out:expr) => {{
        let attr = $attr;
        let out = $out;
        out.st_dev = attr.dev as _;
        out.st_ino = attr.ino as _;
        out.st_mode = attr.mode as _;
        out.st_nlink = attr.nlink as _;
        out.st_uid = attr.uid as _;
        out.st_gid = attr.gid as _;
        out.st_rdev = attr.rdev as _;
        out.st_size = attr.size as _;
        out.st_blksize = attr.blksize as _;
        out.st_blocks = attr.blocks as _;
        out.st_atime = attr.atime.sec as _;
        out.st_atime_nsec = attr.atime.nsec as _;
        out.st_mtime = attr.mtime.sec as _;
        out.st_mtime_nsec = attr.mtime.nsec as _;
        out.st_ctime = attr.ctime.sec as _;
        out.st_ctime_nsec = attr.ctime.nsec as _;
    }};
}

impl FileAttr {
    /// Returns the `S_IFMT` part of the mode.
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT as u32
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == libc::S_IFREG as u32
    }

    /// Returns the `d_type` value a directory entry for this file carries.
    pub fn dirent_type(&self) -> u8 {
        match self.file_type() as libc::mode_t {
            libc::S_IFREG => libc::DT_REG,
            libc::S_IFDIR => libc::DT_DIR,
            libc::S_IFLNK => libc::DT_LNK,
            libc::S_IFIFO => libc::DT_FIFO,
            libc::S_IFSOCK => libc::DT_SOCK,
            libc::S_IFCHR => libc::DT_CHR,
            libc::S_IFBLK => libc::DT_BLK,
            _ => libc::DT_UNKNOWN,
        }
    }

    /// Writes the attributes into a caller-provided `struct stat`.
    pub fn fill_stat(&self, out: &mut libc::stat) {
        fill_stat_fields!(self, out);
    }

    /// Writes the attributes into a caller-provided `struct stat64`.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn fill_stat64(&self, out: &mut libc::stat64) {
        fill_stat_fields!(self, out);
    }

    /// Writes the basic-stats part of a caller-provided `struct statx` and
    /// reports it in `stx_mask`. Fields outside that set are left alone.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn fill_statx(&self, out: &mut libc::statx) {
        let stamp = |ts: Timestamp, out: &mut libc::statx_timestamp| {
            out.tv_sec = ts.sec;
            out.tv_nsec = ts.nsec as u32;
        };
        out.stx_mask = libc::STATX_BASIC_STATS;
        out.stx_blksize = self.blksize as u32;
        out.stx_nlink = self.nlink as u32;
        out.stx_uid = self.uid;
        out.stx_gid = self.gid;
        out.stx_mode = self.mode as u16;
        out.stx_ino = self.ino;
        out.stx_size = self.size;
        out.stx_blocks = self.blocks;
        stamp(self.atime, &mut out.stx_atime);
        stamp(self.mtime, &mut out.stx_mtime);
        stamp(self.ctime, &mut out.stx_ctime);
        out.stx_rdev_major = libc::major(self.rdev as libc::dev_t);
        out.stx_rdev_minor = libc::minor(self.rdev as libc::dev_t);
        out.stx_dev_major = libc::major(self.dev as libc::dev_t);
        out.stx_dev_minor = libc::minor(self.dev as libc::dev_t);
    }
}

impl From<&Metadata> for FileAttr {
    fn from(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            size: meta.size(),
            blksize: meta.blksize(),
            blocks: meta.blocks(),
            atime: Timestamp::new(meta.atime(), meta.atime_nsec()),
            mtime: Timestamp::new(meta.mtime(), meta.mtime_nsec()),
            ctime: Timestamp::new(meta.ctime(), meta.ctime_nsec()),
        }
    }
}
