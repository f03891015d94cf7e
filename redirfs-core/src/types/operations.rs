use libc::{c_int, pid_t, uid_t};
use std::fmt;

/// Open flags as passed to `open(2)`.
///
/// Wraps the raw `O_*` bits so the access mode and the creation flags can be
/// inspected without sprinkling masks through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(c_int);

impl OpenFlags {
    /// Read-only access mode
    pub const READ_ONLY: Self = Self(libc::O_RDONLY);
    /// Write-only access mode
    pub const WRITE_ONLY: Self = Self(libc::O_WRONLY);
    /// Read-write access mode
    pub const READ_WRITE: Self = Self(libc::O_RDWR);
    /// Create file if it doesn't exist
    pub const CREATE: Self = Self(libc::O_CREAT);
    /// Exclusive creation (fail if file exists)
    pub const EXCLUSIVE: Self = Self(libc::O_EXCL);
    /// Truncate file to zero length
    pub const TRUNCATE: Self = Self(libc::O_TRUNC);
    /// Append mode flag
    pub const APPEND: Self = Self(libc::O_APPEND);
    /// Close the descriptor on exec
    pub const CLOSE_ON_EXEC: Self = Self(libc::O_CLOEXEC);

    /// Creates flags from raw bits.
    pub const fn from_bits(bits: c_int) -> Self {
        Self(bits)
    }

    /// Returns the raw value of the flags.
    pub const fn bits(&self) -> c_int {
        self.0
    }

    /// Returns the `O_ACCMODE` part of the flags.
    pub const fn access_mode(&self) -> c_int {
        self.0 & libc::O_ACCMODE
    }

    /// Returns true if all non-access-mode bits in `other` are set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn can_read(&self) -> bool {
        self.access_mode() != libc::O_WRONLY
    }

    pub const fn can_write(&self) -> bool {
        self.access_mode() != libc::O_RDONLY
    }

    pub const fn is_append(&self) -> bool {
        self.contains(Self::APPEND)
    }

    pub const fn creates(&self) -> bool {
        self.contains(Self::CREATE)
    }

    /// Returns the union of the flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the difference of the flags.
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Flags for the passthrough descriptor: same access, but it must never
    /// create, truncate or append on its own.
    pub const fn for_passthrough(self) -> Self {
        self.difference(
            Self::CREATE
                .union(Self::EXCLUSIVE)
                .union(Self::TRUNCATE)
                .union(Self::APPEND),
        )
    }

    /// Translates an `fopen` mode string.
    ///
    /// `b` is ignored as POSIX does; glibc's `e` and `x` modifiers map to
    /// `O_CLOEXEC` and `O_EXCL`. Returns `None` for anything else.
    pub fn from_stream_mode(mode: &str) -> Option<Self> {
        let mut chars = mode.chars();
        let mut flags = match chars.next()? {
            'r' => Self::READ_ONLY,
            'w' => Self::WRITE_ONLY | Self::CREATE | Self::TRUNCATE,
            'a' => Self::WRITE_ONLY | Self::CREATE | Self::APPEND,
            _ => return None,
        };

        for c in chars {
            match c {
                '+' => flags = Self(flags.difference(Self::WRITE_ONLY).0 | libc::O_RDWR),
                'b' => {}
                'e' => flags = flags | Self::CLOSE_ON_EXEC,
                'x' => flags = flags | Self::EXCLUSIVE,
                _ => return None,
            }
        }

        Some(flags)
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#o}", self.0)
    }
}

impl From<c_int> for OpenFlags {
    fn from(bits: c_int) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::Sub for OpenFlags {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.difference(rhs)
    }
}

/// The calling process and user, passed along to backend verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub pid: pid_t,
    pub uid: uid_t,
}

impl Identity {
    /// Captures the identity of the current caller.
    pub fn current() -> Self {
        // SAFETY: getpid/getuid have no preconditions and cannot fail.
        unsafe {
            Self {
                pid: libc::getpid(),
                uid: libc::getuid(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode() {
        let flags = OpenFlags::from_bits(libc::O_RDWR | libc::O_CREAT);
        assert_eq!(flags.access_mode(), libc::O_RDWR);
        assert!(flags.can_read());
        assert!(flags.can_write());
        assert!(flags.creates());

        let flags = OpenFlags::WRITE_ONLY;
        assert!(!flags.can_read());
        assert!(flags.can_write());

        let flags = OpenFlags::READ_ONLY;
        assert!(flags.can_read());
        assert!(!flags.can_write());
    }

    #[test]
    fn test_for_passthrough_strips_creation_flags() {
        let flags = OpenFlags::from_bits(
            libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC | libc::O_APPEND | libc::O_CLOEXEC,
        );
        let passthrough = flags.for_passthrough();
        assert_eq!(passthrough.bits(), libc::O_WRONLY | libc::O_CLOEXEC);
    }

    #[test]
    fn test_stream_modes() {
        let cases = [
            ("r", libc::O_RDONLY),
            ("rb", libc::O_RDONLY),
            ("r+", libc::O_RDWR),
            ("rb+", libc::O_RDWR),
            ("r+b", libc::O_RDWR),
            ("w", libc::O_WRONLY | libc::O_TRUNC | libc::O_CREAT),
            ("w+", libc::O_RDWR | libc::O_TRUNC | libc::O_CREAT),
            ("a", libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND),
            ("a+", libc::O_RDWR | libc::O_CREAT | libc::O_APPEND),
            ("wx", libc::O_WRONLY | libc::O_TRUNC | libc::O_CREAT | libc::O_EXCL),
            ("re", libc::O_RDONLY | libc::O_CLOEXEC),
        ];

        for (mode, expected) in cases {
            assert_eq!(
                OpenFlags::from_stream_mode(mode).map(|f| f.bits()),
                Some(expected),
                "mode {:?}",
                mode
            );
        }
    }

    #[test]
    fn test_invalid_stream_modes() {
        assert!(OpenFlags::from_stream_mode("").is_none());
        assert!(OpenFlags::from_stream_mode("q").is_none());
        assert!(OpenFlags::from_stream_mode("rz").is_none());
        assert!(OpenFlags::from_stream_mode("+r").is_none());
    }

    #[test]
    fn test_identity_matches_process() {
        let id = Identity::current();
        assert_eq!(id.pid as u32, std::process::id());
    }
}
