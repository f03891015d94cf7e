//! Runs a small C client with the built `libredirfs.so` preloaded and checks
//! what it saw and what reached the backend root.
//!
//! The tests skip themselves when the library has not been built next to the
//! test binary or no C compiler is available.

use redirfs_core::types::{ENV_LOG, ENV_RC};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CLIENT_SOURCE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/client.c");
const PRELOAD_LIB: &str = "libredirfs.so";

/// `target/<profile>/libredirfs.so`, or its copy under `deps/`.
fn preload_lib() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let deps = exe.parent()?;
    [deps.parent()?.join(PRELOAD_LIB), deps.join(PRELOAD_LIB)]
        .into_iter()
        .find(|lib| lib.exists())
}

/// A backend root and its mount prefix, described by a config file that
/// preloaded children read through `REDIRFS_RC`.
struct Mount {
    dir: TempDir,
    lib: PathBuf,
    logical: String,
}

impl Mount {
    fn new() -> Option<Self> {
        let Some(lib) = preload_lib() else {
            eprintln!("{} not built next to the test binary; skipping", PRELOAD_LIB);
            return None;
        };
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        fs::create_dir(base.join("data")).unwrap();

        let logical = format!("{}/logical", base.display());
        let config = format!(
            "mount_point: {}\nbackends: {}\nmount_match: prefix\n",
            logical,
            base.join("data").display()
        );
        fs::write(base.join("rc"), config).unwrap();
        Some(Self { dir, lib, logical })
    }

    fn physical(&self, rel: &str) -> PathBuf {
        self.dir.path().join("data").join(rel)
    }

    fn logical(&self, rel: &str) -> String {
        format!("{}/{}", self.logical, rel)
    }

    /// `program` with the layer preloaded and only this mount configured.
    fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let mut command = Command::new(program);
        command
            .env("LD_PRELOAD", &self.lib)
            .env(ENV_RC, self.dir.path().join("rc"))
            .env("HOME", self.dir.path())
            .env_remove(ENV_LOG);
        command
    }

    /// Compiles the client, optionally with 64-bit file offsets, which links
    /// it against the `*64` entry points.
    fn client(&self, large_files: bool) -> Option<PathBuf> {
        let out = self
            .dir
            .path()
            .join(if large_files { "client64" } else { "client" });
        let mut cc = Command::new("cc");
        if large_files {
            cc.arg("-D_FILE_OFFSET_BITS=64");
        }
        let built = match cc.arg("-o").arg(&out).arg(CLIENT_SOURCE).output() {
            Ok(built) => built,
            Err(e) => {
                eprintln!("No C compiler ({}); skipping", e);
                return None;
            }
        };
        assert!(
            built.status.success(),
            "compiling the client failed:\n{}",
            String::from_utf8_lossy(&built.stderr)
        );
        Some(out)
    }

    /// Runs one client scenario and returns its standard output.
    fn run(&self, client: &Path, scenario: &str) -> String {
        let output = self.command(client).arg(scenario).arg(&self.logical).output().unwrap();
        assert!(
            output.status.success(),
            "{} exited with {}:\n{}",
            scenario,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }
}

/// Sets up a mount and the client, or skips the test.
macro_rules! setup {
    ($large_files:expr) => {{
        let Some(mount) = Mount::new() else {
            return;
        };
        let Some(client) = mount.client($large_files) else {
            return;
        };
        (mount, client)
    }};
}

fn lines(out: &str) -> Vec<&str> {
    out.lines().collect()
}

#[test]
fn failures_set_errno_and_return_sentinels() {
    let (mount, client) = setup!(false);
    let out = mount.run(&client, "errors");

    let enoent = libc::ENOENT;
    assert_eq!(
        lines(&out),
        vec![
            format!("open=-1 errno={}", enoent),
            format!("fopen=null errno={}", enoent),
            format!("badmode=null errno={}", libc::EINVAL),
            format!("stat=-1 errno={}", enoent),
            format!("opendir=null errno={}", enoent),
            format!("rename=-1 errno={}", enoent),
            format!("close=-1 errno={}", libc::EBADF),
        ]
    );
    assert_eq!(fs::read(mount.physical("kept")).unwrap(), b"kept");
    assert!(!Path::new("/tmp/redirfs-cross-mount").exists());
}

fn check_duplicates(large_files: bool) {
    let (mount, client) = setup!(large_files);
    let out = mount.run(&client, "duplicates");

    assert_eq!(lines(&out), vec!["fcntl n=5 buf=hello", "dup3 n=5 buf=hello same=1"]);
    assert_eq!(fs::read(mount.physical("dup.txt")).unwrap(), b"hello world");
}

#[test]
fn duplicates_outlive_the_original() {
    check_duplicates(false);
}

#[test]
fn large_file_builds_duplicate_through_fcntl64() {
    check_duplicates(true);
}

#[test]
fn stdio_reaches_the_backend() {
    let (mount, client) = setup!(false);
    let out = mount.run(&client, "streams");

    assert_eq!(
        lines(&out),
        vec![
            "fileno=1",
            "fgets1=buf len=0",
            "first=line1",
            "getline=6",
            "scanned=1 value=7",
            "ftell=18",
            "fgetc=l",
            "tail=7",
            "eof=yes",
            "fflush=0",
            "fclose=0",
        ]
    );
    assert_eq!(
        fs::read_to_string(mount.physical("stream.txt")).unwrap(),
        "line1\nline2\nz\nfmt7\ntail\n"
    );
    assert_eq!(
        fs::read_to_string(mount.physical("fdopen.txt")).unwrap(),
        "via fdopen 42\n"
    );
}

#[test]
fn standard_output_follows_dup2() {
    let (mount, client) = setup!(false);
    let out = mount.run(&client, "standard");

    assert_eq!(lines(&out), vec!["before", "after"]);
    assert_eq!(
        fs::read_to_string(mount.physical("stdout.txt")).unwrap(),
        "to backend 1\nputs line\n"
    );
}

#[test]
fn working_directory_is_reported_logically() {
    let (mount, client) = setup!(false);
    let out = mount.run(&client, "cwd");

    let work = mount.logical("work");
    assert_eq!(
        lines(&out),
        vec![
            format!("getcwd={}", work),
            format!("dirname={}", work),
            format!("small=null errno={}", libc::ERANGE),
        ]
    );
    assert_eq!(
        fs::read_to_string(mount.physical("work/rel.txt")).unwrap(),
        "relative\n"
    );
}

#[test]
fn directory_streams_list_the_backend() {
    let (mount, client) = setup!(false);
    let out = mount.run(&client, "listing");

    assert_eq!(
        lines(&out),
        vec![
            "readdir=a",
            "readdir=b",
            "readdir=c",
            "readdir64=a type=1",
            "readdir64=b type=1",
            "readdir64=c type=1",
            "closedir=0",
        ]
    );
    assert!(mount.physical("list/a").is_file());
}

#[test]
fn stat_variants_and_renameat() {
    let (mount, client) = setup!(false);
    let out = mount.run(&client, "attributes");

    assert_eq!(
        lines(&out),
        vec![
            "stat=10".to_string(),
            "fstat=10".to_string(),
            "fstatat=10".to_string(),
            "emptypath=10".to_string(),
            "relative=10".to_string(),
            "statx=0 size=10 mask=1 reg=1".to_string(),
            "renameat=0".to_string(),
            format!("gone=-1 errno={}", libc::ENOENT),
            "chmod=0".to_string(),
            "mode=600".to_string(),
        ]
    );
    assert!(!mount.physical("attr/f.txt").exists());
    assert_eq!(fs::read(mount.physical("attr/g.txt")).unwrap(), b"0123456789");
}

#[test]
fn coreutils_see_the_mount() {
    let Some(mount) = Mount::new() else {
        return;
    };
    fs::create_dir(mount.physical("tools")).unwrap();
    fs::write(mount.physical("tools/b.txt"), b"bee\n").unwrap();
    fs::write(mount.physical("tools/a.txt"), b"ay\n").unwrap();

    let run = |program: &str, args: &[String]| -> Option<String> {
        let output = mount.command(program).args(args).output().ok()?;
        assert!(
            output.status.success(),
            "{} failed:\n{}",
            program,
            String::from_utf8_lossy(&output.stderr)
        );
        Some(String::from_utf8(output.stdout).unwrap())
    };

    let Some(listed) = run("ls", &["-1".to_string(), mount.logical("tools")]) else {
        eprintln!("ls not available; skipping");
        return;
    };
    assert_eq!(listed, "a.txt\nb.txt\n");

    if let Some(size) = run("stat", &["-c".to_string(), "%s".to_string(), mount.logical("tools/b.txt")]) {
        assert_eq!(size, "4\n");
    }
    if let Some(text) = run("cat", &[mount.logical("tools/a.txt")]) {
        assert_eq!(text, "ay\n");
    }
}
