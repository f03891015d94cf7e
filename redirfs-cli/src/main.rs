use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use redirfs_core::registry::MountRegistry;
use redirfs_core::types::{canonicalize, Classification, ConfigSources, MountTable, ENV_RC};
use serde::Serialize;
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// File name of the preload library produced by the workspace.
const PRELOAD_LIB: &str = "libredirfs.so";

#[derive(Parser)]
#[command(name = "redirfs")]
#[command(about = "Route file I/O under configured mount prefixes to a storage backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with the interposition layer preloaded
    Run {
        /// Preload library (defaults to the one next to this executable)
        #[arg(long)]
        lib: Option<PathBuf>,

        /// Configuration file consulted before the user and system ones
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Command and its arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<OsString>,
    },

    /// Show the configured mounts
    Mounts {
        /// Configuration file consulted before the user and system ones
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show how paths would be routed
    Classify {
        /// Configuration file consulted before the user and system ones
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Paths to classify
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redirfs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { lib, config, command } => {
            let code = run_command(lib, config, command).await?;
            std::process::exit(code);
        }
        Commands::Mounts { config, json } => {
            show_mounts(&sources(config.as_deref()), json)?;
        }
        Commands::Classify { config, paths } => {
            classify_paths(&sources(config.as_deref()), &paths)?;
        }
    }

    Ok(())
}

/// The configuration sources a preloaded child would read when started with
/// `config` as its `REDIRFS_RC`.
fn sources(config: Option<&Path>) -> ConfigSources {
    let env = ConfigSources::from_env();
    let Some(config) = config else {
        return env;
    };

    let inherited = std::env::var_os(ENV_RC).map(PathBuf::from);
    let mut paths = vec![config.to_path_buf()];
    paths.extend(
        env.paths()
            .iter()
            .filter(|path| Some(*path) != inherited.as_ref())
            .cloned(),
    );
    ConfigSources::new(paths)
}

fn default_lib() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Locating the redirfs executable")?;
    let dir = exe.parent().context("redirfs executable has no parent directory")?;
    Ok(dir.join(PRELOAD_LIB))
}

/// Prepends `lib` to an inherited `LD_PRELOAD` list.
fn preload_value(lib: &Path, inherited: Option<OsString>) -> OsString {
    let mut value = lib.as_os_str().to_os_string();
    if let Some(existing) = inherited.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

async fn run_command(lib: Option<PathBuf>, config: Option<PathBuf>, command: Vec<OsString>) -> Result<i32> {
    let lib = match lib {
        Some(lib) => lib,
        None => default_lib()?,
    };
    if !lib.exists() {
        bail!("Preload library {} does not exist", lib.display());
    }
    let lib = lib
        .canonicalize()
        .with_context(|| format!("Resolving {}", lib.display()))?;

    let Some((program, args)) = command.split_first() else {
        bail!("No command given");
    };

    let mut child = tokio::process::Command::new(program);
    child
        .args(args)
        .env("LD_PRELOAD", preload_value(&lib, std::env::var_os("LD_PRELOAD")));
    if let Some(config) = &config {
        let config = config
            .canonicalize()
            .with_context(|| format!("Resolving {}", config.display()))?;
        child.env(ENV_RC, config);
    }

    info!("Running {:?} with {}", program, lib.display());
    let status = child
        .status()
        .await
        .with_context(|| format!("Spawning {:?}", program))?;
    debug!("Child exited with {}", status);

    Ok(status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1))
}

#[derive(Serialize)]
struct MountReport<'a> {
    sources: &'a [PathBuf],
    #[serde(flatten)]
    table: &'a MountTable,
}

fn show_mounts(sources: &ConfigSources, json: bool) -> Result<()> {
    let registry = MountRegistry::new(sources.clone());
    let table = registry.table();

    if json {
        let report = MountReport {
            sources: sources.paths(),
            table: &table,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Match mode: {}", table.mode());
    if table.is_empty() {
        println!("No mount points configured");
        return Ok(());
    }
    for entry in table.entries() {
        let roots: Vec<_> = entry.backends.iter().map(|root| root.display().to_string()).collect();
        if roots.is_empty() {
            println!("{}  (no backend root)", entry.prefix);
        } else {
            println!("{}  -> {}", entry.prefix, roots.join(", "));
        }
    }
    Ok(())
}

/// Canonical form and routing of one path, as the preloaded layer would see
/// it from this process's working directory.
fn classify_one(registry: &MountRegistry, path: &str) -> (Option<String>, Classification) {
    let cwd = || {
        std::env::current_dir()?
            .into_os_string()
            .into_string()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-UTF-8 working directory"))
    };
    match canonicalize(path, cwd) {
        Ok(canonical) => {
            let class = registry.classify(&canonical);
            (Some(canonical), class)
        }
        Err(_) => (None, Classification::Native),
    }
}

fn classify_paths(sources: &ConfigSources, paths: &[String]) -> Result<()> {
    let registry = MountRegistry::new(sources.clone());
    for path in paths {
        match classify_one(&registry, path) {
            (Some(canonical), class) => println!("{}\t{}\t{}", class, canonical, path),
            (None, class) => println!("{}\t-\t{}", class, path),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redirfs_core::types::{MatchMode, MountEntry};

    #[test]
    fn test_parse_run_keeps_command_arguments() {
        let cli = Cli::try_parse_from(["redirfs", "run", "--config", "/tmp/rc", "--", "ls", "-l", "/mnt/plfs"]).unwrap();
        match cli.command {
            Commands::Run { lib, config, command } => {
                assert!(lib.is_none());
                assert_eq!(config, Some(PathBuf::from("/tmp/rc")));
                assert_eq!(command, vec![OsString::from("ls"), "-l".into(), "/mnt/plfs".into()]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_classify_requires_paths() {
        assert!(Cli::try_parse_from(["redirfs", "classify"]).is_err());
    }

    #[test]
    fn test_explicit_config_comes_first() {
        let sources = sources(Some(Path::new("/tmp/custom-rc")));
        assert_eq!(sources.paths()[0], PathBuf::from("/tmp/custom-rc"));
        assert_eq!(sources.paths().last(), Some(&PathBuf::from("/etc/redirfsrc")));
    }

    #[test]
    fn test_preload_value() {
        let lib = Path::new("/opt/redirfs/libredirfs.so");
        assert_eq!(preload_value(lib, None), OsString::from("/opt/redirfs/libredirfs.so"));
        assert_eq!(
            preload_value(lib, Some("libother.so".into())),
            OsString::from("/opt/redirfs/libredirfs.so:libother.so")
        );
    }

    #[test]
    fn test_classify_one() {
        let table = MountTable::new(vec![MountEntry::new("/mnt/plfs")], MatchMode::Substring);
        let registry = MountRegistry::with_table(table);

        let (canonical, class) = classify_one(&registry, "/mnt/plfs/./a//b");
        assert_eq!(canonical.as_deref(), Some("/mnt/plfs/a/b"));
        assert_eq!(class, Classification::Backend);

        let (_, class) = classify_one(&registry, "/etc/passwd");
        assert_eq!(class, Classification::Native);

        let (canonical, class) = classify_one(&registry, "");
        assert!(canonical.is_none());
        assert_eq!(class, Classification::Native);
    }

    #[test]
    fn test_mount_report_json() {
        let table = MountTable::new(
            vec![MountEntry::new("/mnt/plfs").with_backend("/data/plfs")],
            MatchMode::Prefix,
        );
        let paths = vec![PathBuf::from("/etc/redirfsrc")];
        let report = MountReport {
            sources: &paths,
            table: &table,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["mode"], "prefix");
        assert_eq!(value["entries"][0]["prefix"], "/mnt/plfs");
        assert_eq!(value["entries"][0]["backends"][0], "/data/plfs");
        assert_eq!(value["sources"][0], "/etc/redirfsrc");
    }
}
