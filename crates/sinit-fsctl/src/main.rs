//! sinit-fsctl: poke at a sinit VFS from a shell.
//!
//! Builds the VFS from a RON mount table (or mounts one host directory at
//! `/`) and runs a single command against it.
//!
//! Usage:
//!   sinit-fsctl --config /etc/sinit/vfs.ron mounts
//!   sinit-fsctl --config vfs.ron cat res:///splash.png > splash.png
//!   echo 'timeout 3' | sinit-fsctl --root /boot put /loader.conf
//!   RUST_LOG=sinit_vfs=debug sinit-fsctl --json ls /

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

use sinit_vfs::{FileAttr, MountOptions, MountRoot, Platform, Vfs, VfsConfig, Volume};

/// Inspect and modify a sinit VFS.
#[derive(Parser, Debug)]
#[command(name = "sinit-fsctl")]
#[command(about = "Inspect and modify a sinit VFS")]
struct Args {
    /// RON mount table
    #[arg(short, long, conflicts_with = "root")]
    config: Option<PathBuf>,

    /// Host directory to mount at `/` when no mount table is given
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls { path: String },
    /// Write a file to stdout
    Cat { path: String },
    /// Show file attributes
    Stat { path: String },
    /// Replace a file with stdin (or --from)
    Put {
        path: String,
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or empty directory
    Rm { path: String },
    /// Rename within one volume
    Mv { from: String, to: String },
    /// List mounted volumes
    Mounts,
    /// List registered drivers
    Drivers,
    /// List known storage devices
    Volumes,
}

#[derive(Serialize)]
struct MountRow {
    name: String,
    driver: String,
    state: String,
    capabilities: String,
    open_handles: usize,
    pins: usize,
}

impl From<&Volume> for MountRow {
    fn from(volume: &Volume) -> Self {
        Self {
            name: volume.name().to_string(),
            driver: volume.driver_name().to_string(),
            state: volume.state().to_string(),
            capabilities: format!("{:?}", volume.capabilities()),
            open_handles: volume.open_handles(),
            pins: volume.pins(),
        }
    }
}

fn build_vfs(args: &Args) -> Result<Vfs> {
    if let Some(path) = &args.config {
        let config = VfsConfig::load(path)
            .with_context(|| format!("loading mount table {}", path.display()))?;
        return Ok(Vfs::from_config(&config)?);
    }
    let vfs = Vfs::init(Platform::Hosted)?;
    vfs.mount(
        "/",
        "posix",
        MountRoot::Directory(args.root.clone()),
        MountOptions::new(),
    )
    .with_context(|| format!("mounting {}", args.root.display()))?;
    Ok(vfs)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_attr(path: &str, attr: &FileAttr) {
    let mtime = attr
        .mtime
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|| "-".into());
    println!("{path}: {} {} bytes, mtime {mtime}", attr.kind, attr.size);
}

fn run(vfs: &Vfs, args: &Args) -> Result<()> {
    match &args.command {
        Command::Ls { path } => {
            let entries = vfs.list(path)?;
            if args.json {
                return print_json(&entries);
            }
            for entry in entries {
                let suffix = if entry.kind.is_dir() { "/" } else { "" };
                println!("{}{suffix}", entry.name);
            }
        }
        Command::Cat { path } => {
            let data = vfs.read_all(path)?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Stat { path } => {
            let attr = vfs.stat(path)?;
            if args.json {
                return print_json(&attr);
            }
            print_attr(path, &attr);
        }
        Command::Put { path, from } => {
            let data = match from {
                Some(file) => std::fs::read(file)
                    .with_context(|| format!("reading {}", file.display()))?,
                None => {
                    let mut data = Vec::new();
                    std::io::stdin().read_to_end(&mut data)?;
                    data
                }
            };
            vfs.write_all(path, &data)?;
            tracing::info!(path = %path, bytes = data.len(), "written");
        }
        Command::Mkdir { path } => vfs.mkdir(path)?,
        Command::Rm { path } => vfs.delete(path)?,
        Command::Mv { from, to } => vfs.rename(from, to)?,
        Command::Mounts => {
            let rows = vfs
                .volume_names()
                .iter()
                .map(|name| vfs.volume(name).map(|v| MountRow::from(v.as_ref())))
                .collect::<Result<Vec<_>, _>>()?;
            if args.json {
                return print_json(&rows);
            }
            let default = vfs.default_volume();
            for row in rows {
                let mark = if default.as_deref() == Some(row.name.as_str()) { " (default)" } else { "" };
                println!(
                    "{:<16} {:<10} {:<9} handles={} pins={}{mark}",
                    row.name, row.driver, row.state, row.open_handles, row.pins
                );
            }
        }
        Command::Drivers => {
            let names = vfs.driver_names();
            if args.json {
                return print_json(&names);
            }
            for name in names {
                println!("{name}");
            }
        }
        Command::Volumes => {
            let infos = vfs.volume_infos().list();
            if args.json {
                return print_json(&infos);
            }
            for info in infos {
                println!(
                    "{:<12} {:<24} {:<8} {}",
                    info.id,
                    info.device.display(),
                    info.fs_type.as_deref().unwrap_or("-"),
                    info.title
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // stdout carries file data; logs go to stderr.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let vfs = build_vfs(&args)?;
    let result = run(&vfs, &args);
    vfs.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("sinit-fsctl").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        let parsed = args(&["--json", "ls", "res:///"]);
        assert!(parsed.json);
        assert!(matches!(parsed.command, Command::Ls { ref path } if path == "res:///"));

        let parsed = args(&["--root", "/boot", "put", "/x", "--from", "y"]);
        assert_eq!(parsed.root, PathBuf::from("/boot"));
        assert!(matches!(parsed.command, Command::Put { from: Some(_), .. }));

        assert!(Args::try_parse_from(["sinit-fsctl", "-c", "a.ron", "--root", "/", "mounts"]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_root_mount() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("loader.conf"), b"timeout 3\n").unwrap();
        let root = dir.path().to_str().unwrap();

        let parsed = args(&["--root", root, "mkdir", "/entries"]);
        let vfs = build_vfs(&parsed).unwrap();
        run(&vfs, &parsed).unwrap();
        assert!(dir.path().join("entries").is_dir());
        assert_eq!(vfs.read_all("/loader.conf").unwrap(), b"timeout 3\n");
        vfs.shutdown();
    }
}
