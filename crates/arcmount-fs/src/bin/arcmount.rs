//! arcmount: mount an archive or compressed file as a read-only filesystem.
//!
//! The whole archive is scanned once to build the directory tree, then the
//! mount goes live and ordinary processes can list and read its contents
//! through normal file I/O.
//!
//! # Usage
//!
//! ```bash
//! arcmount archive.tar.gz mnt
//! ls -l mnt
//! fusermount -u mnt
//!
//! # Without a mount point, one is derived from the archive's name:
//! arcmount photos.zip     # mounts at ./photos
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;

use arcmount_format::redact::{redacted_path, set_redact};
use clap::Parser;
use env_logger::Env;
use fuser::MountOption;
use log::{debug, error, info, warn};

use arcmount_fs::fuse::{self, ArchiveFuseFs};
use arcmount_fs::scan::{self, ScanOptions};
use arcmount_fs::{exit_code, inner_name};

/// Mount an archive or compressed file as a read-only filesystem.
#[derive(Parser, Debug)]
#[command(name = "arcmount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the archive file
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Where to mount it; derived from the archive name when omitted
    #[arg(value_name = "MOUNT_POINT")]
    mount_point: Option<PathBuf>,

    /// Do not print progress messages
    #[arg(short, long)]
    quiet: bool,

    /// Print more log messages
    #[arg(short, long)]
    verbose: bool,

    /// Replace pathnames in log output
    #[arg(long)]
    redact: bool,

    /// Run in the foreground (always the case; accepted for compatibility)
    #[arg(short = 'f')]
    foreground: bool,

    /// Enable debug logging
    #[arg(short = 'd')]
    debug: bool,

    /// Mount options, comma separated
    #[arg(short = 'o', value_name = "OPT[,OPT...]", action = clap::ArgAction::Append)]
    options: Vec<String>,
}

/// What `-o` parsing produced: ownership overrides, the redact switch, and
/// whatever gets forwarded to the FUSE layer verbatim.
#[derive(Default)]
struct MountArgs {
    uid: Option<u32>,
    gid: Option<u32>,
    redact: bool,
    fuse_options: Vec<MountOption>,
}

/// Accepted-and-ignored options, for command line compatibility with
/// archivemount. Raw archives are detected automatically and the mount is
/// always read-only.
const IGNORED_OPTIONS: &[&str] = &["passphrase", "formatraw", "nobackup", "nosave", "readonly"];

fn parse_mount_args(raw: &[String]) -> MountArgs {
    let mut parsed = MountArgs::default();
    for group in raw {
        for option in group.split(',').filter(|o| !o.is_empty()) {
            let (key, value) = match option.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (option, None),
            };
            if IGNORED_OPTIONS.contains(&key) {
                debug!("ignoring compatibility option {key}");
                continue;
            }
            match (key, value) {
                ("redact", None) => parsed.redact = true,
                ("uid", Some(v)) => match v.parse() {
                    Ok(uid) => parsed.uid = Some(uid),
                    Err(_) => warn!("ignoring unparseable uid: {v}"),
                },
                ("gid", Some(v)) => match v.parse() {
                    Ok(gid) => parsed.gid = Some(gid),
                    Err(_) => warn!("ignoring unparseable gid: {v}"),
                },
                ("allow_other", None) => parsed.fuse_options.push(MountOption::AllowOther),
                ("allow_root", None) => parsed.fuse_options.push(MountOption::AllowRoot),
                ("auto_unmount", None) => parsed.fuse_options.push(MountOption::AutoUnmount),
                ("ro", None) => {} // already mounted read-only
                _ => parsed
                    .fuse_options
                    .push(MountOption::CUSTOM(option.to_string())),
            }
        }
    }
    parsed
}

/// Removes the mount point directory again, but only if this process
/// created it.
struct MountPointGuard {
    created: Option<PathBuf>,
}

impl Drop for MountPointGuard {
    fn drop(&mut self) {
        let Some(path) = self.created.take() else {
            return;
        };
        match std::fs::remove_dir(&path) {
            Ok(()) => debug!("removed mount point {}", redacted_path(&path)),
            Err(e) => error!("cannot remove mount point {}: {e}", redacted_path(&path)),
        }
    }
}

/// Uses the requested mount point, creating it if needed.
fn prepare_mount_point(requested: &Path, guard: &mut MountPointGuard) -> PathBuf {
    match std::fs::create_dir(requested) {
        Ok(()) => {
            debug!("created mount point {}", redacted_path(requested));
            guard.created = Some(requested.to_path_buf());
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!("mount point {} already exists", redacted_path(requested));
        }
        Err(e) => {
            error!("cannot create mount point {}: {e}", redacted_path(requested));
        }
    }
    requested.to_path_buf()
}

/// Derives a mount point from the archive's inner name, suffixing ` (1)`,
/// ` (2)`, … until a directory can be created.
fn derive_mount_point(base: &str, guard: &mut MountPointGuard) -> Option<PathBuf> {
    let mut candidate = base.to_string();
    for attempt in 1.. {
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                info!("created mount point {}", arcmount_format::redact::redact(&candidate));
                guard.created = Some(PathBuf::from(&candidate));
                return Some(PathBuf::from(candidate));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(
                    "mount point {} already exists",
                    arcmount_format::redact::redact(&candidate)
                );
                candidate = format!("{base} ({attempt})");
            }
            Err(e) => {
                error!(
                    "cannot create mount point {}: {e}",
                    arcmount_format::redact::redact(&candidate)
                );
                return None;
            }
        }
    }
    None
}

fn run() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => exit_code::GENERIC_FAILURE,
            };
            let _ = e.print();
            return code;
        }
    };

    let log_level = if args.quiet {
        "error"
    } else if args.verbose || args.debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let mount_args = parse_mount_args(&args.options);
    set_redact(args.redact || mount_args.redact);

    if args.foreground {
        debug!("foreground operation is the only mode; -f accepted");
    }

    // Stage 1: classify the archive and verify it is decodable, so bad
    // inputs exit with their specific code before any directory appears.
    let scanner = match scan::probe(&ScanOptions {
        archive: args.archive.clone(),
        password: None,
        prompt_for_password: true,
        quiet: args.quiet,
    }) {
        Ok(scanner) => scanner,
        // Already logged by the probe.
        Err(e) => return e.exit_code(),
    };

    let mut guard = MountPointGuard { created: None };
    let mount_point = match &args.mount_point {
        Some(requested) => prepare_mount_point(requested, &mut guard),
        None => {
            let base = inner_name(&args.archive);
            if base.is_empty() {
                error!("cannot derive a mount point from {}", redacted_path(&args.archive));
                return exit_code::GENERIC_FAILURE;
            }
            match derive_mount_point(&base, &mut guard) {
                Some(path) => path,
                None => return exit_code::GENERIC_FAILURE,
            }
        }
    };

    // Stage 2: build the tree. Takes a full decompression pass for raw
    // archives; the progress reporter covers the wait.
    let mount = match scanner.finish() {
        Ok(mount) => mount,
        Err(e) => {
            error!("{}: {e}", redacted_path(&args.archive));
            return e.exit_code();
        }
    };

    info!(
        "serving {} entries from {}",
        mount.tree.len() - 1,
        redacted_path(&args.archive)
    );

    let fs = ArchiveFuseFs::new(mount, mount_args.uid, mount_args.gid);
    if let Err(e) = fuse::mount(fs, &mount_point, mount_args.fuse_options) {
        error!("FUSE mount failed: {e}");
        return exit_code::GENERIC_FAILURE;
    }

    0
}

fn main() {
    process::exit(run());
}
