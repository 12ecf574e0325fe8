//! `cowfs` — the multiplexer binary for §6.3's CLI surface, one
//! subcommand per operation bcachefs-tools exposes, following the
//! `clap::Parser` derive structure the corpus's own mkfs tool uses
//! (`chris17453-watos`'s `tools/mkfs.wfs`), with library errors wrapped
//! in `anyhow` at this boundary per §7.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cowfs::{ControlPlane, DataOp, DiskFlags, Filesystem, Range};
use cowfs_io::{BlockDevice, FileBlockDevice};
use cowfs_super::DeviceState;
use cowfs_types::FsOptions;

#[derive(Parser)]
#[command(name = "cowfs")]
#[command(about = "Administer a cowfs filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format one or more devices as a fresh filesystem.
    Format {
        /// Device files to format.
        devices: Vec<PathBuf>,
        /// Size to create each device at if it doesn't already exist
        /// (e.g. "64M", "4G"). Ignored for devices that already exist.
        #[arg(long)]
        size: Option<String>,
        #[arg(long, default_value_t = 1)]
        replicas: u8,
        #[arg(long, value_enum, default_value_t = CompressionArg::None)]
        compression: CompressionArg,
    },
    /// Print a device's superblock contents.
    ShowSuper { device: PathBuf },
    /// Check and report filesystem consistency.
    Fsck { devices: Vec<PathBuf> },
    /// Filesystem-level usage subcommands.
    Fs {
        #[command(subcommand)]
        cmd: FsCmd,
    },
    /// Per-device administration subcommands.
    Device {
        #[command(subcommand)]
        cmd: DeviceCmd,
    },
    /// Background data-job subcommands.
    Data {
        #[command(subcommand)]
        cmd: DataCmd,
    },
    /// Subvolume subcommands.
    Subvolume {
        #[command(subcommand)]
        cmd: SubvolumeCmd,
    },
    /// Move data off one device onto the rest of the filesystem.
    Migrate { devices: Vec<PathBuf>, from: u16 },
    /// Rewrite the superblock to the current format version.
    MigrateSuperblock { devices: Vec<PathBuf> },
    /// Dump every key in one or all btrees.
    Dump { devices: Vec<PathBuf> },
    /// List devices belonging to a filesystem.
    List { devices: Vec<PathBuf> },
    /// List journal entries.
    ListJournal { devices: Vec<PathBuf> },
    /// Set an encryption passphrase.
    SetPassphrase { devices: Vec<PathBuf> },
    /// Remove an encryption passphrase.
    RemovePassphrase { devices: Vec<PathBuf> },
    /// Unlock an encrypted filesystem.
    Unlock { devices: Vec<PathBuf> },
    /// Set an inode option override via the `bcachefs.` xattr namespace.
    Setattr {
        devices: Vec<PathBuf>,
        inode: u64,
        #[arg(long)]
        reinherit: bool,
    },
    /// Mount the filesystem via FUSE (out of scope; always refused).
    Fusemount { devices: Vec<PathBuf> },
    /// Print the binary's version.
    Version,
}

#[derive(Subcommand)]
enum FsCmd {
    Usage { devices: Vec<PathBuf> },
}

#[derive(Subcommand)]
enum DeviceCmd {
    Add { devices: Vec<PathBuf>, new_device: PathBuf },
    Remove { devices: Vec<PathBuf>, idx: u16, #[arg(long)] force: bool },
    Online { devices: Vec<PathBuf>, idx: u16 },
    Offline { devices: Vec<PathBuf>, idx: u16, #[arg(long)] force: bool },
    Evacuate { devices: Vec<PathBuf>, idx: u16 },
    SetState { devices: Vec<PathBuf>, idx: u16, state: DeviceStateArg, #[arg(long)] force: bool },
    Resize { devices: Vec<PathBuf>, idx: u16, new_nbuckets: u64 },
}

#[derive(Subcommand)]
enum DataCmd {
    Rereplicate { devices: Vec<PathBuf> },
    Scrub { devices: Vec<PathBuf> },
    Job { devices: Vec<PathBuf> },
}

#[derive(Subcommand)]
enum SubvolumeCmd {
    Create { devices: Vec<PathBuf>, inode: u64 },
    Delete { devices: Vec<PathBuf>, subvol_id: u32 },
    Snapshot { devices: Vec<PathBuf>, src: u32, dst_parent_inode: u64 },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CompressionArg {
    None,
    Lz4,
    Gzip,
    Zstd,
}

impl From<CompressionArg> for cowfs_types::CompressionType {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::None => cowfs_types::CompressionType::None,
            CompressionArg::Lz4 => cowfs_types::CompressionType::Lz4,
            CompressionArg::Gzip => cowfs_types::CompressionType::Gzip,
            CompressionArg::Zstd => cowfs_types::CompressionType::Zstd,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DeviceStateArg {
    Rw,
    Ro,
    Failed,
    Spare,
}

impl From<DeviceStateArg> for DeviceState {
    fn from(value: DeviceStateArg) -> Self {
        match value {
            DeviceStateArg::Rw => DeviceState::Rw,
            DeviceStateArg::Ro => DeviceState::Ro,
            DeviceStateArg::Failed => DeviceState::Failed,
            DeviceStateArg::Spare => DeviceState::Spare,
        }
    }
}

/// Parses a human size suffix ("64M", "4G", a bare byte count), the
/// same scheme the corpus's `mkfs.wfs` uses for its own `--size` flag.
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (num_str, mult) = if let Some(rest) = s.strip_suffix("GB").or_else(|| s.strip_suffix('G')) {
        (rest, 1024 * 1024 * 1024)
    } else if let Some(rest) = s.strip_suffix("MB").or_else(|| s.strip_suffix('M')) {
        (rest, 1024 * 1024)
    } else if let Some(rest) = s.strip_suffix("KB").or_else(|| s.strip_suffix('K')) {
        (rest, 1024)
    } else {
        (s.as_str(), 1)
    };
    num_str.parse::<u64>().ok().map(|n| n * mult)
}

fn open_device(path: &PathBuf, size: Option<&str>) -> Result<Arc<dyn BlockDevice>> {
    if !path.exists() {
        let bytes = size.and_then(parse_size).context("--size is required to create a new device file")?;
        let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        file.set_len(bytes).context("sizing new device file")?;
    }
    let num_sectors = std::fs::metadata(path)?.len() / cowfs_io::SECTOR_SIZE as u64;
    Ok(Arc::new(FileBlockDevice::open(path)?.with_num_sectors(num_sectors)))
}

fn open_devices(paths: &[PathBuf]) -> Result<Vec<(Arc<dyn BlockDevice>, String)>> {
    if paths.is_empty() {
        bail!("at least one device is required");
    }
    paths
        .iter()
        .map(|p| {
            let label = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| p.display().to_string());
            Ok((open_device(p, None)?, label))
        })
        .collect()
}

fn mount(paths: &[PathBuf]) -> Result<Filesystem> {
    let devices = open_devices(paths)?;
    Filesystem::mount(devices, FsOptions::default(), None).context("mounting filesystem")
}

/// §7 "user-visible": one line with the operation, canonical error name,
/// and §6.3's exit code.
fn exit_code_for(err: &cowfs_types::Error) -> ExitCode {
    use cowfs_types::Error::*;
    match err {
        ChecksumMismatch | CorruptMetadata | Corruption { .. } => ExitCode::from(4),
        BadMagic | BadChecksum | UnrecoverableRead | UnknownRequiredFeature(_) => ExitCode::from(8),
        _ => ExitCode::from(1),
    }
}

fn report(err: &anyhow::Error) -> ExitCode {
    eprintln!("cowfs: {err}");
    match err.downcast_ref::<cowfs_types::Error>() {
        Some(e) => exit_code_for(e),
        None => ExitCode::from(1),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => report(&err),
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Format { devices, size, replicas, compression } => {
            let mut options = FsOptions::default();
            options.data_replicas = replicas;
            options.compression = compression.into();
            let opened = devices.iter().map(|p| Ok((open_device(p, size.as_deref())?, p.display().to_string()))).collect::<Result<Vec<_>>>()?;
            Filesystem::format(opened, options, None).context("formatting")?;
            println!("formatted {} device(s)", devices.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::ShowSuper { device } => {
            let dev = open_device(&device, None)?;
            let handle = cowfs_super::SuperHandle::open(dev).context("reading superblock")?;
            let sb = handle.superblock();
            println!("uuid: {}", sb.uuid_external);
            println!("members: {}", sb.members.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Fsck { devices } => {
            let fs = mount(&devices)?;
            let report = cowfs::bulk::run_fsck(&fs).context("fsck")?;
            println!("checked {} keys, {} error(s)", report.keys_checked, report.errors.len());
            for e in &report.errors {
                println!("  {:?} {:?}: {}", e.btree_id, e.position, e.detail);
            }
            Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::from(4) })
        }
        Command::Fs { cmd: FsCmd::Usage { devices } } => {
            let fs = mount(&devices)?;
            let usage = fs.fs_usage().context("fs usage")?;
            println!("total buckets: {}", usage.total_buckets);
            println!("used buckets: {}", usage.used_buckets);
            println!("bucket size (sectors): {}", usage.bucket_size_sectors);
            Ok(ExitCode::SUCCESS)
        }
        Command::Device { cmd } => device_command(cmd),
        Command::Data { cmd } => data_command(cmd),
        Command::Subvolume { cmd } => subvolume_command(cmd),
        Command::Migrate { devices, from } => {
            let fs = mount(&devices)?;
            cowfs::bulk::run_migrate(&fs, from, 0).context("migrate")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::MigrateSuperblock { devices } => {
            let _fs = mount(&devices)?;
            bail!(cowfs_types::Error::NotImplemented("migrate-superblock"))
        }
        Command::Dump { devices } => {
            let fs = mount(&devices)?;
            for id in cowfs_types::BtreeId::ALL {
                let tree = fs.engine().tree(id);
                for key in tree.iter_init(cowfs_types::Position::POS_MIN) {
                    println!("{id:?} {:?} {:?}", key.position, key.value);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::List { devices } => {
            let fs = mount(&devices)?;
            println!("uuid: {}", fs.uuid());
            Ok(ExitCode::SUCCESS)
        }
        Command::ListJournal { devices } => {
            let _fs = mount(&devices)?;
            bail!(cowfs_types::Error::NotImplemented("list_journal"))
        }
        Command::SetPassphrase { devices } => {
            let _fs = mount(&devices)?;
            bail!(cowfs_types::Error::NotImplemented("set-passphrase"))
        }
        Command::RemovePassphrase { devices } => {
            let _fs = mount(&devices)?;
            bail!(cowfs_types::Error::NotImplemented("remove-passphrase"))
        }
        Command::Unlock { devices } => {
            let _fs = mount(&devices)?;
            bail!(cowfs_types::Error::NotImplemented("unlock"))
        }
        Command::Setattr { devices, inode, reinherit } => {
            let fs = mount(&devices)?;
            if reinherit {
                let visited = fs.reinherit_attrs(inode).context("setattr --reinherit")?;
                println!("reinherited onto {visited} inode(s)");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Fusemount { devices: _ } => {
            bail!(cowfs_types::Error::NotImplemented("fusemount (FUSE adapter is out of scope)"))
        }
        Command::Version => {
            println!("cowfs {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn device_command(cmd: DeviceCmd) -> Result<ExitCode> {
    match cmd {
        DeviceCmd::Add { devices, new_device } => {
            let _fs = mount(&devices)?;
            let _new = open_device(&new_device, None)?;
            bail!(cowfs_types::Error::NotImplemented("device add (requires rereplicate to populate the new device)"))
        }
        DeviceCmd::Remove { devices, idx, force } => {
            let fs = mount(&devices)?;
            let flags = if force { DiskFlags::FORCE } else { DiskFlags::empty() };
            fs.disk_remove(idx, flags).context("device remove")?;
            Ok(ExitCode::SUCCESS)
        }
        DeviceCmd::Online { devices, idx } => {
            let fs = mount(&devices)?;
            fs.disk_online(idx).context("device online")?;
            Ok(ExitCode::SUCCESS)
        }
        DeviceCmd::Offline { devices, idx, force } => {
            let fs = mount(&devices)?;
            let flags = if force { DiskFlags::FORCE } else { DiskFlags::empty() };
            fs.disk_offline(idx, flags).context("device offline")?;
            Ok(ExitCode::SUCCESS)
        }
        DeviceCmd::Evacuate { devices, idx } => {
            let fs = mount(&devices)?;
            fs.data(DataOp::Rereplicate, Range::default()).context("device evacuate")?;
            let _ = idx;
            Ok(ExitCode::SUCCESS)
        }
        DeviceCmd::SetState { devices, idx, state, force } => {
            let fs = mount(&devices)?;
            let flags = if force { DiskFlags::FORCE } else { DiskFlags::empty() };
            fs.disk_set_state(idx, state.into(), flags).context("device set-state")?;
            Ok(ExitCode::SUCCESS)
        }
        DeviceCmd::Resize { devices, idx, new_nbuckets } => {
            let fs = mount(&devices)?;
            fs.disk_resize(idx, new_nbuckets).context("device resize")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn data_command(cmd: DataCmd) -> Result<ExitCode> {
    let (devices, op) = match cmd {
        DataCmd::Rereplicate { devices } => (devices, DataOp::Rereplicate),
        DataCmd::Scrub { devices } => (devices, DataOp::Scrub),
        DataCmd::Job { devices } => (devices, DataOp::RewriteOldNodes),
    };
    let fs = mount(&devices)?;
    let progress = fs.data(op, Range::default()).context("data job")?;
    println!("keys visited: {}, keys moved: {}, done: {}", progress.keys_visited, progress.keys_moved, progress.done);
    Ok(ExitCode::SUCCESS)
}

fn subvolume_command(cmd: SubvolumeCmd) -> Result<ExitCode> {
    match cmd {
        SubvolumeCmd::Create { devices, inode } => {
            let fs = mount(&devices)?;
            let id = fs.subvolume_create(inode).context("subvolume create")?;
            println!("created subvolume {id}");
            Ok(ExitCode::SUCCESS)
        }
        SubvolumeCmd::Delete { devices, subvol_id } => {
            let fs = mount(&devices)?;
            fs.subvolume_destroy(subvol_id).context("subvolume delete")?;
            Ok(ExitCode::SUCCESS)
        }
        SubvolumeCmd::Snapshot { devices, src, dst_parent_inode } => {
            let fs = mount(&devices)?;
            let id = fs.subvolume_snapshot(src, dst_parent_inode, true).context("subvolume snapshot")?;
            println!("created snapshot subvolume {id}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
