use crate::config::Config;
use crate::device::{DeviceIdentity, DeviceProbe, DeviceState};
use crate::error::{MountFailure, UnmountFailure};
use crate::mount::Mounter;
use crate::transfer::FreeSpace;
use anyhow::{Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Helper to read a small attribute file from sysfs.
fn read_sys_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Walks up from a block device's `device` link to the USB device node that
/// carries `idVendor`/`idProduct`, and compares them against `identity`.
fn has_usb_identity(device_dir: &Path, sysfs_root: &Path, identity: &DeviceIdentity) -> bool {
    let Ok(real) = fs::canonicalize(device_dir) else {
        return false;
    };
    let root = fs::canonicalize(sysfs_root).unwrap_or_else(|_| sysfs_root.to_path_buf());

    for dir in real.ancestors() {
        if dir == root || !dir.starts_with(&root) {
            break;
        }
        let vendor = read_sys_file(&dir.join("idVendor"));
        let product = read_sys_file(&dir.join("idProduct"));
        if let (Ok(vendor), Ok(product)) = (vendor, product) {
            // The closest USB device decides; don't keep climbing into hubs.
            return identity.matches(&vendor, &product);
        }
    }
    false
}

/// Picks the first partition of `disk`, if it has any.
fn first_partition(block_dir: &Path, disk: &str) -> Option<String> {
    let mut partitions: Vec<String> = fs::read_dir(block_dir.join(disk))
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| {
            name.starts_with(disk) && block_dir.join(disk).join(name).join("partition").exists()
        })
        .collect();
    partitions.sort();
    partitions.into_iter().next()
}

/// Finds block devices belonging to a USB device with the configured
/// identity, by walking `<sysfs>/block`.
///
/// The filtering logic is as follows:
/// 1.  Skip loop and RAM disks.
/// 2.  Resolve `<sysfs>/block/<disk>/device` and look for the nearest
///     ancestor exposing `idVendor`/`idProduct`; it must match the identity.
/// 3.  Skip disks whose `size` is zero, which is what a board in maintenance
///     mode or without media reports.
/// 4.  Prefer the first partition over the whole disk.
///
/// Results are sorted by disk name so the choice among several boards is at
/// least stable between polls.
pub fn find_matching_block_devices(config: &Config) -> Result<Vec<PathBuf>> {
    let block_dir = config.sysfs_root.join("block");
    let mut disks: Vec<String> = fs::read_dir(&block_dir)
        .with_context(|| format!("reading {}", block_dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with("loop") && !name.starts_with("ram"))
        .collect();
    disks.sort();

    let mut found = Vec::new();
    for disk in disks {
        if !has_usb_identity(
            &block_dir.join(&disk).join("device"),
            &config.sysfs_root,
            &config.identity,
        ) {
            continue;
        }

        let size_sectors = read_sys_file(&block_dir.join(&disk).join("size"))
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if size_sectors == 0 {
            debug!("Skipping {disk}: reports zero size");
            continue;
        }

        let node = first_partition(&block_dir, &disk).unwrap_or(disk);
        found.push(config.dev_root.join(node));
    }

    Ok(found)
}

/// [`DeviceProbe`] backed by sysfs.
pub struct SysfsProbe {
    config: Config,
}

impl SysfsProbe {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl DeviceProbe for SysfsProbe {
    fn probe(&self) -> DeviceState {
        match find_matching_block_devices(&self.config) {
            Ok(devices) => {
                if devices.len() > 1 {
                    debug!("Several boards attached, using the first: {devices:?}");
                }
                match devices.into_iter().next() {
                    Some(path) => DeviceState::Present(path),
                    None => DeviceState::Absent,
                }
            }
            Err(e) => {
                debug!("Device enumeration failed, treating as absent: {e:#}");
                DeviceState::Absent
            }
        }
    }
}

/// [`Mounter`] that calls `mount(2)`/`umount2(2)` directly.
pub struct SystemMounter {
    filesystems: Vec<String>,
}

impl SystemMounter {
    pub fn new(config: &Config) -> Self {
        Self {
            filesystems: config.filesystems.clone(),
        }
    }
}

fn classify_mount_errno(errno: Errno) -> MountFailure {
    match errno {
        Errno::EBUSY => MountFailure::Busy,
        Errno::EINVAL | Errno::ENODEV | Errno::ENOTBLK | Errno::ENXIO => {
            MountFailure::UnsupportedFilesystem
        }
        Errno::EPERM | Errno::EACCES | Errno::EROFS => MountFailure::PermissionDenied,
        _ => MountFailure::MountPointUnavailable,
    }
}

fn classify_unmount_errno(errno: Errno) -> UnmountFailure {
    match errno {
        Errno::EBUSY => UnmountFailure::Busy,
        Errno::EPERM | Errno::EACCES => UnmountFailure::PermissionDenied,
        other => UnmountFailure::Os(other.desc().to_string()),
    }
}

impl Mounter for SystemMounter {
    fn mount(&self, source: &Path, target: &Path) -> Result<(), MountFailure> {
        let flags = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;

        for fstype in &self.filesystems {
            let result =
                nix::mount::mount(Some(source), target, Some(fstype.as_str()), flags, None::<&str>);
            match result {
                Ok(()) => return Ok(()),
                // Already mounted there by someone else.
                Err(Errno::EBUSY) if self.mounted_source(target).as_deref() == Some(source) => {
                    return Ok(());
                }
                // Wrong filesystem type; try the next one.
                Err(Errno::EINVAL) | Err(Errno::ENODEV) => {
                    debug!("{} is not {fstype}", source.display());
                }
                Err(errno) => {
                    warn!("mount {} failed: {errno}", source.display());
                    return Err(classify_mount_errno(errno));
                }
            }
        }
        Err(MountFailure::UnsupportedFilesystem)
    }

    fn unmount(&self, target: &Path) -> Result<(), UnmountFailure> {
        match nix::mount::umount2(target, MntFlags::empty()) {
            Ok(()) => Ok(()),
            // Not a mount point, or the directory is gone: nothing to undo.
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
            Err(errno) => Err(classify_unmount_errno(errno)),
        }
    }

    fn mounted_source(&self, target: &Path) -> Option<PathBuf> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .iter()
            .find(|disk| disk.mount_point() == target)
            .map(|disk| PathBuf::from("/dev/").join(disk.name()))
    }
}

/// [`FreeSpace`] using `statvfs(3)`.
pub struct StatvfsSpace;

impl FreeSpace for StatvfsSpace {
    #[allow(clippy::unnecessary_cast)]
    fn available_bytes(&self, mount_point: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(mount_point).map_err(io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    /// Builds a sysfs-shaped tree: a USB device with the given identity, a
    /// SCSI disk below it, and the `block/<disk>` entry linking to it.
    struct FakeSysfs {
        dir: tempfile::TempDir,
    }

    impl FakeSysfs {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("block")).unwrap();
            Self { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn add_disk(&self, disk: &str, vendor: &str, product: &str, sectors: u64) {
            let usb = self.root().join("devices/usb1").join(format!("1-{disk}"));
            let scsi = usb.join("1-1:1.0/host0/target0:0:0/0:0:0:0");
            fs::create_dir_all(&scsi).unwrap();
            fs::write(usb.join("idVendor"), format!("{vendor}\n")).unwrap();
            fs::write(usb.join("idProduct"), format!("{product}\n")).unwrap();

            let block = self.root().join("block").join(disk);
            fs::create_dir_all(&block).unwrap();
            fs::write(block.join("size"), format!("{sectors}\n")).unwrap();
            symlink(&scsi, block.join("device")).unwrap();
        }

        fn add_partition(&self, disk: &str, partition: &str) {
            let dir = self.root().join("block").join(disk).join(partition);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("partition"), "1\n").unwrap();
        }

        fn config(&self) -> Config {
            Config {
                sysfs_root: self.root().to_path_buf(),
                ..Config::default()
            }
        }

        fn probe(&self) -> DeviceState {
            SysfsProbe::new(self.config()).probe()
        }
    }

    #[test]
    fn finds_the_board_by_usb_identity() {
        let sysfs = FakeSysfs::new();
        sysfs.add_disk("sda", "8087", "0024", 1000);
        sysfs.add_disk("sdb", "0d28", "0204", 16384);
        assert_eq!(sysfs.probe(), DeviceState::Present("/dev/sdb".into()));
    }

    #[test]
    fn prefers_the_first_partition() {
        let sysfs = FakeSysfs::new();
        sysfs.add_disk("sdc", "0d28", "0204", 16384);
        sysfs.add_partition("sdc", "sdc2");
        sysfs.add_partition("sdc", "sdc1");
        // Attribute directories that aren't partitions are ignored.
        fs::create_dir_all(sysfs.root().join("block/sdc/queue")).unwrap();
        assert_eq!(sysfs.probe(), DeviceState::Present("/dev/sdc1".into()));
    }

    #[test]
    fn zero_sized_board_is_absent() {
        let sysfs = FakeSysfs::new();
        sysfs.add_disk("sdb", "0d28", "0204", 0);
        assert_eq!(sysfs.probe(), DeviceState::Absent);
    }

    #[test]
    fn first_of_several_boards_wins() {
        let sysfs = FakeSysfs::new();
        sysfs.add_disk("sdd", "0d28", "0204", 16384);
        sysfs.add_disk("sdb", "0d28", "0204", 16384);
        let found = find_matching_block_devices(&sysfs.config()).unwrap();
        assert_eq!(found, vec![PathBuf::from("/dev/sdb"), PathBuf::from("/dev/sdd")]);
        assert_eq!(sysfs.probe(), DeviceState::Present("/dev/sdb".into()));
    }

    #[test]
    fn enumeration_failure_is_absence() {
        let config = Config {
            sysfs_root: PathBuf::from("/nonexistent/sysfs"),
            ..Config::default()
        };
        assert!(find_matching_block_devices(&config).is_err());
        assert_eq!(SysfsProbe::new(config).probe(), DeviceState::Absent);
    }

    #[test]
    fn loop_devices_are_ignored() {
        let sysfs = FakeSysfs::new();
        sysfs.add_disk("loop0", "0d28", "0204", 16384);
        assert_eq!(sysfs.probe(), DeviceState::Absent);
    }

    #[test]
    fn errno_classification() {
        assert_eq!(classify_mount_errno(Errno::EBUSY), MountFailure::Busy);
        assert_eq!(
            classify_mount_errno(Errno::EINVAL),
            MountFailure::UnsupportedFilesystem
        );
        assert_eq!(
            classify_mount_errno(Errno::EPERM),
            MountFailure::PermissionDenied
        );
        assert_eq!(
            classify_mount_errno(Errno::ENOTDIR),
            MountFailure::MountPointUnavailable
        );
        assert_eq!(classify_unmount_errno(Errno::EBUSY), UnmountFailure::Busy);
    }

    #[test]
    fn statvfs_reports_space_for_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StatvfsSpace.available_bytes(dir.path()).is_ok());
        assert!(StatvfsSpace.available_bytes(&dir.path().join("missing")).is_err());
    }
}
