//! Fixed parameters of the tool and the [`Config`] value that carries them
//! into the platform layer.

use crate::device::DeviceIdentity;
use std::path::PathBuf;
use std::time::Duration;

/// USB identity of a micro:bit's DAPLink interface.
pub const MICROBIT: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x0d28,
    product_id: 0x0204,
};

/// Where the board's mass-storage volume is mounted.
pub const MOUNT_POINT: &str = "/mnt/microbit";

/// How often the presence monitor samples the device tree.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Filesystem types tried, in order, when mounting the board.
/// DAPLink exposes a small FAT volume.
pub const FILESYSTEMS: &[&str] = &["vfat", "msdos"];

/// Runtime configuration for the core.
///
/// `Default` yields the production values. The other fields exist so the
/// library can be pointed at a scratch sysfs tree or mount point in tests.
#[derive(Clone, Debug)]
pub struct Config {
    pub identity: DeviceIdentity,
    pub mount_point: PathBuf,
    pub filesystems: Vec<String>,
    /// Root of the sysfs tree, normally `/sys`.
    pub sysfs_root: PathBuf,
    /// Directory block device nodes live in, normally `/dev`.
    pub dev_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: MICROBIT,
            mount_point: PathBuf::from(MOUNT_POINT),
            filesystems: FILESYSTEMS.iter().map(|fs| fs.to_string()).collect(),
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}
