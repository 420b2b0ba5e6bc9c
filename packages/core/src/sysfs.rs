//! Sysfs lookups for disk metadata and physical device resolution.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::device::DeviceId;
use crate::error::{IoResultExt, Result, SysfsParseSnafu};

/// Known MMC manufacturer ids, mapped to the name silk-screened on the card.
/// White-label ids are deliberately absent; an unknown id yields no label
/// rather than a misleading one.
const MMC_MANFIDS: [(u32, &str); 4] = [
    (0x000003, "SanDisk"),
    (0x00001b, "Samsung"),
    (0x000028, "Lexar"),
    (0x000074, "Transcend"),
];

fn read_trimmed(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path).sysfs_context(path)?.trim().to_string())
}

/// Reads the SCSI vendor string, used as the disk label.
pub fn scsi_vendor(sys_path: &Path) -> Result<String> {
    read_trimmed(&sys_path.join("device/vendor"))
}

/// Reads the 24-bit MMC manufacturer id and maps it to a vendor name.
///
/// Returns an empty label for ids not in the table; only a failure to read
/// or parse the attribute is an error.
pub fn mmc_label(sys_path: &Path) -> Result<String> {
    let path = sys_path.join("device/manfid");
    let raw = read_trimmed(&path)?;
    let manfid = u32::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|_| {
        SysfsParseSnafu {
            path: &path,
            message: format!("bad manfid '{raw}'"),
        }
        .build()
    })?;
    Ok(MMC_MANFIDS
        .iter()
        .find(|(id, _)| *id == manfid)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_default())
}

/// Kernel block device name for a sysfs path (the path basename).
pub fn block_device_name(sys_path: &Path) -> Option<String> {
    sys_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Detects composite devices where the kernel already exposes one physical
/// node without sub-minor partitions.
///
/// A block device directory normally grows one `<name><N>` subdirectory per
/// kernel-enumerated partition. When none exist but the physical node does,
/// the device itself is the addressable unit and is published as a single
/// volume; partition enumeration is abandoned for it.
pub fn just_physical_device(sys_path: &Path) -> Option<String> {
    let name = block_device_name(sys_path)?;
    let entries = fs::read_dir(sys_path).ok()?;
    for entry in entries.flatten() {
        let child = entry.file_name().to_string_lossy().into_owned();
        if child.starts_with(&name) && child.len() > name.len() {
            return None;
        }
    }
    if Path::new("/dev").join(&name).exists() {
        debug!("{} exposes a single physical node", sys_path.display());
        Some(name)
    } else {
        None
    }
}

/// Device node path for a logical partition of a physical device.
///
/// Kernel naming: `sda` grows `sda16`, while names ending in a digit
/// (`mmcblk0`, `nvme0n1`) grow a `p` separator (`mmcblk0p16`).
pub fn logical_partition_path(physical_name: &str, index: u32) -> PathBuf {
    let sep = if physical_name.ends_with(|c: char| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    PathBuf::from(format!("/dev/{physical_name}{sep}{index}"))
}

/// Resolves the true device id of a partition indexed above 15.
///
/// The synthesized minor-offset scheme only holds for the first 15
/// partitions; beyond that the real node must be looked up. The lookup may
/// legitimately fail (`None`), which leaves the synthesized id in use.
pub fn physical_partition_device(sys_path: &Path, index: u32) -> Option<DeviceId> {
    if index <= 15 {
        return None;
    }
    let name = block_device_name(sys_path)?;
    let node = logical_partition_path(&name, index);
    let st = nix::sys::stat::stat(&node).ok()?;
    Some(DeviceId::from_dev(st.st_rdev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sysfs_disk(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::create_dir_all(path.join("device")).unwrap();
        path
    }

    #[test]
    fn test_scsi_vendor_trimmed() {
        let dir = TempDir::new().unwrap();
        let sys = sysfs_disk(&dir, "sda");
        let mut f = fs::File::create(sys.join("device/vendor")).unwrap();
        writeln!(f, "Kingston  ").unwrap();
        assert_eq!(scsi_vendor(&sys).unwrap(), "Kingston");
    }

    #[test]
    fn test_scsi_vendor_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let sys = sysfs_disk(&dir, "sda");
        assert!(scsi_vendor(&sys).is_err());
    }

    #[test]
    fn test_mmc_label_known_and_unknown() {
        let dir = TempDir::new().unwrap();
        let sys = sysfs_disk(&dir, "mmcblk0");
        fs::write(sys.join("device/manfid"), "0x000003\n").unwrap();
        assert_eq!(mmc_label(&sys).unwrap(), "SanDisk");

        fs::write(sys.join("device/manfid"), "0xbeef00\n").unwrap();
        assert_eq!(mmc_label(&sys).unwrap(), "");

        fs::write(sys.join("device/manfid"), "not-hex\n").unwrap();
        assert!(mmc_label(&sys).is_err());
    }

    #[test]
    fn test_logical_partition_path_naming() {
        assert_eq!(
            logical_partition_path("sda", 16),
            PathBuf::from("/dev/sda16")
        );
        assert_eq!(
            logical_partition_path("mmcblk0", 17),
            PathBuf::from("/dev/mmcblk0p17")
        );
    }

    #[test]
    fn test_physical_partition_device_low_index_skipped() {
        assert_eq!(physical_partition_device(Path::new("/sys/block/sda"), 3), None);
    }

    #[test]
    fn test_just_physical_device_with_partitions() {
        let dir = TempDir::new().unwrap();
        let sys = sysfs_disk(&dir, "sda");
        fs::create_dir_all(sys.join("sda1")).unwrap();
        assert_eq!(just_physical_device(&sys), None);
    }
}
