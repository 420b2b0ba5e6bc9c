//! Block device classification by kernel major number.
//!
//! The major number decides how a disk is labeled, how many partition
//! sub-devices it can expose, and whether it is supported at all. Virtio
//! block devices get no fixed major from the kernel; they are recognized
//! heuristically by the experimental major range, and only when the process
//! is known to run inside an emulator, so the heuristic can never fire on
//! real hardware.

use std::path::Path;

use crate::error::{IoResultExt, Result, SysfsParseSnafu, UnsupportedMajorSnafu};

/// Optical drives (sr).
pub const MAJOR_BLOCK_SR: u32 = 11;
/// MMC/SD controllers.
pub const MAJOR_BLOCK_MMC: u32 = 179;
/// Reserved "LOCAL/EXPERIMENTAL USE" block major range.
pub const MAJOR_BLOCK_EXPERIMENTAL_MIN: u32 = 240;
pub const MAJOR_BLOCK_EXPERIMENTAL_MAX: u32 = 254;

/// SCSI disk majors, both classic ranges.
const MAJOR_BLOCK_SCSI: [u32; 16] = [
    8, 65, 66, 67, 68, 69, 70, 71, 128, 129, 130, 131, 132, 133, 134, 135,
];

/// Per Documentation/devices.txt the SCSI partition count is static.
pub const SCSI_MAX_MINORS: i32 = 31;
/// virtio_blk reserves 4 bits for the partition index, so 2^4 - 1.
pub const VIRTIO_MAX_MINORS: i32 = 15;

/// The device classes this daemon knows how to manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Optical media (CD/DVD); whole-disk, no partition concept.
    Optical,
    /// SCSI-attached disks, including USB mass storage.
    Scsi,
    /// MMC/SD cards.
    Mmc,
    /// virtio-blk devices inside an emulator.
    Virtio,
}

/// Classifies a block device by its major number.
///
/// Returns [`Error::UnsupportedMajor`](crate::Error::UnsupportedMajor) for
/// anything outside the known classes; such disks stay unusable and no
/// partition scan is ever attempted for them.
pub fn classify(major: u32, is_emulator: bool) -> Result<DeviceClass> {
    if major == MAJOR_BLOCK_SR {
        return Ok(DeviceClass::Optical);
    }
    if MAJOR_BLOCK_SCSI.contains(&major) {
        return Ok(DeviceClass::Scsi);
    }
    if major == MAJOR_BLOCK_MMC {
        return Ok(DeviceClass::Mmc);
    }
    if is_virtio_blk(major, is_emulator) {
        return Ok(DeviceClass::Virtio);
    }
    UnsupportedMajorSnafu { major }.fail()
}

/// Recognizes virtio-blk devices.
///
/// The virtio-blk driver relies on the kernel to assign a major from the
/// experimental range instead of reserving one, so range membership alone
/// would also match genuine experimental hardware. Requiring the emulator
/// fact keeps the heuristic off real devices.
fn is_virtio_blk(major: u32, is_emulator: bool) -> bool {
    is_emulator && (MAJOR_BLOCK_EXPERIMENTAL_MIN..=MAJOR_BLOCK_EXPERIMENTAL_MAX).contains(&major)
}

/// Maximum number of partition sub-devices for a device major.
///
/// For MMC the count is a dynamic module parameter; failing to read it is an
/// error (the disk's capacity cannot be determined), not a panic. Optical
/// media have no partition concept and report unsupported here.
pub fn max_minors(major: u32, is_emulator: bool, mmc_param: &Path) -> Result<i32> {
    match classify(major, is_emulator)? {
        DeviceClass::Scsi => Ok(SCSI_MAX_MINORS),
        DeviceClass::Mmc => {
            let raw = std::fs::read_to_string(mmc_param).sysfs_context(mmc_param)?;
            raw.trim().parse::<i32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                SysfsParseSnafu {
                    path: mmc_param,
                    message: format!("bad perdev_minors value '{}'", raw.trim()),
                }
                .build()
            })
        }
        DeviceClass::Virtio => Ok(VIRTIO_MAX_MINORS),
        DeviceClass::Optical => UnsupportedMajorSnafu { major }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_classify_known_majors() {
        assert_eq!(classify(11, false).unwrap(), DeviceClass::Optical);
        assert_eq!(classify(8, false).unwrap(), DeviceClass::Scsi);
        assert_eq!(classify(135, false).unwrap(), DeviceClass::Scsi);
        assert_eq!(classify(179, false).unwrap(), DeviceClass::Mmc);
        assert!(classify(42, false).is_err());
    }

    #[test]
    fn test_experimental_range_needs_emulator() {
        // Virtio class iff the emulator flag is set, over the whole range.
        for major in MAJOR_BLOCK_EXPERIMENTAL_MIN..=MAJOR_BLOCK_EXPERIMENTAL_MAX {
            assert_eq!(classify(major, true).unwrap(), DeviceClass::Virtio);
            assert!(classify(major, false).is_err());
        }
        assert!(classify(MAJOR_BLOCK_EXPERIMENTAL_MIN - 1, true).is_err());
        assert!(classify(MAJOR_BLOCK_EXPERIMENTAL_MAX + 1, true).is_err());
    }

    #[test]
    fn test_static_max_minors() {
        let unused = Path::new("/nonexistent");
        assert_eq!(max_minors(8, false, unused).unwrap(), 31);
        assert_eq!(max_minors(253, true, unused).unwrap(), 15);
        assert!(max_minors(11, false, unused).is_err());
        assert!(max_minors(42, false, unused).is_err());
    }

    #[test]
    fn test_mmc_max_minors_from_param() {
        let mut param = tempfile::NamedTempFile::new().unwrap();
        writeln!(param, "16").unwrap();
        assert_eq!(max_minors(179, false, param.path()).unwrap(), 16);
    }

    #[test]
    fn test_mmc_max_minors_read_failure() {
        assert!(max_minors(179, false, Path::new("/nonexistent/perdev_minors")).is_err());
    }

    #[test]
    fn test_mmc_max_minors_garbage() {
        let mut param = tempfile::NamedTempFile::new().unwrap();
        writeln!(param, "banana").unwrap();
        assert!(max_minors(179, false, param.path()).is_err());
    }
}
