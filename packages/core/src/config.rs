//! Managed device source configuration.
//!
//! The daemon only adopts block devices named by its configuration file.
//! One source per line:
//!
//! ```text
//! # sysfs-pattern            nickname   [adoptable] [default_primary]
//! devices/*/usb*/block/sd*   usb_disk   adoptable
//! devices/*/mmc_host*/block/mmcblk*  sdcard
//! ```
//!
//! Patterns match kernel event paths with `*`/`?` wildcards. Comments and
//! blank lines are skipped; malformed lines are parse errors.

use std::fs;
use std::path::Path;

use crate::device::{FLAG_ADOPTABLE, FLAG_DEFAULT_PRIMARY};
use crate::error::{ConfigParseSnafu, IoResultExt, Result};

/// Default configuration path.
pub const CONFIG_PATH: &str = "/etc/mediad.conf";

/// One configured source of managed disks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSource {
    /// Wildcard pattern matched against kernel event paths.
    pub sys_pattern: String,
    /// Human-readable nickname handed to matching disks.
    pub nickname: String,
    /// Flag bits handed to matching disks.
    pub flags: u32,
}

impl DiskSource {
    pub fn new(sys_pattern: impl Into<String>, nickname: impl Into<String>, flags: u32) -> Self {
        Self {
            sys_pattern: sys_pattern.into(),
            nickname: nickname.into(),
            flags,
        }
    }

    /// Whether a kernel event path belongs to this source.
    pub fn matches(&self, event_path: &str) -> bool {
        wildcard_match(&self.sys_pattern, event_path.trim_start_matches('/'))
    }

    /// Parses a single config line. Returns `None` for comments and blanks.
    pub fn from_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let (Some(sys_pattern), Some(nickname)) = (parts.next(), parts.next()) else {
            return ConfigParseSnafu {
                message: format!("expected '<pattern> <nickname> [flags...]', got '{line}'"),
            }
            .fail();
        };

        let mut flags = 0;
        for token in parts {
            flags |= match token {
                "adoptable" => FLAG_ADOPTABLE,
                "default_primary" => FLAG_DEFAULT_PRIMARY,
                other => {
                    return ConfigParseSnafu {
                        message: format!("unknown flag '{other}' in '{line}'"),
                    }
                    .fail();
                }
            };
        }

        Ok(Some(Self::new(sys_pattern, nickname, flags)))
    }
}

/// Reads and parses the configuration file.
pub fn parse_config(path: &Path) -> Result<Vec<DiskSource>> {
    let content = fs::read_to_string(path).config_context(path)?;
    let mut sources = Vec::new();
    for line in content.lines() {
        if let Some(source) = DiskSource::from_line(line)? {
            sources.push(source);
        }
    }
    Ok(sources)
}

/// fnmatch-style matching with `*` (any run) and `?` (any one char).
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == text[t] || pattern[p] == '?') {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("devices/*/block/sd*", "devices/pci0/usb1/block/sda"));
        assert!(wildcard_match("*", "anything/at/all"));
        assert!(wildcard_match("devices/mmc?", "devices/mmc0"));
        assert!(!wildcard_match("devices/mmc?", "devices/mmc10"));
        assert!(!wildcard_match("devices/*/block/sd*", "devices/pci0/usb1/block/mmcblk0"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("exact", "exactly"));
    }

    #[test]
    fn test_from_line() {
        let source = DiskSource::from_line("devices/*/block/sd*  usb_disk  adoptable")
            .unwrap()
            .unwrap();
        assert_eq!(source.nickname, "usb_disk");
        assert_eq!(source.flags, FLAG_ADOPTABLE);

        let source = DiskSource::from_line("devices/* sdcard adoptable default_primary")
            .unwrap()
            .unwrap();
        assert_eq!(source.flags, FLAG_ADOPTABLE | FLAG_DEFAULT_PRIMARY);

        assert!(DiskSource::from_line("# comment").unwrap().is_none());
        assert!(DiskSource::from_line("   ").unwrap().is_none());
        assert!(DiskSource::from_line("lonely-pattern").is_err());
        assert!(DiskSource::from_line("pattern nick bogus_flag").is_err());
    }

    #[test]
    fn test_matches_strips_leading_slash() {
        let source = DiskSource::new("devices/*/block/sd*", "usb", 0);
        assert!(source.matches("/devices/pci0/usb1/block/sda"));
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# managed sources").unwrap();
        writeln!(file, "devices/*/usb*/block/sd* usb_disk adoptable").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "devices/*/block/mmcblk* sdcard").unwrap();

        let sources = parse_config(file.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].nickname, "usb_disk");
        assert_eq!(sources[1].flags, 0);
    }

    #[test]
    fn test_parse_config_missing_file() {
        assert!(parse_config(Path::new("/nonexistent/mediad.conf")).is_err());
    }
}
