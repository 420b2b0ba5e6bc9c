//! Partition table parsing.
//!
//! Parses the textual dump produced by the external partition tool
//! (`sgdisk --android-dump`). The dump comes straight off a user-supplied
//! disk, so the input is treated as hostile: malformed lines shrink the
//! result, they never abort the scan.
//!
//! Dump format, one record per line, whitespace-separated:
//!
//! ```text
//! DISK <mbr|gpt>
//! PART <index> <mbr type byte, hex>                  (MBR tables)
//! PART <index> <type GUID> <partition GUID>          (GPT tables)
//! ```

use tracing::warn;

/// GPT "basic data" partition type, the only GPT type published as a volume.
pub const GPT_BASIC_DATA: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";

/// MBR type bytes explicitly recognized as FAT variants.
const MBR_FAT_TYPES: [u8; 4] = [0x06, 0x0b, 0x0c, 0x0e];
/// MBR type byte shared by NTFS and exFAT.
const MBR_NTFS_EXFAT: u8 = 0x07;

/// Partition table kind reported by the dump tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableKind {
    #[default]
    Unknown,
    Mbr,
    Gpt,
}

/// Type discriminator of one partition record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionType {
    /// MBR one-byte type code.
    Mbr(u8),
    /// GPT type GUID and partition GUID.
    Gpt { type_guid: String, part_guid: String },
}

/// One partition surviving the dump parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    /// 1-based partition index, already validated against max minors.
    pub index: u32,
    pub ty: PartitionType,
}

impl PartitionRecord {
    /// Whether this partition becomes a managed volume.
    ///
    /// MBR type bytes are advisory at best in the wild, so every MBR
    /// partition is published even when the type byte is unrecognized. GPT
    /// types are authoritative and only basic-data partitions are surfaced;
    /// reserved and system partitions stay hidden. The asymmetry is policy,
    /// not an oversight.
    pub fn publishes_volume(&self) -> bool {
        match &self.ty {
            PartitionType::Mbr(ty) => {
                if !MBR_FAT_TYPES.contains(ty) && *ty != MBR_NTFS_EXFAT {
                    warn!("publishing partition {} with unrecognized mbr type {:#04x}", self.index, ty);
                }
                true
            }
            PartitionType::Gpt { type_guid, .. } => type_guid.eq_ignore_ascii_case(GPT_BASIC_DATA),
        }
    }
}

/// Parsed partition table.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    pub kind: TableKind,
    pub records: Vec<PartitionRecord>,
}

impl PartitionTable {
    /// Whether the whole-device fallback should run instead of per-partition
    /// volume creation.
    pub fn is_unknown(&self) -> bool {
        self.kind == TableKind::Unknown || self.records.is_empty()
    }
}

/// Parses dump output lines into a table description.
///
/// A partition index outside `[1, max_minors]` is dropped with a warning.
/// If no `DISK` line appeared, or no `PART` line survived filtering, the
/// kind is reported as [`TableKind::Unknown`] with an empty record set,
/// which signals the whole-device fallback.
pub fn parse<'a, I>(lines: I, max_minors: i32) -> PartitionTable
where
    I: IntoIterator<Item = &'a str>,
{
    let mut kind = TableKind::Unknown;
    let mut records = Vec::new();

    for line in lines {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else { continue };

        match head {
            "DISK" => {
                kind = match tokens.next() {
                    Some("mbr") => TableKind::Mbr,
                    Some("gpt") => TableKind::Gpt,
                    other => {
                        warn!("unrecognized partition table kind {:?}", other);
                        TableKind::Unknown
                    }
                };
            }
            "PART" => {
                let Some(index) = tokens.next().and_then(|t| t.parse::<i64>().ok()) else {
                    warn!("skipping PART line with unparseable index: {line}");
                    continue;
                };
                if index < 1 || index > max_minors as i64 {
                    warn!("ignoring partition {index} beyond max supported devices");
                    continue;
                }
                let index = index as u32;

                let ty = match kind {
                    TableKind::Mbr => {
                        let Some(ty) = tokens.next().and_then(|t| u8::from_str_radix(t, 16).ok())
                        else {
                            warn!("skipping mbr PART line with bad type byte: {line}");
                            continue;
                        };
                        PartitionType::Mbr(ty)
                    }
                    TableKind::Gpt => {
                        let (Some(type_guid), Some(part_guid)) = (tokens.next(), tokens.next())
                        else {
                            warn!("skipping gpt PART line with missing guids: {line}");
                            continue;
                        };
                        PartitionType::Gpt {
                            type_guid: type_guid.to_string(),
                            part_guid: part_guid.to_string(),
                        }
                    }
                    TableKind::Unknown => {
                        warn!("skipping PART line before any DISK line: {line}");
                        continue;
                    }
                };

                records.push(PartitionRecord { index, ty });
            }
            _ => {}
        }
    }

    if records.is_empty() {
        // No usable partition implies the table itself is unusable; report
        // unknown so the caller takes the whole-device fallback.
        return PartitionTable::default();
    }

    PartitionTable { kind, records }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(input: &str, max_minors: i32) -> PartitionTable {
        parse(input.lines(), max_minors)
    }

    #[test]
    fn test_mbr_single_partition() {
        let table = parse_str("DISK mbr\nPART 1 0b 00000000-0000-0000-0000-000000000000", 31);
        assert_eq!(table.kind, TableKind::Mbr);
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].index, 1);
        assert_eq!(table.records[0].ty, PartitionType::Mbr(0x0b));
        assert!(table.records[0].publishes_volume());
    }

    #[test]
    fn test_gpt_basic_data_only() {
        let dump = format!(
            "DISK gpt\nPART 1 {GPT_BASIC_DATA} 11111111-1111-1111-1111-111111111111\n\
             PART 2 21686148-6449-6E6F-744E-656564454649 22222222-2222-2222-2222-222222222222"
        );
        let table = parse_str(&dump, 31);
        assert_eq!(table.kind, TableKind::Gpt);
        assert_eq!(table.records.len(), 2);
        assert!(table.records[0].publishes_volume());
        assert!(!table.records[1].publishes_volume());
    }

    #[test]
    fn test_gpt_guid_case_insensitive() {
        let record = PartitionRecord {
            index: 1,
            ty: PartitionType::Gpt {
                type_guid: GPT_BASIC_DATA.to_ascii_lowercase(),
                part_guid: "x".into(),
            },
        };
        assert!(record.publishes_volume());
    }

    #[test]
    fn test_unrecognized_mbr_type_still_published() {
        let table = parse_str("DISK mbr\nPART 1 83", 31);
        assert!(table.records[0].publishes_volume());
    }

    #[test]
    fn test_index_bounds() {
        // Retained iff 1 <= index <= max_minors; parsing continues past drops.
        let table = parse_str("DISK mbr\nPART 0 0b\nPART 32 0b\nPART 31 0c\nPART -3 0b", 31);
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].index, 31);
    }

    #[test]
    fn test_empty_dump_is_unknown() {
        let table = parse_str("", 31);
        assert!(table.is_unknown());
        assert_eq!(table.kind, TableKind::Unknown);
        assert!(table.records.is_empty());
    }

    #[test]
    fn test_all_filtered_reports_unknown() {
        let table = parse_str("DISK mbr\nPART 99 0b", 31);
        assert!(table.is_unknown());
        assert_eq!(table.kind, TableKind::Unknown);
    }

    #[test]
    fn test_adversarial_lines_never_abort() {
        let dump = "DISK\nPART\nPART x y z\nDISK weird\nGARBAGE 1 2 3\nDISK mbr\nPART 2 0c\nPART 3";
        let table = parse_str(dump, 31);
        assert_eq!(table.kind, TableKind::Mbr);
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].index, 2);
    }

    #[test]
    fn test_part_before_disk_is_dropped() {
        let table = parse_str("PART 1 0b\nDISK mbr", 31);
        assert!(table.is_unknown());
    }
}
