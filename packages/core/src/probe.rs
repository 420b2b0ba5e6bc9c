//! Filesystem metadata probing via blkid.
//!
//! The device contents are untrusted; blkid either identifies a filesystem
//! or it doesn't, and "doesn't" is an ordinary outcome (it drives the
//! give-up path of the superfloppy fallback).

use std::ffi::OsStr;
use std::path::Path;

use crate::error::{Error, ProbeSnafu, Result};
use crate::executor;

/// Filesystem identity read off a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsMetadata {
    pub fstype: String,
    pub uuid: String,
    pub label: String,
}

/// Probes `dev` with blkid and parses its `-o export` output.
///
/// Fails when blkid cannot be run, exits nonzero (nothing recognizable on
/// the device), or reports no TYPE.
pub fn read_metadata(blkid: &Path, dev: &Path) -> Result<FsMetadata> {
    let lines = executor::run_for_lines(
        blkid,
        &[
            OsStr::new("-c"),
            OsStr::new("/dev/null"),
            OsStr::new("-o"),
            OsStr::new("export"),
            dev.as_os_str(),
        ],
    )
    .map_err(|e| match e {
        Error::CommandExit { code, .. } => ProbeSnafu {
            path: dev,
            message: format!("blkid exited with code {code}"),
        }
        .build(),
        other => other,
    })?;

    let metadata = parse_export(lines.iter().map(String::as_str));
    if metadata.fstype.is_empty() {
        return ProbeSnafu {
            path: dev,
            message: "no filesystem type detected".to_string(),
        }
        .fail();
    }
    Ok(metadata)
}

/// Parses `blkid -o export` KEY=VALUE lines.
fn parse_export<'a, I>(lines: I) -> FsMetadata
where
    I: IntoIterator<Item = &'a str>,
{
    let mut metadata = FsMetadata::default();
    for line in lines {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "TYPE" => metadata.fstype = value.to_string(),
            "UUID" => metadata.uuid = value.to_string(),
            "LABEL" => metadata.label = value.to_string(),
            _ => {}
        }
    }
    metadata
}
