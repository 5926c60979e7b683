//! Mount table lookups for the internal partition.

use livegate_core::error::LivegateResult;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable pointing at an alternative mount table.
pub const MOUNTS_OVERRIDE_ENV: &str = "LIVEGATE_MOUNTS_PATH";

/// Whether something is mounted exactly at `mountpoint`.
pub fn is_mounted(mountpoint: &Path) -> LivegateResult<bool> {
    is_mounted_in(&mount_table_path(), mountpoint)
}

/// Mount table to consult, honouring [`MOUNTS_OVERRIDE_ENV`].
pub fn mount_table_path() -> PathBuf {
    env::var_os(MOUNTS_OVERRIDE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/proc/mounts"))
}

pub(crate) fn is_mounted_in(table: &Path, mountpoint: &Path) -> LivegateResult<bool> {
    let contents = fs::read_to_string(table)?;
    let found = mountpoints(&contents).any(|mounted| mounted == mountpoint);
    Ok(found)
}

fn mountpoints(table: &str) -> impl Iterator<Item = PathBuf> + '_ {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
}

/// Decode the octal escapes (`\040` for a space, ...) used in mount tables.
fn unescape_mount_field(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    output.push(byte);
                    index += 4;
                    continue;
                }
            }
        }
        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
