//! Purpose: Centralize on-disk format versioning for snapshots and index payloads.
//! Exports: format version constants, `snapshot_version_error`, `payload_version_error`.
//! Role: Shared policy for gating compatibility across load and open paths.
//! Invariants: Version lists are additive; bump only for incompatible on-disk changes.

use crate::core::error::{Error, ErrorKind};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
pub const SUPPORTED_SNAPSHOT_FORMAT_VERSIONS: &[u32] = &[SNAPSHOT_FORMAT_VERSION];

pub const PAYLOAD_FORMAT_VERSION: u32 = 1;
pub const SUPPORTED_PAYLOAD_FORMAT_VERSIONS: &[u32] = &[PAYLOAD_FORMAT_VERSION];

pub fn snapshot_version_error(detected: u32) -> Error {
    version_error("snapshot", detected, SUPPORTED_SNAPSHOT_FORMAT_VERSIONS)
}

pub fn payload_version_error(detected: u32) -> Error {
    version_error("index payload", detected, SUPPORTED_PAYLOAD_FORMAT_VERSIONS)
}

fn version_error(what: &str, detected: u32, supported: &[u32]) -> Error {
    let supported = supported
        .iter()
        .map(|version| version.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Error::new(ErrorKind::CorruptState)
        .with_message(format!(
            "unsupported {what} format version {detected} (supported: {supported})"
        ))
        .with_hint("Upgrade shardkeep, or discard the file and rebuild the component.")
}
