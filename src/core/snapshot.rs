//! Purpose: Encode, write, and read the metadata snapshot of a single component.
//! Exports: `SnapshotEnvelope`, `encode`, `decode`, `write_atomic`, `read`.
//! Role: Snapshot boundary between component state structs and bytes on disk.
//! Invariants: A snapshot is replaced by rename only after the new bytes are synced.
//! Invariants: A failed write never leaves a partial file at the final path.
//! Invariants: Decoding verifies version, kind, and checksum before touching state.
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{
    SNAPSHOT_FORMAT_VERSION, SUPPORTED_SNAPSHOT_FORMAT_VERSIONS, snapshot_version_error,
};
use crate::core::workspace::Identity;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotEnvelope {
    pub format_version: u32,
    pub kind: String,
    pub name: String,
    pub shard_id: Option<u32>,
    pub saved_at: String,
    pub checksum: String,
    pub state: Value,
}

pub fn encode<T: Serialize>(identity: &Identity, kind: &str, state: &T) -> Result<Vec<u8>, Error> {
    let state = serde_json::to_value(state).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode component state")
            .with_source(err)
    })?;
    let envelope = SnapshotEnvelope {
        format_version: SNAPSHOT_FORMAT_VERSION,
        kind: kind.to_string(),
        name: identity.name().to_string(),
        shard_id: identity.shard_id(),
        saved_at: now_rfc3339(),
        checksum: checksum(&state)?,
        state,
    };
    serde_json::to_vec_pretty(&envelope).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode snapshot envelope")
            .with_source(err)
    })
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], kind: &str, path: &Path) -> Result<T, Error> {
    let corrupt = |message: &str| {
        Error::new(ErrorKind::CorruptState)
            .with_message(message.to_string())
            .with_path(path)
    };
    let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)
        .map_err(|err| corrupt("snapshot is not a valid envelope").with_source(err))?;
    if !SUPPORTED_SNAPSHOT_FORMAT_VERSIONS.contains(&envelope.format_version) {
        return Err(snapshot_version_error(envelope.format_version).with_path(path));
    }
    if envelope.kind != kind {
        return Err(corrupt(&format!(
            "snapshot kind {:?} does not match component kind {kind:?}",
            envelope.kind
        )));
    }
    if checksum(&envelope.state)? != envelope.checksum {
        return Err(corrupt("snapshot checksum mismatch"));
    }
    serde_json::from_value(envelope.state)
        .map_err(|err| corrupt("snapshot state does not match component schema").with_source(err))
}

/// Reads and decodes a snapshot, returning `None` when no file exists yet.
pub fn read<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Option<T>, Error> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(Error::new(ErrorKind::Persistence)
                .with_message("failed to read snapshot")
                .with_path(path)
                .with_source(err));
        }
    };
    decode(&bytes, kind, path).map(Some)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let io_error = |message: &str, at: &Path, err: std::io::Error| {
        Error::new(ErrorKind::Persistence)
            .with_message(message.to_string())
            .with_path(at)
            .with_source(err)
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| io_error("failed to create snapshot directory", parent, err))?;
    }
    let tmp = temp_path(path);
    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(io_error("failed to write snapshot", path, err));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

fn checksum(state: &Value) -> Result<String, Error> {
    let bytes = serde_json::to_vec(state).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to canonicalize snapshot state")
            .with_source(err)
    })?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::{SnapshotEnvelope, decode, encode, read, write_atomic};
    use crate::core::error::ErrorKind;
    use crate::core::workspace::{Identity, Workspace};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u64,
    }

    fn identity(dir: &std::path::Path) -> Identity {
        let workspace = Arc::new(Workspace::open(dir).expect("workspace"));
        Identity::new("counter", None, Some(1), true, workspace).expect("identity")
    }

    #[test]
    fn write_then_read_restores_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = identity(dir.path());
        let path = dir.path().join("nested").join("counter.bin");
        let bytes = encode(&identity, "meta", &Counter { hits: 7 }).expect("encode");
        write_atomic(&path, &bytes).expect("write");

        let state: Option<Counter> = read(&path, "meta").expect("read");
        assert_eq!(state, Some(Counter { hits: 7 }));
        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn missing_snapshot_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state: Option<Counter> = read(&dir.path().join("absent.bin"), "meta").expect("read");
        assert!(state.is_none());
    }

    #[test]
    fn tampered_state_fails_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = identity(dir.path());
        let bytes = encode(&identity, "meta", &Counter { hits: 1 }).expect("encode");
        let mut envelope: SnapshotEnvelope = serde_json::from_slice(&bytes).expect("envelope");
        envelope.state = serde_json::json!({ "hits": 2 });
        let tampered = serde_json::to_vec(&envelope).expect("tampered");

        let err = decode::<Counter>(&tampered, "meta", dir.path()).expect_err("checksum");
        assert_eq!(err.kind(), ErrorKind::CorruptState);
    }

    #[test]
    fn kind_mismatch_and_garbage_are_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = identity(dir.path());
        let bytes = encode(&identity, "meta", &Counter { hits: 1 }).expect("encode");
        let err = decode::<Counter>(&bytes, "compound", dir.path()).expect_err("kind");
        assert_eq!(err.kind(), ErrorKind::CorruptState);

        let err = decode::<Counter>(b"\x00\x01garbage", "meta", dir.path()).expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::CorruptState);
    }

    #[test]
    fn unwritable_target_is_persistence_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").expect("write");
        let err = write_atomic(&blocker.join("x.bin"), b"{}").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
