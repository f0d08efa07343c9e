//! Purpose: Components that own an append-only payload next to their snapshot.
//! Exports: `BinaryIndexer`, `VectorIndexer`, `IndexerState`, `Metric`, `IndexOptions`.
//! Role: Buffers appends, flushes them on save, and serves a cached `IndexView`.
//! Invariants: Appends are validated as a batch; a rejected batch buffers nothing.
//! Invariants: Every append bumps the generation, invalidating the cached view.
//! Invariants: Payload records are flushed before the snapshot that counts them.
//! Invariants: A view reflects flushed records first, then pending ones, in append order.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::component::{Base, Component};
use crate::core::error::{Error, ErrorKind};
use crate::core::key::{EntryKey, collect_keys};
use crate::core::payload::{self, IndexView, PayloadFile, PayloadHeader, ValueKind};
use crate::core::workspace::{DEFAULT_PAYLOAD_EXTENSION, Identity, Role, validate_role};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
    InnerProduct,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerState {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub entry_count: u64,
    pub index_suffix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
}

/// Construction-time indexer settings taken from the `with` block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
}

#[derive(Debug)]
struct IndexCore {
    base: Base,
    kind: &'static str,
    value_kind: ValueKind,
    index_suffix: String,
    dimension: Option<u32>,
    metric: Option<Metric>,
    flushed: u64,
    pending: Vec<u8>,
    pending_count: u64,
    generation: u64,
    cached: Option<(u64, IndexView)>,
}

impl IndexCore {
    fn new(
        identity: Identity,
        kind: &'static str,
        value_kind: ValueKind,
        options: IndexOptions,
    ) -> Result<Self, Error> {
        let index_suffix = options
            .index_filename
            .unwrap_or_else(|| DEFAULT_PAYLOAD_EXTENSION.to_string());
        validate_role(Role::Payload(&index_suffix)).map_err(|err| err.with_component(&identity))?;
        if options.dimension == Some(0) {
            return Err(Error::new(ErrorKind::Config)
                .with_message("dimension must be positive")
                .with_component(&identity));
        }
        Ok(Self {
            base: Base::new(identity),
            kind,
            value_kind,
            index_suffix,
            dimension: options.dimension,
            metric: options.metric,
            flushed: 0,
            pending: Vec::new(),
            pending_count: 0,
            generation: 0,
            cached: None,
        })
    }

    fn identity(&self) -> &Identity {
        self.base.identity()
    }

    fn payload_path(&self) -> PathBuf {
        self.identity().path(Role::Payload(&self.index_suffix))
    }

    fn header(&self) -> Option<PayloadHeader> {
        match self.value_kind {
            ValueKind::Bytes => Some(PayloadHeader::bytes()),
            ValueKind::F32 => self.dimension.map(PayloadHeader::vectors),
        }
    }

    fn size(&self) -> u64 {
        self.flushed + self.pending_count
    }

    /// An empty batch is a no-op: no dirty flag, no generation bump.
    fn push_batch(&mut self, keys: Vec<u64>, values: Vec<Vec<u8>>) -> Result<(), Error> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::new();
        for (key, value) in keys.iter().zip(&values) {
            payload::encode_record(&mut encoded, *key, value)
                .map_err(|err| err.with_component(self.identity()))?;
        }
        self.pending.extend_from_slice(&encoded);
        self.pending_count += keys.len() as u64;
        self.generation += 1;
        self.base.mark_dirty();
        debug!(
            component = %self.identity().name(),
            shard = ?self.identity().shard_id(),
            appended = keys.len(),
            size = self.size(),
            "entries appended"
        );
        Ok(())
    }

    fn read_handle(&mut self) -> Result<&IndexView, Error> {
        let stale = self
            .cached
            .as_ref()
            .is_none_or(|(generation, _)| *generation != self.generation);
        if stale {
            let view = self.build_view()?;
            self.cached = Some((self.generation, view));
        }
        match &self.cached {
            Some((_, view)) => Ok(view),
            None => Err(Error::new(ErrorKind::Internal)
                .with_message("read handle cache is empty after build")
                .with_component(self.identity())),
        }
    }

    fn build_view(&self) -> Result<IndexView, Error> {
        let path = self.payload_path();
        let file = PayloadFile::open(&path).map_err(|err| err.or_component(self.identity()))?;
        if file.is_none() && self.flushed > 0 {
            return Err(Error::new(ErrorKind::IndexUnavailable)
                .with_message(format!(
                    "snapshot records {} flushed entries but the payload is missing",
                    self.flushed
                ))
                .with_component(self.identity())
                .with_path(&path));
        }
        let header = match (&file, self.header()) {
            (Some(file), _) => file.header(),
            (None, Some(header)) => header,
            (None, None) => PayloadHeader {
                value_kind: self.value_kind,
                dimension: 0,
            },
        };
        IndexView::build(file, header, &self.pending).map_err(|err| err.or_component(self.identity()))
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.pending_count == 0 {
            return Ok(());
        }
        let Some(header) = self.header() else {
            return Err(Error::new(ErrorKind::Internal)
                .with_message("pending vectors without a dimension")
                .with_component(self.identity()));
        };
        let path = self.payload_path();
        payload::append_records(&path, header, &self.pending)
            .map_err(|err| err.or_component(self.identity()))?;
        debug!(
            component = %self.identity().name(),
            shard = ?self.identity().shard_id(),
            path = %path.display(),
            flushed = self.pending_count,
            "payload flushed"
        );
        self.flushed += self.pending_count;
        self.pending.clear();
        self.pending_count = 0;
        Ok(())
    }

    fn state(&self) -> IndexerState {
        IndexerState {
            attributes: self.base.attributes().clone(),
            entry_count: self.size(),
            index_suffix: self.index_suffix.clone(),
            dimension: self.dimension,
            metric: self.metric,
        }
    }

    fn save_to(&mut self, path: &Path) -> Result<(), Error> {
        if !self.base.needs_save() {
            return Ok(());
        }
        self.flush()?;
        let state = self.state();
        self.base.write_snapshot(self.kind, &state, path)
    }

    fn restore_from(&mut self, path: &Path) -> Result<bool, Error> {
        let state = self.base.read_snapshot::<IndexerState>(self.kind, path)?;
        self.pending.clear();
        self.pending_count = 0;
        self.generation += 1;
        self.cached = None;
        let expected = match &state {
            Some(state) => {
                if state.index_suffix != self.index_suffix {
                    warn!(
                        component = %self.identity().name(),
                        saved = %state.index_suffix,
                        configured = %self.index_suffix,
                        "index_filename changed since the snapshot was written"
                    );
                }
                self.reconcile_dimension(state.dimension)?;
                if self.metric.is_none() {
                    self.metric = state.metric;
                }
                Some(state.entry_count)
            }
            None => None,
        };
        self.attach_payload(expected)?;
        let restored = state.is_some();
        if let Some(state) = state {
            self.base.restore_attributes(state.attributes);
        }
        Ok(restored)
    }

    /// Counts flushed records and adopts the payload header as the source of truth.
    fn attach_payload(&mut self, expected: Option<u64>) -> Result<(), Error> {
        let path = self.payload_path();
        let file = PayloadFile::open(&path).map_err(|err| err.or_component(self.identity()))?;
        match file {
            Some(file) => {
                let header = file.header();
                if header.value_kind != self.value_kind {
                    return Err(Error::new(ErrorKind::Config)
                        .with_message(format!(
                            "payload holds {:?} values but {} expects {:?}",
                            header.value_kind, self.kind, self.value_kind
                        ))
                        .with_component(self.identity())
                        .with_path(&path));
                }
                if self.value_kind == ValueKind::F32 {
                    self.reconcile_dimension(Some(header.dimension))?;
                }
                let found = file.len() as u64;
                if let Some(expected) = expected.filter(|expected| *expected != found) {
                    warn!(
                        component = %self.identity().name(),
                        shard = ?self.identity().shard_id(),
                        expected,
                        found,
                        "payload entry count differs from snapshot; trusting payload"
                    );
                }
                self.flushed = found;
            }
            None => {
                let expected = expected.unwrap_or_default();
                if expected > 0 {
                    warn!(
                        component = %self.identity().name(),
                        shard = ?self.identity().shard_id(),
                        path = %path.display(),
                        expected,
                        "payload missing for a snapshot with entries"
                    );
                }
                self.flushed = expected;
            }
        }
        Ok(())
    }

    fn reconcile_dimension(&mut self, found: Option<u32>) -> Result<(), Error> {
        match (self.dimension, found) {
            (Some(configured), Some(found)) if configured != found => Err(Error::new(ErrorKind::Config)
                .with_message(format!(
                    "configured dimension {configured} conflicts with stored dimension {found}"
                ))
                .with_component(self.identity())),
            (None, Some(found)) => {
                self.dimension = Some(found);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn length_mismatch(identity: &Identity, keys: usize, values: usize) -> Error {
    Error::new(ErrorKind::TypeMismatch)
        .with_message(format!("{keys} keys but {values} values"))
        .with_component(identity)
}

macro_rules! indexer_component {
    ($ty:ty) => {
        impl Component for $ty {
            fn identity(&self) -> &Identity {
                self.core.identity()
            }

            fn kind(&self) -> &'static str {
                Self::KIND
            }

            fn is_dirty(&self) -> bool {
                self.core.base.is_dirty()
            }

            fn touch(&mut self) {
                self.core.base.mark_dirty();
            }

            fn save_to(&mut self, path: &Path) -> Result<(), Error> {
                self.core.save_to(path)
            }

            fn restore_from(&mut self, path: &Path) -> Result<bool, Error> {
                self.core.restore_from(path)
            }
        }

        impl $ty {
            pub fn load(identity: Identity, options: IndexOptions) -> Result<Self, Error> {
                let mut indexer = Self::construct(identity, options)?;
                indexer.restore()?;
                Ok(indexer)
            }

            pub fn payload_path(&self) -> PathBuf {
                self.core.payload_path()
            }

            /// Flushed plus pending entries.
            pub fn size(&self) -> u64 {
                self.core.size()
            }

            pub fn read_handle(&mut self) -> Result<&IndexView, Error> {
                self.core.read_handle()
            }

            pub fn attr(&self, key: &str) -> Option<&Value> {
                self.core.base.attr(key)
            }

            pub fn attributes(&self) -> &Map<String, Value> {
                self.core.base.attributes()
            }

            pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
                self.core.base.set_attr(key, value);
            }
        }
    };
}

/// Indexer whose values are opaque byte strings.
#[derive(Debug)]
pub struct BinaryIndexer {
    core: IndexCore,
}

impl BinaryIndexer {
    pub const KIND: &'static str = "binary_indexer";

    pub fn construct(identity: Identity, options: IndexOptions) -> Result<Self, Error> {
        if options.dimension.is_some() || options.metric.is_some() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("binary_indexer takes no dimension or metric")
                .with_component(&identity));
        }
        Ok(Self {
            core: IndexCore::new(identity, Self::KIND, ValueKind::Bytes, options)?,
        })
    }

    pub fn append<K: EntryKey, V: AsRef<[u8]>>(&mut self, keys: &[K], values: &[V]) -> Result<(), Error> {
        if keys.len() != values.len() {
            return Err(length_mismatch(self.core.identity(), keys.len(), values.len()));
        }
        let keys = collect_keys(keys).map_err(|err| err.or_component(self.core.identity()))?;
        let values: Vec<Vec<u8>> = values.iter().map(|value| value.as_ref().to_vec()).collect();
        self.core.push_batch(keys, values)
    }
}

indexer_component!(BinaryIndexer);

/// Indexer whose values are fixed-dimension `f32` rows.
#[derive(Debug)]
pub struct VectorIndexer {
    core: IndexCore,
}

impl VectorIndexer {
    pub const KIND: &'static str = "vector_indexer";

    pub fn construct(identity: Identity, options: IndexOptions) -> Result<Self, Error> {
        Ok(Self {
            core: IndexCore::new(identity, Self::KIND, ValueKind::F32, options)?,
        })
    }

    pub fn dimension(&self) -> Option<u32> {
        self.core.dimension
    }

    pub fn metric(&self) -> Metric {
        self.core.metric.unwrap_or_default()
    }

    /// Appends one row per key; the first append fixes the dimension if none is configured.
    pub fn append<K: EntryKey, R: AsRef<[f32]>>(&mut self, keys: &[K], rows: &[R]) -> Result<(), Error> {
        if keys.len() != rows.len() {
            return Err(length_mismatch(self.core.identity(), keys.len(), rows.len()));
        }
        let keys = collect_keys(keys).map_err(|err| err.or_component(self.core.identity()))?;
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let dimension = match self.core.dimension {
            Some(dimension) => dimension as usize,
            None => first.as_ref().len(),
        };
        if dimension == 0 {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message("vector rows must not be empty")
                .with_component(self.core.identity()));
        }
        if let Some(position) = rows.iter().position(|row| row.as_ref().len() != dimension) {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!(
                    "row {position} has {} values, expected {dimension}",
                    rows[position].as_ref().len()
                ))
                .with_component(self.core.identity()));
        }
        let dimension = u32::try_from(dimension).map_err(|_| {
            Error::new(ErrorKind::TypeMismatch)
                .with_message("vector dimension exceeds u32")
                .with_component(self.core.identity())
        })?;
        let values: Vec<Vec<u8>> = rows
            .iter()
            .map(|row| {
                row.as_ref()
                    .iter()
                    .flat_map(|value| value.to_le_bytes())
                    .collect::<Vec<u8>>()
            })
            .collect();
        self.core.push_batch(keys, values)?;
        self.core.dimension = Some(dimension);
        Ok(())
    }
}

indexer_component!(VectorIndexer);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BinaryIndexer, IndexOptions, Metric, VectorIndexer};
    use crate::core::component::Component;
    use crate::core::error::ErrorKind;
    use crate::core::key::UniqueId;
    use crate::core::workspace::{Identity, Workspace};

    fn identity(dir: &std::path::Path, name: &str, shard: u32) -> Identity {
        let workspace = Arc::new(Workspace::open(dir).expect("workspace"));
        Identity::new(name, Some("owner"), Some(shard), true, workspace).expect("identity")
    }

    fn npidx() -> IndexOptions {
        IndexOptions {
            index_filename: Some("npidx".to_string()),
            ..IndexOptions::default()
        }
    }

    #[test]
    fn append_marks_dirty_and_is_visible_before_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            BinaryIndexer::construct(identity(dir.path(), "test_meta", 0), IndexOptions::default())
                .expect("construct");
        assert!(!index.is_dirty());
        index
            .append(&[UniqueId::new(1), UniqueId::new(2)], &[b"a".as_slice(), b"b"])
            .expect("append ids");
        index.append(&[3u64], &[b"c"]).expect("append ints");
        assert!(index.is_dirty());
        assert_eq!(index.size(), 3);

        let view = index.read_handle().expect("view");
        assert_eq!(view.keys(), vec![1, 2, 3]);
        assert!(!index.payload_path().exists());
    }

    #[test]
    fn mismatched_batch_buffers_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            BinaryIndexer::construct(identity(dir.path(), "bin", 0), IndexOptions::default())
                .expect("construct");
        let err = index.append(&[1u64, 2], &[b"a"]).expect_err("lengths");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        let err = index.append(&["1", "two"], &[b"a", b"b"]).expect_err("key");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.component(), Some("bin"));
        assert_eq!(index.size(), 0);
        assert!(!index.is_dirty());
    }

    #[test]
    fn cached_view_is_reused_until_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            BinaryIndexer::construct(identity(dir.path(), "bin", 0), IndexOptions::default())
                .expect("construct");
        index.append(&[1u64], &[b"a"]).expect("append");
        let first = index.read_handle().expect("view") as *const _;
        let second = index.read_handle().expect("view") as *const _;
        assert_eq!(first, second);

        index.append(&[2u64], &[b"b"]).expect("append");
        assert_eq!(index.read_handle().expect("view").len(), 2);
    }

    #[test]
    fn empty_index_yields_empty_view() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            VectorIndexer::construct(identity(dir.path(), "vec", 0), IndexOptions::default())
                .expect("construct");
        let view = index.read_handle().expect("view");
        assert!(view.is_empty());
    }

    #[test]
    fn save_and_reload_continues_sequence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index = VectorIndexer::construct(identity(dir.path(), "test_numpy", 2), npidx())
            .expect("construct");
        index
            .append(&[4u64, 5], &[[0.5f32, 1.5], [2.5, 3.5]])
            .expect("append");
        index.save().expect("save");
        assert!(!index.is_dirty());
        assert!(index.payload_path().ends_with("owner/shard-2/test_numpy.npidx"));
        assert!(index.snapshot_path().exists());

        let mut reopened =
            VectorIndexer::load(identity(dir.path(), "test_numpy", 2), npidx()).expect("load");
        assert_eq!(reopened.dimension(), Some(2));
        assert_eq!(reopened.size(), 2);
        reopened.append(&[6u64], &[[4.5f32, 5.5]]).expect("append");
        reopened.save().expect("save");

        let mut third =
            VectorIndexer::load(identity(dir.path(), "test_numpy", 2), npidx()).expect("load");
        let view = third.read_handle().expect("view");
        assert_eq!(view.keys(), vec![4, 5, 6]);
        assert_eq!(
            view.vectors(),
            vec![vec![0.5, 1.5], vec![2.5, 3.5], vec![4.5, 5.5]]
        );
    }

    #[test]
    fn dimension_is_enforced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            VectorIndexer::construct(identity(dir.path(), "vec", 0), IndexOptions::default())
                .expect("construct");
        index.append(&[1u64], &[[1.0f32, 2.0, 3.0]]).expect("append");
        let err = index.append(&[2u64], &[[1.0f32, 2.0]]).expect_err("dim");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn configured_dimension_conflicting_with_payload_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            VectorIndexer::construct(identity(dir.path(), "vec", 0), IndexOptions::default())
                .expect("construct");
        index.append(&[1u64], &[[1.0f32, 2.0]]).expect("append");
        index.save().expect("save");

        let options = IndexOptions {
            dimension: Some(3),
            metric: Some(Metric::Cosine),
            ..IndexOptions::default()
        };
        let err = VectorIndexer::load(identity(dir.path(), "vec", 0), options).expect_err("dim");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn payload_of_another_value_kind_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bytes =
            BinaryIndexer::construct(identity(dir.path(), "shared", 0), IndexOptions::default())
                .expect("construct");
        bytes.append(&[1u64], &[b"a"]).expect("append");
        bytes.save().expect("save");
        std::fs::remove_file(bytes.snapshot_path()).expect("remove snapshot");

        let err = VectorIndexer::load(identity(dir.path(), "shared", 0), IndexOptions::default())
            .expect_err("kind");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.component(), Some("shared"));
    }

    #[test]
    fn empty_append_changes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bytes =
            BinaryIndexer::construct(identity(dir.path(), "bin", 0), IndexOptions::default())
                .expect("construct");
        let first = bytes.read_handle().expect("view") as *const _;
        bytes.append::<u64, &[u8]>(&[], &[]).expect("empty");
        assert!(!bytes.is_dirty());
        assert_eq!(bytes.read_handle().expect("view") as *const _, first);

        let mut rows =
            VectorIndexer::construct(identity(dir.path(), "vec", 0), IndexOptions::default())
                .expect("construct");
        rows.append::<u64, Vec<f32>>(&[], &[]).expect("empty");
        assert!(!rows.is_dirty());
        assert_eq!(rows.dimension(), None);
        assert_eq!(bytes.size(), rows.size());
    }

    #[test]
    fn missing_payload_with_recorded_entries_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            BinaryIndexer::construct(identity(dir.path(), "bin", 1), IndexOptions::default())
                .expect("construct");
        index.append(&[1u64], &[b"a"]).expect("append");
        index.save().expect("save");
        std::fs::remove_file(index.payload_path()).expect("remove");

        let mut reopened =
            BinaryIndexer::load(identity(dir.path(), "bin", 1), IndexOptions::default())
                .expect("load");
        let err = reopened.read_handle().expect_err("unavailable");
        assert_eq!(err.kind(), ErrorKind::IndexUnavailable);
    }

    #[test]
    fn touch_without_entries_saves_snapshot_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index =
            BinaryIndexer::construct(identity(dir.path(), "bin", 1), IndexOptions::default())
                .expect("construct");
        index.touch();
        index.save().expect("save");
        assert!(index.snapshot_path().exists());
        assert!(!index.payload_path().exists());
        assert_ne!(index.snapshot_path(), index.payload_path());
    }

    #[test]
    fn snapshot_suffix_is_rejected_for_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = IndexOptions {
            index_filename: Some("bin".to_string()),
            ..IndexOptions::default()
        };
        let err = BinaryIndexer::construct(identity(dir.path(), "bin", 0), options).expect_err("bin");
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
