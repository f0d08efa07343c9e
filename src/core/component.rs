//! Purpose: Persistable component contract plus the snapshot-only component kind.
//! Exports: `Component`, `Base`, `MetaComponent`, `MetaState`.
//! Role: Dirty tracking and gated snapshot writes shared by every component kind.
//! Invariants: A clean component performs zero filesystem writes on save.
//! Invariants: The dirty flag clears only after the snapshot rename succeeds.
//! Invariants: Restoring a snapshot leaves the component clean.
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, trace};

use crate::core::error::Error;
use crate::core::snapshot;
use crate::core::workspace::{Identity, Role};

pub trait Component {
    fn identity(&self) -> &Identity;

    /// Kind tag the component was registered under.
    fn kind(&self) -> &'static str;

    fn is_dirty(&self) -> bool;

    /// Marks the component modified without changing its data.
    fn touch(&mut self);

    /// Persists dirty state, writing the snapshot to `path` instead of the resolved one.
    fn save_to(&mut self, path: &Path) -> Result<(), Error>;

    /// Replaces in-memory state from the snapshot at `path`; `false` when absent.
    fn restore_from(&mut self, path: &Path) -> Result<bool, Error>;

    fn save(&mut self) -> Result<(), Error> {
        let path = self.snapshot_path();
        self.save_to(&path)
    }

    fn restore(&mut self) -> Result<bool, Error> {
        let path = self.snapshot_path();
        self.restore_from(&path)
    }

    fn name(&self) -> &str {
        self.identity().name()
    }

    fn shard_id(&self) -> Option<u32> {
        self.identity().shard_id()
    }

    fn snapshot_path(&self) -> PathBuf {
        self.identity().path(Role::Snapshot)
    }

    fn current_workspace(&self) -> PathBuf {
        self.identity().current_workspace()
    }
}

/// Identity, dirty flag, and user attributes common to every component.
#[derive(Clone, Debug)]
pub struct Base {
    identity: Identity,
    dirty: bool,
    attributes: Map<String, Value>,
}

impl Base {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            dirty: false,
            attributes: Map::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
        self.mark_dirty();
    }

    /// Returns `false` (and logs) when there is nothing to save.
    pub(crate) fn needs_save(&self) -> bool {
        if !self.dirty {
            trace!(
                component = %self.identity.name(),
                shard = ?self.identity.shard_id(),
                "clean component, skipping save"
            );
        }
        self.dirty
    }

    /// Writes the snapshot unconditionally and clears the dirty flag on success.
    pub(crate) fn write_snapshot<T: Serialize>(
        &mut self,
        kind: &str,
        state: &T,
        path: &Path,
    ) -> Result<(), Error> {
        let bytes = snapshot::encode(&self.identity, kind, state)
            .map_err(|err| err.or_component(&self.identity))?;
        snapshot::write_atomic(path, &bytes).map_err(|err| err.or_component(&self.identity))?;
        self.dirty = false;
        debug!(
            component = %self.identity.name(),
            shard = ?self.identity.shard_id(),
            path = %path.display(),
            "snapshot saved"
        );
        Ok(())
    }

    pub(crate) fn read_snapshot<T: DeserializeOwned>(
        &self,
        kind: &str,
        path: &Path,
    ) -> Result<Option<T>, Error> {
        let state = snapshot::read(path, kind).map_err(|err| err.or_component(&self.identity))?;
        if state.is_some() {
            info!(
                component = %self.identity.name(),
                shard = ?self.identity.shard_id(),
                path = %path.display(),
                "restored snapshot"
            );
        }
        Ok(state)
    }

    pub(crate) fn restore_attributes(&mut self, attributes: Map<String, Value>) {
        self.attributes = attributes;
        self.dirty = false;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaState {
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Component whose whole state is its snapshot.
#[derive(Clone, Debug)]
pub struct MetaComponent {
    base: Base,
}

impl MetaComponent {
    pub const KIND: &'static str = "meta";

    pub fn construct(identity: Identity) -> Self {
        Self {
            base: Base::new(identity),
        }
    }

    pub fn load(identity: Identity) -> Result<Self, Error> {
        let mut component = Self::construct(identity);
        component.restore()?;
        Ok(component)
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.base.attr(key)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        self.base.attributes()
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.base.set_attr(key, value);
    }
}

impl Component for MetaComponent {
    fn identity(&self) -> &Identity {
        self.base.identity()
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn is_dirty(&self) -> bool {
        self.base.is_dirty()
    }

    fn touch(&mut self) {
        self.base.mark_dirty();
    }

    fn save_to(&mut self, path: &Path) -> Result<(), Error> {
        if !self.base.needs_save() {
            return Ok(());
        }
        let state = MetaState {
            attributes: self.base.attributes().clone(),
        };
        self.base.write_snapshot(Self::KIND, &state, path)
    }

    fn restore_from(&mut self, path: &Path) -> Result<bool, Error> {
        match self.base.read_snapshot::<MetaState>(Self::KIND, path)? {
            Some(state) => {
                self.base.restore_attributes(state.attributes);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
