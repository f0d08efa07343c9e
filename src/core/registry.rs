//! Purpose: Build component trees from config by dispatching on kind tags.
//! Exports: `Registry`, `Factory`, `BuildContext`.
//! Role: The only place config specs turn into live `Node`s.
//! Invariants: Any construction error aborts the whole tree; no partial tree is returned.
//! Invariants: Kind tags are unique within a registry.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::component::MetaComponent;
use crate::core::compound::Compound;
use crate::core::config::{ComponentSpec, LoadOptions, root_placement};
use crate::core::error::{Error, ErrorKind};
use crate::core::indexer::{BinaryIndexer, IndexOptions, VectorIndexer};
use crate::core::node::Node;
use crate::core::scope::Scoped;
use crate::core::workspace::{Identity, Workspace};

pub type Factory = fn(&ComponentSpec, &BuildContext<'_>) -> Result<Node, Error>;

/// What a factory gets besides its spec.
pub struct BuildContext<'a> {
    registry: &'a Registry,
    identity: Identity,
    restore: bool,
}

impl BuildContext<'_> {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether existing snapshots should be restored (`load`) or ignored (`construct`).
    pub fn restore(&self) -> bool {
        self.restore
    }

    pub fn build_children(&self, spec: &ComponentSpec) -> Result<Vec<Node>, Error> {
        spec.components
            .iter()
            .map(|child| {
                child.validate_child_metas()?;
                let identity = self.identity.child(child.name()?)?;
                self.registry.build(child, identity, self.restore)
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .factories
            .insert(MetaComponent::KIND.to_string(), build_meta);
        registry
            .factories
            .insert(BinaryIndexer::KIND.to_string(), build_binary);
        registry
            .factories
            .insert(VectorIndexer::KIND.to_string(), build_vector);
        registry
            .factories
            .insert(Compound::KIND.to_string(), build_compound);
        registry
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: Factory) -> Result<(), Error> {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(Error::new(ErrorKind::Config)
                .with_message(format!("kind {kind:?} is already registered")));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds a fresh tree without reading any snapshot.
    pub fn construct(&self, spec: &ComponentSpec, options: &LoadOptions) -> Result<Node, Error> {
        self.build_root(spec, options, false)
    }

    /// Builds a tree, restoring every node that has a snapshot for its resolved identity.
    pub fn load(&self, spec: &ComponentSpec, options: &LoadOptions) -> Result<Node, Error> {
        self.build_root(spec, options, true)
    }

    pub fn load_str(&self, text: &str, options: &LoadOptions) -> Result<Node, Error> {
        self.load(&text.parse()?, options)
    }

    pub fn load_path(&self, path: &Path, options: &LoadOptions) -> Result<Node, Error> {
        self.load(&ComponentSpec::from_path(path)?, options)
    }

    /// Loads a tree whose root is saved when the returned guard is released or dropped.
    pub fn open(&self, text: &str, options: &LoadOptions) -> Result<Scoped<Node>, Error> {
        self.load_str(text, options).map(Scoped::acquire)
    }

    fn build_root(&self, spec: &ComponentSpec, options: &LoadOptions, restore: bool) -> Result<Node, Error> {
        let name = spec.name()?;
        let placement = root_placement(spec, options)?;
        let workspace = Workspace::open(&placement.workspace)
            .map_err(|err| err.with_component_name(name).with_shard_id(placement.shard_id))?;
        let identity = Identity::new(
            name,
            None,
            placement.shard_id,
            placement.isolate,
            Arc::new(workspace),
        )?;
        self.build(spec, identity, restore)
    }

    fn build(&self, spec: &ComponentSpec, identity: Identity, restore: bool) -> Result<Node, Error> {
        let Some(factory) = self.factories.get(&spec.kind) else {
            return Err(Error::new(ErrorKind::Config)
                .with_message(format!("unknown component kind {:?}", spec.kind))
                .with_component(&identity)
                .with_hint(format!("Registered kinds: {}.", self.kinds().join(", "))));
        };
        let context = BuildContext {
            registry: self,
            identity,
            restore,
        };
        factory(spec, &context).map_err(|err| err.or_component(&context.identity))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

fn leaf(spec: &ComponentSpec) -> Result<(), Error> {
    if !spec.components.is_empty() {
        return Err(Error::new(ErrorKind::Config)
            .with_message(format!("{} components cannot have children", spec.kind)));
    }
    Ok(())
}

fn build_meta(spec: &ComponentSpec, context: &BuildContext<'_>) -> Result<Node, Error> {
    leaf(spec)?;
    spec.options::<NoOptions>()?;
    let identity = context.identity().clone();
    let component = if context.restore() {
        MetaComponent::load(identity)?
    } else {
        MetaComponent::construct(identity)
    };
    Ok(component.into())
}

fn build_binary(spec: &ComponentSpec, context: &BuildContext<'_>) -> Result<Node, Error> {
    leaf(spec)?;
    let options = spec.options::<IndexOptions>()?;
    let identity = context.identity().clone();
    let component = if context.restore() {
        BinaryIndexer::load(identity, options)?
    } else {
        BinaryIndexer::construct(identity, options)?
    };
    Ok(component.into())
}

fn build_vector(spec: &ComponentSpec, context: &BuildContext<'_>) -> Result<Node, Error> {
    leaf(spec)?;
    let options = spec.options::<IndexOptions>()?;
    let identity = context.identity().clone();
    let component = if context.restore() {
        VectorIndexer::load(identity, options)?
    } else {
        VectorIndexer::construct(identity, options)?
    };
    Ok(component.into())
}

fn build_compound(spec: &ComponentSpec, context: &BuildContext<'_>) -> Result<Node, Error> {
    spec.options::<NoOptions>()?;
    let children = context.build_children(spec)?;
    let identity = context.identity().clone();
    let component = if context.restore() {
        Compound::load(identity, children)?
    } else {
        Compound::construct(identity, children)?
    };
    Ok(component.into())
}
