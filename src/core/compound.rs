//! Purpose: Ordered, named collection of components that is itself a component.
//! Exports: `Compound`, `CompoundState`, `ChildRef`, `SaveReport`.
//! Role: Lightweight coordination wrapper over a fixed child list.
//! Invariants: Child order is fixed at construction; names are unique among siblings.
//! Invariants: The compound's dirty flag is its own; child mutations never set it.
//! Invariants: `save` writes only the compound's snapshot, never its children's.
use std::path::Path;

use indexmap::IndexMap;
use indexmap::map::{Values, ValuesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::component::{Base, Component};
use crate::core::error::{Error, ErrorKind};
use crate::core::node::Node;
use crate::core::workspace::Identity;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChildRef<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for ChildRef<'_> {
    fn from(index: usize) -> Self {
        ChildRef::Index(index)
    }
}

impl<'a> From<&'a str> for ChildRef<'a> {
    fn from(name: &'a str) -> Self {
        ChildRef::Name(name)
    }
}

impl<'a> From<&'a String> for ChildRef<'a> {
    fn from(name: &'a String) -> Self {
        ChildRef::Name(name.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompoundState {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub children: Vec<String>,
}

/// Outcome of a caller-driven save over every child.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl SaveReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct Compound {
    base: Base,
    children: IndexMap<String, Node>,
}

impl Compound {
    pub const KIND: &'static str = "compound";

    pub fn construct(identity: Identity, children: Vec<Node>) -> Result<Self, Error> {
        let mut map = IndexMap::with_capacity(children.len());
        for child in children {
            let name = child.name().to_string();
            if name == identity.name() {
                return Err(Error::new(ErrorKind::Config)
                    .with_message(format!("child {name:?} shares the compound's own name"))
                    .with_component(&identity));
            }
            if child.identity().owner() != identity.lineage() {
                return Err(Error::new(ErrorKind::Config)
                    .with_message(format!(
                        "child {name:?} is owned by {:?}",
                        child.identity().owner()
                    ))
                    .with_component(&identity));
            }
            if map.insert(name.clone(), child).is_some() {
                return Err(Error::new(ErrorKind::Config)
                    .with_message(format!("duplicate child name {name:?}"))
                    .with_component(&identity));
            }
        }
        Ok(Self {
            base: Base::new(identity),
            children: map,
        })
    }

    pub fn load(identity: Identity, children: Vec<Node>) -> Result<Self, Error> {
        let mut compound = Self::construct(identity, children)?;
        compound.restore()?;
        Ok(compound)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }

    /// Children in construction order.
    pub fn children(&self) -> Values<'_, String, Node> {
        self.children.values()
    }

    pub fn iter(&self) -> Values<'_, String, Node> {
        self.children.values()
    }

    pub fn iter_mut(&mut self) -> ValuesMut<'_, String, Node> {
        self.children.values_mut()
    }

    pub fn get<'a>(&self, child: impl Into<ChildRef<'a>>) -> Result<&Node, Error> {
        let child = child.into();
        let found = match child {
            ChildRef::Index(index) => self.children.get_index(index).map(|(_, node)| node),
            ChildRef::Name(name) => self.children.get(name),
        };
        found.ok_or_else(|| self.not_found(child))
    }

    pub fn get_mut<'a>(&mut self, child: impl Into<ChildRef<'a>>) -> Result<&mut Node, Error> {
        let child = child.into();
        let position = match child {
            ChildRef::Index(index) if index < self.children.len() => Some(index),
            ChildRef::Index(_) => None,
            ChildRef::Name(name) => self.children.get_index_of(name),
        };
        match position {
            Some(position) => self
                .children
                .get_index_mut(position)
                .map(|(_, node)| node)
                .ok_or_else(|| Error::new(ErrorKind::Internal)),
            None => Err(self.not_found(child)),
        }
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

    pub fn has_dirty_children(&self) -> bool {
        self.children.values().any(|child| child.is_dirty())
    }

    /// Saves every dirty child; a failing child never stops its siblings.
    pub fn save_children(&mut self) -> SaveReport {
        let mut report = SaveReport::default();
        for (name, child) in self.children.iter_mut() {
            if !child.is_dirty() {
                report.skipped.push(name.clone());
                continue;
            }
            match child.save() {
                Ok(()) => report.saved.push(name.clone()),
                Err(err) => {
                    warn!(
                        compound = %self.base.identity().name(),
                        component = %name,
                        error = %err,
                        "child save failed"
                    );
                    report.failed.push((name.clone(), err));
                }
            }
        }
        report
    }

    fn not_found(&self, child: ChildRef<'_>) -> Error {
        let message = match child {
            ChildRef::Index(index) => {
                format!("no child at position {index} (have {})", self.children.len())
            }
            ChildRef::Name(name) => format!("no child named {name:?}"),
        };
        Error::new(ErrorKind::NotFound)
            .with_message(message)
            .with_component(self.base.identity())
    }
}

impl Component for Compound {
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
            if self.has_dirty_children() {
                debug!(
                    compound = %self.base.identity().name(),
                    "compound is clean; dirty children must be saved individually"
                );
            }
            return Ok(());
        }
        let state = CompoundState {
            attributes: self.base.attributes().clone(),
            children: self.children.keys().cloned().collect(),
        };
        self.base.write_snapshot(Self::KIND, &state, path)
    }

    fn restore_from(&mut self, path: &Path) -> Result<bool, Error> {
        let Some(state) = self.base.read_snapshot::<CompoundState>(Self::KIND, path)? else {
            return Ok(false);
        };
        let current: Vec<&str> = self.children.keys().map(String::as_str).collect();
        if state.children.iter().map(String::as_str).ne(current.iter().copied()) {
            warn!(
                compound = %self.base.identity().name(),
                saved = ?state.children,
                configured = ?current,
                "child list changed since the snapshot was written"
            );
        }
        self.base.restore_attributes(state.attributes);
        Ok(true)
    }
}

impl<'a> IntoIterator for &'a Compound {
    type Item = &'a Node;
    type IntoIter = Values<'a, String, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.values()
    }
}

impl<'a> IntoIterator for &'a mut Compound {
    type Item = &'a mut Node;
    type IntoIter = ValuesMut<'a, String, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.values_mut()
    }
}
