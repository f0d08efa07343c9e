// Tagged-variant dispatch over every registered component kind.
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::core::component::{Component, MetaComponent};
use crate::core::compound::Compound;
use crate::core::error::{Error, ErrorKind};
use crate::core::indexer::{BinaryIndexer, VectorIndexer};
use crate::core::payload::IndexView;
use crate::core::workspace::Identity;

#[derive(Debug)]
pub enum Node {
    Meta(MetaComponent),
    Binary(BinaryIndexer),
    Vector(VectorIndexer),
    Compound(Compound),
}

macro_rules! each_node {
    ($node:expr, $inner:ident => $body:expr) => {
        match $node {
            Node::Meta($inner) => $body,
            Node::Binary($inner) => $body,
            Node::Vector($inner) => $body,
            Node::Compound($inner) => $body,
        }
    };
}

impl Component for Node {
    fn identity(&self) -> &Identity {
        each_node!(self, inner => inner.identity())
    }

    fn kind(&self) -> &'static str {
        each_node!(self, inner => inner.kind())
    }

    fn is_dirty(&self) -> bool {
        each_node!(self, inner => inner.is_dirty())
    }

    fn touch(&mut self) {
        each_node!(self, inner => inner.touch())
    }

    fn save_to(&mut self, path: &Path) -> Result<(), Error> {
        each_node!(self, inner => inner.save_to(path))
    }

    fn restore_from(&mut self, path: &Path) -> Result<bool, Error> {
        each_node!(self, inner => inner.restore_from(path))
    }
}

impl Node {
    pub fn as_meta_mut(&mut self) -> Option<&mut MetaComponent> {
        match self {
            Node::Meta(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryIndexer> {
        match self {
            Node::Binary(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_binary_mut(&mut self) -> Option<&mut BinaryIndexer> {
        match self {
            Node::Binary(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorIndexer> {
        match self {
            Node::Vector(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_vector_mut(&mut self) -> Option<&mut VectorIndexer> {
        match self {
            Node::Vector(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Node::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    pub fn as_compound_mut(&mut self) -> Option<&mut Compound> {
        match self {
            Node::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        match self {
            Node::Meta(meta) => meta.attributes(),
            Node::Binary(index) => index.attributes(),
            Node::Vector(index) => index.attributes(),
            Node::Compound(compound) => compound.attributes(),
        }
    }

    /// Walks `/`-separated child names from this node; the empty path is the node itself.
    pub fn find_mut(&mut self, path: &str) -> Result<&mut Node, Error> {
        let mut node = self;
        for name in path.split('/').filter(|segment| !segment.is_empty()) {
            node = match node {
                Node::Compound(compound) => compound.get_mut(name)?,
                other => {
                    return Err(Error::new(ErrorKind::NotFound)
                        .with_message(format!("{} component has no child {name:?}", other.kind()))
                        .with_component(other.identity()));
                }
            };
        }
        Ok(node)
    }

    pub fn payload_path(&self) -> Option<PathBuf> {
        match self {
            Node::Binary(index) => Some(index.payload_path()),
            Node::Vector(index) => Some(index.payload_path()),
            Node::Meta(_) | Node::Compound(_) => None,
        }
    }

    /// Entry count for indexers, `None` for other kinds.
    pub fn size(&self) -> Option<u64> {
        match self {
            Node::Binary(index) => Some(index.size()),
            Node::Vector(index) => Some(index.size()),
            Node::Meta(_) | Node::Compound(_) => None,
        }
    }

    pub fn read_handle(&mut self) -> Result<&IndexView, Error> {
        if matches!(self, Node::Meta(_) | Node::Compound(_)) {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("{} component has no index payload", self.kind()))
                .with_component(self.identity()));
        }
        match self {
            Node::Binary(index) => index.read_handle(),
            Node::Vector(index) => index.read_handle(),
            Node::Meta(_) | Node::Compound(_) => Err(Error::new(ErrorKind::Internal)),
        }
    }
}

impl From<MetaComponent> for Node {
    fn from(component: MetaComponent) -> Self {
        Node::Meta(component)
    }
}

impl From<BinaryIndexer> for Node {
    fn from(component: BinaryIndexer) -> Self {
        Node::Binary(component)
    }
}

impl From<VectorIndexer> for Node {
    fn from(component: VectorIndexer) -> Self {
        Node::Vector(component)
    }
}

impl From<Compound> for Node {
    fn from(component: Compound) -> Self {
        Node::Compound(component)
    }
}
