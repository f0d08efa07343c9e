//! Purpose: Define the stable public Rust API boundary for shardkeep.
//! Exports: Component types, registry, scoped guard, workspace resolution, and errors.
//! Role: Public, additive-only surface; hides payload and snapshot encoding details.
//! Invariants: Workers and the CLI reach storage only through these re-exports.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::component::{Component, MetaComponent};
pub use crate::core::compound::{ChildRef, Compound, SaveReport};
pub use crate::core::config::{ComponentSpec, LoadOptions, Metas, WORKSPACE_ENV};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::indexer::{BinaryIndexer, IndexOptions, Metric, VectorIndexer};
pub use crate::core::key::{EntryKey, UniqueId};
pub use crate::core::node::Node;
pub use crate::core::payload::{EntryRef, IndexView, ValueKind};
pub use crate::core::registry::{BuildContext, Factory, Registry};
pub use crate::core::scope::{Scoped, with_scoped};
pub use crate::core::workspace::{Identity, Role, Workspace, resolve};
