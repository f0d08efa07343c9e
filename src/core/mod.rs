// Core modules implementing placement, persistence, indexing, and error modeling.
pub mod component;
pub mod compound;
pub mod config;
pub mod error;
pub mod format;
pub mod indexer;
pub mod key;
pub mod node;
pub mod payload;
pub mod registry;
pub mod scope;
pub mod snapshot;
pub mod workspace;
