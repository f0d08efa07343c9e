//! Purpose: Hold top-level CLI command dispatch for `shardkeep`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `paths` builds without reading snapshots; `inspect` and `dump` restore.

use shardkeep::api::{Component, ComponentSpec, Registry};

use super::*;
use crate::tree_json::{entries_json, paths_json, tree_json};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    let registry = Registry::default();
    match command {
        Command::Paths { tree } => {
            let spec = ComponentSpec::from_path(&tree.config)?;
            let node = registry.construct(&spec, &tree.load_options())?;
            emit_json(json!({ "paths": paths_json(&node) }));
            Ok(RunOutcome::ok())
        }
        Command::Inspect { tree } => {
            let node = registry.load_path(&tree.config, &tree.load_options())?;
            emit_json(json!({ "tree": tree_json(&node) }));
            Ok(RunOutcome::ok())
        }
        Command::Dump {
            tree,
            component,
            limit,
        } => {
            let mut node = registry.load_path(&tree.config, &tree.load_options())?;
            let target = node.find_mut(&component)?;
            let name = target.name().to_string();
            let view = target.read_handle()?;
            let mut value = entries_json(view, limit);
            if let Value::Object(map) = &mut value {
                map.insert("component".to_string(), json!(name));
            }
            emit_json(value);
            Ok(RunOutcome::ok())
        }
    }
}
