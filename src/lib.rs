//! Purpose: Shared library crate used by the `shardkeep` CLI, workers, and tests.
//! Exports: `api` (public surface) and `core` (workspace, components, payloads, errors).
//! Role: Persistence and shard workspace-isolation layer for stateful components.
//! Invariants: Prefer `api` paths from outside the crate; `core` layout may move.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
