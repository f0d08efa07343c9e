//! Purpose: Declarative JSON description of a component tree and load-time overrides.
//! Exports: `ComponentSpec`, `Metas`, `LoadOptions`, `WORKSPACE_ENV`.
//! Role: Schema validation boundary; everything past here works on typed values.
//! Invariants: Unknown fields are rejected, never ignored.
//! Invariants: Load options override metas; children inherit workspace, shard, and isolation.
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

pub const WORKSPACE_ENV: &str = "SHARDKEEP_WORKSPACE";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(default, alias = "pea_id", skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separated_workspace: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    pub kind: String,
    #[serde(default, rename = "with", skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub metas: Metas,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentSpec>,
}

impl ComponentSpec {
    pub fn from_value(value: Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!("invalid component config: {err}"))
                .with_source(err)
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("failed to read component config")
                .with_path(path)
                .with_source(err)
        })?;
        text.parse::<Self>().map_err(|err| err.with_path(path))
    }

    pub fn name(&self) -> Result<&str, Error> {
        self.metas.name.as_deref().ok_or_else(|| {
            Error::new(ErrorKind::Config)
                .with_message(format!("{} component is missing metas.name", self.kind))
        })
    }

    /// Decodes the `with` block into a kind-specific options struct.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(Value::Object(self.options.clone())).map_err(|err| {
            let error = Error::new(ErrorKind::Config)
                .with_message(format!("invalid `with` options for {}: {err}", self.kind));
            match &self.metas.name {
                Some(name) => error.with_component_name(name),
                None => error,
            }
        })
    }

    /// Children may only name themselves; placement comes from the root.
    pub(crate) fn validate_child_metas(&self) -> Result<(), Error> {
        let Metas {
            name: _,
            workspace,
            shard_id,
            separated_workspace,
        } = &self.metas;
        if workspace.is_some() || shard_id.is_some() || separated_workspace.is_some() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("nested components inherit workspace, shard_id, and separated_workspace")
                .with_component_name(self.metas.name.clone().unwrap_or_default())
                .with_hint("Set placement metas on the root component only."));
        }
        Ok(())
    }
}

impl FromStr for ComponentSpec {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!("invalid component config: {err}"))
                .with_source(err)
        })
    }
}

/// Per-process overrides applied on top of the root's metas.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadOptions {
    pub shard_id: Option<u32>,
    pub separated_workspace: Option<bool>,
    pub workspace: Option<PathBuf>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard_id(mut self, shard_id: u32) -> Self {
        self.shard_id = Some(shard_id);
        self
    }

    pub fn separated(mut self, separated: bool) -> Self {
        self.separated_workspace = Some(separated);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }
}

/// Placement of a tree's root after overrides and fallbacks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RootPlacement {
    pub workspace: PathBuf,
    pub shard_id: Option<u32>,
    pub isolate: bool,
}

pub(crate) fn root_placement(spec: &ComponentSpec, options: &LoadOptions) -> Result<RootPlacement, Error> {
    let workspace = options
        .workspace
        .clone()
        .or_else(|| spec.metas.workspace.clone())
        .or_else(|| std::env::var_os(WORKSPACE_ENV).map(PathBuf::from))
        .ok_or_else(|| {
            Error::new(ErrorKind::Config)
                .with_message("no workspace configured")
                .with_component_name(spec.metas.name.clone().unwrap_or_default())
                .with_hint(format!(
                    "Set metas.workspace, pass --workspace, or export {WORKSPACE_ENV}."
                ))
        })?;
    Ok(RootPlacement {
        workspace,
        shard_id: options.shard_id.or(spec.metas.shard_id),
        isolate: options
            .separated_workspace
            .or(spec.metas.separated_workspace)
            .unwrap_or(false),
    })
}
