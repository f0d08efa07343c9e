//! Purpose: Single error type for every component, workspace, and payload operation.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Carries enough context (component, shard, path) to diagnose multi-shard failures.
//! Invariants: `ErrorKind` variants are stable; exit codes never get renumbered.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::workspace::Identity;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Config,
    InvalidWorkspace,
    Persistence,
    CorruptState,
    TypeMismatch,
    NotFound,
    IndexUnavailable,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    component: Option<String>,
    shard_id: Option<u32>,
    path: Option<PathBuf>,
    hint: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            component: None,
            shard_id: None,
            path: None,
            hint: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    pub fn shard_id(&self) -> Option<u32> {
        self.shard_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_component(mut self, identity: &Identity) -> Self {
        self.component = Some(identity.name().to_string());
        self.shard_id = identity.shard_id();
        self
    }

    pub fn with_component_name(mut self, name: impl Into<String>) -> Self {
        self.component = Some(name.into());
        self
    }

    pub fn with_shard_id(mut self, shard_id: Option<u32>) -> Self {
        self.shard_id = shard_id;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Fills in component context only where the error does not already carry it.
    pub(crate) fn or_component(mut self, identity: &Identity) -> Self {
        if self.component.is_none() {
            self.component = Some(identity.name().to_string());
            self.shard_id = identity.shard_id();
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(component) = &self.component {
            write!(f, " (component: {component})")?;
        }
        if let Some(shard_id) = self.shard_id {
            write!(f, " (shard: {shard_id})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Config => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::InvalidWorkspace => 4,
        ErrorKind::TypeMismatch => 5,
        ErrorKind::IndexUnavailable => 6,
        ErrorKind::CorruptState => 7,
        ErrorKind::Persistence => 8,
    }
}
