//! Purpose: Map component identities onto files under a shared workspace root.
//! Exports: `Workspace`, `Identity`, `Role`, `resolve`, `validate_name`.
//! Role: The only place file names and shard directories are derived.
//! Invariants: Resolution is deterministic; same inputs always give the same path.
//! Invariants: With isolation on, distinct shard ids never share a directory.
//! Invariants: Snapshot and payload roles never resolve to the same file.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};

pub const SNAPSHOT_EXTENSION: &str = "bin";
pub const DEFAULT_PAYLOAD_EXTENSION: &str = "idx";
const SHARD_DIR_PREFIX: &str = "shard-";
const MAX_NAME_LEN: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role<'a> {
    Snapshot,
    Payload(&'a str),
}

impl Role<'_> {
    fn extension(&self) -> &str {
        match self {
            Role::Snapshot => SNAPSHOT_EXTENSION,
            Role::Payload(extension) => extension,
        }
    }
}

/// Absolute, existing base directory shared by every node of a component tree.
#[derive(Debug, Eq, PartialEq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        let root = std::path::absolute(root).map_err(|err| {
            Error::new(ErrorKind::InvalidWorkspace)
                .with_message("workspace root cannot be made absolute")
                .with_path(root)
                .with_source(err)
        })?;
        if root.exists() && !root.is_dir() {
            return Err(Error::new(ErrorKind::InvalidWorkspace)
                .with_message("workspace root is not a directory")
                .with_path(&root));
        }
        std::fs::create_dir_all(&root).map_err(|err| {
            Error::new(ErrorKind::InvalidWorkspace)
                .with_message("workspace root cannot be created")
                .with_path(&root)
                .with_source(err)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file of components owned by `owner` (a `/`-separated chain).
    pub fn owner_dir(&self, owner: &str, shard_id: Option<u32>, isolate: bool) -> PathBuf {
        let dir = self.root.join(owner);
        match (isolate, shard_id) {
            (true, Some(shard_id)) => dir.join(format!("{SHARD_DIR_PREFIX}{shard_id}")),
            _ => dir,
        }
    }
}

/// Who a component is and where its files live.
#[derive(Clone, Debug)]
pub struct Identity {
    name: String,
    /// `/`-separated chain of owning components, outermost first.
    owner: String,
    lineage: String,
    shard_id: Option<u32>,
    isolate: bool,
    workspace: Arc<Workspace>,
}

impl Identity {
    pub fn new(
        name: impl Into<String>,
        owner: Option<&str>,
        shard_id: Option<u32>,
        isolate: bool,
        workspace: Arc<Workspace>,
    ) -> Result<Self, Error> {
        let name = name.into();
        validate_name(&name)?;
        let owner = match owner {
            Some(owner) => {
                owner.split('/').try_for_each(validate_name)?;
                owner.to_string()
            }
            None => name.clone(),
        };
        let lineage = if owner == name {
            name.clone()
        } else {
            format!("{owner}/{name}")
        };
        if isolate && shard_id.is_none() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("separated workspace requires a shard id")
                .with_component_name(&name)
                .with_hint("Set metas.shard_id or pass a shard id when loading."));
        }
        Ok(Self {
            name,
            owner,
            lineage,
            shard_id,
            isolate,
            workspace,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Path of this component from the tree root, e.g. `outer/a/b`.
    pub fn lineage(&self) -> &str {
        &self.lineage
    }

    pub fn shard_id(&self) -> Option<u32> {
        self.shard_id
    }

    pub fn isolate(&self) -> bool {
        self.isolate
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn current_workspace(&self) -> PathBuf {
        self.workspace
            .owner_dir(&self.owner, self.shard_id, self.isolate)
    }

    pub fn path(&self, role: Role<'_>) -> PathBuf {
        self.current_workspace()
            .join(format!("{}.{}", self.name, role.extension()))
    }

    /// Identity of a child owned by this component, inheriting shard and workspace.
    /// The child's owner is this component's full lineage, so same-named compounds at
    /// different depths never share a directory.
    pub fn child(&self, name: impl Into<String>) -> Result<Identity, Error> {
        Identity::new(
            name,
            Some(&self.lineage),
            self.shard_id,
            self.isolate,
            Arc::clone(&self.workspace),
        )
    }
}

pub fn resolve(
    workspace_root: impl AsRef<Path>,
    component_name: &str,
    shard_id: Option<u32>,
    owner_name: &str,
    role: Role<'_>,
    isolate: bool,
) -> Result<PathBuf, Error> {
    validate_role(role)?;
    let workspace = Arc::new(Workspace::open(workspace_root)?);
    let identity = Identity::new(component_name, Some(owner_name), shard_id, isolate, workspace)?;
    Ok(identity.path(role))
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Config).with_message("component name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::new(ErrorKind::Config)
            .with_message(format!("component name exceeds {MAX_NAME_LEN} bytes")));
    }
    let valid = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if !valid {
        return Err(Error::new(ErrorKind::Config)
            .with_message(format!("component name {name:?} has characters outside [A-Za-z0-9_-]")));
    }
    Ok(())
}

pub fn validate_role(role: Role<'_>) -> Result<(), Error> {
    let Role::Payload(extension) = role else {
        return Ok(());
    };
    if extension == SNAPSHOT_EXTENSION {
        return Err(Error::new(ErrorKind::Config)
            .with_message("index file suffix collides with the snapshot suffix")
            .with_hint(format!("Pick an index_filename other than {SNAPSHOT_EXTENSION:?}.")));
    }
    validate_name(extension)
        .map_err(|err| err.with_hint("index_filename must be a plain file suffix."))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Identity, Role, Workspace, resolve, validate_name};
    use crate::core::error::ErrorKind;

    #[test]
    fn resolve_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = resolve(dir.path(), "vec", Some(3), "vec", Role::Snapshot, true).expect("path");
        let second = resolve(dir.path(), "vec", Some(3), "vec", Role::Snapshot, true).expect("path");
        assert_eq!(first, second);
        assert!(first.is_absolute());
        assert!(first.ends_with("vec/shard-3/vec.bin"));
    }

    #[test]
    fn isolated_shards_never_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["a", "idx-1", "test_numpy"] {
            let mut seen = std::collections::HashSet::new();
            for shard in 0..16 {
                for role in [Role::Snapshot, Role::Payload("idx")] {
                    let path = resolve(dir.path(), name, Some(shard), "owner", role, true)
                        .expect("path");
                    assert!(seen.insert(path), "collision for {name} shard {shard}");
                }
            }
        }
    }

    #[test]
    fn owner_disambiguates_same_named_children() {
        let dir = tempfile::tempdir().expect("tempdir");
        let left = resolve(dir.path(), "meta", Some(1), "left", Role::Snapshot, true).expect("left");
        let right =
            resolve(dir.path(), "meta", Some(1), "right", Role::Snapshot, true).expect("right");
        assert_ne!(left, right);
    }

    #[test]
    fn child_owner_is_the_full_lineage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(Workspace::open(dir.path()).expect("workspace"));
        let outer = Identity::new("outer", None, Some(1), true, workspace).expect("outer");
        let deep = outer
            .child("a")
            .and_then(|a| a.child("b"))
            .and_then(|b| b.child("leaf"))
            .expect("deep");
        let shallow = outer
            .child("b")
            .and_then(|b| b.child("leaf"))
            .expect("shallow");
        assert_eq!(deep.owner(), "outer/a/b");
        assert_eq!(deep.lineage(), "outer/a/b/leaf");
        assert_eq!(shallow.owner(), "outer/b");
        assert_ne!(deep.path(Role::Payload("idx")), shallow.path(Role::Payload("idx")));
        assert!(deep.path(Role::Snapshot).ends_with("outer/a/b/shard-1/leaf.bin"));
        assert!(outer.child("a").expect("a").path(Role::Snapshot).ends_with("outer/shard-1/a.bin"));
    }

    #[test]
    fn shard_is_ignored_without_isolation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = resolve(dir.path(), "vec", Some(1), "vec", Role::Payload("idx"), false).expect("a");
        let b = resolve(dir.path(), "vec", Some(2), "vec", Role::Payload("idx"), false).expect("b");
        assert_eq!(a, b);
        assert!(a.ends_with("vec/vec.idx"));
    }

    #[test]
    fn isolation_without_shard_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolve(dir.path(), "vec", None, "vec", Role::Snapshot, true).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn payload_suffix_cannot_shadow_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err =
            resolve(dir.path(), "vec", Some(0), "vec", Role::Payload("bin"), true).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn root_that_is_a_file_is_invalid_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").expect("write");
        let err = Workspace::open(&file).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidWorkspace);

        let err = Workspace::open(file.join("nested")).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidWorkspace);
    }

    #[test]
    fn missing_root_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("a").join("b");
        let workspace = Workspace::open(&root).expect("open");
        assert!(workspace.root().is_dir());
    }

    #[test]
    fn names_reject_path_separators() {
        assert!(validate_name("ok_name-1").is_ok());
        assert_eq!(validate_name("a/b").expect_err("err").kind(), ErrorKind::Config);
        assert_eq!(validate_name("..").expect_err("err").kind(), ErrorKind::Config);
        assert_eq!(validate_name("").expect_err("err").kind(), ErrorKind::Config);
    }
}
