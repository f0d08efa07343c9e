//! Purpose: Scoped acquisition that saves a component exactly once on release.
//! Exports: `Scoped`, `with_scoped`.
//! Role: Guard used by workers to bound a component's open lifetime.
//! Invariants: Save runs once on every exit path, including errors and panics.
//! Invariants: Drop-time save failures are logged; `release` returns them.
use std::ops::{Deref, DerefMut};

use tracing::error;

use crate::core::component::Component;
use crate::core::error::Error;

pub struct Scoped<C: Component> {
    component: C,
    released: bool,
}

impl<C: Component> Scoped<C> {
    pub fn acquire(component: C) -> Self {
        Self {
            component,
            released: false,
        }
    }

    /// Saves (if dirty) and ends the scope, surfacing any save error.
    pub fn release(mut self) -> Result<(), Error> {
        self.released = true;
        self.component.save()
    }
}

impl<C: Component> Deref for Scoped<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.component
    }
}

impl<C: Component> DerefMut for Scoped<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.component
    }
}

impl<C: Component> Drop for Scoped<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.component.save() {
            error!(
                component = %self.component.name(),
                shard = ?self.component.shard_id(),
                error = %err,
                "save on scope exit failed"
            );
        }
    }
}

/// Runs `body` inside a scope; the body's error wins over a release error.
pub fn with_scoped<C, T, F>(component: C, body: F) -> Result<T, Error>
where
    C: Component,
    F: FnOnce(&mut C) -> Result<T, Error>,
{
    let mut scoped = Scoped::acquire(component);
    let outcome = body(&mut scoped);
    let released = scoped.release();
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            error!(error = %release_err, "save on scope exit failed after body error");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Scoped, with_scoped};
    use crate::core::component::{Component, MetaComponent};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::workspace::{Identity, Workspace};

    fn meta(dir: &std::path::Path) -> MetaComponent {
        let workspace = Arc::new(Workspace::open(dir).expect("workspace"));
        let identity = Identity::new("scoped", None, Some(0), true, workspace).expect("identity");
        MetaComponent::construct(identity)
    }

    #[test]
    fn drop_saves_dirty_component() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = {
            let mut scoped = Scoped::acquire(meta(dir.path()));
            scoped.touch();
            scoped.snapshot_path()
        };
        assert!(path.exists());
    }

    #[test]
    fn clean_scope_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scoped = Scoped::acquire(meta(dir.path()));
        let path = scoped.snapshot_path();
        scoped.release().expect("release");
        assert!(!path.exists());
    }

    #[test]
    fn body_error_still_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = meta(dir.path());
        let path = component.snapshot_path();
        let result: Result<(), Error> = with_scoped(component, |meta| {
            meta.set_attr("step", 1);
            Err(Error::new(ErrorKind::NotFound).with_message("caller failure"))
        });
        assert_eq!(result.expect_err("body").kind(), ErrorKind::NotFound);
        assert!(path.exists());
    }

    #[test]
    fn panic_in_scope_still_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = meta(dir.path());
        let path = component.snapshot_path();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scoped = Scoped::acquire(component);
            scoped.touch();
            panic!("worker crashed");
        }));
        assert!(outcome.is_err());
        assert!(path.exists());
    }
}
