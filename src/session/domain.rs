//! Working area: one request's on-disk session and its lifecycle.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::error::{FlowError, FlowResult};
use crate::common::ids::SessionKey;

pub const TEMPLATE_DIR: &str = "openfoam-case-template";
pub const DATA_CONFIG_FILE: &str = "data_config.json";
pub const TRANSFORMS_FILE: &str = "transforms.json";
pub const MIN_POINTS_FILE: &str = "min_points.json";
pub const META_FILE: &str = "meta.json";

/// Lifecycle of a working area. Transitions only move forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum AreaState {
    Created,
    Populated,
    Consumed,
    Deleted,
}

/// Set of keys that currently own a request.
pub type ActiveKeys = Arc<Mutex<HashSet<String>>>;

/// Reservation of a key in the in-flight set, released on drop.
#[derive(Debug)]
pub struct SessionLease {
    key: SessionKey,
    active: ActiveKeys,
}

impl SessionLease {
    /// Fails with `SessionConflict` if the key is already in flight.
    pub fn acquire(active: &ActiveKeys, key: &SessionKey) -> FlowResult<Self> {
        let mut guard = active.lock();
        if !guard.insert(key.as_str().to_string()) {
            return Err(FlowError::conflict(format!(
                "identifier {key} is already in flight"
            )));
        }
        Ok(Self {
            key: key.clone(),
            active: Arc::clone(active),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.active.lock().remove(self.key.as_str());
    }
}

/// Directory tree owned by exactly one request.
///
/// The tree is removed by [`WorkingArea::delete`] or, failing that, when the
/// value is dropped. The key stays reserved until the value is dropped, so a
/// request keeps its identifier after the tree is gone.
#[derive(Debug)]
pub struct WorkingArea {
    root: PathBuf,
    state: AreaState,
    lease: SessionLease,
}

impl WorkingArea {
    pub(crate) fn new(lease: SessionLease, root: PathBuf) -> Self {
        Self {
            root,
            state: AreaState::Created,
            lease,
        }
    }

    pub fn key(&self) -> &SessionKey {
        self.lease.key()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    /// Where the exported outline mesh is written.
    pub fn mesh_dir(&self) -> PathBuf {
        self.assets_dir().join("meshes").join("split")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Prepared dataset split read by the loader.
    pub fn split_dir(&self) -> PathBuf {
        self.data_dir().join("split")
    }

    pub fn state(&self) -> AreaState {
        self.state
    }

    /// Case generation finished writing into the tree.
    pub fn mark_populated(&mut self) {
        self.advance(AreaState::Populated);
    }

    /// Case contents are now held in memory.
    pub fn mark_consumed(&mut self) {
        self.advance(AreaState::Consumed);
    }

    fn advance(&mut self, next: AreaState) {
        if self.state < next {
            self.state = next;
        }
    }

    /// Remove the tree. Repeated calls are no-ops.
    pub fn delete(&mut self) -> FlowResult<()> {
        if self.state == AreaState::Deleted {
            return Ok(());
        }
        remove_tree(&self.root).map_err(|err| {
            FlowError::io(&format!("remove {}", self.root.display()), err)
        })?;
        self.state = AreaState::Deleted;
        Ok(())
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if self.state == AreaState::Deleted {
            return;
        }
        if let Err(err) = remove_tree(&self.root) {
            tracing::warn!(
                session = %self.lease.key(),
                path = %self.root.display(),
                error = %err,
                "working area could not be removed on drop"
            );
        }
    }
}

/// `remove_dir_all` that treats a missing tree as already removed.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
